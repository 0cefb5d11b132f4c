//! Remote control for a two-motor differential-drive rover on a PCA9685
//! motor-driver HAT.
//!
//! [`motor::Rover`] turns forward/backward/pivot/stop commands into duty-cycle
//! and direction-pin writes. Three front-ends sit on top of it: a scripted
//! [`demo`], a keyboard [`teleop`] for SSH sessions and a browser control panel
//! in [`web`] with camera streaming, a reversing beep and scene description.

pub mod beep;
pub mod camera;
pub mod config;
pub mod demo;
pub mod messages;
pub mod motor;
pub mod shutdown;
pub mod teleop;
pub mod vision;
pub mod web;

// Motor control module for the two-wheel rover
//
// Provides:
// - The PWM board contract the controller drives
// - PCA9685 implementation over embedded-hal I2C
// - An in-memory recording board for tests and dry runs
// - The differential-drive controller itself

mod device;
mod driver;
pub mod pca9685;
pub mod recording;

pub use device::{Level, PwmDevice};
pub use driver::{clamp_speed, Direction, MotorChannel, Polarity, Rover, Side};
pub use pca9685::{DeviceError, Pca9685Device};
pub use recording::{RecordingDevice, RecordingError};

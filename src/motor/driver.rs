// Differential-drive controller for the two-motor rover
//
// Each movement is decomposed into two per-motor writes: duty cycle on the
// side's speed channel, then the two direction pins. The right motor is
// mounted mirrored, so its pin polarity is inverted.

use tracing::{debug, info, warn};

use super::device::{Level, PwmDevice};
use crate::config::{
    DEFAULT_SPEED, LEFT_DIR_PIN_A, LEFT_DIR_PIN_B, LEFT_PWM_CHANNEL, MAX_SPEED, PWM_FREQUENCY_HZ,
    RIGHT_DIR_PIN_A, RIGHT_DIR_PIN_B, RIGHT_PWM_CHANNEL,
};
use crate::messages::Command;

/// Clamp any requested speed into 0..=100
pub fn clamp_speed(value: i32) -> u8 {
    value.clamp(0, i32::from(MAX_SPEED)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// How a motor's direction pins map onto rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// forward = (low, high)
    Normal,
    /// forward = (high, low)
    Mirrored,
}

impl Polarity {
    /// Levels for (pin_a, pin_b). Always complementary.
    pub fn pins(self, direction: Direction) -> (Level, Level) {
        match (self, direction) {
            (Polarity::Normal, Direction::Forward) | (Polarity::Mirrored, Direction::Backward) => {
                (Level::Low, Level::High)
            }
            (Polarity::Normal, Direction::Backward) | (Polarity::Mirrored, Direction::Forward) => {
                (Level::High, Level::Low)
            }
        }
    }
}

/// PWM and direction channels of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorChannel {
    pub pwm_channel: u8,
    pub dir_pin_a: u8,
    pub dir_pin_b: u8,
    pub polarity: Polarity,
}

impl MotorChannel {
    /// Motor A on the HAT
    pub const LEFT: Self = Self {
        pwm_channel: LEFT_PWM_CHANNEL,
        dir_pin_a: LEFT_DIR_PIN_A,
        dir_pin_b: LEFT_DIR_PIN_B,
        polarity: Polarity::Normal,
    };

    /// Motor B on the HAT
    pub const RIGHT: Self = Self {
        pwm_channel: RIGHT_PWM_CHANNEL,
        dir_pin_a: RIGHT_DIR_PIN_A,
        dir_pin_b: RIGHT_DIR_PIN_B,
        polarity: Polarity::Mirrored,
    };
}

/// High-level controller for the rover's two drive motors
///
/// Not thread-safe: wrap it in a `Mutex` when several tasks issue commands.
pub struct Rover<D: PwmDevice> {
    device: D,
    left: MotorChannel,
    right: MotorChannel,
    default_speed: u8,
}

impl<D: PwmDevice> Rover<D> {
    /// Take ownership of the PWM board using the Motor Driver HAT wiring
    pub fn new(device: D) -> Result<Self, D::Error> {
        Self::with_channels(device, MotorChannel::LEFT, MotorChannel::RIGHT)
    }

    /// Create with a custom channel layout
    pub fn with_channels(
        mut device: D,
        left: MotorChannel,
        right: MotorChannel,
    ) -> Result<Self, D::Error> {
        device.set_pwm_frequency(PWM_FREQUENCY_HZ)?;
        info!(
            "Rover ready: {}Hz PWM, left={:?}, right={:?}",
            PWM_FREQUENCY_HZ, left, right
        );
        Ok(Self {
            device,
            left,
            right,
            default_speed: DEFAULT_SPEED,
        })
    }

    /// Store a new default speed (clamped). Running motors are not touched.
    pub fn set_speed(&mut self, value: i32) -> u8 {
        self.default_speed = clamp_speed(value);
        debug!("Default speed set to {}", self.default_speed);
        self.default_speed
    }

    pub fn default_speed(&self) -> u8 {
        self.default_speed
    }

    pub fn channel(&self, side: Side) -> MotorChannel {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Borrow the underlying PWM board
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Set one motor's speed and direction
    ///
    /// The duty cycle is written first; if that fails the pins are not touched.
    pub fn drive_motor(
        &mut self,
        side: Side,
        direction: Direction,
        speed: i32,
    ) -> Result<(), D::Error> {
        let speed = clamp_speed(speed);
        let ch = self.channel(side);
        let (a, b) = ch.polarity.pins(direction);

        debug!("{:?} motor {:?} at {}%", side, direction, speed);
        self.device.set_duty_cycle(ch.pwm_channel, speed)?;
        self.device.set_level(ch.dir_pin_a, a)?;
        self.device.set_level(ch.dir_pin_b, b)
    }

    /// Drive both motors, attempting the right side even if the left fails
    fn drive_both(
        &mut self,
        left: Direction,
        right: Direction,
        speed: Option<i32>,
    ) -> Result<(), D::Error> {
        let speed = speed.unwrap_or(i32::from(self.default_speed));
        let left_result = self.drive_motor(Side::Left, left, speed);
        let right_result = self.drive_motor(Side::Right, right, speed);
        left_result.and(right_result)
    }

    pub fn forward(&mut self, speed: Option<i32>) -> Result<(), D::Error> {
        self.drive_both(Direction::Forward, Direction::Forward, speed)
    }

    pub fn backward(&mut self, speed: Option<i32>) -> Result<(), D::Error> {
        self.drive_both(Direction::Backward, Direction::Backward, speed)
    }

    /// Pivot counter-clockwise in place
    pub fn left(&mut self, speed: Option<i32>) -> Result<(), D::Error> {
        self.drive_both(Direction::Backward, Direction::Forward, speed)
    }

    /// Pivot clockwise in place
    pub fn right(&mut self, speed: Option<i32>) -> Result<(), D::Error> {
        self.drive_both(Direction::Forward, Direction::Backward, speed)
    }

    /// Zero both duty cycles. Direction pins keep their last state.
    pub fn stop(&mut self) -> Result<(), D::Error> {
        debug!("Stopping both motors");
        let left_result = self.device.set_duty_cycle(self.left.pwm_channel, 0);
        let right_result = self.device.set_duty_cycle(self.right.pwm_channel, 0);
        left_result.and(right_result)
    }

    /// Run a semantic command; `speed` is ignored for `Stop`
    pub fn apply(&mut self, command: Command, speed: Option<i32>) -> Result<(), D::Error> {
        match command {
            Command::Forward => self.forward(speed),
            Command::Backward => self.backward(speed),
            Command::Left => self.left(speed),
            Command::Right => self.right(speed),
            Command::Stop => self.stop(),
        }
    }
}

impl<D: PwmDevice> Drop for Rover<D> {
    fn drop(&mut self) {
        // Never leave the motors running
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_speed() {
        assert_eq!(clamp_speed(-5), 0);
        assert_eq!(clamp_speed(0), 0);
        assert_eq!(clamp_speed(42), 42);
        assert_eq!(clamp_speed(100), 100);
        assert_eq!(clamp_speed(150), 100);
        assert_eq!(clamp_speed(i32::MIN), 0);
        assert_eq!(clamp_speed(i32::MAX), 100);
    }

    #[test]
    fn test_polarity_pins_are_complementary() {
        for polarity in [Polarity::Normal, Polarity::Mirrored] {
            for direction in [Direction::Forward, Direction::Backward] {
                let (a, b) = polarity.pins(direction);
                assert_ne!(a, b, "{:?} {:?}", polarity, direction);
            }
        }
    }

    #[test]
    fn test_mirrored_polarity_inverts_normal() {
        for direction in [Direction::Forward, Direction::Backward] {
            let (na, nb) = Polarity::Normal.pins(direction);
            assert_eq!(Polarity::Mirrored.pins(direction), (nb, na));
        }
    }

    #[test]
    fn test_hat_wiring() {
        assert_eq!(MotorChannel::LEFT.pwm_channel, 0);
        assert_eq!((MotorChannel::LEFT.dir_pin_a, MotorChannel::LEFT.dir_pin_b), (1, 2));
        assert_eq!(MotorChannel::RIGHT.pwm_channel, 5);
        assert_eq!((MotorChannel::RIGHT.dir_pin_a, MotorChannel::RIGHT.dir_pin_b), (3, 4));
        assert_eq!(MotorChannel::RIGHT.polarity, Polarity::Mirrored);
    }
}

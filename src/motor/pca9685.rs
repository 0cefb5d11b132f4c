// PCA9685 16-channel PWM controller (Waveshare Motor Driver HAT)
//
// Every output is driven as ON=0, OFF=<count> out of a 12-bit period:
// duty cycles scale 0..=100 onto 0..=4095, digital levels are 0 or 4095.

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address, Channel, Error as PwmError, Pca9685};
use tracing::{debug, info};

use super::device::{Level, PwmDevice};

/// Internal oscillator frequency
const OSCILLATOR_HZ: f32 = 25_000_000.0;

/// Counts per PWM period (12-bit)
const PERIOD_COUNTS: f32 = 4096.0;

/// Largest OFF count the chip accepts
pub const MAX_COUNT: u16 = 4095;

/// Prescale register bounds from the datasheet
const PRESCALE_MIN: f32 = 3.0;
const PRESCALE_MAX: f32 = 255.0;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

/// Error types for PCA9685 communication
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to open I2C bus {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("I2C transfer failed: {0}")]
    Bus(String),

    #[error("Invalid PWM request: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

fn pwm_error<E: core::fmt::Debug>(err: PwmError<E>) -> DeviceError {
    match err {
        PwmError::I2C(e) => DeviceError::Bus(format!("{:?}", e)),
        _ => DeviceError::InvalidInput("value rejected by PCA9685 driver".to_string()),
    }
}

/// Prescale value for a PWM frequency: round(osc / (4096 * hz)) - 1
pub fn prescale_for(hz: u16) -> u8 {
    let raw = OSCILLATOR_HZ / (PERIOD_COUNTS * f32::from(hz.max(1))) - 1.0;
    (raw + 0.5).floor().clamp(PRESCALE_MIN, PRESCALE_MAX) as u8
}

/// OFF count for a duty-cycle percentage
pub fn duty_to_count(percent: u8) -> u16 {
    let percent = u32::from(percent.min(100));
    (percent * u32::from(MAX_COUNT) / 100) as u16
}

fn channel(index: u8) -> Result<Channel> {
    CHANNELS
        .get(usize::from(index))
        .copied()
        .ok_or_else(|| DeviceError::InvalidInput(format!("channel {} out of range 0..=15", index)))
}

/// PCA9685 board on an embedded-hal I2C bus
pub struct Pca9685Device<I2C> {
    pwm: Pca9685<I2C>,
}

impl<I2C, E> Pca9685Device<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Attach to the chip at `address` and wake it from sleep
    pub fn new(i2c: I2C, address: u8) -> Result<Self> {
        let mut pwm = Pca9685::new(i2c, Address::from(address)).map_err(pwm_error)?;
        pwm.enable().map_err(pwm_error)?;
        info!("PCA9685 at 0x{:02X} enabled", address);
        Ok(Self { pwm })
    }

    /// Give the I2C bus back
    pub fn release(self) -> I2C {
        self.pwm.destroy()
    }

    fn write_count(&mut self, index: u8, off: u16) -> Result<()> {
        let ch = channel(index)?;
        self.pwm.set_channel_on_off(ch, 0, off).map_err(pwm_error)
    }
}

#[cfg(target_os = "linux")]
impl Pca9685Device<linux_embedded_hal::I2cdev> {
    /// Open the PCA9685 through a Linux i2c-dev node such as `/dev/i2c-1`
    pub fn open_linux(path: &str, address: u8) -> Result<Self> {
        info!("Opening I2C bus {}", path);
        let i2c = linux_embedded_hal::I2cdev::new(path).map_err(|e| DeviceError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::new(i2c, address)
    }
}

impl<I2C, E> PwmDevice for Pca9685Device<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    type Error = DeviceError;

    fn set_pwm_frequency(&mut self, hz: u16) -> Result<()> {
        let prescale = prescale_for(hz);
        debug!("PWM frequency {} Hz -> prescale {}", hz, prescale);
        self.pwm.set_prescale(prescale).map_err(pwm_error)
    }

    fn set_duty_cycle(&mut self, channel: u8, percent: u8) -> Result<()> {
        let off = duty_to_count(percent);
        debug!("Duty ch{} = {}% (off={})", channel, percent, off);
        self.write_count(channel, off)
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<()> {
        let off = match level {
            Level::High => MAX_COUNT,
            Level::Low => 0,
        };
        debug!("Level ch{} = {:?}", pin, level);
        self.write_count(pin, off)
    }
}

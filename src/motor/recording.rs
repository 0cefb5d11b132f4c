//! In-memory PWM board.
//!
//! Stands in for the PCA9685 in tests and in `--dry-run` mode. Every write is
//! applied to a per-channel state table and appended to an ordered log so that
//! both the final outputs and the write sequence can be inspected. The log is
//! bounded so a long `--dry-run` session does not grow without limit.

use tracing::debug;

use super::device::{Level, PwmDevice};

/// Number of channels on the emulated board
pub const CHANNEL_COUNT: usize = 16;

/// Writes kept in the log; the oldest half is discarded when full
pub const LOG_CAPACITY: usize = 4096;

/// One recorded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    Frequency(u16),
    Duty { channel: u8, percent: u8 },
    Level { pin: u8, level: Level },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordingError {
    #[error("Channel {0} out of range")]
    NoSuchChannel(u8),

    #[error("Simulated write failure on channel {0}")]
    Injected(u8),
}

/// PWM board that records instead of driving hardware
#[derive(Debug, Clone)]
pub struct RecordingDevice {
    frequency: Option<u16>,
    duty: [u8; CHANNEL_COUNT],
    levels: [Option<Level>; CHANNEL_COUNT],
    log: Vec<Write>,
    failing: Option<u8>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self {
            frequency: None,
            duty: [0; CHANNEL_COUNT],
            levels: [None; CHANNEL_COUNT],
            log: Vec::new(),
            failing: None,
        }
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `channel` fail
    pub fn failing_on(mut self, channel: u8) -> Self {
        self.failing = Some(channel);
        self
    }

    pub fn frequency(&self) -> Option<u16> {
        self.frequency
    }

    pub fn duty(&self, channel: u8) -> u8 {
        self.duty[usize::from(channel)]
    }

    /// Last level written to `pin`, `None` if never written
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.levels[usize::from(pin)]
    }

    /// Levels of a direction pin pair as (a, b) bits, `None` if either is unset
    pub fn pin_pair(&self, a: u8, b: u8) -> Option<(u8, u8)> {
        let bit = |level: Level| match level {
            Level::Low => 0,
            Level::High => 1,
        };
        Some((bit(self.level(a)?), bit(self.level(b)?)))
    }

    pub fn log(&self) -> &[Write] {
        &self.log
    }

    fn record(&mut self, write: Write) {
        if self.log.len() >= LOG_CAPACITY {
            self.log.drain(..LOG_CAPACITY / 2);
        }
        self.log.push(write);
    }

    fn check(&self, channel: u8) -> Result<usize, RecordingError> {
        if self.failing == Some(channel) {
            return Err(RecordingError::Injected(channel));
        }
        let index = usize::from(channel);
        if index >= CHANNEL_COUNT {
            return Err(RecordingError::NoSuchChannel(channel));
        }
        Ok(index)
    }
}

impl PwmDevice for RecordingDevice {
    type Error = RecordingError;

    fn set_pwm_frequency(&mut self, hz: u16) -> Result<(), RecordingError> {
        self.frequency = Some(hz);
        self.record(Write::Frequency(hz));
        Ok(())
    }

    fn set_duty_cycle(&mut self, channel: u8, percent: u8) -> Result<(), RecordingError> {
        let index = self.check(channel)?;
        debug!("[dry-run] duty ch{} = {}%", channel, percent);
        self.duty[index] = percent;
        self.record(Write::Duty { channel, percent });
        Ok(())
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), RecordingError> {
        let index = self.check(pin)?;
        debug!("[dry-run] level ch{} = {:?}", pin, level);
        self.levels[index] = Some(level);
        self.record(Write::Level { pin, level });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_state_and_log() {
        let mut dev = RecordingDevice::new();
        dev.set_pwm_frequency(50).unwrap();
        dev.set_duty_cycle(5, 40).unwrap();
        dev.set_level(3, Level::High).unwrap();
        dev.set_level(4, Level::Low).unwrap();

        assert_eq!(dev.frequency(), Some(50));
        assert_eq!(dev.duty(5), 40);
        assert_eq!(dev.pin_pair(3, 4), Some((1, 0)));
        assert_eq!(dev.pin_pair(1, 2), None);
        assert_eq!(dev.log().len(), 4);
        assert_eq!(
            dev.log()[1],
            Write::Duty {
                channel: 5,
                percent: 40
            }
        );
    }

    #[test]
    fn test_injected_failure_leaves_state_untouched() {
        let mut dev = RecordingDevice::new().failing_on(0);
        assert_eq!(dev.set_duty_cycle(0, 70), Err(RecordingError::Injected(0)));
        assert_eq!(dev.duty(0), 0);
        assert!(dev.log().is_empty());
    }

    #[test]
    fn test_log_is_bounded() {
        let mut dev = RecordingDevice::new();
        for i in 0..LOG_CAPACITY + 10 {
            dev.set_duty_cycle(0, (i % 101) as u8).unwrap();
        }

        assert!(dev.log().len() <= LOG_CAPACITY);
        assert_eq!(dev.log().len(), LOG_CAPACITY / 2 + 10);
        let last = LOG_CAPACITY + 9;
        assert_eq!(
            dev.log().last(),
            Some(&Write::Duty {
                channel: 0,
                percent: (last % 101) as u8
            })
        );
        assert_eq!(dev.duty(0), (last % 101) as u8);
    }

    #[test]
    fn test_out_of_range_channel() {
        let mut dev = RecordingDevice::new();
        assert_eq!(
            dev.set_level(16, Level::High),
            Err(RecordingError::NoSuchChannel(16))
        );
    }
}

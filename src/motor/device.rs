// The three operations the rover needs from a PWM board

/// Logic level of a PWM channel used as a digital output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// A PWM driver exposing duty-cycle and digital-level outputs on numbered channels.
///
/// Implementations are not expected to be thread-safe; callers that share a
/// device across threads must serialize access themselves.
pub trait PwmDevice {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Configure the PWM output frequency. Called once at construction.
    fn set_pwm_frequency(&mut self, hz: u16) -> Result<(), Self::Error>;

    /// Set the duty cycle of `channel` as a percentage (0..=100)
    fn set_duty_cycle(&mut self, channel: u8, percent: u8) -> Result<(), Self::Error>;

    /// Drive `pin` fully low or fully high
    fn set_level(&mut self, pin: u8, level: Level) -> Result<(), Self::Error>;
}

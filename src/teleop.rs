// Keyboard teleop over SSH: WASD/arrows move, space stops, +/- speed, Q quits
//
// Reads single keystrokes in raw mode. Raw mode is held by a guard so the
// terminal is restored however the loop ends.

use std::io::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tracing::{info, warn};

use crate::config::{MAX_SPEED, TELEOP_MIN_SPEED, TELEOP_SPEED_STEP, TELEOP_START_SPEED};
use crate::messages::Command;
use crate::motor::{PwmDevice, Rover};

// How often the loop wakes to check for a shutdown request
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const HELP: &str = "\
Controls:
    W / Up Arrow    - Forward
    S / Down Arrow  - Backward
    A / Left Arrow  - Turn left
    D / Right Arrow - Turn right
    + / =           - Increase speed
    - / _           - Decrease speed
    Space           - Stop
    Q               - Quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Drive(Command),
    SpeedUp,
    SpeedDown,
    Quit,
}

/// Translate a key press into a teleop action
pub fn map_key(key: &KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press && key.kind != KeyEventKind::Repeat {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }

    match key.code {
        KeyCode::Char('w' | 'W') | KeyCode::Up => Some(KeyAction::Drive(Command::Forward)),
        KeyCode::Char('s' | 'S') | KeyCode::Down => Some(KeyAction::Drive(Command::Backward)),
        KeyCode::Char('a' | 'A') | KeyCode::Left => Some(KeyAction::Drive(Command::Left)),
        KeyCode::Char('d' | 'D') | KeyCode::Right => Some(KeyAction::Drive(Command::Right)),
        KeyCode::Char(' ') => Some(KeyAction::Drive(Command::Stop)),
        KeyCode::Char('+' | '=') => Some(KeyAction::SpeedUp),
        KeyCode::Char('-' | '_') => Some(KeyAction::SpeedDown),
        KeyCode::Char('q' | 'Q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Speed used for keyboard moves, stepped by +/-
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedDial(u8);

impl Default for SpeedDial {
    fn default() -> Self {
        Self(TELEOP_START_SPEED)
    }
}

impl SpeedDial {
    pub fn value(self) -> u8 {
        self.0
    }

    pub fn up(&mut self) -> u8 {
        self.0 = self.0.saturating_add(TELEOP_SPEED_STEP).min(MAX_SPEED);
        self.0
    }

    pub fn down(&mut self) -> u8 {
        self.0 = self.0.saturating_sub(TELEOP_SPEED_STEP).max(TELEOP_MIN_SPEED);
        self.0
    }
}

/// Keeps the terminal in raw mode while alive
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn acquire() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

// Raw mode does not translate \n, so write full line endings
fn say(line: &str) {
    let mut out = io::stdout().lock();
    let _ = write!(out, "{}\r\n", line);
    let _ = out.flush();
}

/// Apply one action. Returns false when the loop should end.
pub fn handle<D: PwmDevice>(
    rover: &mut Rover<D>,
    dial: &mut SpeedDial,
    action: KeyAction,
) -> Result<bool, D::Error> {
    match action {
        KeyAction::Quit => {
            say("Quitting...");
            return Ok(false);
        }
        KeyAction::Drive(Command::Stop) => {
            say("Stop");
            rover.stop()?;
        }
        KeyAction::Drive(command) => {
            say(&format!("{} ({}%)", command, dial.value()));
            rover.apply(command, Some(i32::from(dial.value())))?;
        }
        KeyAction::SpeedUp => say(&format!("Speed: {}%", dial.up())),
        KeyAction::SpeedDown => say(&format!("Speed: {}%", dial.down())),
    }
    Ok(true)
}

/// Run the keystroke loop until quit or until `shutdown` is raised.
///
/// The rover is stopped on every exit path.
pub fn run<D: PwmDevice>(
    rover: &mut Rover<D>,
    shutdown: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut dial = SpeedDial::default();

    println!("{}", HELP);
    println!("Current speed: {}%", dial.value());
    println!("Ready for input...\n");

    let outcome = {
        let _raw = RawModeGuard::acquire()?;
        read_keys(rover, &mut dial, shutdown)
    };

    let stopped = rover.stop();
    info!("Motors stopped.");
    outcome?;
    stopped?;
    Ok(())
}

fn read_keys<D: PwmDevice>(
    rover: &mut Rover<D>,
    dial: &mut SpeedDial,
    shutdown: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    while !shutdown.load(Ordering::Relaxed) {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        let Some(action) = map_key(&key) else {
            continue;
        };
        if !handle(rover, dial, action)? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::RecordingDevice;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_letter_and_arrow_keys_match() {
        let pairs = [
            ('w', KeyCode::Up, Command::Forward),
            ('s', KeyCode::Down, Command::Backward),
            ('a', KeyCode::Left, Command::Left),
            ('d', KeyCode::Right, Command::Right),
        ];
        for (letter, arrow, command) in pairs {
            let expected = Some(KeyAction::Drive(command));
            assert_eq!(map_key(&press(KeyCode::Char(letter))), expected);
            assert_eq!(
                map_key(&press(KeyCode::Char(letter.to_ascii_uppercase()))),
                expected
            );
            assert_eq!(map_key(&press(arrow)), expected);
        }
    }

    #[test]
    fn test_other_keys() {
        assert_eq!(
            map_key(&press(KeyCode::Char(' '))),
            Some(KeyAction::Drive(Command::Stop))
        );
        assert_eq!(map_key(&press(KeyCode::Char('='))), Some(KeyAction::SpeedUp));
        assert_eq!(map_key(&press(KeyCode::Char('_'))), Some(KeyAction::SpeedDown));
        assert_eq!(map_key(&press(KeyCode::Char('Q'))), Some(KeyAction::Quit));
        assert_eq!(map_key(&press(KeyCode::Char('x'))), None);
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn test_release_is_ignored() {
        let mut key = press(KeyCode::Char('w'));
        key.kind = KeyEventKind::Release;
        assert_eq!(map_key(&key), None);
    }

    #[test]
    fn test_speed_dial_bounds() {
        let mut dial = SpeedDial::default();
        assert_eq!(dial.value(), 50);
        for _ in 0..10 {
            dial.up();
        }
        assert_eq!(dial.value(), 100);
        for _ in 0..20 {
            dial.down();
        }
        assert_eq!(dial.value(), 10);
    }

    #[test]
    fn test_handle_drives_at_dial_speed() {
        let mut rover = Rover::new(RecordingDevice::new()).unwrap();
        let mut dial = SpeedDial::default();

        handle(&mut rover, &mut dial, KeyAction::SpeedUp).unwrap();
        assert!(handle(&mut rover, &mut dial, KeyAction::Drive(Command::Backward)).unwrap());
        assert_eq!(rover.device().duty(0), 60);
        assert_eq!(rover.device().pin_pair(1, 2), Some((1, 0)));

        handle(&mut rover, &mut dial, KeyAction::Drive(Command::Stop)).unwrap();
        assert_eq!(rover.device().duty(5), 0);
        // Keyboard speed does not touch the stored default
        assert_eq!(rover.default_speed(), 50);

        assert!(!handle(&mut rover, &mut dial, KeyAction::Quit).unwrap());
    }
}

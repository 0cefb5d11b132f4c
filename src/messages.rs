// Wire types for the HTTP control API

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Semantic drive command shared by every front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Left => "left",
            Command::Right => "right",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid command")]
pub struct UnknownCommand;

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Command::Forward),
            "backward" => Ok(Command::Backward),
            "left" => Ok(Command::Left),
            "right" => Ok(Command::Right),
            "stop" => Ok(Command::Stop),
            _ => Err(UnknownCommand),
        }
    }
}

// Any JSON number is a speed: out-of-range and fractional values saturate into
// i32 here and are clamped by the rover, never rejected.
fn lenient_speed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number.map(|n| match n.as_i64() {
        Some(whole) => whole.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
        // `as` saturates and truncates toward zero
        None => n.as_f64().map_or(0, |f| f as i32),
    }))
}

// POST /api/control body. The command stays untyped so that an unknown or
// non-string value is reported as a bad command rather than bad JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub command: Option<Value>,
    #[serde(default, deserialize_with = "lenient_speed")]
    pub speed: Option<i32>,
}

impl ControlRequest {
    pub fn parse_command(&self) -> Result<Command, UnknownCommand> {
        match &self.command {
            Some(Value::String(name)) => name.parse(),
            _ => Err(UnknownCommand),
        }
    }
}

// POST /api/speed body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeedRequest {
    #[serde(default, deserialize_with = "lenient_speed")]
    pub speed: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// JSON reply of every API route: `{"status": "ok", ...}` or `{"status": "error", "error": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    fn ok() -> Self {
        Self {
            status: Status::Ok,
            command: None,
            speed: None,
            description: None,
            error: None,
        }
    }

    pub fn command(command: Command) -> Self {
        Self {
            command: Some(command),
            ..Self::ok()
        }
    }

    pub fn speed(speed: u8) -> Self {
        Self {
            speed: Some(speed),
            ..Self::ok()
        }
    }

    pub fn description(text: impl Into<String>) -> Self {
        Self {
            description: Some(text.into()),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: Some(message.into()),
            ..Self::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!("forward".parse::<Command>(), Ok(Command::Forward));
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("Forward".parse::<Command>(), Err(UnknownCommand));
        assert_eq!("jump".parse::<Command>(), Err(UnknownCommand));
    }

    #[test]
    fn test_control_request_missing_command() {
        let req: ControlRequest = serde_json::from_str(r#"{"speed": 40}"#).unwrap();
        assert_eq!(req.speed, Some(40));
        assert_eq!(req.parse_command(), Err(UnknownCommand));
    }

    #[test]
    fn test_control_request_null_speed() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"command": "left", "speed": null}"#).unwrap();
        assert_eq!(req.parse_command(), Ok(Command::Left));
        assert_eq!(req.speed, None);
    }

    #[test]
    fn test_non_string_command_is_unknown() {
        for body in [r#"{"command": 5}"#, r#"{"command": ["forward"]}"#, r#"{"command": null}"#] {
            let req: ControlRequest = serde_json::from_str(body).unwrap();
            assert_eq!(req.parse_command(), Err(UnknownCommand), "{}", body);
        }
    }

    #[test]
    fn test_speed_accepts_any_number() {
        let speed = |body: &str| serde_json::from_str::<SpeedRequest>(body).unwrap().speed;
        assert_eq!(speed(r#"{"speed": 3000000000}"#), Some(i32::MAX));
        assert_eq!(speed(r#"{"speed": 18446744073709551615}"#), Some(i32::MAX));
        assert_eq!(speed(r#"{"speed": -1e12}"#), Some(i32::MIN));
        assert_eq!(speed(r#"{"speed": 55.5}"#), Some(55));
        assert_eq!(speed(r#"{"speed": null}"#), None);
        assert_eq!(speed("{}"), None);
        assert!(serde_json::from_str::<SpeedRequest>(r#"{"speed": "fast"}"#).is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let ok = serde_json::to_value(Reply::command(Command::Backward)).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "ok", "command": "backward"}));

        let err = serde_json::to_value(Reply::error("Missing speed")).unwrap();
        assert_eq!(err, serde_json::json!({"status": "error", "error": "Missing speed"}));
    }
}

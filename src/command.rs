//! Typed view of inbound wire payloads.
//!
//! Recognized shapes, checked in this order:
//! - `{"type":"pong","mac":...}` reply travelling up to the root
//! - `{"interval":n, "max_children":m?}` broadcast configuration update
//! - `{"target":"AA:..","action":"blink"|"ping"}` command for one node
//!
//! Anything else that is a JSON object is opaque telemetry.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::address::NodeAddress;
use crate::error::CommandError;

/// Action carried by a targeted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Blink,
    Ping,
    /// Not understood here, but still forwarded toward the target.
    Other(String),
}

impl Action {
    fn parse(action: &str) -> Self {
        match action {
            "blink" => Action::Blink,
            "ping" => Action::Ping,
            other => Action::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ConfigUpdate { interval_ms: u64, max_children: Option<u64> },
    TargetedAction { target: String, action: Action },
    PongResponse { mac: Option<String> },
    /// Unrecognized object. `has_target` marks a malformed command, which the
    /// root must not republish as telemetry.
    RawTelemetry { has_target: bool },
}

/// Non-negative integer, also when written as a float such as `5000.0`.
fn whole_number(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64).map(|f| f as u64))
}

impl Command {
    /// Classifies a payload.
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        let doc: Value = serde_json::from_slice(payload)?;
        let Value::Object(fields) = doc else {
            return Err(CommandError::NotAnObject);
        };
        Self::classify(&fields)
    }

    fn classify(fields: &Map<String, Value>) -> Result<Self, CommandError> {
        if fields.get("type").and_then(Value::as_str) == Some("pong") {
            return Ok(Command::PongResponse {
                mac: fields.get("mac").and_then(Value::as_str).map(str::to_string),
            });
        }

        if let Some(interval) = fields.get("interval").filter(|v| v.is_number()) {
            let interval_ms = whole_number(interval).ok_or_else(|| CommandError::InvalidInterval(interval.to_string()))?;
            let max_children = fields.get("max_children").and_then(whole_number);
            return Ok(Command::ConfigUpdate { interval_ms, max_children });
        }

        if let (Some(target), Some(action)) = (
            fields.get("target").and_then(Value::as_str),
            fields.get("action").and_then(Value::as_str),
        ) {
            return Ok(Command::TargetedAction {
                target: target.to_string(),
                action: Action::parse(action),
            });
        }

        Ok(Command::RawTelemetry {
            has_target: fields.contains_key("target"),
        })
    }
}

#[derive(Serialize)]
struct Pong<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    mac: String,
}

/// Wire form of the reply to a `ping` addressed to `mac`.
pub fn pong_payload(mac: NodeAddress) -> Vec<u8> {
    let pong = Pong { kind: "pong", mac: mac.to_string() };
    serde_json::to_vec(&pong).unwrap_or_default()
}

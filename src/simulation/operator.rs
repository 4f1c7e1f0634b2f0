//! Operator commands as published on the command topic.

use serde::Deserialize;

/// Commands an operator can issue to the network.
///
/// Scene scripts name them with a `command` tag, e.g.
/// `{"at_ms": 3000, "command": "ping", "target": "24:0A:C4:00:00:03"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum OperatorCommand {
    /// Set the report interval on every node.
    SetInterval { interval_ms: u64 },

    /// Stop periodic reporting everywhere (`interval: 0`).
    PauseReporting,

    /// Set the interval and the per-node fan-out limit on every node.
    SetMaxChildren { interval_ms: u64, max_children: u8 },

    /// Flash the LEDs of one node.
    Blink { target: String },

    /// Ask one node to answer with a pong.
    Ping { target: String },
}

impl OperatorCommand {
    /// Wire JSON understood by the node command router.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            OperatorCommand::SetInterval { interval_ms } => serde_json::json!({ "interval": interval_ms }),
            OperatorCommand::PauseReporting => serde_json::json!({ "interval": 0 }),
            OperatorCommand::SetMaxChildren { interval_ms, max_children } => serde_json::json!({
                "interval": interval_ms,
                "max_children": max_children,
            }),
            OperatorCommand::Blink { target } => serde_json::json!({
                "target": target,
                "action": "blink",
            }),
            OperatorCommand::Ping { target } => serde_json::json!({
                "target": target,
                "action": "ping",
            }),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_payload().to_string().into_bytes()
    }
}

//! Error taxonomy for the node agent.
//!
//! Failures fall into two tiers:
//! - [`LifecycleError`]: the mesh stack refused an init/start/stop/deinit/config
//!   call. Nothing else can work after that, so the caller hands it to [`fatal`].
//! - [`DeliveryError`]: a single packet or publish did not go out. Logged and
//!   forgotten; the next cycle or message is the retry.
//!
//! [`CommandError`] covers inbound payloads that cannot be interpreted.

use thiserror::Error;

/// Mesh stack lifecycle operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Init,
    SetConfig,
    Start,
    Stop,
    Deinit,
}

impl std::fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleOp::Init => write!(f, "init"),
            LifecycleOp::SetConfig => write!(f, "set-config"),
            LifecycleOp::Start => write!(f, "start"),
            LifecycleOp::Stop => write!(f, "stop"),
            LifecycleOp::Deinit => write!(f, "deinit"),
        }
    }
}

/// Unrecoverable mesh stack failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mesh {op} failed: {reason}")]
pub struct LifecycleError {
    pub op: LifecycleOp,
    pub reason: String,
}

impl LifecycleError {
    pub fn new(op: LifecycleOp, reason: impl Into<String>) -> Self {
        Self { op, reason: reason.into() }
    }
}

/// Recoverable message-loss failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("mesh not connected")]
    NotConnected,
    #[error("destination {0} unreachable")]
    Unreachable(String),
    #[error("receive queue of {0} is full")]
    QueueFull(String),
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("broker not connected")]
    BrokerDisconnected,
    #[error("routing table unavailable: {0}")]
    RoutingTable(String),
}

/// Inbound payload that cannot be turned into a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("interval must be a non-negative integer, got {0}")]
    InvalidInterval(String),
}

/// Logs a lifecycle failure and aborts the process.
///
/// A mesh stack that cannot be started or stopped leaves the node with no way
/// to participate in the tree, so there is nothing to recover to.
pub fn fatal(context: &str, err: LifecycleError) -> ! {
    log::error!("{} {}; aborting", context, err);
    log::logger().flush();
    std::process::abort()
}

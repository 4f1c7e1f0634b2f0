//! Boundary to the publish/subscribe broker client used at the root.
//!
//! Inbound messages on subscribed topics are pushed by the client into a
//! [`BrokerInbox`], which the root's broker task feeds to the command router.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::DeliveryError;

pub trait Broker {
    /// Connects the client, or reconnects it if it was already running.
    fn start(&self) -> Result<(), DeliveryError>;

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeliveryError>;

    fn subscribe(&self, topic: &str) -> Result<(), DeliveryError>;

    fn is_connected(&self) -> bool;
}

/// Message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub const BROKER_INBOX_SIZE: usize = 8;
pub type BrokerInbox = embassy_sync::channel::Channel<CriticalSectionRawMutex, BrokerMessage, BROKER_INBOX_SIZE>;
pub type BrokerInboxReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, BrokerMessage, BROKER_INBOX_SIZE>;

/// Starts (or restarts) the client and subscribes to the command topic.
pub fn connect_and_subscribe(broker: &dyn Broker, command_topic: &str) -> Result<(), DeliveryError> {
    broker.start()?;
    broker.subscribe(command_topic)
}

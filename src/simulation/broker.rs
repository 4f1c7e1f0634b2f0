//! In-process publish/subscribe broker.
//!
//! Every node gets a client handle, though only the root ever starts one.
//! Node publishes land in a single outbound queue drained by the operator;
//! operator messages are injected into the inbox of each connected client
//! subscribed to the topic.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use std::sync::Mutex;

use crate::broker::{Broker, BrokerInbox, BrokerMessage};
use crate::error::DeliveryError;

pub const PUBLISHED_QUEUE_SIZE: usize = 64;
pub type PublishedQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, BrokerMessage, PUBLISHED_QUEUE_SIZE>;

#[derive(Default)]
struct Session {
    connected: bool,
    subscriptions: Vec<String>,
}

struct Client {
    session: Mutex<Session>,
    inbox: BrokerInbox,
}

pub struct SimBroker {
    uri: String,
    clients: Vec<Client>,
    published: PublishedQueue,
}

impl SimBroker {
    pub fn new(uri: impl Into<String>, clients: usize) -> Self {
        Self {
            uri: uri.into(),
            clients: (0..clients)
                .map(|_| Client {
                    session: Mutex::new(Session::default()),
                    inbox: BrokerInbox::new(),
                })
                .collect(),
            published: PublishedQueue::new(),
        }
    }

    pub fn client(&self, id: usize) -> SimBrokerClient<'_> {
        SimBrokerClient { broker: self, id }
    }

    /// Messages for the client's command handler.
    pub fn inbox(&self, id: usize) -> &BrokerInbox {
        &self.clients[id].inbox
    }

    /// Everything published by any node.
    pub fn published(&self) -> &PublishedQueue {
        &self.published
    }

    fn session(&self, id: usize) -> std::sync::MutexGuard<'_, Session> {
        self.clients[id].session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delivers an operator message to every connected subscriber of `topic`.
    /// Returns how many clients received it.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for (id, client) in self.clients.iter().enumerate() {
            let subscribed = {
                let session = self.session(id);
                session.connected && session.subscriptions.iter().any(|t| t == topic)
            };
            if !subscribed {
                continue;
            }
            let message = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            match client.inbox.try_send(message) {
                Ok(()) => delivered += 1,
                Err(_) => log::warn!("broker client {} inbox full, message on {} dropped", id, topic),
            }
        }
        delivered
    }
}

/// One node's connection to the [`SimBroker`].
pub struct SimBrokerClient<'a> {
    broker: &'a SimBroker,
    id: usize,
}

impl Broker for SimBrokerClient<'_> {
    fn start(&self) -> Result<(), DeliveryError> {
        let mut session = self.broker.session(self.id);
        if session.connected {
            log::debug!("broker client {} reconnecting to {}", self.id, self.broker.uri);
        } else {
            log::debug!("broker client {} connecting to {}", self.id, self.broker.uri);
        }
        // a fresh session starts without subscriptions
        *session = Session {
            connected: true,
            subscriptions: Vec::new(),
        };
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeliveryError> {
        if !self.is_connected() {
            return Err(DeliveryError::BrokerDisconnected);
        }
        let message = BrokerMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        self.broker
            .published
            .try_send(message)
            .map_err(|_| DeliveryError::QueueFull("broker".into()))
    }

    fn subscribe(&self, topic: &str) -> Result<(), DeliveryError> {
        let mut session = self.broker.session(self.id);
        if !session.connected {
            return Err(DeliveryError::BrokerDisconnected);
        }
        if !session.subscriptions.iter().any(|t| t == topic) {
            session.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.broker.session(self.id).connected
    }
}

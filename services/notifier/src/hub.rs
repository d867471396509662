//! Push hub
//!
//! Owns the notification buffer and the registry of connected clients.
//! Registration replays the buffer slice the client asked for between a
//! recovery-start and recovery-complete envelope, then the client receives
//! live broadcasts. Every client has a bounded outbound queue; a full
//! queue means the client is too slow and gets disconnected rather than
//! stalling the broadcast path.

use std::collections::HashMap;
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::{Notification, NotificationBuffer};

pub type ClientId = u64;

/// Messages pushed to a subscriber, in order: one `RecoveryStart`, the
/// recovered notifications, one `RecoveryComplete`, then live
/// notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    RecoveryStart {
        requested_seq: u64,
        oldest_seq: u64,
        latest_seq: u64,
        count: usize,
        all_available: bool,
    },
    Notification {
        #[serde(flatten)]
        notification: Notification,
    },
    RecoveryComplete {
        count: usize,
        latest_seq: u64,
    },
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Notifications retained for recovery.
    pub buffer_capacity: usize,
    /// Outbound queue depth per client; overflow disconnects.
    pub client_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            client_queue_capacity: 256,
        }
    }
}

struct HubClients {
    clients: HashMap<ClientId, Sender<OutboundMessage>>,
    next_id: ClientId,
}

/// Client registry plus the shared notification buffer.
pub struct Hub {
    config: HubConfig,
    buffer: NotificationBuffer,
    // Guards both registration and broadcast so a client never misses or
    // double-receives a notification around its recovery window.
    clients: Mutex<HubClients>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let buffer = NotificationBuffer::new(config.buffer_capacity);
        Self {
            config,
            buffer,
            clients: Mutex::new(HubClients {
                clients: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register a subscriber recovering from `requested_seq` (0 = from the
    /// oldest retained). The returned receiver yields the recovery
    /// envelopes and then live traffic; if the client's queue overflows —
    /// even during recovery — the sender is dropped and the receiver sees
    /// a disconnect.
    pub fn register(&self, requested_seq: u64) -> (ClientId, Receiver<OutboundMessage>) {
        let mut registry = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let client_id = registry.next_id;
        registry.next_id += 1;

        let (tx, rx) = bounded(self.config.client_queue_capacity);

        let (recovered, all_available) = self.buffer.get_from(requested_seq);
        if !all_available {
            warn!(
                client_id,
                requested_seq,
                oldest_seq = self.buffer.oldest_seq(),
                "requested sequence already evicted, client must refetch"
            );
        }

        let mut messages = Vec::with_capacity(recovered.len() + 2);
        messages.push(OutboundMessage::RecoveryStart {
            requested_seq,
            oldest_seq: self.buffer.oldest_seq(),
            latest_seq: self.buffer.latest_seq(),
            count: recovered.len(),
            all_available,
        });
        let count = recovered.len();
        messages.extend(
            recovered
                .into_iter()
                .map(|notification| OutboundMessage::Notification { notification }),
        );
        messages.push(OutboundMessage::RecoveryComplete {
            count,
            latest_seq: self.buffer.latest_seq(),
        });

        for message in messages {
            if tx.try_send(message).is_err() {
                warn!(client_id, "outbound queue overflowed during recovery");
                // Sender is dropped; the receiver observes the disconnect.
                return (client_id, rx);
            }
        }

        debug!(client_id, count, "client registered");
        registry.clients.insert(client_id, tx);
        (client_id, rx)
    }

    /// Remove a client from the registry.
    pub fn unregister(&self, client_id: ClientId) {
        let mut registry = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if registry.clients.remove(&client_id).is_some() {
            debug!(client_id, "client unregistered");
        }
    }

    /// Buffer a notification and push it to every connected client.
    /// Returns the assigned sequence.
    pub fn broadcast(&self, event_type: &str, data: serde_json::Value) -> u64 {
        let mut registry = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let sequence = self.buffer.add(event_type, data.clone());

        let message = OutboundMessage::Notification {
            notification: Notification {
                sequence,
                event_type: event_type.to_string(),
                data,
            },
        };

        let mut disconnected = Vec::new();
        for (&client_id, tx) in registry.clients.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    disconnected.push(client_id);
                }
            }
        }
        for client_id in disconnected {
            registry.clients.remove(&client_id);
            warn!(client_id, "disconnecting lagging subscriber");
        }

        sequence
    }

    pub fn client_count(&self) -> usize {
        let registry = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        registry.clients.len()
    }

    pub fn buffer(&self) -> &NotificationBuffer {
        &self.buffer
    }
}

//! Notification fan-out
//!
//! Feeds real-time push subscribers from the ledger event stream:
//! a sequenced ring buffer retains the most recent notifications so a
//! reconnecting subscriber can recover what it missed, and the hub pushes
//! live notifications through bounded per-client queues, disconnecting
//! clients that cannot keep up.
//!
//! Flow: register → recovery-start envelope → buffered notifications →
//! recovery-complete envelope → live broadcast.
//!
//! # Modules
//! - `buffer`: the sequenced ring buffer with gap-aware replay
//! - `hub`: client registry, recovery protocol, broadcast
//! - `push`: the ledger subscriber mapping events to notifications

pub mod buffer;
pub mod hub;
pub mod push;

pub use buffer::{BufferInfo, Notification, NotificationBuffer};
pub use hub::{ClientId, Hub, HubConfig, OutboundMessage};
pub use push::PushNotifier;

//! LedgerPoint — per-service event-sourcing runtime
//!
//! Every service embeds exactly one [`LedgerPoint`]: the sole bridge
//! between in-process domain state and the durable event log. Locally
//! originated commands go through the commit intake and come back through
//! the same log replay that delivers peer events, so subscribers cannot
//! tell local from remote origination.
//!
//! # Architecture
//!
//! ```text
//!  Commit intake ──┐
//!                  ▼
//!            select loop ◄── log reader (from offset 0)
//!                  │
//!            projection apply (per-collection RwLocks)
//!                  │
//!            subscriber fan-out (synchronous, in registration order)
//! ```
//!
//! # Modules
//! - `log`: the ordered-log seam (`EventLog`) and the in-memory log
//! - `journal`: append-only file-backed log with CRC32C checksums
//! - `point`: the runtime itself — intake, replay, getters, readiness
//! - `apply`: pure projection transitions
//! - `subscriber`: the per-event-type handler trait and dispatch
//! - `config`: environment-driven service configuration

mod apply;
pub mod config;
pub mod journal;
pub mod log;
pub mod point;
pub mod subscriber;

pub use config::{ConfigError, LedgerConfig};
pub use journal::FileLog;
pub use log::{EventLog, LogError, LogRecord, MemoryLog};
pub use point::{current_time_millis, Committer, CommitError, LedgerError, LedgerPoint};
pub use subscriber::Subscriber;

//! Ordered-log seam
//!
//! The platform assumes a partitioned, totally-ordered log; any equivalent
//! ordered log suffices. [`EventLog`] is that seam: synchronous appends
//! with leader-style acknowledgment and subscriptions that deliver every
//! record from offset zero before going live.

use std::io;
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

/// One message on the log: offset, append timestamp, event-type header,
/// JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub offset: u64,
    pub timestamp_ms: i64,
    pub label: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("log corruption at byte offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    #[error("log is closed")]
    Closed,
}

/// A totally-ordered append-only event log.
///
/// Appends are synchronous: when `append` returns the record is durable as
/// far as this log can promise (the leader-acknowledgment analogue).
/// A subscription observes every record ever appended, in offset order,
/// starting from zero.
pub trait EventLog: Send + Sync {
    /// Append one record; returns the assigned offset.
    fn append(&self, label: &str, payload: Vec<u8>, timestamp_ms: i64) -> Result<u64, LogError>;

    /// Open a reader positioned at offset zero. Historical records are
    /// delivered first, then live appends, with no gap or reordering.
    fn subscribe(&self) -> Result<Receiver<LogRecord>, LogError>;

    /// Number of records appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryLogInner {
    records: Vec<LogRecord>,
    taps: Vec<Sender<LogRecord>>,
}

/// In-process ordered log.
///
/// Several LedgerPoints sharing one `MemoryLog` model the multi-service
/// topology: each sees every record, its own and its peers', in one total
/// order.
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryLogInner {
                records: Vec::new(),
                taps: Vec::new(),
            }),
        }
    }

    /// Snapshot of every record appended so far.
    pub fn records(&self) -> Vec<LogRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.clone()
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for MemoryLog {
    fn append(&self, label: &str, payload: Vec<u8>, timestamp_ms: i64) -> Result<u64, LogError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = LogRecord {
            offset: inner.records.len() as u64,
            timestamp_ms,
            label: label.to_string(),
            payload,
        };
        inner.records.push(record.clone());
        // Forward to live readers, dropping the ones that went away.
        inner.taps.retain(|tap| tap.send(record.clone()).is_ok());
        Ok(record.offset)
    }

    fn subscribe(&self) -> Result<Receiver<LogRecord>, LogError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (tx, rx) = unbounded();
        for record in &inner.records {
            if tx.send(record.clone()).is_err() {
                return Err(LogError::Closed);
            }
        }
        inner.taps.push(tx);
        Ok(rx)
    }

    fn len(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.len() as u64
    }
}

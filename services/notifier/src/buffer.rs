//! Sequenced ring buffer
//!
//! Fixed-capacity buffer of the most recent notifications. Each append is
//! assigned the next sequence number (from 1; 0 means "from the oldest
//! available" in recovery requests) and evicts the oldest entry once full.
//! `get_from` tells the caller whether the requested start was still
//! retained — a `false` signals an unrecoverable gap the client must
//! reconcile through the query APIs instead.

use std::collections::VecDeque;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// One broadcastable notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "seq")]
    pub sequence: u64,
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Buffer statistics for diagnostics and the recovery envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub len: usize,
    pub capacity: usize,
    pub oldest_seq: u64,
    pub latest_seq: u64,
}

struct BufferState {
    entries: VecDeque<Notification>,
    next_seq: u64,
    oldest_seq: u64,
}

/// Ring buffer of sequenced notifications.
pub struct NotificationBuffer {
    capacity: usize,
    state: RwLock<BufferState>,
}

impl NotificationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(BufferState {
                entries: VecDeque::with_capacity(capacity),
                next_seq: 1,
                oldest_seq: 1,
            }),
        }
    }

    /// Append a notification; returns its assigned sequence.
    pub fn add(&self, event_type: impl Into<String>, data: serde_json::Value) -> u64 {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let sequence = state.next_seq;
        state.next_seq += 1;

        if state.entries.len() == self.capacity {
            state.entries.pop_front();
            state.oldest_seq += 1;
        }
        state.entries.push_back(Notification {
            sequence,
            event_type: event_type.into(),
            data,
        });
        sequence
    }

    /// Every retained notification from `from_seq` (inclusive) to the
    /// latest, plus whether the requested start was still available.
    /// `from_seq` of 0 means "from the oldest retained".
    pub fn get_from(&self, from_seq: u64) -> (Vec<Notification>, bool) {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        let from_seq = if from_seq == 0 {
            state.oldest_seq
        } else {
            from_seq
        };

        if from_seq < state.oldest_seq {
            // Requested messages already evicted: hand back what remains.
            return (state.entries.iter().cloned().collect(), false);
        }
        if from_seq >= state.next_seq {
            return (Vec::new(), true);
        }

        let start = (from_seq - state.oldest_seq) as usize;
        (state.entries.iter().skip(start).cloned().collect(), true)
    }

    /// Sequence of the most recent notification (0 before any append).
    pub fn latest_seq(&self) -> u64 {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.next_seq - 1
    }

    /// Sequence of the oldest retained notification.
    pub fn oldest_seq(&self) -> u64 {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.oldest_seq
    }

    pub fn info(&self) -> BufferInfo {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        BufferInfo {
            len: state.entries.len(),
            capacity: self.capacity,
            oldest_seq: state.oldest_seq,
            latest_seq: state.next_seq - 1,
        }
    }
}

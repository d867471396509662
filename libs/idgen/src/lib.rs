//! Snowflake identifier generator
//!
//! Produces the platform's 64-bit NIDs from a composite layout:
//!
//! ```text
//! [ 1 bit zero | 41 bits millis since epoch | 10 bits instance | 12 bits sequence ]
//! ```
//!
//! IDs are monotonically non-decreasing within an instance and globally
//! unique as long as operators assign distinct instance ids. Sequence
//! exhaustion inside one millisecond busy-waits for the next tick; a clock
//! regression is absorbed by sleeping until the clock catches up, up to a
//! configurable limit beyond which allocation fails instead of stalling
//! the caller indefinitely.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

/// Platform epoch: 2024-01-01T00:00:00Z in milliseconds.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

pub const INSTANCE_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

/// Largest assignable instance id (1023).
pub const MAX_INSTANCE: i64 = (1 << INSTANCE_BITS) - 1;
/// Largest per-millisecond sequence (4095).
pub const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const INSTANCE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + INSTANCE_BITS;

/// Default ceiling on how far backwards the clock may travel before
/// allocation gives up instead of waiting it out.
pub const DEFAULT_MAX_REGRESSION: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum IdError {
    #[error("instance id must be between 0 and {MAX_INSTANCE}, got {0}")]
    InstanceOutOfRange(i64),

    #[error("clock moved backwards by {regression_ms} ms, beyond the {limit_ms} ms limit")]
    ClockRegression { regression_ms: i64, limit_ms: i64 },
}

/// Decomposed snowflake id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub instance_id: i64,
    pub sequence: i64,
}

#[derive(Debug)]
struct GeneratorState {
    last_ms: i64,
    sequence: i64,
}

/// Per-instance snowflake generator.
#[derive(Debug)]
pub struct Generator {
    instance_id: i64,
    max_regression: Duration,
    state: Mutex<GeneratorState>,
}

impl Generator {
    /// Create a generator for the given instance id (0..=1023).
    pub fn new(instance_id: i64) -> Result<Self, IdError> {
        Self::with_regression_limit(instance_id, DEFAULT_MAX_REGRESSION)
    }

    /// Create a generator with a custom clock-regression ceiling.
    pub fn with_regression_limit(
        instance_id: i64,
        max_regression: Duration,
    ) -> Result<Self, IdError> {
        if !(0..=MAX_INSTANCE).contains(&instance_id) {
            return Err(IdError::InstanceOutOfRange(instance_id));
        }
        Ok(Self {
            instance_id,
            max_regression,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        })
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    /// Allocate the next unique id.
    ///
    /// May sleep briefly on sequence exhaustion or a bounded clock
    /// regression; fails once the regression exceeds the configured limit.
    pub fn next_id(&self) -> Result<i64, IdError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut now = current_millis();

        if now < state.last_ms {
            let regression_ms = state.last_ms - now;
            let limit_ms = self.max_regression.as_millis() as i64;
            if regression_ms > limit_ms {
                return Err(IdError::ClockRegression {
                    regression_ms,
                    limit_ms,
                });
            }

            warn!(
                instance_id = self.instance_id,
                regression_ms, "clock moved backwards, waiting for it to catch up"
            );
            while now <= state.last_ms {
                std::thread::sleep(Duration::from_millis(
                    (state.last_ms - now + 1).max(1) as u64
                ));
                now = current_millis();
            }
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond.
                now = wait_next_millis(state.last_ms);
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now;

        Ok(((now - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.instance_id << INSTANCE_SHIFT)
            | state.sequence)
    }
}

/// Decompose an id into its timestamp, instance and sequence fields.
pub fn parse_id(id: i64) -> IdParts {
    IdParts {
        timestamp_ms: (id >> TIMESTAMP_SHIFT) + EPOCH_MS,
        instance_id: (id >> INSTANCE_SHIFT) & MAX_INSTANCE,
        sequence: id & MAX_SEQUENCE,
    }
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn wait_next_millis(last_ms: i64) -> i64 {
    let mut now = current_millis();
    while now <= last_ms {
        std::thread::sleep(Duration::from_micros(100));
        now = current_millis();
    }
    now
}

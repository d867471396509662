//! Types library for the SBL trading platform
//!
//! This library provides the shared schema used by every service:
//! the closed set of ledger events, the in-memory entity projections
//! rebuilt from them, and the order/trade state machines.
//!
//! # Modules
//! - `events`: ledger event payloads and the `Event` sum type
//! - `entities`: in-memory projection records
//! - `state`: order, trade and contract lifecycle states, sides

pub mod entities;
pub mod events;
pub mod state;

/// Numeric identifier produced by the snowflake generator.
///
/// 64-bit layout: 1 zero bit, 41 bits of milliseconds since the platform
/// epoch, 10 bits of instance id, 12 bits of per-millisecond sequence.
pub type Nid = i64;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entities::*;
    pub use crate::events::*;
    pub use crate::state::*;
    pub use crate::Nid;
}

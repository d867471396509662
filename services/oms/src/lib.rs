//! Order Management core
//!
//! Consumes order events off the ledger, runs pre-trade validation,
//! matches acknowledged orders against the per-instrument book and
//! publishes the resulting acknowledgments, rejections and trades back
//! through the same log it observes. Matching is triggered by observing an
//! `OrderAck`, never by the submission itself, so a restarted instance
//! reconverges by replay alone.
//!
//! # Modules
//! - `validator`: ordered pre-trade checks producing `{field, message}` rejections
//! - `fees`: fee formulas and rate resolution
//! - `book`: per-instrument side queues with match-time priority bucketing
//! - `matcher`: the fill walk over prioritized counterparties
//! - `tradegen`: trade and contract generation from matches
//! - `engine`: orchestration and the ledger subscriber

pub mod book;
pub mod engine;
pub mod fees;
pub mod matcher;
pub mod tradegen;
pub mod validator;

pub use engine::Oms;

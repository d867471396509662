//! Clearing bridge
//!
//! Forwards matched trades to the external clearing house and ingests its
//! verdicts back onto the ledger. Outbound: every live `Trade` becomes a
//! `POST /contract/matched` followed by a `TradeWait` on the log. Inbound:
//! clearing confirmations, reimbursement instructions (optionally with
//! auto roll-over) and lender recalls map to `TradeAck`, `TradeReimburse`
//! and freshly originated orders. An end-of-day sweep rejects trades the
//! clearing house never answered, judged against the trading session
//! close rather than wall-clock elapsed time.
//!
//! # Modules
//! - `client`: the outbound HTTP egress and its payload
//! - `bridge`: the ledger subscriber and inbound command mapping

pub mod bridge;
pub mod client;

pub use bridge::{
    ClearingBridge, LenderRecallRequest, MatchedConfirmRequest, ReimburseRequest,
};
pub use client::{ClearClient, ClearingError, TradeMatchedPayload};

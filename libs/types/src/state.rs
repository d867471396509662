//! Lifecycle states and trading sides
//!
//! States serialize as the single-character codes carried on the wire and
//! in the relational projection, so the enums round-trip against payloads
//! produced by any peer service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a securities-borrowing-and-lending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Borrower of securities.
    #[serde(rename = "BORR")]
    Borr,
    /// Lender of securities.
    #[serde(rename = "LEND")]
    Lend,
}

impl Side {
    /// The side an order of this side matches against.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Borr => Side::Lend,
            Side::Lend => Side::Borr,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Borr => write!(f, "BORR"),
            Side::Lend => write!(f, "LEND"),
        }
    }
}

/// Order lifecycle state.
///
/// `Submitted` is the state an order enters the projection in; every other
/// state is reached through a subsequent acknowledgment event against the
/// same NID. `Rejected`, `Matched`, `Withdrawn` and `Amended` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Accepted by the front door, not yet acknowledged.
    #[serde(rename = "S")]
    Submitted,
    /// Acknowledged and eligible for matching.
    #[serde(rename = "O")]
    Open,
    /// Rejected by pre-trade validation.
    #[serde(rename = "R")]
    Rejected,
    /// Settlement date lies in the future; held until start of day.
    #[serde(rename = "G")]
    PendingNew,
    /// Partially filled, residual still matchable.
    #[serde(rename = "P")]
    PartiallyFilled,
    /// Fully matched.
    #[serde(rename = "M")]
    Matched,
    /// Withdrawn by the owning participant.
    #[serde(rename = "W")]
    Withdrawn,
    /// Superseded by a newer order whose `prev_nid` points here.
    #[serde(rename = "A")]
    Amended,
}

impl OrderState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Rejected
                | OrderState::Matched
                | OrderState::Withdrawn
                | OrderState::Amended
        )
    }

    /// Whether the order can still be withdrawn or amended away.
    pub fn is_working(&self) -> bool {
        matches!(self, OrderState::Open | OrderState::PartiallyFilled)
    }

    /// Single-character wire code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderState::Submitted => "S",
            OrderState::Open => "O",
            OrderState::Rejected => "R",
            OrderState::PendingNew => "G",
            OrderState::PartiallyFilled => "P",
            OrderState::Matched => "M",
            OrderState::Withdrawn => "W",
            OrderState::Amended => "A",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Trade and contract lifecycle state.
///
/// Shared between trades and their constituent contracts: a clearing
/// acknowledgment moves the trade and both contract legs together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    /// Generated by the matcher, not yet forwarded to clearing.
    #[serde(rename = "S")]
    Submitted,
    /// Forwarded to the clearing house, awaiting its verdict.
    #[serde(rename = "E")]
    AwaitingClearing,
    /// Approved by the clearing house.
    #[serde(rename = "O")]
    Open,
    /// Rejected by the clearing house; order quantities reversed.
    #[serde(rename = "R")]
    Rejected,
    /// Reimbursed and closed.
    #[serde(rename = "C")]
    Closed,
}

impl TradeState {
    /// Single-character wire code.
    pub fn code(&self) -> &'static str {
        match self {
            TradeState::Submitted => "S",
            TradeState::AwaitingClearing => "E",
            TradeState::Open => "O",
            TradeState::Rejected => "R",
            TradeState::Closed => "C",
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

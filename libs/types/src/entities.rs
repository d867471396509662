//! In-memory entity projections
//!
//! Entities are materialized from the event stream and never deleted;
//! superseded rows stay in the projection with a terminal state. Every
//! timestamp on an entity comes from the log record that caused the
//! transition, never from the wall clock, so the projection is a pure
//! function of the event prefix.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{OrderState, Side, TradeState};
use crate::Nid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantEntity {
    pub nid: Nid,
    pub code: String,
    pub name: String,
    pub borr_eligibility: bool,
    pub lend_eligibility: bool,
    pub last_update: DateTime<Utc>,
}

impl ParticipantEntity {
    /// Whether the participant may trade the given side.
    pub fn eligible_for(&self, side: Side) -> bool {
        match side {
            Side::Borr => self.borr_eligibility,
            Side::Lend => self.lend_eligibility,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntity {
    pub nid: Nid,
    pub code: String,
    pub sid: String,
    pub name: String,
    pub participant_nid: Nid,
    pub participant_code: String,
    pub trade_limit: f64,
    pub pool_limit: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEntity {
    pub nid: Nid,
    pub code: String,
    pub name: String,
    pub kind: String,
    pub status: bool,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntity {
    pub nid: Nid,
    pub update: DateTime<Utc>,
    pub description: String,
    pub flat_fee: Option<f64>,
    pub lending_fee: Option<f64>,
    pub borrowing_fee: Option<f64>,
    pub max_quantity: f64,
    pub borrow_max_open_day: i64,
    pub denomination_limit: i64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTimeEntity {
    pub nid: Nid,
    pub description: String,
    pub update: DateTime<Utc>,
    pub session1_start: NaiveTime,
    pub session1_end: NaiveTime,
    pub session2_start: NaiveTime,
    pub session2_end: NaiveTime,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayEntity {
    pub nid: Nid,
    pub year: i32,
    pub date: NaiveDate,
    pub description: String,
}

/// Order projection.
///
/// Invariant: `0 <= done_quantity <= quantity`; equality with `quantity`
/// implies state `Matched`, a strictly positive partial fill implies
/// `PartiallyFilled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEntity {
    pub nid: Nid,
    pub prev_nid: Nid,
    pub reff_request_id: String,
    pub account_nid: Nid,
    pub account_code: String,
    pub participant_nid: Nid,
    pub participant_code: String,
    pub instrument_nid: Nid,
    pub instrument_code: String,
    pub side: Side,
    pub quantity: f64,
    pub done_quantity: f64,
    pub settlement_date: DateTime<Utc>,
    pub reimbursement_date: DateTime<Utc>,
    pub periode: i64,
    pub state: OrderState,
    pub market_price: f64,
    pub rate: f64,
    pub instruction: String,
    pub aro: bool,
    pub withdraw_reff_request_id: String,
    pub message: String,
    pub entry_at: DateTime<Utc>,
    pub pending_at: Option<DateTime<Utc>>,
    pub open_at: Option<DateTime<Utc>>,
    pub reject_at: Option<DateTime<Utc>>,
    pub amend_at: Option<DateTime<Utc>>,
    pub withdraw_at: Option<DateTime<Utc>>,
}

impl OrderEntity {
    /// Quantity still available for matching.
    pub fn remaining(&self) -> f64 {
        self.quantity - self.done_quantity
    }
}

/// Trade projection; contract legs are referenced by NID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEntity {
    pub nid: Nid,
    pub clearing_reff: String,
    pub instrument_nid: Nid,
    pub instrument_code: String,
    pub quantity: f64,
    pub periode: i64,
    pub state: TradeState,
    pub fee_flat_rate: f64,
    pub fee_borr_rate: f64,
    pub fee_lend_rate: f64,
    pub matched_at: DateTime<Utc>,
    pub reimburse_at: DateTime<Utc>,
    pub lender: Vec<Nid>,
    pub borrower: Vec<Nid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractEntity {
    pub nid: Nid,
    pub trade_nid: Nid,
    pub clearing_reff: String,
    pub side: Side,
    pub account_nid: Nid,
    pub account_code: String,
    pub account_sid: String,
    pub account_participant_nid: Nid,
    pub account_participant_code: String,
    pub order_nid: Nid,
    pub instrument_nid: Nid,
    pub instrument_code: String,
    pub quantity: f64,
    pub periode: i64,
    pub state: TradeState,
    pub fee_flat_val: f64,
    pub fee_val_daily: f64,
    pub fee_val_accumulated: f64,
    pub matched_at: DateTime<Utc>,
    pub reimburse_at: DateTime<Utc>,
}

//! Ledger event payloads
//!
//! Every material state transition in the platform is one of the event
//! types defined here, appended to the shared log as a JSON payload with
//! the event-type label carried in the message header. The set is closed:
//! [`Event`] enumerates every type, and routing is an exhaustive match on
//! the enum rather than runtime inspection of the payload.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{Side, TradeState};
use crate::Nid;

/// Marks the launch of a service instance.
///
/// Observing our own `start_id` come back from the log is the readiness
/// handshake: everything before it was historical replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStart {
    pub id: String,
    pub start_id: String,
    pub start_time: DateTime<Utc>,
}

/// Platform-wide trading parameters.
///
/// Fee-rate fields are optional: `None` selects the built-in default rate,
/// so an explicit zero fee remains representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub nid: Nid,
    pub update: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub flat_fee: Option<f64>,
    #[serde(default)]
    pub lending_fee: Option<f64>,
    #[serde(default)]
    pub borrowing_fee: Option<f64>,
    pub max_quantity: f64,
    pub borrow_max_open_day: i64,
    pub denomination_limit: i64,
}

/// The two daily trading windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTime {
    pub nid: Nid,
    pub description: String,
    pub update: DateTime<Utc>,
    pub session1_start: NaiveTime,
    pub session1_end: NaiveTime,
    pub session2_start: NaiveTime,
    pub session2_end: NaiveTime,
}

/// Calendar exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub nid: Nid,
    pub year: i32,
    pub date: NaiveDate,
    pub description: String,
}

/// Instrument master data; `status` carries SBL eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub nid: Nid,
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: bool,
}

/// Participant master data with per-side eligibility flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub nid: Nid,
    pub code: String,
    pub name: String,
    pub borr_eligibility: bool,
    pub lend_eligibility: bool,
}

/// Trading account owned by a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub nid: Nid,
    pub code: String,
    pub sid: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    pub participant_nid: Nid,
    pub participant_code: String,
}

/// Limit update for an existing account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLimit {
    pub nid: Nid,
    pub code: String,
    pub account_nid: Nid,
    pub trade_limit: f64,
    pub pool_limit: f64,
}

/// New or amending order command.
///
/// `prev_nid` is zero for a fresh order; a non-zero value makes this an
/// amendment whose acknowledgment moves the predecessor to `Amended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub nid: Nid,
    #[serde(default)]
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
    pub settlement_date: DateTime<Utc>,
    pub reimbursement_date: DateTime<Utc>,
    pub periode: i64,
    pub market_price: f64,
    pub rate: f64,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub aro: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_nid: Nid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderNak {
    pub order_nid: Nid,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPending {
    pub order_nid: Nid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWithdraw {
    pub order_nid: Nid,
    pub reff_request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWithdrawAck {
    pub order_nid: Nid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWithdrawNak {
    pub order_nid: Nid,
    pub message: String,
}

/// Matched trade with its borrower and lender contract legs inlined.
///
/// Quantity conservation holds by construction: the sum of borrower-leg
/// quantities equals the sum of lender-leg quantities equals `quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
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
    pub lender: Vec<Contract>,
    pub borrower: Vec<Contract>,
}

/// One side of a trade, owned by a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub nid: Nid,
    pub trade_nid: Nid,
    pub clearing_reff: String,
    pub side: Side,
    pub account_nid: Nid,
    pub account_code: String,
    #[serde(default)]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeWait {
    pub trade_nid: Nid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeAck {
    pub trade_nid: Nid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeNak {
    pub trade_nid: Nid,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReimburse {
    pub trade_nid: Nid,
}

/// Start-of-day marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sod {
    pub date: NaiveDate,
}

/// End-of-day marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eod {
    pub date: NaiveDate,
}

/// Error decoding a log record into an [`Event`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event-type label: {0}")]
    UnknownLabel(String),

    #[error("malformed {label} payload: {source}")]
    Payload {
        label: &'static str,
        source: serde_json::Error,
    },
}

/// The closed set of ledger events.
///
/// Each variant wraps exactly one payload struct; the label strings below
/// are the literal `event-type` header values on the log.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ServiceStart(ServiceStart),
    Parameter(Parameter),
    SessionTime(SessionTime),
    Holiday(Holiday),
    Account(Account),
    AccountLimit(AccountLimit),
    Participant(Participant),
    Instrument(Instrument),
    Order(Order),
    OrderAck(OrderAck),
    OrderNak(OrderNak),
    OrderPending(OrderPending),
    OrderWithdraw(OrderWithdraw),
    OrderWithdrawAck(OrderWithdrawAck),
    OrderWithdrawNak(OrderWithdrawNak),
    Trade(Trade),
    TradeWait(TradeWait),
    TradeAck(TradeAck),
    TradeNak(TradeNak),
    TradeReimburse(TradeReimburse),
    Contract(Contract),
    Sod(Sod),
    Eod(Eod),
}

impl Event {
    /// The event-type header label for this event.
    pub fn label(&self) -> &'static str {
        match self {
            Event::ServiceStart(_) => "ServiceStart",
            Event::Parameter(_) => "Parameter",
            Event::SessionTime(_) => "SessionTime",
            Event::Holiday(_) => "Holiday",
            Event::Account(_) => "Account",
            Event::AccountLimit(_) => "AccountLimit",
            Event::Participant(_) => "Participant",
            Event::Instrument(_) => "Instrument",
            Event::Order(_) => "Order",
            Event::OrderAck(_) => "OrderAck",
            Event::OrderNak(_) => "OrderNak",
            Event::OrderPending(_) => "OrderPending",
            Event::OrderWithdraw(_) => "OrderWithdraw",
            Event::OrderWithdrawAck(_) => "OrderWithdrawAck",
            Event::OrderWithdrawNak(_) => "OrderWithdrawNak",
            Event::Trade(_) => "Trade",
            Event::TradeWait(_) => "TradeWait",
            Event::TradeAck(_) => "TradeAck",
            Event::TradeNak(_) => "TradeNak",
            Event::TradeReimburse(_) => "TradeReimburse",
            Event::Contract(_) => "Contract",
            Event::Sod(_) => "Sod",
            Event::Eod(_) => "Eod",
        }
    }

    /// Serialize the inner payload as JSON bytes for the log.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Event::ServiceStart(e) => serde_json::to_vec(e),
            Event::Parameter(e) => serde_json::to_vec(e),
            Event::SessionTime(e) => serde_json::to_vec(e),
            Event::Holiday(e) => serde_json::to_vec(e),
            Event::Account(e) => serde_json::to_vec(e),
            Event::AccountLimit(e) => serde_json::to_vec(e),
            Event::Participant(e) => serde_json::to_vec(e),
            Event::Instrument(e) => serde_json::to_vec(e),
            Event::Order(e) => serde_json::to_vec(e),
            Event::OrderAck(e) => serde_json::to_vec(e),
            Event::OrderNak(e) => serde_json::to_vec(e),
            Event::OrderPending(e) => serde_json::to_vec(e),
            Event::OrderWithdraw(e) => serde_json::to_vec(e),
            Event::OrderWithdrawAck(e) => serde_json::to_vec(e),
            Event::OrderWithdrawNak(e) => serde_json::to_vec(e),
            Event::Trade(e) => serde_json::to_vec(e),
            Event::TradeWait(e) => serde_json::to_vec(e),
            Event::TradeAck(e) => serde_json::to_vec(e),
            Event::TradeNak(e) => serde_json::to_vec(e),
            Event::TradeReimburse(e) => serde_json::to_vec(e),
            Event::Contract(e) => serde_json::to_vec(e),
            Event::Sod(e) => serde_json::to_vec(e),
            Event::Eod(e) => serde_json::to_vec(e),
        }
    }

    /// Decode a log record's payload by its event-type label.
    pub fn decode(label: &str, payload: &[u8]) -> Result<Event, DecodeError> {
        fn parse<'a, T: Deserialize<'a>>(
            label: &'static str,
            payload: &'a [u8],
        ) -> Result<T, DecodeError> {
            serde_json::from_slice(payload).map_err(|source| DecodeError::Payload { label, source })
        }

        match label {
            "ServiceStart" => Ok(Event::ServiceStart(parse("ServiceStart", payload)?)),
            "Parameter" => Ok(Event::Parameter(parse("Parameter", payload)?)),
            "SessionTime" => Ok(Event::SessionTime(parse("SessionTime", payload)?)),
            "Holiday" => Ok(Event::Holiday(parse("Holiday", payload)?)),
            "Account" => Ok(Event::Account(parse("Account", payload)?)),
            "AccountLimit" => Ok(Event::AccountLimit(parse("AccountLimit", payload)?)),
            "Participant" => Ok(Event::Participant(parse("Participant", payload)?)),
            "Instrument" => Ok(Event::Instrument(parse("Instrument", payload)?)),
            "Order" => Ok(Event::Order(parse("Order", payload)?)),
            "OrderAck" => Ok(Event::OrderAck(parse("OrderAck", payload)?)),
            "OrderNak" => Ok(Event::OrderNak(parse("OrderNak", payload)?)),
            "OrderPending" => Ok(Event::OrderPending(parse("OrderPending", payload)?)),
            "OrderWithdraw" => Ok(Event::OrderWithdraw(parse("OrderWithdraw", payload)?)),
            "OrderWithdrawAck" => Ok(Event::OrderWithdrawAck(parse("OrderWithdrawAck", payload)?)),
            "OrderWithdrawNak" => Ok(Event::OrderWithdrawNak(parse("OrderWithdrawNak", payload)?)),
            "Trade" => Ok(Event::Trade(parse("Trade", payload)?)),
            "TradeWait" => Ok(Event::TradeWait(parse("TradeWait", payload)?)),
            "TradeAck" => Ok(Event::TradeAck(parse("TradeAck", payload)?)),
            "TradeNak" => Ok(Event::TradeNak(parse("TradeNak", payload)?)),
            "TradeReimburse" => Ok(Event::TradeReimburse(parse("TradeReimburse", payload)?)),
            "Contract" => Ok(Event::Contract(parse("Contract", payload)?)),
            "Sod" => Ok(Event::Sod(parse("Sod", payload)?)),
            "Eod" => Ok(Event::Eod(parse("Eod", payload)?)),
            other => Err(DecodeError::UnknownLabel(other.to_string())),
        }
    }
}

macro_rules! impl_into_event {
    ($($payload:ident),* $(,)?) => {
        $(
            impl From<$payload> for Event {
                fn from(e: $payload) -> Event {
                    Event::$payload(e)
                }
            }
        )*
    };
}

impl_into_event!(
    ServiceStart,
    Parameter,
    SessionTime,
    Holiday,
    Account,
    AccountLimit,
    Participant,
    Instrument,
    Order,
    OrderAck,
    OrderNak,
    OrderPending,
    OrderWithdraw,
    OrderWithdrawAck,
    OrderWithdrawNak,
    Trade,
    TradeWait,
    TradeAck,
    TradeNak,
    TradeReimburse,
    Contract,
    Sod,
    Eod,
);

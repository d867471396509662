//! Clearing-house egress
//!
//! Builds the `/contract/matched` payload from a trade, its contract legs
//! and the account projection (investor ids live there, not on the
//! contract), and posts it with a bounded timeout. The response carries
//! only a status code.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use ledger::LedgerPoint;
use types::events::Trade;
use types::Nid;

#[derive(Debug, Error)]
pub enum ClearingError {
    #[error("trade {0} is missing a borrower or lender contract")]
    MissingLeg(Nid),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("trade {0} not found")]
    TradeNotFound(String),

    #[error("contract {0} not found")]
    ContractNotFound(String),

    #[error("contract {0} is not a lending contract")]
    NotLenderContract(String),

    #[error("clearing house returned status {0}")]
    Status(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("commit intake closed")]
    Commit(#[from] ledger::CommitError),

    #[error(transparent)]
    Id(#[from] idgen::IdError),
}

/// Fees owed by the borrower over the life of the contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BorrowerFees {
    pub flat: f64,
    pub borrowing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LenderLeg {
    pub reff: String,
    pub account: String,
    pub sid: String,
    pub participant: String,
    /// Lending revenue over the period.
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BorrowerLeg {
    pub reff: String,
    pub account: String,
    pub sid: String,
    pub participant: String,
    pub fees: BorrowerFees,
}

/// Body of `POST /contract/matched`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeMatchedPayload {
    pub pme_trade_reff: String,
    pub instrument_code: String,
    pub quantity: f64,
    pub periode: i64,
    pub aro_status: bool,
    pub fee_flat_rate: f64,
    pub fee_borr_rate: f64,
    pub fee_lend_rate: f64,
    pub matched_at: String,
    pub reimburse_at: String,
    pub lender: LenderLeg,
    pub borrower: BorrowerLeg,
}

impl TradeMatchedPayload {
    /// Assemble the payload for one trade from the projection.
    pub fn build(ledger: &LedgerPoint, trade: &Trade) -> Result<Self, ClearingError> {
        let borrower = trade
            .borrower
            .first()
            .ok_or(ClearingError::MissingLeg(trade.nid))?;
        let lender = trade
            .lender
            .first()
            .ok_or(ClearingError::MissingLeg(trade.nid))?;

        let borrower_account = ledger
            .get_account(&borrower.account_code)
            .ok_or_else(|| ClearingError::AccountNotFound(borrower.account_code.clone()))?;
        let lender_account = ledger
            .get_account(&lender.account_code)
            .ok_or_else(|| ClearingError::AccountNotFound(lender.account_code.clone()))?;

        // The roll-over flag travels on the borrower's originating order.
        let aro_status = ledger
            .get_order(borrower.order_nid)
            .map(|order| order.aro)
            .unwrap_or(false);

        Ok(Self {
            pme_trade_reff: trade.clearing_reff.clone(),
            instrument_code: trade.instrument_code.clone(),
            quantity: trade.quantity,
            periode: trade.periode,
            aro_status,
            fee_flat_rate: trade.fee_flat_rate,
            fee_borr_rate: trade.fee_borr_rate,
            fee_lend_rate: trade.fee_lend_rate,
            matched_at: trade.matched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            reimburse_at: trade.reimburse_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            lender: LenderLeg {
                reff: lender.clearing_reff.clone(),
                account: lender.account_code.clone(),
                sid: lender_account.sid,
                participant: lender.account_participant_code.clone(),
                fee: lender.fee_val_daily * trade.periode as f64,
            },
            borrower: BorrowerLeg {
                reff: borrower.clearing_reff.clone(),
                account: borrower.account_code.clone(),
                sid: borrower_account.sid,
                participant: borrower.account_participant_code.clone(),
                fees: BorrowerFees {
                    flat: borrower.fee_flat_val,
                    borrowing: borrower.fee_val_daily * trade.periode as f64,
                },
            },
        })
    }
}

/// Blocking HTTP client for the clearing house.
pub struct ClearClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl ClearClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClearingError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// POST the payload to `/contract/matched`.
    pub fn send_trade(&self, payload: &TradeMatchedPayload) -> Result<(), ClearingError> {
        let url = format!("{}/contract/matched", self.base_url);
        let response = self.http.post(&url).json(payload).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClearingError::Status(status.as_u16()));
        }
        info!(trade_reff = %payload.pme_trade_reff, "trade forwarded to clearing house");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use ledger::{LedgerPoint, LogRecord, MemoryLog};
    use std::sync::Arc;
    use types::events::{Account, Contract, Event};
    use types::state::{Side, TradeState};

    fn ingest(ledger: &LedgerPoint, event: Event) {
        let record = LogRecord {
            offset: 0,
            timestamp_ms: ledger::current_time_millis(),
            label: event.label().to_string(),
            payload: event.encode().unwrap(),
        };
        ledger.ingest(&record);
    }

    fn seeded_ledger() -> Arc<LedgerPoint> {
        let ledger = Arc::new(LedgerPoint::new(Arc::new(MemoryLog::new()), "clearing-test"));
        for (nid, code, sid, participant) in [
            (10, "ACC-BORR", "SID-B", "P1"),
            (20, "ACC-LEND", "SID-L", "P2"),
        ] {
            ingest(
                &ledger,
                Event::Account(Account {
                    nid,
                    code: code.into(),
                    sid: sid.into(),
                    name: code.into(),
                    address: String::new(),
                    participant_nid: 1,
                    participant_code: participant.into(),
                }),
            );
        }
        ledger
    }

    fn leg(side: Side, account: &str, order_nid: i64, daily_fee: f64) -> Contract {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();
        Contract {
            nid: if side == Side::Borr { 2001 } else { 2002 },
            trade_nid: 2000,
            clearing_reff: format!("SBL-20250310-2000-{side}"),
            side,
            account_nid: 0,
            account_code: account.into(),
            account_sid: String::new(),
            account_participant_nid: 1,
            account_participant_code: if side == Side::Borr { "P1" } else { "P2" }.into(),
            order_nid,
            instrument_nid: 7,
            instrument_code: "INST-X".into(),
            quantity: 1000.0,
            periode: 10,
            state: TradeState::Submitted,
            fee_flat_val: if side == Side::Borr { 500.0 } else { 0.0 },
            fee_val_daily: daily_fee,
            fee_val_accumulated: 0.0,
            matched_at: now,
            reimburse_at: now + ChronoDuration::days(10),
        }
    }

    fn trade() -> Trade {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap();
        Trade {
            nid: 2000,
            clearing_reff: "SBL-20250310-2000".into(),
            instrument_nid: 7,
            instrument_code: "INST-X".into(),
            quantity: 1000.0,
            periode: 10,
            state: TradeState::Submitted,
            fee_flat_rate: 0.0005,
            fee_borr_rate: 0.18,
            fee_lend_rate: 0.15,
            matched_at: now,
            reimburse_at: now + ChronoDuration::days(10),
            lender: vec![leg(Side::Lend, "ACC-LEND", 2, 400.0)],
            borrower: vec![leg(Side::Borr, "ACC-BORR", 1, 493.15)],
        }
    }

    #[test]
    fn test_build_payload() {
        let ledger = seeded_ledger();
        let payload = TradeMatchedPayload::build(&ledger, &trade()).unwrap();

        assert_eq!(payload.pme_trade_reff, "SBL-20250310-2000");
        assert_eq!(payload.quantity, 1000.0);
        assert_eq!(payload.matched_at, "2025-03-10 09:30:00");
        assert_eq!(payload.reimburse_at, "2025-03-20 09:30:00");
        assert_eq!(payload.lender.sid, "SID-L");
        assert_eq!(payload.borrower.sid, "SID-B");
        assert_eq!(payload.lender.fee, 4000.0);
        assert_eq!(payload.borrower.fees.flat, 500.0);
        assert!((payload.borrower.fees.borrowing - 4931.5).abs() < 1e-9);
        assert!(!payload.aro_status);
    }

    #[test]
    fn test_build_payload_missing_leg() {
        let ledger = seeded_ledger();
        let mut bad = trade();
        bad.lender.clear();
        assert!(matches!(
            TradeMatchedPayload::build(&ledger, &bad),
            Err(ClearingError::MissingLeg(2000))
        ));
    }

    #[test]
    fn test_build_payload_missing_account() {
        let ledger = Arc::new(LedgerPoint::new(Arc::new(MemoryLog::new()), "empty"));
        assert!(matches!(
            TradeMatchedPayload::build(&ledger, &trade()),
            Err(ClearingError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_payload_wire_keys() {
        let ledger = seeded_ledger();
        let payload = TradeMatchedPayload::build(&ledger, &trade()).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert!(json.get("pme_trade_reff").is_some());
        assert!(json.get("aro_status").is_some());
        assert!(json["lender"].get("fee").is_some());
        assert!(json["borrower"]["fees"].get("flat").is_some());
        assert_eq!(json["lender"]["participant"], "P2");
    }
}

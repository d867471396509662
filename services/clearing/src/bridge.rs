//! Inbound command mapping and the ledger subscriber
//!
//! The front door hosts the HTTP endpoints; what crosses into the core is
//! the typed commands here. Each maps onto ledger events:
//!
//! - matched-confirm → `TradeAck`
//! - reimburse → `TradeReimburse`, preceded by a successor borrow order
//!   per borrower contract when the auto-roll-over flag is set
//! - lender recall → a replacement borrow order per borrower contract
//!
//! The subscriber half forwards every live trade to the clearing house
//! and commits `TradeWait` whether or not the egress succeeded — the log
//! stays authoritative and the end-of-day sweep catches trades the
//! clearing house never answered.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};

use idgen::Generator;
use ledger::{Committer, LedgerPoint, Subscriber};
use types::entities::{ContractEntity, TradeEntity};
use types::events::{Eod, Order, Trade, TradeAck, TradeNak, TradeReimburse, TradeWait};
use types::state::{Side, TradeState};
use types::Nid;

use crate::client::{ClearClient, ClearingError, TradeMatchedPayload};

/// Trade confirmation from the clearing house.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchedConfirmRequest {
    pub pme_trade_reff: String,
    pub state: String,
    pub borr_contract_reff: String,
    pub lend_contract_reff: String,
    pub open_time: DateTime<Utc>,
}

/// Reimbursement instruction, optionally rolling the borrow over.
#[derive(Debug, Clone, Deserialize)]
pub struct ReimburseRequest {
    pub pme_trade_reff: String,
    #[serde(default)]
    pub aro: bool,
    pub close_time: DateTime<Utc>,
}

/// Lender recall: the lender wants its securities back, the borrower
/// needs a replacement lender.
#[derive(Debug, Clone, Deserialize)]
pub struct LenderRecallRequest {
    pub contract_reff: String,
}

/// Bridge between the ledger and the external clearing house.
pub struct ClearingBridge {
    ledger: Arc<LedgerPoint>,
    committer: Committer,
    generator: Arc<Generator>,
    client: Option<ClearClient>,
}

impl ClearingBridge {
    pub fn new(
        ledger: Arc<LedgerPoint>,
        generator: Arc<Generator>,
        client: Option<ClearClient>,
    ) -> Arc<Self> {
        let committer = ledger.committer();
        Arc::new(Self {
            ledger,
            committer,
            generator,
            client,
        })
    }

    /// Map a trade confirmation onto `TradeAck`.
    pub fn matched_confirm(&self, request: &MatchedConfirmRequest) -> Result<Nid, ClearingError> {
        let trade = self.find_trade(&request.pme_trade_reff)?;
        if request.state != "OK" {
            warn!(
                trade_reff = %request.pme_trade_reff,
                state = %request.state,
                "confirmation state is not OK"
            );
        }
        self.committer.send(TradeAck { trade_nid: trade.nid })?;
        info!(trade_nid = trade.nid, trade_reff = %request.pme_trade_reff, "trade approved by clearing");
        Ok(trade.nid)
    }

    /// Map a reimbursement instruction onto `TradeReimburse`, spawning the
    /// roll-over borrow orders first when requested.
    pub fn reimburse(&self, request: &ReimburseRequest) -> Result<Nid, ClearingError> {
        let trade = self.find_trade(&request.pme_trade_reff)?;

        if request.aro {
            for contract_nid in &trade.borrower {
                let Some(contract) = self.ledger.get_contract(*contract_nid) else {
                    continue;
                };
                let order = self.roll_over_order(&trade, &contract)?;
                info!(
                    order_nid = order.nid,
                    account = %order.account_code,
                    "originated roll-over borrow order"
                );
                self.committer.send(order)?;
            }
        }

        self.committer.send(TradeReimburse { trade_nid: trade.nid })?;
        info!(trade_nid = trade.nid, aro = request.aro, "trade reimbursed");
        Ok(trade.nid)
    }

    /// Map a lender recall onto replacement borrow orders.
    pub fn lender_recall(&self, request: &LenderRecallRequest) -> Result<Vec<Nid>, ClearingError> {
        let contract = self.find_contract(&request.contract_reff)?;
        if contract.side != Side::Lend {
            return Err(ClearingError::NotLenderContract(
                request.contract_reff.clone(),
            ));
        }
        let trade = self
            .ledger
            .get_trade(contract.trade_nid)
            .ok_or_else(|| ClearingError::TradeNotFound(request.contract_reff.clone()))?;

        let mut originated = Vec::new();
        for contract_nid in &trade.borrower {
            let Some(borrower) = self.ledger.get_contract(*contract_nid) else {
                continue;
            };
            let order = self.recall_order(&request.contract_reff, &contract, &borrower)?;
            info!(
                order_nid = order.nid,
                account = %order.account_code,
                "originated replacement borrow order for recall"
            );
            originated.push(order.nid);
            self.committer.send(order)?;
        }
        Ok(originated)
    }

    /// Reject trades the clearing house never answered by the session
    /// close of the given day.
    pub fn check_pending_trades(&self, date: NaiveDate) {
        let session_close = self
            .ledger
            .get_session_time()
            .map(|s| s.session2_end)
            .unwrap_or_else(|| NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        let cutoff = date.and_time(session_close).and_utc();

        let mut expired: Vec<Nid> = Vec::new();
        self.ledger.for_each_trade(|trade| {
            if trade.state == TradeState::AwaitingClearing && trade.matched_at <= cutoff {
                expired.push(trade.nid);
            }
            true
        });
        expired.sort_unstable();

        for trade_nid in expired {
            warn!(trade_nid, %cutoff, "trade not approved by session close, rejecting");
            if let Err(err) = self.committer.send(TradeNak {
                trade_nid,
                message: "not approved by clearing before session close".into(),
            }) {
                error!(%err, "failed to submit trade rejection");
            }
        }
    }

    fn roll_over_order(
        &self,
        trade: &TradeEntity,
        contract: &ContractEntity,
    ) -> Result<Order, ClearingError> {
        let origin = self.ledger.get_order(contract.order_nid);
        let now = Utc::now();
        // Settle the successor on the next day, same period length.
        let settlement = now + Duration::days(1);
        let reimbursement = settlement + Duration::days(trade.periode);

        Ok(Order {
            nid: self.generator.next_id()?,
            prev_nid: 0,
            reff_request_id: format!("{}-ARO", trade.clearing_reff),
            account_nid: contract.account_nid,
            account_code: contract.account_code.clone(),
            participant_nid: contract.account_participant_nid,
            participant_code: contract.account_participant_code.clone(),
            instrument_nid: contract.instrument_nid,
            instrument_code: contract.instrument_code.clone(),
            side: Side::Borr,
            quantity: contract.quantity,
            settlement_date: settlement,
            reimbursement_date: reimbursement,
            periode: trade.periode,
            market_price: origin.as_ref().map(|o| o.market_price).unwrap_or(0.0),
            rate: origin.as_ref().map(|o| o.rate).unwrap_or(0.0),
            instruction: format!("roll-over of {}", trade.clearing_reff),
            aro: true,
        })
    }

    fn recall_order(
        &self,
        recalled_reff: &str,
        recalled: &ContractEntity,
        borrower: &ContractEntity,
    ) -> Result<Order, ClearingError> {
        let now = Utc::now();
        // Period re-derived from the dates so the replacement passes the
        // same pre-trade checks as any fresh borrow.
        let periode =
            (recalled.reimburse_at.date_naive() - now.date_naive()).num_days();

        Ok(Order {
            nid: self.generator.next_id()?,
            prev_nid: 0,
            reff_request_id: format!("{recalled_reff}-RECALL"),
            account_nid: borrower.account_nid,
            account_code: borrower.account_code.clone(),
            participant_nid: borrower.account_participant_nid,
            participant_code: borrower.account_participant_code.clone(),
            instrument_nid: borrower.instrument_nid,
            instrument_code: borrower.instrument_code.clone(),
            side: Side::Borr,
            quantity: recalled.quantity,
            settlement_date: now,
            reimbursement_date: recalled.reimburse_at,
            periode,
            // Priced at matching time.
            market_price: 0.0,
            rate: 0.0,
            instruction: format!("lender recall of {recalled_reff}"),
            aro: false,
        })
    }

    fn find_trade(&self, clearing_reff: &str) -> Result<TradeEntity, ClearingError> {
        let mut found = None;
        self.ledger.for_each_trade(|trade| {
            if trade.clearing_reff == clearing_reff {
                found = Some(trade.clone());
                false
            } else {
                true
            }
        });
        found.ok_or_else(|| ClearingError::TradeNotFound(clearing_reff.to_string()))
    }

    fn find_contract(&self, clearing_reff: &str) -> Result<ContractEntity, ClearingError> {
        let mut found = None;
        self.ledger.for_each_contract(|contract| {
            if contract.clearing_reff == clearing_reff {
                found = Some(contract.clone());
                false
            } else {
                true
            }
        });
        found.ok_or_else(|| ClearingError::ContractNotFound(clearing_reff.to_string()))
    }
}

impl Subscriber for ClearingBridge {
    fn on_trade(&self, event: &Trade) {
        if !self.ledger.is_ready() {
            return;
        }

        if let Some(client) = &self.client {
            match TradeMatchedPayload::build(&self.ledger, event) {
                Ok(payload) => {
                    if let Err(err) = client.send_trade(&payload) {
                        error!(trade_nid = event.nid, %err, "clearing egress failed");
                    }
                }
                Err(err) => {
                    error!(trade_nid = event.nid, %err, "could not assemble clearing payload");
                }
            }
        }

        // Awaiting the clearing verdict either way; the EOD sweep rejects
        // trades that never get one.
        if let Err(err) = self.committer.send(TradeWait {
            trade_nid: event.nid,
        }) {
            error!(%err, "failed to submit trade wait");
        }
    }

    fn on_eod(&self, event: &Eod) {
        if self.ledger.is_ready() {
            self.check_pending_trades(event.date);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossbeam_channel::Receiver;
    use ledger::{EventLog, LogRecord, MemoryLog};
    use types::events::{Account, Contract, Event, SessionTime};

    struct Fixture {
        log: Arc<MemoryLog>,
        ledger: Arc<LedgerPoint>,
        bridge: Arc<ClearingBridge>,
        rx: Receiver<LogRecord>,
    }

    impl Fixture {
        fn new() -> Self {
            let log = Arc::new(MemoryLog::new());
            let ledger = Arc::new(LedgerPoint::new(log.clone(), "clearing-test"));
            let bridge =
                ClearingBridge::new(ledger.clone(), Arc::new(Generator::new(3).unwrap()), None);
            let rx = log.subscribe().unwrap();
            Self {
                log,
                ledger,
                bridge,
                rx,
            }
        }

        /// Apply an event to the projection without involving the log.
        fn ingest(&self, event: Event) {
            self.ingest_at(event, ledger::current_time_millis());
        }

        fn ingest_at(&self, event: Event, timestamp_ms: i64) {
            let record = LogRecord {
                offset: 0,
                timestamp_ms,
                label: event.label().to_string(),
                payload: event.encode().unwrap(),
            };
            self.ledger.ingest(&record);
        }

        /// Publish committed events and apply them.
        fn pump(&self) {
            loop {
                let mut progressed = false;
                while let Ok(record) = self.rx.try_recv() {
                    self.ledger.ingest(&record);
                    progressed = true;
                }
                if self.ledger.pump_commits().unwrap() > 0 {
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
        }

        fn count_label(&self, label: &str) -> usize {
            self.log
                .records()
                .iter()
                .filter(|r| r.label == label)
                .count()
        }

        fn seed_trade(&self, matched_at: DateTime<Utc>) {
            for (nid, code, sid, participant) in [
                (10, "ACC-BORR", "SID-B", "P1"),
                (20, "ACC-LEND", "SID-L", "P2"),
            ] {
                self.ingest(Event::Account(Account {
                    nid,
                    code: code.into(),
                    sid: sid.into(),
                    name: code.into(),
                    address: String::new(),
                    participant_nid: 1,
                    participant_code: participant.into(),
                }));
            }
            self.ingest(Event::Order(types::events::Order {
                nid: 1,
                prev_nid: 0,
                reff_request_id: "REQ-1".into(),
                account_nid: 10,
                account_code: "ACC-BORR".into(),
                participant_nid: 1,
                participant_code: "P1".into(),
                instrument_nid: 7,
                instrument_code: "INST-X".into(),
                side: Side::Borr,
                quantity: 1000.0,
                settlement_date: matched_at,
                reimbursement_date: matched_at + Duration::days(10),
                periode: 10,
                market_price: 1000.0,
                rate: 0.0,
                instruction: String::new(),
                aro: false,
            }));
            self.ingest(Event::Trade(trade_event(matched_at)));
        }
    }

    fn contract_leg(side: Side, matched_at: DateTime<Utc>) -> Contract {
        Contract {
            nid: if side == Side::Borr { 2001 } else { 2002 },
            trade_nid: 2000,
            clearing_reff: format!("SBL-20250310-2000-{side}"),
            side,
            account_nid: if side == Side::Borr { 10 } else { 20 },
            account_code: if side == Side::Borr { "ACC-BORR" } else { "ACC-LEND" }.into(),
            account_sid: String::new(),
            account_participant_nid: 1,
            account_participant_code: if side == Side::Borr { "P1" } else { "P2" }.into(),
            order_nid: if side == Side::Borr { 1 } else { 2 },
            instrument_nid: 7,
            instrument_code: "INST-X".into(),
            quantity: 1000.0,
            periode: 10,
            state: TradeState::Submitted,
            fee_flat_val: 500.0,
            fee_val_daily: 400.0,
            fee_val_accumulated: 0.0,
            matched_at,
            reimburse_at: matched_at + Duration::days(10),
        }
    }

    fn trade_event(matched_at: DateTime<Utc>) -> Trade {
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
            matched_at,
            reimburse_at: matched_at + Duration::days(10),
            lender: vec![contract_leg(Side::Lend, matched_at)],
            borrower: vec![contract_leg(Side::Borr, matched_at)],
        }
    }

    #[test]
    fn test_matched_confirm_maps_to_trade_ack() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        let nid = f
            .bridge
            .matched_confirm(&MatchedConfirmRequest {
                pme_trade_reff: "SBL-20250310-2000".into(),
                state: "OK".into(),
                borr_contract_reff: "SBL-20250310-2000-BORR".into(),
                lend_contract_reff: "SBL-20250310-2000-LEND".into(),
                open_time: Utc::now(),
            })
            .unwrap();
        assert_eq!(nid, 2000);
        f.pump();

        assert_eq!(f.ledger.get_trade(2000).unwrap().state, TradeState::Open);
        assert_eq!(f.ledger.get_contract(2001).unwrap().state, TradeState::Open);
    }

    #[test]
    fn test_matched_confirm_unknown_trade() {
        let f = Fixture::new();
        let err = f
            .bridge
            .matched_confirm(&MatchedConfirmRequest {
                pme_trade_reff: "SBL-MISSING".into(),
                state: "OK".into(),
                borr_contract_reff: String::new(),
                lend_contract_reff: String::new(),
                open_time: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, ClearingError::TradeNotFound(_)));
    }

    #[test]
    fn test_reimburse_closes_trade_and_contracts() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        f.bridge
            .reimburse(&ReimburseRequest {
                pme_trade_reff: "SBL-20250310-2000".into(),
                aro: false,
                close_time: Utc::now(),
            })
            .unwrap();
        f.pump();

        assert_eq!(f.count_label("Order"), 0);
        assert_eq!(f.ledger.get_trade(2000).unwrap().state, TradeState::Closed);
        assert_eq!(
            f.ledger.get_contract(2001).unwrap().state,
            TradeState::Closed
        );
        assert_eq!(
            f.ledger.get_contract(2002).unwrap().state,
            TradeState::Closed
        );
    }

    #[test]
    fn test_reimburse_with_aro_spawns_successor_order() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        f.bridge
            .reimburse(&ReimburseRequest {
                pme_trade_reff: "SBL-20250310-2000".into(),
                aro: true,
                close_time: Utc::now(),
            })
            .unwrap();
        f.pump();

        assert_eq!(f.count_label("Order"), 1);
        let record = f
            .log
            .records()
            .into_iter()
            .find(|r| r.label == "Order")
            .unwrap();
        let Event::Order(order) = Event::decode(&record.label, &record.payload).unwrap() else {
            panic!("expected an order event");
        };
        assert!(order.aro);
        assert_eq!(order.side, Side::Borr);
        assert_eq!(order.account_code, "ACC-BORR");
        assert_eq!(order.quantity, 1000.0);
        assert_eq!(order.periode, 10);
        assert_eq!(
            (order.reimbursement_date.date_naive() - order.settlement_date.date_naive()).num_days(),
            10
        );
        assert!(order.reff_request_id.ends_with("-ARO"));

        assert_eq!(f.ledger.get_trade(2000).unwrap().state, TradeState::Closed);
    }

    #[test]
    fn test_lender_recall_spawns_replacement_borrow() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        let originated = f
            .bridge
            .lender_recall(&LenderRecallRequest {
                contract_reff: "SBL-20250310-2000-LEND".into(),
            })
            .unwrap();
        assert_eq!(originated.len(), 1);
        f.pump();

        let record = f
            .log
            .records()
            .into_iter()
            .find(|r| r.label == "Order")
            .unwrap();
        let Event::Order(order) = Event::decode(&record.label, &record.payload).unwrap() else {
            panic!("expected an order event");
        };
        assert_eq!(order.side, Side::Borr);
        assert_eq!(order.account_code, "ACC-BORR");
        assert_eq!(order.market_price, 0.0);
        assert!(order.reff_request_id.ends_with("-RECALL"));
        assert_eq!(
            (order.reimbursement_date.date_naive() - Utc::now().date_naive()).num_days(),
            order.periode
        );
    }

    #[test]
    fn test_lender_recall_rejects_borrower_contract() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        let err = f
            .bridge
            .lender_recall(&LenderRecallRequest {
                contract_reff: "SBL-20250310-2000-BORR".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ClearingError::NotLenderContract(_)));
    }

    #[test]
    fn test_eod_sweep_rejects_unanswered_trades() {
        let f = Fixture::new();
        let matched_at = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        f.seed_trade(matched_at);
        f.ingest(Event::SessionTime(SessionTime {
            nid: 5,
            description: "regular".into(),
            update: matched_at,
            session1_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            session1_end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            session2_start: NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            session2_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }));
        f.ingest(Event::TradeWait(TradeWait { trade_nid: 2000 }));
        assert_eq!(
            f.ledger.get_trade(2000).unwrap().state,
            TradeState::AwaitingClearing
        );

        f.bridge
            .check_pending_trades(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        f.pump();

        assert_eq!(f.count_label("TradeNak"), 1);
        assert_eq!(
            f.ledger.get_trade(2000).unwrap().state,
            TradeState::Rejected
        );
    }

    #[test]
    fn test_eod_sweep_spares_trades_matched_after_session_close() {
        let f = Fixture::new();
        // Matched after the 16:00 session close of the sweep date.
        let matched_at = Utc.with_ymd_and_hms(2025, 3, 10, 17, 30, 0).unwrap();
        f.seed_trade(matched_at);
        f.ingest(Event::SessionTime(SessionTime {
            nid: 5,
            description: "regular".into(),
            update: matched_at,
            session1_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            session1_end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            session2_start: NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
            session2_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }));
        f.ingest(Event::TradeWait(TradeWait { trade_nid: 2000 }));

        f.bridge
            .check_pending_trades(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        f.pump();

        assert_eq!(f.count_label("TradeNak"), 0);
        assert_eq!(
            f.ledger.get_trade(2000).unwrap().state,
            TradeState::AwaitingClearing
        );
    }

    #[test]
    fn test_on_trade_commits_trade_wait_when_live() {
        let f = Fixture::new();
        f.seed_trade(Utc::now());

        // Not ready: replayed trades must not be re-forwarded.
        f.bridge.on_trade(&trade_event(Utc::now()));
        f.pump();
        assert_eq!(f.count_label("TradeWait"), 0);

        // Go live, then a fresh trade gets a TradeWait.
        f.ledger
            .publish(&Event::ServiceStart(f.ledger.service_start_event()))
            .unwrap();
        f.pump();
        assert!(f.ledger.is_ready());

        f.bridge.on_trade(&trade_event(Utc::now()));
        f.pump();
        assert_eq!(f.count_label("TradeWait"), 1);
        assert_eq!(
            f.ledger.get_trade(2000).unwrap().state,
            TradeState::AwaitingClearing
        );
    }
}

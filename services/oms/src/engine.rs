//! OMS orchestration
//!
//! Drives the order lifecycle off ledger events: validation on `Order`,
//! matching on `OrderAck`, book removal on `OrderWithdraw`, pending-order
//! promotion on `Sod`. All side effects are suppressed during historical
//! replay — the projection transitions in the replayed events already
//! carry their outcome — and [`Oms::init_replay`] reconverges the book
//! once the ledger goes live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info, warn};

use idgen::Generator;
use ledger::{Committer, LedgerPoint, Subscriber};
use types::events::{
    Event, Instrument, Order, OrderAck, OrderNak, OrderPending, OrderWithdraw, OrderWithdrawAck,
    OrderWithdrawNak, Sod,
};
use types::state::OrderState;
use types::Nid;

use crate::fees::FeeRates;
use crate::matcher::Matcher;
use crate::tradegen::TradeGenerator;
use crate::validator::Validator;

struct OmsState {
    matcher: Matcher,
    /// Instrument eligibility cache, maintained from `Instrument` events.
    eligibility: HashMap<String, bool>,
}

/// The order-management engine; one per OMS service instance.
pub struct Oms {
    ledger: Arc<LedgerPoint>,
    committer: Committer,
    validator: Validator,
    tradegen: TradeGenerator,
    state: Mutex<OmsState>,
}

impl Oms {
    pub fn new(ledger: Arc<LedgerPoint>, generator: Arc<Generator>) -> Arc<Self> {
        let committer = ledger.committer();
        let validator = Validator::new(ledger.clone());
        Arc::new(Self {
            ledger,
            committer,
            validator,
            tradegen: TradeGenerator::new(generator),
            state: Mutex::new(OmsState {
                matcher: Matcher::new(),
                eligibility: HashMap::new(),
            }),
        })
    }

    fn commit(&self, event: impl Into<Event>) {
        if let Err(err) = self.committer.send(event) {
            error!(%err, "failed to submit event to commit intake");
        }
    }

    /// Validate a submitted order and acknowledge, reject or park it.
    pub fn process_order(&self, order_nid: Nid) {
        let Some(order) = self.ledger.get_order(order_nid) else {
            warn!(order_nid, "order not found in projection");
            return;
        };
        info!(
            order_nid,
            side = %order.side,
            instrument = %order.instrument_code,
            quantity = order.quantity,
            "processing order"
        );

        let today = Utc::now().date_naive();
        if let Err(err) = self.validator.validate_order(&order, today) {
            info!(order_nid, %err, "order rejected");
            self.commit(OrderNak {
                order_nid,
                message: err.to_string(),
            });
            return;
        }

        if self.validator.is_pending_new(&order, today) {
            info!(
                order_nid,
                settlement_date = %order.settlement_date.date_naive(),
                "order parked until settlement date"
            );
            self.commit(OrderPending { order_nid });
            return;
        }

        self.commit(OrderAck { order_nid });
        // Matching happens when the acknowledgment comes back off the log.
    }

    /// Match an acknowledged order against the opposite side of its book.
    pub fn match_order(&self, order_nid: Nid) {
        let Some(order) = self.ledger.get_order(order_nid) else {
            warn!(order_nid, "acknowledged order not found in projection");
            return;
        };
        if !order.state.is_working() {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !self.instrument_eligible(&mut state, &order.instrument_code) {
            warn!(
                order_nid,
                instrument = %order.instrument_code,
                "instrument ineligible, queueing without matching"
            );
            state.matcher.insert(&order);
            return;
        }

        let ledger = &self.ledger;
        let result = state.matcher.match_order(&order, |nid| ledger.get_order(nid));

        if !result.matches.is_empty() {
            let rates = FeeRates::resolve(self.ledger.get_parameter().as_ref());
            let now = Utc::now();
            for m in &result.matches {
                match self.tradegen.generate(m, &rates, now) {
                    Ok(trade) => {
                        info!(
                            trade_reff = %trade.clearing_reff,
                            quantity = trade.quantity,
                            borrower_order = m.borrower.nid,
                            lender_order = m.lender.nid,
                            "trade generated"
                        );
                        self.commit(trade);
                    }
                    Err(err) => {
                        error!(order_nid, %err, "trade id allocation failed, skipping match");
                    }
                }
            }
        }

        if !result.fully_matched() {
            state.matcher.insert(&order);
            info!(
                order_nid,
                remaining = result.remaining,
                "order queued with residual quantity"
            );
        }
    }

    /// Withdraw a working order from the book.
    pub fn process_withdraw(&self, withdraw: &OrderWithdraw) {
        let order_nid = withdraw.order_nid;
        let Some(order) = self.ledger.get_order(order_nid) else {
            self.commit(OrderWithdrawNak {
                order_nid,
                message: "order not found".into(),
            });
            return;
        };

        if !order.state.is_working() {
            self.commit(OrderWithdrawNak {
                order_nid,
                message: format!("order cannot be withdrawn in state {}", order.state),
            });
            return;
        }

        let removed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.matcher.remove(&order)
        };
        info!(order_nid, removed, "order withdrawn from book");
        self.commit(OrderWithdrawAck { order_nid });
    }

    /// Promote pending-new orders whose settlement date has arrived.
    pub fn promote_pending(&self, sod: &Sod) {
        let mut due: Vec<Nid> = Vec::new();
        self.ledger.for_each_order(|order| {
            if order.state == OrderState::PendingNew
                && order.settlement_date.date_naive() == sod.date
            {
                due.push(order.nid);
            }
            true
        });
        due.sort_unstable();

        for order_nid in due {
            info!(order_nid, date = %sod.date, "promoting pending order at start of day");
            self.commit(OrderAck { order_nid });
        }
    }

    /// Resume interrupted work after replay: validate orders still in
    /// `Submitted` and re-match everything left `Open`.
    pub fn init_replay(&self) {
        let mut submitted: Vec<Nid> = Vec::new();
        let mut open: Vec<Nid> = Vec::new();
        self.ledger.for_each_order(|order| {
            match order.state {
                OrderState::Submitted => submitted.push(order.nid),
                OrderState::Open | OrderState::PartiallyFilled => open.push(order.nid),
                _ => {}
            }
            true
        });
        submitted.sort_unstable();
        open.sort_unstable();

        info!(
            submitted = submitted.len(),
            open = open.len(),
            "reconverging order state after replay"
        );
        for order_nid in submitted {
            self.process_order(order_nid);
        }
        for order_nid in open {
            self.match_order(order_nid);
        }
    }

    /// (borrow, lend) queue depths for an instrument, for introspection.
    pub fn book_depth(&self, instrument_code: &str) -> (usize, usize) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.matcher.depth(instrument_code)
    }

    fn instrument_eligible(&self, state: &mut OmsState, instrument_code: &str) -> bool {
        if let Some(&status) = state.eligibility.get(instrument_code) {
            return status;
        }
        let status = self
            .ledger
            .get_instrument(instrument_code)
            .map(|i| i.status)
            .unwrap_or(false);
        state
            .eligibility
            .insert(instrument_code.to_string(), status);
        status
    }
}

impl Subscriber for Oms {
    fn on_order(&self, event: &Order) {
        if self.ledger.is_ready() {
            self.process_order(event.nid);
        }
    }

    fn on_order_ack(&self, event: &OrderAck) {
        if self.ledger.is_ready() {
            self.match_order(event.order_nid);
        }
    }

    fn on_order_withdraw(&self, event: &OrderWithdraw) {
        if self.ledger.is_ready() {
            self.process_withdraw(event);
        }
    }

    fn on_instrument(&self, event: &Instrument) {
        // Eligibility flips arrive as events; the cache tracks them during
        // replay too so the post-replay book agrees with the projection.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .eligibility
            .insert(event.code.clone(), event.status);
        if !event.status {
            info!(instrument = %event.code, "instrument no longer eligible, matching blocked");
        }
    }

    fn on_sod(&self, event: &Sod) {
        if self.ledger.is_ready() {
            self.promote_pending(event);
        }
    }
}

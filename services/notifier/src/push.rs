//! Event-to-notification mapping
//!
//! Not every ledger event produces a push notification: master data stays
//! quiet except for limit updates and instrument eligibility flips, which
//! subscribers render live. The notifier runs during replay as well —
//! that is what rebuilds the recovery buffer after a restart.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use ledger::{current_time_millis, LedgerPoint, Subscriber};
use types::events::*;

use crate::hub::Hub;

/// Ledger subscriber feeding the push hub.
pub struct PushNotifier {
    hub: Arc<Hub>,
    ledger: Arc<LedgerPoint>,
}

impl PushNotifier {
    pub fn new(hub: Arc<Hub>, ledger: Arc<LedgerPoint>) -> Self {
        Self { hub, ledger }
    }

    fn notify(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(map) = data.as_object_mut() {
            map.insert("timestamp".into(), json!(current_time_millis()));
        }
        let sequence = self.hub.broadcast(event_type, data);
        debug!(
            event_type,
            sequence,
            clients = self.hub.client_count(),
            "notification broadcast"
        );
    }
}

impl Subscriber for PushNotifier {
    fn on_account_limit(&self, event: &AccountLimit) {
        self.notify(
            "account_limit_updated",
            json!({
                "account_code": event.code,
                "trade_limit": event.trade_limit,
                "pool_limit": event.pool_limit,
            }),
        );
    }

    fn on_instrument(&self, event: &Instrument) {
        self.notify(
            "instrument_status_changed",
            json!({
                "instrument_code": event.code,
                "instrument_name": event.name,
                "status": if event.status { "eligible" } else { "ineligible" },
            }),
        );
    }

    fn on_order(&self, event: &Order) {
        self.notify(
            "order_created",
            json!({
                "order_nid": event.nid,
                "account_code": event.account_code,
                "instrument": event.instrument_code,
                "side": event.side,
                "quantity": event.quantity,
                "reff_request_id": event.reff_request_id,
                "state": "S",
            }),
        );
    }

    fn on_order_ack(&self, event: &OrderAck) {
        let Some(order) = self.ledger.get_order(event.order_nid) else {
            return;
        };
        self.notify(
            "order_acknowledged",
            json!({
                "order_nid": event.order_nid,
                "account_code": order.account_code,
                "state": "O",
            }),
        );
    }

    fn on_order_nak(&self, event: &OrderNak) {
        let Some(order) = self.ledger.get_order(event.order_nid) else {
            return;
        };
        self.notify(
            "order_rejected",
            json!({
                "order_nid": event.order_nid,
                "account_code": order.account_code,
                "state": "R",
                "message": event.message,
            }),
        );
    }

    fn on_order_pending(&self, event: &OrderPending) {
        let Some(order) = self.ledger.get_order(event.order_nid) else {
            return;
        };
        self.notify(
            "order_pending",
            json!({
                "order_nid": event.order_nid,
                "account_code": order.account_code,
                "state": "G",
            }),
        );
    }

    fn on_order_withdraw_ack(&self, event: &OrderWithdrawAck) {
        let Some(order) = self.ledger.get_order(event.order_nid) else {
            return;
        };
        self.notify(
            "order_withdrawn",
            json!({
                "order_nid": event.order_nid,
                "account_code": order.account_code,
                "state": "W",
            }),
        );
    }

    fn on_order_withdraw_nak(&self, event: &OrderWithdrawNak) {
        let Some(order) = self.ledger.get_order(event.order_nid) else {
            return;
        };
        self.notify(
            "order_withdrawal_rejected",
            json!({
                "order_nid": event.order_nid,
                "account_code": order.account_code,
                "message": event.message,
            }),
        );
    }

    fn on_trade(&self, event: &Trade) {
        let borrower_account = event
            .borrower
            .first()
            .map(|c| c.account_code.clone())
            .unwrap_or_default();
        let lender_account = event
            .lender
            .first()
            .map(|c| c.account_code.clone())
            .unwrap_or_default();
        self.notify(
            "trade_matched",
            json!({
                "trade_nid": event.nid,
                "clearing_reff": event.clearing_reff,
                "instrument": event.instrument_code,
                "quantity": event.quantity,
                "borrower_account": borrower_account,
                "lender_account": lender_account,
                "matched_at": event.matched_at,
            }),
        );
    }

    fn on_trade_wait(&self, event: &TradeWait) {
        let Some(trade) = self.ledger.get_trade(event.trade_nid) else {
            return;
        };
        self.notify(
            "trade_pending_approval",
            json!({
                "trade_nid": event.trade_nid,
                "clearing_reff": trade.clearing_reff,
                "status": "awaiting_clearing_approval",
            }),
        );
    }

    fn on_trade_ack(&self, event: &TradeAck) {
        let Some(trade) = self.ledger.get_trade(event.trade_nid) else {
            return;
        };
        self.notify(
            "trade_approved",
            json!({
                "trade_nid": event.trade_nid,
                "clearing_reff": trade.clearing_reff,
                "status": "approved",
            }),
        );
    }

    fn on_trade_nak(&self, event: &TradeNak) {
        let Some(trade) = self.ledger.get_trade(event.trade_nid) else {
            return;
        };
        self.notify(
            "trade_rejected",
            json!({
                "trade_nid": event.trade_nid,
                "clearing_reff": trade.clearing_reff,
                "message": event.message,
            }),
        );
    }

    fn on_trade_reimburse(&self, event: &TradeReimburse) {
        let Some(trade) = self.ledger.get_trade(event.trade_nid) else {
            return;
        };
        self.notify(
            "trade_reimbursed",
            json!({
                "trade_nid": event.trade_nid,
                "clearing_reff": trade.clearing_reff,
                "status": "reimbursed",
            }),
        );
    }

    fn on_contract(&self, event: &Contract) {
        self.notify(
            "contract_created",
            json!({
                "contract_nid": event.nid,
                "trade_nid": event.trade_nid,
                "clearing_reff": event.clearing_reff,
                "side": event.side,
                "account_code": event.account_code,
                "instrument": event.instrument_code,
                "quantity": event.quantity,
                "fee_daily": event.fee_val_daily,
            }),
        );
    }

    fn on_sod(&self, event: &Sod) {
        self.notify(
            "sod",
            json!({
                "date": event.date,
                "message": "start of day, market opening",
            }),
        );
    }

    fn on_eod(&self, event: &Eod) {
        self.notify(
            "eod",
            json!({
                "date": event.date,
                "message": "end of day, market closing",
            }),
        );
    }
}

//! Subscriber fan-out
//!
//! A subscriber exposes one handler per event type; every handler defaults
//! to a no-op so implementations only write the ones they care about.
//! Handlers run synchronously on the projection loop, after the event has
//! been applied and with no entity lock held — a slow handler therefore
//! back-pressures replay, which keeps the subscriber's view consistent
//! with the projection. Handlers must not re-enter the LedgerPoint's
//! iteration helpers from inside a `for_each_*` callback.

use types::events::*;

/// Per-event-type handlers invoked in registration order.
#[allow(unused_variables)]
pub trait Subscriber: Send + Sync {
    fn on_service_start(&self, event: &ServiceStart) {}
    fn on_parameter(&self, event: &Parameter) {}
    fn on_session_time(&self, event: &SessionTime) {}
    fn on_holiday(&self, event: &Holiday) {}
    fn on_account(&self, event: &Account) {}
    fn on_account_limit(&self, event: &AccountLimit) {}
    fn on_participant(&self, event: &Participant) {}
    fn on_instrument(&self, event: &Instrument) {}
    fn on_order(&self, event: &Order) {}
    fn on_order_ack(&self, event: &OrderAck) {}
    fn on_order_nak(&self, event: &OrderNak) {}
    fn on_order_pending(&self, event: &OrderPending) {}
    fn on_order_withdraw(&self, event: &OrderWithdraw) {}
    fn on_order_withdraw_ack(&self, event: &OrderWithdrawAck) {}
    fn on_order_withdraw_nak(&self, event: &OrderWithdrawNak) {}
    fn on_trade(&self, event: &Trade) {}
    fn on_trade_wait(&self, event: &TradeWait) {}
    fn on_trade_ack(&self, event: &TradeAck) {}
    fn on_trade_nak(&self, event: &TradeNak) {}
    fn on_trade_reimburse(&self, event: &TradeReimburse) {}
    fn on_contract(&self, event: &Contract) {}
    fn on_sod(&self, event: &Sod) {}
    fn on_eod(&self, event: &Eod) {}
}

/// Route one event to the matching handler.
pub(crate) fn dispatch(subscriber: &dyn Subscriber, event: &Event) {
    match event {
        Event::ServiceStart(e) => subscriber.on_service_start(e),
        Event::Parameter(e) => subscriber.on_parameter(e),
        Event::SessionTime(e) => subscriber.on_session_time(e),
        Event::Holiday(e) => subscriber.on_holiday(e),
        Event::Account(e) => subscriber.on_account(e),
        Event::AccountLimit(e) => subscriber.on_account_limit(e),
        Event::Participant(e) => subscriber.on_participant(e),
        Event::Instrument(e) => subscriber.on_instrument(e),
        Event::Order(e) => subscriber.on_order(e),
        Event::OrderAck(e) => subscriber.on_order_ack(e),
        Event::OrderNak(e) => subscriber.on_order_nak(e),
        Event::OrderPending(e) => subscriber.on_order_pending(e),
        Event::OrderWithdraw(e) => subscriber.on_order_withdraw(e),
        Event::OrderWithdrawAck(e) => subscriber.on_order_withdraw_ack(e),
        Event::OrderWithdrawNak(e) => subscriber.on_order_withdraw_nak(e),
        Event::Trade(e) => subscriber.on_trade(e),
        Event::TradeWait(e) => subscriber.on_trade_wait(e),
        Event::TradeAck(e) => subscriber.on_trade_ack(e),
        Event::TradeNak(e) => subscriber.on_trade_nak(e),
        Event::TradeReimburse(e) => subscriber.on_trade_reimburse(e),
        Event::Contract(e) => subscriber.on_contract(e),
        Event::Sod(e) => subscriber.on_sod(e),
        Event::Eod(e) => subscriber.on_eod(e),
    }
}

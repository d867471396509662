//! Projection state transitions
//!
//! Pure application of one event to the in-memory entity collections.
//! `ts` is the log record's append timestamp, so replaying the same prefix
//! always reproduces the same projection. Transitions against unknown NIDs
//! are no-ops: the log is the source of truth and events are idempotent at
//! this level, so re-applied terminal transitions are tolerated rather
//! than rejected.
//!
//! Lock order for multi-collection transitions is fixed:
//! orders → contracts → trades.

use chrono::{DateTime, Utc};

use types::entities::*;
use types::events::*;
use types::state::{OrderState, TradeState};
use types::Nid;

use crate::point::LedgerPoint;

impl LedgerPoint {
    pub(crate) fn apply(&self, event: &Event, ts: DateTime<Utc>) {
        match event {
            // Readiness is resolved by the ingest path; nothing to project.
            Event::ServiceStart(_) => {}
            Event::Parameter(e) => self.apply_parameter(e, ts),
            Event::SessionTime(e) => self.apply_session_time(e, ts),
            Event::Holiday(e) => self.apply_holiday(e),
            Event::Account(e) => self.apply_account(e, ts),
            Event::AccountLimit(e) => self.apply_account_limit(e, ts),
            Event::Participant(e) => self.apply_participant(e, ts),
            Event::Instrument(e) => self.apply_instrument(e, ts),
            Event::Order(e) => self.apply_order(e, ts),
            Event::OrderAck(e) => self.apply_order_ack(e, ts),
            Event::OrderNak(e) => self.apply_order_nak(e, ts),
            Event::OrderPending(e) => self.apply_order_pending(e, ts),
            Event::OrderWithdraw(e) => self.apply_order_withdraw(e),
            Event::OrderWithdrawAck(e) => self.apply_order_withdraw_ack(e, ts),
            Event::OrderWithdrawNak(e) => self.apply_order_withdraw_nak(e),
            Event::Trade(e) => self.apply_trade(e),
            Event::TradeWait(e) => self.apply_trade_state(e.trade_nid, TradeState::AwaitingClearing, None),
            Event::TradeAck(e) => self.apply_trade_state(e.trade_nid, TradeState::Open, None),
            Event::TradeNak(e) => self.apply_trade_nak(e),
            Event::TradeReimburse(e) => {
                self.apply_trade_state(e.trade_nid, TradeState::Closed, Some(ts))
            }
            Event::Contract(e) => self.apply_contract(e),
            // Day markers carry no projection state; they exist for
            // subscribers (pending-order promotion, EOD sweeps).
            Event::Sod(_) => {}
            Event::Eod(_) => {}
        }
    }

    fn apply_parameter(&self, e: &Parameter, ts: DateTime<Utc>) {
        let mut parameter = self.parameter.write().unwrap_or_else(|p| p.into_inner());
        *parameter = Some(ParameterEntity {
            nid: e.nid,
            update: e.update,
            description: e.description.clone(),
            flat_fee: e.flat_fee,
            lending_fee: e.lending_fee,
            borrowing_fee: e.borrowing_fee,
            max_quantity: e.max_quantity,
            borrow_max_open_day: e.borrow_max_open_day,
            denomination_limit: e.denomination_limit,
            last_update: ts,
        });
    }

    fn apply_session_time(&self, e: &SessionTime, ts: DateTime<Utc>) {
        let mut session_time = self.session_time.write().unwrap_or_else(|p| p.into_inner());
        *session_time = Some(SessionTimeEntity {
            nid: e.nid,
            description: e.description.clone(),
            update: e.update,
            session1_start: e.session1_start,
            session1_end: e.session1_end,
            session2_start: e.session2_start,
            session2_end: e.session2_end,
            last_update: ts,
        });
    }

    fn apply_holiday(&self, e: &Holiday) {
        let mut holidays = self.holidays.write().unwrap_or_else(|p| p.into_inner());
        holidays.insert(
            e.nid,
            HolidayEntity {
                nid: e.nid,
                year: e.year,
                date: e.date,
                description: e.description.clone(),
            },
        );
    }

    fn apply_account(&self, e: &Account, ts: DateTime<Utc>) {
        let mut accounts = self.accounts.write().unwrap_or_else(|p| p.into_inner());
        accounts.insert(
            e.code.clone(),
            AccountEntity {
                nid: e.nid,
                code: e.code.clone(),
                sid: e.sid.clone(),
                name: e.name.clone(),
                participant_nid: e.participant_nid,
                participant_code: e.participant_code.clone(),
                trade_limit: 0.0,
                pool_limit: 0.0,
                last_update: ts,
            },
        );
    }

    fn apply_account_limit(&self, e: &AccountLimit, ts: DateTime<Utc>) {
        let mut accounts = self.accounts.write().unwrap_or_else(|p| p.into_inner());
        if let Some(account) = accounts.get_mut(&e.code) {
            account.trade_limit = e.trade_limit;
            account.pool_limit = e.pool_limit;
            account.last_update = ts;
        }
    }

    fn apply_participant(&self, e: &Participant, ts: DateTime<Utc>) {
        let mut participants = self.participants.write().unwrap_or_else(|p| p.into_inner());
        participants.insert(
            e.code.clone(),
            ParticipantEntity {
                nid: e.nid,
                code: e.code.clone(),
                name: e.name.clone(),
                borr_eligibility: e.borr_eligibility,
                lend_eligibility: e.lend_eligibility,
                last_update: ts,
            },
        );
    }

    fn apply_instrument(&self, e: &Instrument, ts: DateTime<Utc>) {
        let mut instruments = self.instruments.write().unwrap_or_else(|p| p.into_inner());
        instruments.insert(
            e.code.clone(),
            InstrumentEntity {
                nid: e.nid,
                code: e.code.clone(),
                name: e.name.clone(),
                kind: e.kind.clone(),
                status: e.status,
                last_update: ts,
            },
        );
    }

    fn apply_order(&self, e: &Order, ts: DateTime<Utc>) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        orders.insert(
            e.nid,
            OrderEntity {
                nid: e.nid,
                prev_nid: e.prev_nid,
                reff_request_id: e.reff_request_id.clone(),
                account_nid: e.account_nid,
                account_code: e.account_code.clone(),
                participant_nid: e.participant_nid,
                participant_code: e.participant_code.clone(),
                instrument_nid: e.instrument_nid,
                instrument_code: e.instrument_code.clone(),
                side: e.side,
                quantity: e.quantity,
                done_quantity: 0.0,
                settlement_date: e.settlement_date,
                reimbursement_date: e.reimbursement_date,
                periode: e.periode,
                state: OrderState::Submitted,
                market_price: e.market_price,
                rate: e.rate,
                instruction: e.instruction.clone(),
                aro: e.aro,
                withdraw_reff_request_id: String::new(),
                message: String::new(),
                entry_at: ts,
                pending_at: None,
                open_at: None,
                reject_at: None,
                amend_at: None,
                withdraw_at: None,
            },
        );
    }

    fn apply_order_ack(&self, e: &OrderAck, ts: DateTime<Utc>) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        let prev_nid = match orders.get_mut(&e.order_nid) {
            Some(order) => {
                order.state = OrderState::Open;
                order.open_at = Some(ts);
                order.prev_nid
            }
            None => return,
        };
        if prev_nid != 0 {
            if let Some(prev) = orders.get_mut(&prev_nid) {
                prev.state = OrderState::Amended;
                prev.amend_at = Some(ts);
            }
        }
    }

    fn apply_order_nak(&self, e: &OrderNak, ts: DateTime<Utc>) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        if let Some(order) = orders.get_mut(&e.order_nid) {
            order.state = OrderState::Rejected;
            order.reject_at = Some(ts);
            order.message = e.message.clone();
        }
    }

    fn apply_order_pending(&self, e: &OrderPending, ts: DateTime<Utc>) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        if let Some(order) = orders.get_mut(&e.order_nid) {
            order.state = OrderState::PendingNew;
            order.pending_at = Some(ts);
        }
    }

    fn apply_order_withdraw(&self, e: &OrderWithdraw) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        if let Some(order) = orders.get_mut(&e.order_nid) {
            order.withdraw_reff_request_id = e.reff_request_id.clone();
        }
    }

    fn apply_order_withdraw_ack(&self, e: &OrderWithdrawAck, ts: DateTime<Utc>) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        if let Some(order) = orders.get_mut(&e.order_nid) {
            order.state = OrderState::Withdrawn;
            order.withdraw_at = Some(ts);
        }
    }

    fn apply_order_withdraw_nak(&self, e: &OrderWithdrawNak) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        if let Some(order) = orders.get_mut(&e.order_nid) {
            order.withdraw_reff_request_id.clear();
        }
    }

    fn apply_trade(&self, e: &Trade) {
        // Fixed lock order: orders → contracts → trades.
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        let mut contracts = self.contracts.write().unwrap_or_else(|p| p.into_inner());
        let mut trades = self.trades.write().unwrap_or_else(|p| p.into_inner());

        let mut fill_leg = |leg: &Contract| -> Nid {
            contracts.insert(leg.nid, contract_entity(leg));
            if let Some(order) = orders.get_mut(&leg.order_nid) {
                order.done_quantity += leg.quantity;
                order.state = if order.done_quantity >= order.quantity {
                    OrderState::Matched
                } else {
                    OrderState::PartiallyFilled
                };
            }
            leg.nid
        };

        let borrower: Vec<Nid> = e.borrower.iter().map(&mut fill_leg).collect();
        let lender: Vec<Nid> = e.lender.iter().map(&mut fill_leg).collect();

        trades.insert(
            e.nid,
            TradeEntity {
                nid: e.nid,
                clearing_reff: e.clearing_reff.clone(),
                instrument_nid: e.instrument_nid,
                instrument_code: e.instrument_code.clone(),
                quantity: e.quantity,
                periode: e.periode,
                state: e.state,
                fee_flat_rate: e.fee_flat_rate,
                fee_borr_rate: e.fee_borr_rate,
                fee_lend_rate: e.fee_lend_rate,
                matched_at: e.matched_at,
                reimburse_at: e.reimburse_at,
                lender,
                borrower,
            },
        );
    }

    /// Move a trade and both its contract legs to `state` together.
    fn apply_trade_state(&self, trade_nid: Nid, state: TradeState, reimbursed_at: Option<DateTime<Utc>>) {
        let mut contracts = self.contracts.write().unwrap_or_else(|p| p.into_inner());
        let mut trades = self.trades.write().unwrap_or_else(|p| p.into_inner());

        let Some(trade) = trades.get_mut(&trade_nid) else {
            return;
        };
        trade.state = state;
        if let Some(at) = reimbursed_at {
            trade.reimburse_at = at;
        }
        for nid in trade.borrower.iter().chain(trade.lender.iter()) {
            if let Some(contract) = contracts.get_mut(nid) {
                contract.state = state;
                if let Some(at) = reimbursed_at {
                    contract.reimburse_at = at;
                }
            }
        }
    }

    fn apply_trade_nak(&self, e: &TradeNak) {
        let mut orders = self.orders.write().unwrap_or_else(|p| p.into_inner());
        let mut contracts = self.contracts.write().unwrap_or_else(|p| p.into_inner());
        let mut trades = self.trades.write().unwrap_or_else(|p| p.into_inner());

        let Some(trade) = trades.get_mut(&e.trade_nid) else {
            return;
        };
        trade.state = TradeState::Rejected;

        for nid in trade.borrower.iter().chain(trade.lender.iter()) {
            let Some(contract) = contracts.get_mut(nid) else {
                continue;
            };
            contract.state = TradeState::Rejected;
            if let Some(order) = orders.get_mut(&contract.order_nid) {
                order.done_quantity -= contract.quantity;
                order.state = if order.done_quantity > 0.0 {
                    OrderState::PartiallyFilled
                } else {
                    OrderState::Open
                };
            }
        }
    }

    fn apply_contract(&self, e: &Contract) {
        let mut contracts = self.contracts.write().unwrap_or_else(|p| p.into_inner());
        contracts.insert(e.nid, contract_entity(e));
    }
}

fn contract_entity(e: &Contract) -> ContractEntity {
    ContractEntity {
        nid: e.nid,
        trade_nid: e.trade_nid,
        clearing_reff: e.clearing_reff.clone(),
        side: e.side,
        account_nid: e.account_nid,
        account_code: e.account_code.clone(),
        account_sid: e.account_sid.clone(),
        account_participant_nid: e.account_participant_nid,
        account_participant_code: e.account_participant_code.clone(),
        order_nid: e.order_nid,
        instrument_nid: e.instrument_nid,
        instrument_code: e.instrument_code.clone(),
        quantity: e.quantity,
        periode: e.periode,
        state: e.state,
        fee_flat_val: e.fee_flat_val,
        fee_val_daily: e.fee_val_daily,
        fee_val_accumulated: e.fee_val_accumulated,
        matched_at: e.matched_at,
        reimburse_at: e.reimburse_at,
    }
}

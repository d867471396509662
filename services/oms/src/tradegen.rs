//! Trade and contract generation
//!
//! Turns a match into one `Trade` event with a borrower and a lender
//! contract leg inlined. Trade and contract NIDs come from the snowflake
//! generator, so references stay globally unique across OMS instances.
//!
//! Date resolution: settlement is the later of the two orders' settlement
//! dates, reimbursement the earlier of their reimbursement dates, and the
//! period the whole days between them. The market price is the borrower's
//! when set, otherwise the lender's.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use idgen::{Generator, IdError};
use types::events::{Contract, Trade};
use types::state::{Side, TradeState};

use crate::fees::{self, FeeRates};
use crate::matcher::Match;

pub struct TradeGenerator {
    generator: Arc<Generator>,
}

impl TradeGenerator {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self { generator }
    }

    /// Build the `Trade` event for one match.
    pub fn generate(
        &self,
        m: &Match,
        rates: &FeeRates,
        now: DateTime<Utc>,
    ) -> Result<Trade, IdError> {
        let trade_nid = self.generator.next_id()?;
        let borrower_nid = self.generator.next_id()?;
        let lender_nid = self.generator.next_id()?;

        let clearing_reff = format!("SBL-{}-{}", now.format("%Y%m%d"), trade_nid);

        let market_price = if m.borrower.market_price > 0.0 {
            m.borrower.market_price
        } else {
            m.lender.market_price
        };

        let settlement = m.borrower.settlement_date.max(m.lender.settlement_date);
        let reimbursement = m
            .borrower
            .reimbursement_date
            .min(m.lender.reimbursement_date);
        let periode = (reimbursement - settlement).num_days();

        let flat = fees::flat_fee(market_price, m.quantity, rates);
        let borrow_daily = fees::borrowing_daily_fee(market_price, m.quantity, rates);
        let lend_daily = fees::lending_daily_fee(market_price, m.quantity, rates);

        let borrower = Contract {
            nid: borrower_nid,
            trade_nid,
            clearing_reff: format!("{clearing_reff}-BORR"),
            side: Side::Borr,
            account_nid: m.borrower.account_nid,
            account_code: m.borrower.account_code.clone(),
            // Filled in by the clearing bridge from the account projection.
            account_sid: String::new(),
            account_participant_nid: m.borrower.participant_nid,
            account_participant_code: m.borrower.participant_code.clone(),
            order_nid: m.borrower.nid,
            instrument_nid: m.borrower.instrument_nid,
            instrument_code: m.borrower.instrument_code.clone(),
            quantity: m.quantity,
            periode,
            state: TradeState::Submitted,
            fee_flat_val: flat,
            fee_val_daily: borrow_daily,
            fee_val_accumulated: 0.0,
            matched_at: now,
            reimburse_at: reimbursement,
        };

        let lender = Contract {
            nid: lender_nid,
            trade_nid,
            clearing_reff: format!("{clearing_reff}-LEND"),
            side: Side::Lend,
            account_nid: m.lender.account_nid,
            account_code: m.lender.account_code.clone(),
            account_sid: String::new(),
            account_participant_nid: m.lender.participant_nid,
            account_participant_code: m.lender.participant_code.clone(),
            order_nid: m.lender.nid,
            instrument_nid: m.lender.instrument_nid,
            instrument_code: m.lender.instrument_code.clone(),
            quantity: m.quantity,
            periode,
            state: TradeState::Submitted,
            // The lender pays no flat fee.
            fee_flat_val: 0.0,
            fee_val_daily: lend_daily,
            fee_val_accumulated: 0.0,
            matched_at: now,
            reimburse_at: reimbursement,
        };

        Ok(Trade {
            nid: trade_nid,
            clearing_reff,
            instrument_nid: m.borrower.instrument_nid,
            instrument_code: m.borrower.instrument_code.clone(),
            quantity: m.quantity,
            periode,
            state: TradeState::Submitted,
            fee_flat_rate: rates.flat,
            fee_borr_rate: rates.borrowing,
            fee_lend_rate: rates.lending,
            matched_at: now,
            reimburse_at: reimbursement,
            lender: vec![lender],
            borrower: vec![borrower],
        })
    }
}

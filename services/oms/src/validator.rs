//! Pre-trade validation
//!
//! Checks run in a fixed order and the first failure wins; the error's
//! field and message end up verbatim in the `OrderNak` the submitter sees.
//! Date comparisons are calendar-day comparisons, so an order settling
//! later today is not "in the past".

use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

use ledger::LedgerPoint;
use types::entities::{OrderEntity, ParameterEntity};
use types::state::Side;

use crate::fees::{self, FeeRates};

/// A single failed pre-trade check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Pre-trade validator over the live projection.
pub struct Validator {
    ledger: Arc<LedgerPoint>,
}

impl Validator {
    pub fn new(ledger: Arc<LedgerPoint>) -> Self {
        Self { ledger }
    }

    /// Run every check against `order`, in order. `today` is the current
    /// calendar day in the service's timezone.
    pub fn validate_order(
        &self,
        order: &OrderEntity,
        today: NaiveDate,
    ) -> Result<(), ValidationError> {
        self.validate_basic_fields(order)?;
        self.validate_amendment(order)?;
        let account_trade_limit = self.validate_account(order)?;
        self.validate_instrument(order)?;
        self.validate_participant(order)?;

        let parameter = self
            .ledger
            .get_parameter()
            .ok_or_else(|| ValidationError::new("parameter", "trading parameters not loaded"))?;

        if order.side == Side::Borr {
            self.validate_dates(order, today, &parameter)?;
        }
        self.validate_quantity(order, &parameter)?;
        if order.side == Side::Borr {
            self.validate_borrow_limit(order, account_trade_limit, &parameter)?;
        }
        Ok(())
    }

    /// Whether the order settles on a future calendar day and must be held
    /// in pending-new until start of day.
    pub fn is_pending_new(&self, order: &OrderEntity, today: NaiveDate) -> bool {
        order.settlement_date.date_naive() > today
    }

    fn validate_basic_fields(&self, order: &OrderEntity) -> Result<(), ValidationError> {
        if order.account_code.is_empty() {
            return Err(ValidationError::new("account_code", "is required"));
        }
        if order.instrument_code.is_empty() {
            return Err(ValidationError::new("instrument_code", "is required"));
        }
        if order.participant_code.is_empty() {
            return Err(ValidationError::new("participant_code", "is required"));
        }
        if order.quantity <= 0.0 {
            return Err(ValidationError::new("quantity", "must be greater than 0"));
        }
        if order.side == Side::Borr && order.periode <= 0 {
            return Err(ValidationError::new("periode", "must be greater than 0"));
        }
        Ok(())
    }

    /// An amendment must supersede an order that is still working.
    fn validate_amendment(&self, order: &OrderEntity) -> Result<(), ValidationError> {
        if order.prev_nid == 0 {
            return Ok(());
        }
        match self.ledger.get_order(order.prev_nid) {
            None => Err(ValidationError::new(
                "prev_nid",
                format!("order {} not found", order.prev_nid),
            )),
            Some(prev) if !prev.state.is_working() => Err(ValidationError::new(
                "prev_nid",
                format!(
                    "order {} cannot be amended in state {}",
                    prev.nid, prev.state
                ),
            )),
            Some(_) => Ok(()),
        }
    }

    fn validate_account(&self, order: &OrderEntity) -> Result<f64, ValidationError> {
        let account = self.ledger.get_account(&order.account_code).ok_or_else(|| {
            ValidationError::new(
                "account_code",
                format!("account {} not found", order.account_code),
            )
        })?;
        if account.participant_code != order.participant_code {
            return Err(ValidationError::new(
                "participant_code",
                format!(
                    "account {} belongs to participant {}, not {}",
                    order.account_code, account.participant_code, order.participant_code
                ),
            ));
        }
        Ok(account.trade_limit)
    }

    fn validate_instrument(&self, order: &OrderEntity) -> Result<(), ValidationError> {
        let instrument = self
            .ledger
            .get_instrument(&order.instrument_code)
            .ok_or_else(|| {
                ValidationError::new(
                    "instrument_code",
                    format!("instrument {} not found", order.instrument_code),
                )
            })?;
        if !instrument.status {
            return Err(ValidationError::new(
                "instrument_code",
                format!("instrument {} is not eligible", order.instrument_code),
            ));
        }
        Ok(())
    }

    fn validate_participant(&self, order: &OrderEntity) -> Result<(), ValidationError> {
        let participant = self
            .ledger
            .get_participant(&order.participant_code)
            .ok_or_else(|| {
                ValidationError::new(
                    "participant_code",
                    format!("participant {} not found", order.participant_code),
                )
            })?;
        if !participant.eligible_for(order.side) {
            return Err(ValidationError::new(
                "participant_code",
                format!(
                    "participant {} is not eligible for {}",
                    order.participant_code,
                    match order.side {
                        Side::Borr => "borrowing",
                        Side::Lend => "lending",
                    }
                ),
            ));
        }
        Ok(())
    }

    fn validate_dates(
        &self,
        order: &OrderEntity,
        today: NaiveDate,
        parameter: &ParameterEntity,
    ) -> Result<(), ValidationError> {
        let settlement = order.settlement_date.date_naive();
        let reimbursement = order.reimbursement_date.date_naive();

        if settlement < today {
            return Err(ValidationError::new(
                "settlement_date",
                "must not be in the past",
            ));
        }
        if reimbursement <= settlement {
            return Err(ValidationError::new(
                "reimbursement_date",
                "must be after settlement date",
            ));
        }

        let days = (reimbursement - settlement).num_days();
        if days != order.periode {
            return Err(ValidationError::new(
                "periode",
                format!(
                    "does not match date range (expected {} days, got {})",
                    days, order.periode
                ),
            ));
        }
        if order.periode > parameter.borrow_max_open_day {
            return Err(ValidationError::new(
                "periode",
                format!(
                    "exceeds maximum open period of {} days",
                    parameter.borrow_max_open_day
                ),
            ));
        }
        Ok(())
    }

    fn validate_quantity(
        &self,
        order: &OrderEntity,
        parameter: &ParameterEntity,
    ) -> Result<(), ValidationError> {
        if parameter.denomination_limit > 0
            && order.quantity % parameter.denomination_limit as f64 != 0.0
        {
            return Err(ValidationError::new(
                "quantity",
                format!(
                    "must be a multiple of {} shares",
                    parameter.denomination_limit
                ),
            ));
        }
        if order.quantity > parameter.max_quantity {
            return Err(ValidationError::new(
                "quantity",
                format!(
                    "exceeds maximum quantity of {:.0} shares",
                    parameter.max_quantity
                ),
            ));
        }
        Ok(())
    }

    fn validate_borrow_limit(
        &self,
        order: &OrderEntity,
        trade_limit: f64,
        parameter: &ParameterEntity,
    ) -> Result<(), ValidationError> {
        let rates = FeeRates::resolve(Some(parameter));
        let required =
            fees::required_trade_limit(order.market_price, order.quantity, order.periode, &rates);
        if trade_limit < required {
            return Err(ValidationError::new(
                "account_limit",
                format!(
                    "insufficient trading limit: required {:.2}, available {:.2}",
                    required, trade_limit
                ),
            ));
        }
        Ok(())
    }
}

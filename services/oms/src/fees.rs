//! Fee calculation
//!
//! All values are 64-bit floats, the platform's accepted approximation.
//! Rates come from the `Parameter` projection; a rate that was never set
//! (`None`) falls back to the built-in default, while an explicit zero is
//! honored as zero.

use types::entities::ParameterEntity;

pub const DEFAULT_FLAT_FEE_RATE: f64 = 0.0005;
pub const DEFAULT_BORROWING_FEE_RATE: f64 = 0.18;
pub const DEFAULT_LENDING_FEE_RATE: f64 = 0.15;

const DAYS_PER_YEAR: f64 = 365.0;

/// Resolved fee rates for one calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeRates {
    pub flat: f64,
    /// Annualized borrowing rate.
    pub borrowing: f64,
    /// Annualized lending rate.
    pub lending: f64,
}

impl FeeRates {
    /// Resolve rates from the current parameter set, defaulting each rate
    /// that was never configured.
    pub fn resolve(parameter: Option<&ParameterEntity>) -> FeeRates {
        match parameter {
            Some(p) => FeeRates {
                flat: p.flat_fee.unwrap_or(DEFAULT_FLAT_FEE_RATE),
                borrowing: p.borrowing_fee.unwrap_or(DEFAULT_BORROWING_FEE_RATE),
                lending: p.lending_fee.unwrap_or(DEFAULT_LENDING_FEE_RATE),
            },
            None => FeeRates {
                flat: DEFAULT_FLAT_FEE_RATE,
                borrowing: DEFAULT_BORROWING_FEE_RATE,
                lending: DEFAULT_LENDING_FEE_RATE,
            },
        }
    }
}

/// Principal value of the borrowing: price × quantity.
pub fn borrow_value(market_price: f64, quantity: f64) -> f64 {
    market_price * quantity
}

/// One-time flat fee: price × quantity × flat rate.
pub fn flat_fee(market_price: f64, quantity: f64, rates: &FeeRates) -> f64 {
    market_price * quantity * rates.flat
}

/// Daily borrowing fee: price × quantity × borrowing rate / 365.
pub fn borrowing_daily_fee(market_price: f64, quantity: f64, rates: &FeeRates) -> f64 {
    market_price * quantity * rates.borrowing / DAYS_PER_YEAR
}

/// Daily lending revenue: price × quantity × lending rate / 365.
pub fn lending_daily_fee(market_price: f64, quantity: f64, rates: &FeeRates) -> f64 {
    market_price * quantity * rates.lending / DAYS_PER_YEAR
}

/// Total borrowing cost over the period: flat fee + daily fee × days.
pub fn borrowing_total_fee(market_price: f64, quantity: f64, periode: i64, rates: &FeeRates) -> f64 {
    flat_fee(market_price, quantity, rates)
        + borrowing_daily_fee(market_price, quantity, rates) * periode as f64
}

/// Trading limit a borrow order must be covered by:
/// principal plus total borrowing cost.
pub fn required_trade_limit(market_price: f64, quantity: f64, periode: i64, rates: &FeeRates) -> f64 {
    borrow_value(market_price, quantity) + borrowing_total_fee(market_price, quantity, periode, rates)
}

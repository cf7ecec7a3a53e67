//! Loan amortization
//!
//! Equal-installment repayment schedule for a fixed-rate loan.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

use super::amount::round_money;
use super::{Amount, DomainError};

/// Longest term accepted, in months
pub const MAX_TERM_MONTHS: u32 = 600;

/// Result of [`compute_schedule`], every figure rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub monthly_payment: Decimal,
    pub total_amount: Decimal,
    pub total_interest: Decimal,
}

/// Compute the monthly installment, total repayable and total interest.
///
/// `monthly = P·r·(1+r)^n / ((1+r)^n − 1)` with `r = rate / 100 / 12`,
/// or `P / n` when the rate is zero. The total is taken from the
/// unrounded installment, so a zero-rate loan totals exactly its principal.
/// Rounding is half away from zero.
///
/// # Errors
/// `InvalidLoanParameters` when the term is zero or above
/// [`MAX_TERM_MONTHS`], the principal is not a positive cent amount, the
/// rate is negative, or the arithmetic overflows.
pub fn compute_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> Result<Schedule, DomainError> {
    if term_months == 0 || term_months > MAX_TERM_MONTHS {
        return Err(DomainError::InvalidLoanParameters(format!(
            "term must be between 1 and {} months (got {})",
            MAX_TERM_MONTHS, term_months
        )));
    }

    let principal = Amount::new(principal)
        .map_err(|e| DomainError::InvalidLoanParameters(format!("principal: {}", e)))?
        .value();

    if annual_rate_percent < Decimal::ZERO {
        return Err(DomainError::InvalidLoanParameters(format!(
            "interest rate must not be negative (got {})",
            annual_rate_percent
        )));
    }

    let overflow = || DomainError::InvalidLoanParameters("schedule overflows".to_string());
    let term = Decimal::from(term_months);
    let monthly_rate = annual_rate_percent / Decimal::ONE_HUNDRED / Decimal::from(12);

    let monthly = if monthly_rate.is_zero() {
        principal / term
    } else {
        let growth = (Decimal::ONE + monthly_rate)
            .checked_powi(i64::from(term_months))
            .ok_or_else(overflow)?;
        principal
            .checked_mul(monthly_rate)
            .and_then(|v| v.checked_mul(growth))
            .and_then(|v| v.checked_div(growth - Decimal::ONE))
            .ok_or_else(overflow)?
    };

    let total = monthly.checked_mul(term).ok_or_else(overflow)?;

    Ok(Schedule {
        monthly_payment: round_money(monthly),
        total_amount: round_money(total),
        total_interest: round_money(total - principal),
    })
}

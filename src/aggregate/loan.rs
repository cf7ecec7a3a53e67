//! Loan Aggregate
//!
//! Loan record and its lifecycle:
//!
//! ```text
//! Pending ──► Approved ──► Disbursed ──► Active ──► Completed
//!    │                                     │
//!    └──► Rejected                         └──► Defaulted
//! ```
//!
//! Every transition returns a new `Loan`; the caller commits it.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Amount, DomainError, Schedule};

use super::{random_digits, timestamp_digits, Aggregate};

/// Days between disbursement and the first instalment
pub const FIRST_REPAYMENT_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Emergency,
    Development,
    SchoolFees,
    Business,
    AssetFinancing,
}

impl LoanType {
    /// Annual interest rate offered for the product (percent)
    pub fn default_interest_rate(&self) -> Decimal {
        match self {
            LoanType::Emergency => Decimal::from(12),
            LoanType::Business => Decimal::from(14),
            LoanType::SchoolFees | LoanType::Development | LoanType::AssetFinancing => {
                Decimal::from(10)
            }
        }
    }

    /// Standard term in months, used when the application gives none
    pub fn default_term_months(&self) -> u32 {
        match self {
            LoanType::Emergency => 12,
            LoanType::SchoolFees => 18,
            LoanType::Business | LoanType::Development | LoanType::AssetFinancing => 24,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanType::Emergency => "emergency",
            LoanType::Development => "development",
            LoanType::SchoolFees => "school_fees",
            LoanType::Business => "business",
            LoanType::AssetFinancing => "asset_financing",
        }
    }
}

impl fmt::Display for LoanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Disbursed,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    /// Statuses reachable in one step
    pub fn allowed_transitions(&self) -> &'static [LoanStatus] {
        match self {
            LoanStatus::Pending => &[LoanStatus::Approved, LoanStatus::Rejected],
            LoanStatus::Approved => &[LoanStatus::Disbursed],
            LoanStatus::Disbursed => &[LoanStatus::Active],
            LoanStatus::Active => &[LoanStatus::Completed, LoanStatus::Defaulted],
            LoanStatus::Rejected | LoanStatus::Completed | LoanStatus::Defaulted => &[],
        }
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Money is out with the member
    pub fn is_outstanding(&self) -> bool {
        matches!(self, LoanStatus::Disbursed | LoanStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Disbursed => "disbursed",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "rejected" => Ok(LoanStatus::Rejected),
            "disbursed" => Ok(LoanStatus::Disbursed),
            "active" => Ok(LoanStatus::Active),
            "completed" => Ok(LoanStatus::Completed),
            "defaulted" => Ok(LoanStatus::Defaulted),
            other => Err(format!("unknown loan status '{}'", other)),
        }
    }
}

/// Generate a loan number (`LN` + 6 timestamp digits + 4 random digits)
pub fn generate_loan_number() -> String {
    format!("LN{}{}", timestamp_digits(6), random_digits(4))
}

/// Inputs for a new application, after defaults have been applied
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub member_id: Uuid,
    pub loan_number: String,
    pub loan_type: LoanType,
    pub principal: Amount,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub purpose: String,
    pub schedule: Schedule,
    pub credit_score: u16,
}

/// Loan Aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    id: Uuid,
    member_id: Uuid,
    loan_number: String,
    loan_type: LoanType,
    principal_amount: Decimal,
    interest_rate: Decimal,
    total_amount: Decimal,
    outstanding_balance: Decimal,
    monthly_repayment: Decimal,
    term_months: u32,
    purpose: String,
    status: LoanStatus,
    credit_score: u16,
    disbursed_amount: Option<Decimal>,
    disbursed_at: Option<DateTime<Utc>>,
    disbursement_account_id: Option<Uuid>,
    first_repayment_date: Option<NaiveDate>,
    next_repayment_date: Option<NaiveDate>,
    completed_at: Option<DateTime<Utc>>,
    defaulted_at: Option<DateTime<Utc>>,
    approved_by: Option<Uuid>,
    rejection_reason: Option<String>,
    applied_at: DateTime<Utc>,
    version: i64,
}

impl Loan {
    /// A freshly submitted application in `Pending`
    pub fn application(new: NewLoan) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id: new.member_id,
            loan_number: new.loan_number,
            loan_type: new.loan_type,
            principal_amount: new.principal.value(),
            interest_rate: new.interest_rate,
            total_amount: new.schedule.total_amount,
            outstanding_balance: new.schedule.total_amount,
            monthly_repayment: new.schedule.monthly_payment,
            term_months: new.term_months,
            purpose: new.purpose,
            status: LoanStatus::Pending,
            credit_score: new.credit_score,
            disbursed_amount: None,
            disbursed_at: None,
            disbursement_account_id: None,
            first_repayment_date: None,
            next_repayment_date: None,
            completed_at: None,
            defaulted_at: None,
            approved_by: None,
            rejection_reason: None,
            applied_at: Utc::now(),
            version: 1,
        }
    }

    fn transition(&self, to: LoanStatus) -> Result<Self, DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        let mut next = self.clone();
        next.status = to;
        next.version += 1;
        Ok(next)
    }

    pub fn approve(&self, approver: Option<Uuid>) -> Result<Self, DomainError> {
        let mut next = self.transition(LoanStatus::Approved)?;
        next.approved_by = approver;
        Ok(next)
    }

    /// Reject with a non-blank reason. The reason is checked after the
    /// status so a rejected loan reports the transition error first.
    pub fn reject(&self, reason: Option<&str>) -> Result<Self, DomainError> {
        let mut next = self.transition(LoanStatus::Rejected)?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(DomainError::MissingReason)?;
        next.rejection_reason = Some(reason.to_string());
        Ok(next)
    }

    /// Funds released into `account_id`
    pub fn disburse(&self, account_id: Uuid, at: DateTime<Utc>) -> Result<Self, DomainError> {
        let mut next = self.transition(LoanStatus::Disbursed)?;
        let first = at.date_naive() + chrono::Duration::days(FIRST_REPAYMENT_DAYS);

        next.disbursed_amount = Some(self.principal_amount);
        next.disbursed_at = Some(at);
        next.disbursement_account_id = Some(account_id);
        next.first_repayment_date = Some(first);
        next.next_repayment_date = Some(first);
        next.outstanding_balance = self.total_amount;
        Ok(next)
    }

    /// Repayment schedule starts running
    pub fn activate(&self) -> Result<Self, DomainError> {
        self.transition(LoanStatus::Active)
    }

    /// Apply a repayment. Completes the loan when the balance reaches zero.
    ///
    /// # Errors
    /// - `InvalidTransition` unless the loan is `Active`
    /// - `Overpayment` when `amount` exceeds the outstanding balance
    pub fn record_repayment(&self, amount: &Amount, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != LoanStatus::Active {
            return Err(DomainError::invalid_transition(self.status, "repayment"));
        }
        if amount.value() > self.outstanding_balance {
            return Err(DomainError::Overpayment {
                requested: amount.value(),
                outstanding: self.outstanding_balance,
            });
        }

        let remaining = self.outstanding_balance - amount.value();
        if remaining.is_zero() {
            let mut next = self.transition(LoanStatus::Completed)?;
            next.outstanding_balance = Decimal::new(0, 2);
            next.completed_at = Some(at);
            next.next_repayment_date = None;
            return Ok(next);
        }

        let mut next = self.clone();
        next.outstanding_balance = remaining;
        next.next_repayment_date = self
            .next_repayment_date
            .and_then(|d| d.checked_add_months(Months::new(1)));
        next.version += 1;
        Ok(next)
    }

    pub fn mark_defaulted(&self, at: DateTime<Utc>) -> Result<Self, DomainError> {
        let mut next = self.transition(LoanStatus::Defaulted)?;
        next.defaulted_at = Some(at);
        Ok(next)
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    pub fn loan_number(&self) -> &str {
        &self.loan_number
    }

    pub fn loan_type(&self) -> LoanType {
        self.loan_type
    }

    pub fn principal_amount(&self) -> Decimal {
        self.principal_amount
    }

    pub fn interest_rate(&self) -> Decimal {
        self.interest_rate
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn outstanding_balance(&self) -> Decimal {
        self.outstanding_balance
    }

    pub fn monthly_repayment(&self) -> Decimal {
        self.monthly_repayment
    }

    pub fn term_months(&self) -> u32 {
        self.term_months
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn credit_score(&self) -> u16 {
        self.credit_score
    }

    pub fn disbursed_amount(&self) -> Option<Decimal> {
        self.disbursed_amount
    }

    pub fn disbursed_at(&self) -> Option<DateTime<Utc>> {
        self.disbursed_at
    }

    pub fn disbursement_account_id(&self) -> Option<Uuid> {
        self.disbursement_account_id
    }

    pub fn first_repayment_date(&self) -> Option<NaiveDate> {
        self.first_repayment_date
    }

    pub fn next_repayment_date(&self) -> Option<NaiveDate> {
        self.next_repayment_date
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn defaulted_at(&self) -> Option<DateTime<Utc>> {
        self.defaulted_at
    }

    pub fn approved_by(&self) -> Option<Uuid> {
        self.approved_by
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn applied_at(&self) -> DateTime<Utc> {
        self.applied_at
    }
}

impl Aggregate for Loan {
    fn aggregate_type() -> &'static str {
        "Loan"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

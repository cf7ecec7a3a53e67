//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is malformed or violates a rule
    BadInput,
    /// The request is valid but conflicts with current state
    Conflict,
    /// A referenced entity does not exist
    NotFound,
    /// Storage failure
    Internal,
}

/// Ledger and loan errors.
///
/// These represent business rule violations and invariant failures.
/// Every operation that returns one of these leaves prior state untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Principal, rate or term outside the accepted range
    #[error("Invalid loan parameters: {0}")]
    InvalidLoanParameters(String),

    /// Loan status change not allowed by the state machine
    #[error("Invalid loan transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Rejections must carry a reason
    #[error("A reason is required to reject")]
    MissingReason,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account is closed: {0}")]
    AccountClosed(String),

    /// Accounts can only be closed at a zero balance
    #[error("Account still holds funds: {0}")]
    AccountNotEmpty(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Repayment of {requested} exceeds outstanding balance {outstanding}")]
    Overpayment {
        requested: Decimal,
        outstanding: Decimal,
    },

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// Registration data rejected
    #[error("Invalid member data: {0}")]
    InvalidMember(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Guarantor not found: {0}")]
    GuarantorNotFound(String),

    /// Invalid amount (zero, negative, sub-cent or too large)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transaction is not in a status that allows the requested action
    #[error("Transaction {id} is {status}, cannot {action}")]
    InvalidTransactionState {
        id: String,
        status: String,
        action: &'static str,
    },

    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Type that cannot be posted through this operation
    #[error("Unsupported transaction type: {0}")]
    UnsupportedTransactionType(String),

    #[error("Invalid interest rate: {0}")]
    InvalidInterestRate(String),

    #[error("Amount {amount} is below the {channel} minimum of {minimum}")]
    BelowChannelMinimum {
        channel: String,
        amount: Decimal,
        minimum: Decimal,
    },

    #[error("Daily {channel} withdrawal limit of {limit} exceeded (already {used} today)")]
    DailyLimitExceeded {
        channel: String,
        limit: Decimal,
        used: Decimal,
    },

    #[error("Invalid guarantor: {0}")]
    InvalidGuarantor(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Create an invalid transition error from any displayable statuses
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Classify the error for translation at the edge
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidLoanParameters(_)
            | Self::MissingReason
            | Self::InvalidAmount(_)
            | Self::SameAccountTransfer
            | Self::UnsupportedTransactionType(_)
            | Self::InvalidInterestRate(_)
            | Self::BelowChannelMinimum { .. }
            | Self::InvalidGuarantor(_)
            | Self::InvalidMember(_) => ErrorCategory::BadInput,

            Self::InvalidTransition { .. }
            | Self::AccountClosed(_)
            | Self::AccountNotEmpty(_)
            | Self::InsufficientFunds { .. }
            | Self::Overpayment { .. }
            | Self::InvalidTransactionState { .. }
            | Self::DailyLimitExceeded { .. } => ErrorCategory::Conflict,

            Self::AccountNotFound(_)
            | Self::MemberNotFound(_)
            | Self::LoanNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::GuarantorNotFound(_) => ErrorCategory::NotFound,

            Self::Storage(StoreError::VersionConflict { .. })
            | Self::Storage(StoreError::DuplicateReference(_)) => ErrorCategory::Conflict,
            Self::Storage(_) => ErrorCategory::Internal,
        }
    }

    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLoanParameters(_) => "invalid_loan_parameters",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MissingReason => "missing_reason",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountClosed(_) => "account_closed",
            Self::AccountNotEmpty(_) => "account_not_empty",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Overpayment { .. } => "overpayment",
            Self::MemberNotFound(_) => "member_not_found",
            Self::InvalidMember(_) => "invalid_member",
            Self::LoanNotFound(_) => "loan_not_found",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::GuarantorNotFound(_) => "guarantor_not_found",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidTransactionState { .. } => "invalid_transaction_state",
            Self::SameAccountTransfer => "same_account_transfer",
            Self::UnsupportedTransactionType(_) => "unsupported_transaction_type",
            Self::InvalidInterestRate(_) => "invalid_interest_rate",
            Self::BelowChannelMinimum { .. } => "below_channel_minimum",
            Self::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            Self::InvalidGuarantor(_) => "invalid_guarantor",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<crate::domain::AmountError> for DomainError {
    fn from(err: crate::domain::AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_insufficient_funds_error() {
        let err = DomainError::insufficient_funds(dec!(5000), dec!(3000));

        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("3000"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(DomainError::MissingReason.category(), ErrorCategory::BadInput);
        assert_eq!(
            DomainError::LoanNotFound("x".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            DomainError::invalid_transition("pending", "active").category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            DomainError::from(StoreError::VersionConflict {
                entity_id: Uuid::nil(),
                expected: 1,
                found: 2,
            })
            .category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            DomainError::from(StoreError::Poisoned).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_amount_error_maps_to_invalid_amount() {
        let err: DomainError = crate::domain::Amount::new(dec!(0)).unwrap_err().into();
        assert_eq!(err.code(), "invalid_amount");
    }
}

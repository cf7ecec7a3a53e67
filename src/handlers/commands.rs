//! Command definitions
//!
//! Commands represent intentions to change ledger or loan state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Channel, KycStatus, LoanType, MemberStatus, Transaction, TransactionType};
use crate::domain::Amount;

// =========================================================================
// Member commands
// =========================================================================

/// New member registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMember {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub monthly_income: Decimal,
    /// Repayment track record from a previous institution, 0 to 100
    #[serde(default)]
    pub loan_repayment_history: Option<u32>,
}

/// Partial member update; absent fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub monthly_income: Option<Decimal>,
    #[serde(default)]
    pub loan_repayment_history: Option<u32>,
    #[serde(default)]
    pub kyc_status: Option<KycStatus>,
    #[serde(default)]
    pub status: Option<MemberStatus>,
}

// =========================================================================
// Ledger commands
// =========================================================================

/// Single-account posting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingRequest {
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub description: String,
    pub channel: Channel,
    /// Groups this posting with related lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

impl PostingRequest {
    pub fn new(account_id: Uuid, transaction_type: TransactionType, amount: Amount, channel: Channel) -> Self {
        Self {
            account_id,
            transaction_type,
            amount,
            description: default_description(transaction_type).to_string(),
            channel,
            correlation: None,
        }
    }

    pub fn deposit(account_id: Uuid, amount: Amount, channel: Channel) -> Self {
        Self::new(account_id, TransactionType::Deposit, amount, channel)
    }

    pub fn withdrawal(account_id: Uuid, amount: Amount, channel: Channel) -> Self {
        Self::new(account_id, TransactionType::Withdrawal, amount, channel)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }
}

fn default_description(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::Deposit => "Deposit",
        TransactionType::Withdrawal => "Withdrawal",
        TransactionType::Transfer => "Transfer",
        TransactionType::LoanDisbursement => "Loan disbursement",
        TransactionType::LoanRepayment => "Loan repayment",
        TransactionType::Interest => "Interest",
        TransactionType::Dividend => "Dividend",
        TransactionType::Fee => "Fee",
    }
}

/// Move funds between two accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: Amount,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_transfer_channel")]
    pub channel: Channel,
}

fn default_transfer_channel() -> Channel {
    Channel::Internal
}

impl TransferCommand {
    pub fn new(from_account_id: Uuid, to_account_id: Uuid, amount: Amount) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            description: None,
            channel: Channel::Internal,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Both legs of a committed transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferResult {
    pub correlation: String,
    pub debit: Transaction,
    pub credit: Transaction,
}

// =========================================================================
// Loan commands
// =========================================================================

/// Loan application as submitted by a member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub member_id: Uuid,
    pub loan_type: LoanType,
    pub principal: Amount,
    pub purpose: String,
    /// Defaults to the loan type's standard term
    #[serde(default)]
    pub term_months: Option<u32>,
}

impl LoanApplication {
    pub fn new(member_id: Uuid, loan_type: LoanType, principal: Amount, purpose: impl Into<String>) -> Self {
        Self {
            member_id,
            loan_type,
            principal,
            purpose: purpose.into(),
            term_months: None,
        }
    }

    pub fn with_term(mut self, term_months: u32) -> Self {
        self.term_months = Some(term_months);
        self
    }
}

/// Officer's decision on a pending application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Pledge by another member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuarantorPledge {
    pub guarantor_member_id: Uuid,
    pub amount: Amount,
}

/// Inputs to the amortization calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleQuery {
    pub principal: Decimal,
    pub annual_rate: Decimal,
    pub term_months: u32,
}

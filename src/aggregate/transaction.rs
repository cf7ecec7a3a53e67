//! Transaction records
//!
//! One immutable ledger line per balance change. Only the settlement
//! status may move after creation; corrections are new compensating lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::Amount;

use super::{random_digits, Account, Aggregate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    LoanDisbursement,
    LoanRepayment,
    Interest,
    Dividend,
    Fee,
}

impl TransactionType {
    /// Fixed direction for the type. `Transfer` has none: each leg picks one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TransactionType::Deposit
            | TransactionType::LoanDisbursement
            | TransactionType::Interest
            | TransactionType::Dividend => Some(Direction::Credit),
            TransactionType::Withdrawal | TransactionType::LoanRepayment | TransactionType::Fee => {
                Some(Direction::Debit)
            }
            TransactionType::Transfer => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::LoanDisbursement => "loan_disbursement",
            TransactionType::LoanRepayment => "loan_repayment",
            TransactionType::Interest => "interest",
            TransactionType::Dividend => "dividend",
            TransactionType::Fee => "fee",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a line moves the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }

    /// Signed effect of `amount` on a balance
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Mpesa,
    Cash,
    BankTransfer,
    Internal,
    System,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Mpesa => "mpesa",
            Channel::Cash => "cash",
            Channel::BankTransfer => "bank_transfer",
            Channel::Internal => "internal",
            Channel::System => "system",
        }
    }

    /// Channels confirmed out of band by the payment network
    pub fn settles_asynchronously(&self) -> bool {
        matches!(self, Channel::Mpesa)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self {
            TransactionStatus::Pending => {
                matches!(next, TransactionStatus::Completed | TransactionStatus::Failed)
            }
            TransactionStatus::Completed => next == TransactionStatus::Reversed,
            TransactionStatus::Failed | TransactionStatus::Reversed => false,
        }
    }

    /// Still counts towards the account's movements
    pub fn is_effective(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a transaction reference (`TXN` + millis + 4 random digits)
pub fn generate_reference() -> String {
    format!("TXN{}{}", Utc::now().timestamp_millis(), random_digits(4))
}

/// Immutable ledger line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: Uuid,
    account_id: Uuid,
    member_id: Uuid,
    transaction_type: TransactionType,
    direction: Direction,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    description: String,
    reference: String,
    channel: Channel,
    status: TransactionStatus,
    processed_by: Option<Uuid>,
    /// Shared by the legs of one transfer
    correlation: Option<String>,
    /// Original line this one compensates
    reverses: Option<Uuid>,
    created_at: DateTime<Utc>,
}

/// Fields needed to record a posting against an account
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Amount,
    pub description: String,
    pub channel: Channel,
    pub status: TransactionStatus,
    pub processed_by: Option<Uuid>,
    pub correlation: Option<String>,
    pub reverses: Option<Uuid>,
}

impl Transaction {
    /// Build the record for a posting. `balance_before` is read from the
    /// account, `balance_after` is the planned result.
    pub fn record(account: &Account, balance_after: Decimal, new: NewTransaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account.id(),
            member_id: account.member_id(),
            transaction_type: new.transaction_type,
            direction: new.direction,
            amount: new.amount.value(),
            balance_before: account.balance().value(),
            balance_after,
            description: new.description,
            reference: generate_reference(),
            channel: new.channel,
            status: new.status,
            processed_by: new.processed_by,
            correlation: new.correlation,
            reverses: new.reverses,
            created_at: Utc::now(),
        }
    }

    /// `balance_after == balance_before ± amount`
    pub fn is_balanced(&self) -> bool {
        self.balance_before + self.direction.signed(self.amount) == self.balance_after
    }

    pub(crate) fn with_new_reference(mut self) -> Self {
        self.reference = generate_reference();
        self
    }

    pub(crate) fn with_status(&self, status: TransactionStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn balance_before(&self) -> Decimal {
        self.balance_before
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn processed_by(&self) -> Option<Uuid> {
        self.processed_by
    }

    pub fn correlation(&self) -> Option<&str> {
        self.correlation.as_deref()
    }

    pub fn reverses(&self) -> Option<Uuid> {
        self.reverses
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AccountType;
    use rust_decimal_macros::dec;

    #[test]
    fn test_type_directions() {
        assert_eq!(TransactionType::Deposit.direction(), Some(Direction::Credit));
        assert_eq!(TransactionType::Dividend.direction(), Some(Direction::Credit));
        assert_eq!(TransactionType::LoanDisbursement.direction(), Some(Direction::Credit));
        assert_eq!(TransactionType::Fee.direction(), Some(Direction::Debit));
        assert_eq!(TransactionType::LoanRepayment.direction(), Some(Direction::Debit));
        assert_eq!(TransactionType::Transfer.direction(), None);
    }

    #[test]
    fn test_status_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Reversed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Reversed.can_transition_to(Completed));
    }

    #[test]
    fn test_record_snapshots_balances() {
        let account = Account::open(Uuid::new_v4(), AccountType::Savings, dec!(6.5));
        let txn = Transaction::record(
            &account,
            dec!(250),
            NewTransaction {
                transaction_type: TransactionType::Deposit,
                direction: Direction::Credit,
                amount: Amount::new(dec!(250)).unwrap(),
                description: "Cash deposit".to_string(),
                channel: Channel::Cash,
                status: TransactionStatus::Completed,
                processed_by: None,
                correlation: None,
                reverses: None,
            },
        );

        assert_eq!(txn.balance_before(), Decimal::ZERO);
        assert_eq!(txn.balance_after(), dec!(250));
        assert_eq!(txn.member_id(), account.member_id());
        assert!(txn.is_balanced());
        assert!(txn.reference().starts_with("TXN"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(TransactionType::LoanRepayment).unwrap(),
            "loan_repayment"
        );
        assert_eq!(serde_json::to_value(Channel::BankTransfer).unwrap(), "bank_transfer");
        let channel: Channel = serde_json::from_str("\"mpesa\"").unwrap();
        assert!(channel.settles_asynchronously());
    }
}

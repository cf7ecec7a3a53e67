//! Account Aggregate
//!
//! A member's share, savings, emergency or fixed-deposit account.
//! Balance changes are planned here and committed by the ledger together
//! with the matching transaction record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Amount, Balance, DomainError};

use super::{random_digits, timestamp_digits, Aggregate, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Shares,
    Savings,
    Emergency,
    FixedDeposit,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Shares => "shares",
            AccountType::Savings => "savings",
            AccountType::Emergency => "emergency",
            AccountType::FixedDeposit => "fixed_deposit",
        }
    }

    /// Account number prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            AccountType::Shares => "SH",
            AccountType::Savings => "SV",
            AccountType::Emergency => "EM",
            AccountType::FixedDeposit => "FD",
        }
    }

    /// Standard annual rate offered on the product, if there is one.
    /// Fixed deposits are negotiated per account.
    pub fn default_interest_rate(&self) -> Option<Decimal> {
        match self {
            AccountType::Shares => Some(Decimal::new(800, 2)),
            AccountType::Savings => Some(Decimal::new(650, 2)),
            AccountType::Emergency => Some(Decimal::new(500, 2)),
            AccountType::FixedDeposit => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Dormant,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Dormant => "dormant",
            AccountStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account Aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    id: Uuid,
    member_id: Uuid,
    account_number: String,
    account_type: AccountType,
    balance: Balance,
    /// Annual percent, 2 dp
    interest_rate: Decimal,
    status: AccountStatus,
    opened_at: DateTime<Utc>,
    version: i64,
}

impl Account {
    /// Open a new account with a zero balance
    pub fn open(member_id: Uuid, account_type: AccountType, interest_rate: Decimal) -> Self {
        let account_number = format!(
            "{}{}{}",
            account_type.prefix(),
            timestamp_digits(6),
            random_digits(3)
        );

        Self {
            id: Uuid::new_v4(),
            member_id,
            account_number,
            account_type,
            balance: Balance::zero(),
            interest_rate: interest_rate.round_dp(2),
            status: AccountStatus::Active,
            opened_at: Utc::now(),
            version: 1,
        }
    }

    /// Compute the balance a posting would leave, without changing anything.
    ///
    /// # Errors
    /// - `AccountClosed` for closed accounts
    /// - `InsufficientFunds` when a debit would go below zero
    pub fn plan_posting(&self, direction: Direction, amount: &Amount) -> Result<Balance, DomainError> {
        self.plan_posting_with_held(direction, amount, Decimal::ZERO)
    }

    /// Like [`Account::plan_posting`], but debits may only draw on the
    /// available balance: `balance - held`, where `held` is money credited
    /// but not yet settled.
    pub fn plan_posting_with_held(
        &self,
        direction: Direction,
        amount: &Amount,
        held: Decimal,
    ) -> Result<Balance, DomainError> {
        if self.status == AccountStatus::Closed {
            return Err(DomainError::AccountClosed(self.id.to_string()));
        }

        match direction {
            Direction::Credit => Ok(self.balance.credit(amount)?),
            Direction::Debit => {
                let available = self.available_balance(held);
                if available < amount.value() {
                    return Err(DomainError::insufficient_funds(amount.value(), available));
                }
                Ok(self.balance.debit(amount)?)
            }
        }
    }

    /// Balance minus uncleared credits, floored at zero
    pub fn available_balance(&self, held: Decimal) -> Decimal {
        (self.balance.value() - held).max(Decimal::ZERO)
    }

    /// New state after a committed posting
    pub(crate) fn with_balance(&self, balance: Balance) -> Self {
        let mut next = self.clone();
        next.balance = balance;
        next.version += 1;
        next
    }

    /// New state with a different status
    pub(crate) fn with_status(&self, status: AccountStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.version += 1;
        next
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn interest_rate(&self) -> Decimal {
        self.interest_rate
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status == AccountStatus::Closed
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

impl Aggregate for Account {
    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }
}

//! Repository
//!
//! Storage seam for the ledger and loan engine. Reads are single-entity
//! lookups or list-by-foreign-key queries; every write goes through
//! [`Repository::commit`], which applies a batch of [`WriteOp`]s
//! all-or-nothing.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::{
    Account, AccountType, Guarantor, Loan, LoanStatus, Member, Transaction, TransactionStatus,
};
use crate::domain::MemberProfile;

use super::StoreError;

/// One write inside an atomic commit
#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertMember(Member),
    UpdateMember(Member),
    InsertAccount(Account),
    /// Replace an account; fails unless the stored version equals `expected_version`
    UpdateAccount {
        account: Account,
        expected_version: i64,
    },
    InsertTransaction(Transaction),
    /// Status change on an existing transaction
    UpdateTransaction(Transaction),
    InsertLoan(Loan),
    UpdateLoan {
        loan: Loan,
        expected_version: i64,
    },
    InsertGuarantor(Guarantor),
    UpdateGuarantor(Guarantor),
}

impl WriteOp {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::InsertMember(_) => "insert_member",
            WriteOp::UpdateMember(_) => "update_member",
            WriteOp::InsertAccount(_) => "insert_account",
            WriteOp::UpdateAccount { .. } => "update_account",
            WriteOp::InsertTransaction(_) => "insert_transaction",
            WriteOp::UpdateTransaction(_) => "update_transaction",
            WriteOp::InsertLoan(_) => "insert_loan",
            WriteOp::UpdateLoan { .. } => "update_loan",
            WriteOp::InsertGuarantor(_) => "insert_guarantor",
            WriteOp::UpdateGuarantor(_) => "update_guarantor",
        }
    }
}

/// Transaction history query
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub member_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    /// Shared key of related lines (transfer legs, a posting and its fee)
    pub correlation: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn for_account(account_id: Uuid) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn for_member(member_id: Uuid) -> Self {
        Self {
            member_id: Some(member_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, txn: &Transaction) -> bool {
        self.member_id.map_or(true, |id| txn.member_id() == id)
            && self.account_id.map_or(true, |id| txn.account_id() == id)
            && self.status.map_or(true, |s| txn.status() == s)
            && self
                .correlation
                .as_deref()
                .map_or(true, |c| txn.correlation() == Some(c))
            && self.created_after.map_or(true, |t| txn.created_at() >= t)
    }
}

/// Loan listing query
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub member_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        self.member_id.map_or(true, |id| loan.member_id() == id)
            && self.status.map_or(true, |s| loan.status() == s)
    }
}

/// Entity storage used by the services
pub trait Repository: Send + Sync {
    /// Validate every op, then apply all of them or none
    fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    fn member(&self, id: Uuid) -> Result<Option<Member>, StoreError>;
    fn members(&self) -> Result<Vec<Member>, StoreError>;

    fn account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;
    /// Accounts of a member, oldest first
    fn accounts_for_member(&self, member_id: Uuid) -> Result<Vec<Account>, StoreError>;
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    /// Matching transactions, newest first
    fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError>;
    fn reference_exists(&self, reference: &str) -> Result<bool, StoreError>;

    fn loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError>;
    /// Matching loans, newest application first
    fn loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError>;
    fn loan_number_exists(&self, loan_number: &str) -> Result<bool, StoreError>;

    fn guarantor(&self, id: Uuid) -> Result<Option<Guarantor>, StoreError>;
    fn guarantors_for_loan(&self, loan_id: Uuid) -> Result<Vec<Guarantor>, StoreError>;
}

/// Source of scorer inputs for a member
pub trait MemberDirectory: Send + Sync {
    /// `None` when the member is unknown
    fn profile(&self, member_id: Uuid) -> Result<Option<MemberProfile>, StoreError>;
}

/// Build a profile from repository state.
///
/// Existing loans are those disbursed or active; savings balance sums the
/// member's savings-type accounts.
pub fn derive_profile<R: Repository + ?Sized>(
    repo: &R,
    member_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<MemberProfile>, StoreError> {
    let Some(member) = repo.member(member_id)? else {
        return Ok(None);
    };

    let existing_loans = repo
        .loans(&LoanFilter {
            member_id: Some(member_id),
            status: None,
        })?
        .iter()
        .filter(|loan| loan.status().is_outstanding())
        .count();

    let savings_balance = repo
        .accounts_for_member(member_id)?
        .iter()
        .filter(|account| account.account_type() == AccountType::Savings)
        .map(|account| account.balance().value())
        .sum();

    Ok(Some(MemberProfile {
        monthly_income: member.monthly_income,
        existing_loans: u32::try_from(existing_loans).unwrap_or(u32::MAX),
        loan_repayment_history: member.loan_repayment_history,
        savings_balance,
        account_age_years: member.membership_years(now),
    }))
}

//! Aggregate module
//!
//! Entity records owned by the repository. Accounts and loans are
//! versioned aggregates: every accepted change produces a new value with
//! the version bumped, and the store refuses a write whose expected
//! version no longer matches.

pub mod account;
pub mod guarantor;
pub mod loan;
pub mod member;
pub mod transaction;

pub use account::{Account, AccountStatus, AccountType};
pub use guarantor::{Guarantor, GuarantorStatus};
pub use loan::{Loan, LoanStatus, LoanType};
pub use member::{KycStatus, Member, MemberStatus};
pub use transaction::{Channel, Direction, Transaction, TransactionStatus, TransactionType};

/// Aggregate trait that versioned entities implement
pub trait Aggregate {
    /// Get the aggregate type name (for logs and audit)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of accepted changes)
    fn version(&self) -> i64;
}

/// Random decimal digits used in human-facing identifiers
pub(crate) fn random_digits(width: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..width)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Last `width` digits of the current millisecond timestamp
pub(crate) fn timestamp_digits(width: usize) -> String {
    let millis = chrono::Utc::now().timestamp_millis().to_string();
    millis[millis.len().saturating_sub(width)..].to_string()
}

//! Domain module
//!
//! Core domain types and business rules.

pub mod amortization;
pub mod amount;
pub mod context;
pub mod credit;
pub mod error;
pub mod events;

pub use amortization::{compute_schedule, Schedule, MAX_TERM_MONTHS};
pub use amount::{round_money, Amount, AmountError, Balance};
pub use context::{OperationContext, Role};
pub use credit::{CreditScorer, MemberProfile};
pub use error::{DomainError, ErrorCategory};
pub use events::DomainEvent;

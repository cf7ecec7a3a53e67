//! Domain Events
//!
//! Immutable facts emitted by the ledger and the loan engine.
//! Delivery is the concern of whatever [`NotificationSink`](crate::notifications::NotificationSink)
//! the services were built with.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{LoanStatus, TransactionStatus, TransactionType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A loan entered a new status (`from` is `None` on application)
    LoanStatusChanged {
        loan_id: Uuid,
        member_id: Uuid,
        loan_number: String,
        from: Option<LoanStatus>,
        to: LoanStatus,
        principal: Decimal,
        occurred_at: DateTime<Utc>,
    },

    /// A transaction was written to the ledger
    TransactionPosted {
        transaction_id: Uuid,
        account_id: Uuid,
        member_id: Uuid,
        transaction_type: TransactionType,
        amount: Decimal,
        balance_after: Decimal,
        status: TransactionStatus,
        occurred_at: DateTime<Utc>,
    },

    /// A pending transaction was confirmed or failed
    TransactionSettled {
        transaction_id: Uuid,
        member_id: Uuid,
        status: TransactionStatus,
        occurred_at: DateTime<Utc>,
    },

    /// A completed transaction was reversed by a compensating entry
    TransactionReversed {
        transaction_id: Uuid,
        compensating_id: Uuid,
        member_id: Uuid,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    },

    /// Repayment received against an active loan
    LoanRepaymentReceived {
        loan_id: Uuid,
        member_id: Uuid,
        amount: Decimal,
        outstanding_balance: Decimal,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::LoanStatusChanged { .. } => "LoanStatusChanged",
            DomainEvent::TransactionPosted { .. } => "TransactionPosted",
            DomainEvent::TransactionSettled { .. } => "TransactionSettled",
            DomainEvent::TransactionReversed { .. } => "TransactionReversed",
            DomainEvent::LoanRepaymentReceived { .. } => "LoanRepaymentReceived",
        }
    }

    /// Member the event concerns
    pub fn member_id(&self) -> Uuid {
        match self {
            DomainEvent::LoanStatusChanged { member_id, .. }
            | DomainEvent::TransactionPosted { member_id, .. }
            | DomainEvent::TransactionSettled { member_id, .. }
            | DomainEvent::TransactionReversed { member_id, .. }
            | DomainEvent::LoanRepaymentReceived { member_id, .. } => *member_id,
        }
    }
}

//! Notifications module
//!
//! Delivery of domain events. The services publish every committed
//! [`DomainEvent`] to one [`NotificationSink`]; [`FanOut`] lets the binary
//! feed several sinks (member inbox, audit chain, logs) at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::aggregate::{LoanStatus, TransactionStatus};
use crate::domain::{DomainEvent, OperationContext};

/// Receiver of committed domain events.
///
/// Called after the commit succeeded; implementations must not fail the
/// operation, so errors are theirs to log.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &DomainEvent, context: &OperationContext);
}

// =========================================================================
// Fan-out and logging sinks
// =========================================================================

/// Forwards each event to every inner sink in order
#[derive(Clone, Default)]
pub struct FanOut {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanOut {
    fn publish(&self, event: &DomainEvent, context: &OperationContext) {
        for sink in &self.sinks {
            sink.publish(event, context);
        }
    }
}

/// Writes events to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: &DomainEvent, context: &OperationContext) {
        tracing::info!(
            event_type = event.event_type(),
            member_id = %event.member_id(),
            actor_id = ?context.actor_id,
            correlation_id = ?context.correlation_id,
            "Domain event published"
        );
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _event: &DomainEvent, _context: &OperationContext) {}
}

// =========================================================================
// Member inbox
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Transaction,
    Loan,
    System,
    Reminder,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub member_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub is_read: bool,
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn new(
        member_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        priority: Priority,
        action_url: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            title: title.into(),
            message: message.into(),
            kind,
            priority,
            is_read: false,
            action_url: Some(action_url.to_string()),
            created_at: Utc::now(),
        }
    }

    /// Member-facing message for an event, if it warrants one
    pub fn for_event(event: &DomainEvent) -> Option<Self> {
        match event {
            DomainEvent::LoanStatusChanged {
                member_id,
                loan_number,
                to,
                principal,
                ..
            } => {
                let (title, message, priority) = match to {
                    LoanStatus::Pending => (
                        "Loan Application Received",
                        format!(
                            "Your loan application for {:.2} has been received and is being processed",
                            principal
                        ),
                        Priority::High,
                    ),
                    LoanStatus::Approved => (
                        "Loan Approved!",
                        format!("Your loan of {:.2} has been approved", principal),
                        Priority::High,
                    ),
                    LoanStatus::Rejected => (
                        "Loan Application Update",
                        "Your loan application has been reviewed".to_string(),
                        Priority::High,
                    ),
                    LoanStatus::Active => (
                        "Loan Disbursed",
                        format!("Loan {} of {:.2} has been disbursed to your account", loan_number, principal),
                        Priority::High,
                    ),
                    LoanStatus::Completed => (
                        "Loan Fully Repaid",
                        format!("Loan {} has been fully repaid", loan_number),
                        Priority::Medium,
                    ),
                    LoanStatus::Defaulted => (
                        "Loan In Default",
                        format!("Loan {} has been marked as defaulted. Please contact the office", loan_number),
                        Priority::High,
                    ),
                    // intermediate step, the Active notice covers it
                    LoanStatus::Disbursed => return None,
                };
                Some(Self::new(*member_id, title, message, NotificationKind::Loan, priority, "/member/loans"))
            }

            DomainEvent::TransactionPosted {
                member_id,
                transaction_type,
                amount,
                balance_after,
                status,
                ..
            } => {
                let message = match status {
                    TransactionStatus::Pending => {
                        format!("{} of {:.2} is awaiting confirmation", transaction_type, amount)
                    }
                    _ => format!("{} of {:.2}. New balance {:.2}", transaction_type, amount, balance_after),
                };
                Some(Self::new(
                    *member_id,
                    format!("Transaction {}", transaction_type),
                    message,
                    NotificationKind::Transaction,
                    Priority::Medium,
                    "/member/transactions",
                ))
            }

            DomainEvent::TransactionSettled {
                member_id, status, ..
            } if *status == TransactionStatus::Failed => Some(Self::new(
                *member_id,
                "Transaction Failed",
                "A pending mobile money transaction failed and has been reversed",
                NotificationKind::Alert,
                Priority::High,
                "/member/transactions",
            )),
            DomainEvent::TransactionSettled { .. } => None,

            DomainEvent::TransactionReversed {
                member_id, amount, ..
            } => Some(Self::new(
                *member_id,
                "Transaction Reversed",
                format!("A transaction of {:.2} has been reversed", amount),
                NotificationKind::Alert,
                Priority::High,
                "/member/transactions",
            )),

            DomainEvent::LoanRepaymentReceived {
                member_id,
                amount,
                outstanding_balance,
                ..
            } => Some(Self::new(
                *member_id,
                "Repayment Received",
                format!(
                    "Repayment of {:.2} received. Outstanding balance {:.2}",
                    amount, outstanding_balance
                ),
                NotificationKind::Loan,
                Priority::Medium,
                "/member/loans",
            )),
        }
    }
}

/// In-memory member inbox
#[derive(Debug, Default)]
pub struct NotificationCenter {
    inbox: RwLock<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications for a member, newest first
    pub fn for_member(&self, member_id: Uuid) -> Vec<Notification> {
        let inbox = match self.inbox.read() {
            Ok(inbox) => inbox,
            Err(poisoned) => poisoned.into_inner(),
        };
        inbox
            .iter()
            .rev()
            .filter(|n| n.member_id == member_id)
            .cloned()
            .collect()
    }

    pub fn unread_count(&self, member_id: Uuid) -> usize {
        self.for_member(member_id).iter().filter(|n| !n.is_read).count()
    }

    /// Mark one notification read. `None` if the id is unknown.
    pub fn mark_read(&self, id: Uuid) -> Option<Notification> {
        let mut inbox = match self.inbox.write() {
            Ok(inbox) => inbox,
            Err(poisoned) => poisoned.into_inner(),
        };
        let notification = inbox.iter_mut().find(|n| n.id == id)?;
        notification.is_read = true;
        Some(notification.clone())
    }

    fn push(&self, notification: Notification) {
        let mut inbox = match self.inbox.write() {
            Ok(inbox) => inbox,
            Err(poisoned) => poisoned.into_inner(),
        };
        inbox.push(notification);
    }
}

impl NotificationSink for NotificationCenter {
    fn publish(&self, event: &DomainEvent, _context: &OperationContext) {
        if let Some(notification) = Notification::for_event(event) {
            tracing::debug!(
                member_id = %notification.member_id,
                title = %notification.title,
                "Notification queued"
            );
            self.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_event(member_id: Uuid, to: LoanStatus) -> DomainEvent {
        DomainEvent::LoanStatusChanged {
            loan_id: Uuid::new_v4(),
            member_id,
            loan_number: "LN1234560001".to_string(),
            from: None,
            to,
            principal: dec!(50000),
            occurred_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl NotificationSink for CountingSink {
        fn publish(&self, _event: &DomainEvent, _context: &OperationContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_loan_messages() {
        let member_id = Uuid::new_v4();
        let applied = Notification::for_event(&status_event(member_id, LoanStatus::Pending)).unwrap();
        assert_eq!(applied.title, "Loan Application Received");
        assert!(applied.message.contains("50000.00"));
        assert_eq!(applied.kind, NotificationKind::Loan);
        assert_eq!(applied.priority, Priority::High);

        let approved = Notification::for_event(&status_event(member_id, LoanStatus::Approved)).unwrap();
        assert_eq!(approved.title, "Loan Approved!");

        assert!(Notification::for_event(&status_event(member_id, LoanStatus::Disbursed)).is_none());
    }

    #[test]
    fn test_center_inbox_and_mark_read() {
        let center = NotificationCenter::new();
        let member_id = Uuid::new_v4();
        let ctx = OperationContext::system();

        center.publish(&status_event(member_id, LoanStatus::Pending), &ctx);
        center.publish(&status_event(member_id, LoanStatus::Approved), &ctx);
        center.publish(&status_event(Uuid::new_v4(), LoanStatus::Approved), &ctx);

        let inbox = center.for_member(member_id);
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].title, "Loan Approved!");
        assert_eq!(center.unread_count(member_id), 2);

        let read = center.mark_read(inbox[1].id).unwrap();
        assert!(read.is_read);
        assert_eq!(center.unread_count(member_id), 1);
        assert!(center.mark_read(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_fan_out_reaches_every_sink() {
        let a = Arc::new(CountingSink::default());
        let b = Arc::new(CountingSink::default());
        let fan_out = FanOut::new().with(a.clone()).with(b.clone()).with(Arc::new(NullSink));

        fan_out.publish(&status_event(Uuid::new_v4(), LoanStatus::Pending), &OperationContext::new());

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }
}

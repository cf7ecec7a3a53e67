//! Audit Log
//!
//! Tamper-evident audit trail with a SHA-256 hash chain. Every committed
//! domain event is recorded, plus explicit entries for actions that do not
//! raise events (member registration, account opening, guarantors).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

use crate::aggregate::{LoanStatus, TransactionStatus};
use crate::domain::{DomainEvent, OperationContext};
use crate::notifications::NotificationSink;

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub actor_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    fn compute_hash(&self) -> String {
        let hash_input = format!(
            "{}{}{}{}{}{}{}",
            self.id,
            self.sequence_number,
            self.action,
            self.actor_id.map(|u| u.to_string()).unwrap_or_default(),
            self.before_state.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            self.after_state.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            self.previous_hash
        );
        sha256_hex(&hash_input)
    }
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    MemberRegistered,
    MemberUpdated,
    AccountOpened,
    AccountClosed,
    TransactionPosted,
    TransactionConfirmed,
    TransactionFailed,
    TransactionReversed,
    LoanApplied,
    LoanApproved,
    LoanRejected,
    LoanDisbursed,
    LoanActivated,
    LoanRepaid,
    LoanCompleted,
    LoanDefaulted,
    GuarantorAdded,
    GuarantorDecided,
    InterestAccrued,
    PermissionDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::MemberRegistered => "member.registered",
            AuditAction::MemberUpdated => "member.updated",
            AuditAction::AccountOpened => "account.opened",
            AuditAction::AccountClosed => "account.closed",
            AuditAction::TransactionPosted => "transaction.posted",
            AuditAction::TransactionConfirmed => "transaction.confirmed",
            AuditAction::TransactionFailed => "transaction.failed",
            AuditAction::TransactionReversed => "transaction.reversed",
            AuditAction::LoanApplied => "loan.applied",
            AuditAction::LoanApproved => "loan.approved",
            AuditAction::LoanRejected => "loan.rejected",
            AuditAction::LoanDisbursed => "loan.disbursed",
            AuditAction::LoanActivated => "loan.activated",
            AuditAction::LoanRepaid => "loan.repayment_received",
            AuditAction::LoanCompleted => "loan.completed",
            AuditAction::LoanDefaulted => "loan.defaulted",
            AuditAction::GuarantorAdded => "guarantor.added",
            AuditAction::GuarantorDecided => "guarantor.decided",
            AuditAction::InterestAccrued => "account.interest_accrued",
            AuditAction::PermissionDenied => "auth.permission_denied",
        }
    }

    /// Action and resource for a domain event
    pub fn for_event(event: &DomainEvent) -> (AuditAction, &'static str, Uuid) {
        match event {
            DomainEvent::LoanStatusChanged { loan_id, to, .. } => {
                let action = match to {
                    LoanStatus::Pending => AuditAction::LoanApplied,
                    LoanStatus::Approved => AuditAction::LoanApproved,
                    LoanStatus::Rejected => AuditAction::LoanRejected,
                    LoanStatus::Disbursed => AuditAction::LoanDisbursed,
                    LoanStatus::Active => AuditAction::LoanActivated,
                    LoanStatus::Completed => AuditAction::LoanCompleted,
                    LoanStatus::Defaulted => AuditAction::LoanDefaulted,
                };
                (action, "Loan", *loan_id)
            }
            DomainEvent::LoanRepaymentReceived { loan_id, .. } => (AuditAction::LoanRepaid, "Loan", *loan_id),
            DomainEvent::TransactionPosted { transaction_id, .. } => {
                (AuditAction::TransactionPosted, "Transaction", *transaction_id)
            }
            DomainEvent::TransactionSettled {
                transaction_id, status, ..
            } => {
                let action = if *status == TransactionStatus::Completed {
                    AuditAction::TransactionConfirmed
                } else {
                    AuditAction::TransactionFailed
                };
                (action, "Transaction", *transaction_id)
            }
            DomainEvent::TransactionReversed { transaction_id, .. } => {
                (AuditAction::TransactionReversed, "Transaction", *transaction_id)
            }
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    /// Create a new audit log builder
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
        }
    }

    /// Set the resource type
    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    /// Set the resource ID
    pub fn resource_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// Set the before state
    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    /// Set the after state
    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }
}

/// In-memory, append-only audit log
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, chaining it to the previous one
    pub fn log(&self, builder: AuditLogBuilder, context: &OperationContext) -> Result<Uuid, AuditLogError> {
        let mut entries = self.entries.write().map_err(|_| AuditLogError::Poisoned)?;

        let previous_hash = entries
            .last()
            .map(|e| e.current_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = AuditLogEntry {
            id: Uuid::new_v4(),
            sequence_number: entries.len() as i64 + 1,
            actor_id: context.actor_id,
            correlation_id: context.correlation_id,
            action: builder.action,
            resource_type: builder.resource_type,
            resource_id: builder.resource_id,
            before_state: builder.before_state,
            after_state: builder.after_state,
            previous_hash,
            current_hash: String::new(),
            created_at: Utc::now(),
        };
        entry.current_hash = entry.compute_hash();

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            "Audit log entry created"
        );

        let id = entry.id;
        entries.push(entry);
        Ok(id)
    }

    /// Verify the integrity of the hash chain
    pub fn verify_hash_chain(&self) -> Result<ChainVerificationResult, AuditLogError> {
        let entries = self.entries.read().map_err(|_| AuditLogError::Poisoned)?;
        let mut previous_hash = GENESIS_HASH.to_string();

        for entry in entries.iter() {
            if entry.previous_hash != previous_hash {
                return Ok(ChainVerificationResult::broken(
                    entry,
                    previous_hash,
                    entry.previous_hash.clone(),
                ));
            }

            let calculated_hash = entry.compute_hash();
            if calculated_hash != entry.current_hash {
                return Ok(ChainVerificationResult::broken(
                    entry,
                    calculated_hash,
                    entry.current_hash.clone(),
                ));
            }

            previous_hash = entry.current_hash.clone();
        }

        Ok(ChainVerificationResult {
            is_valid: true,
            entries_checked: entries.len() as u64,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        })
    }

    /// Most recent entries first
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = self.entries.read().map_err(|_| AuditLogError::Poisoned)?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    /// Entries about one resource, most recent first
    pub fn for_resource(&self, resource_id: Uuid, limit: usize) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = self.entries.read().map_err(|_| AuditLogError::Poisoned)?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.resource_id == Some(resource_id))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl NotificationSink for AuditLog {
    fn publish(&self, event: &DomainEvent, context: &OperationContext) {
        let (action, resource_type, resource_id) = AuditAction::for_event(event);
        let builder = AuditLogBuilder::new(action)
            .resource_type(resource_type)
            .resource_id(resource_id)
            .after_state(event);

        if let Err(e) = self.log(builder, context) {
            tracing::error!(error = %e, action = %action, "Failed to write audit entry");
        }
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn broken(entry: &AuditLogEntry, expected: String, actual: String) -> Self {
        Self {
            is_valid: false,
            entries_checked: entry.sequence_number as u64,
            first_invalid_entry: Some(entry.id),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
        }
    }
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Audit log lock poisoned")]
    Poisoned,
}

// =========================================================================
// Tests
// =========================================================================

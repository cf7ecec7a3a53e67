//! Guarantor pledges against a loan

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{Amount, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuarantorStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for GuarantorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuarantorStatus::Pending => "pending",
            GuarantorStatus::Approved => "approved",
            GuarantorStatus::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guarantor {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub guarantor_member_id: Uuid,
    pub guaranteed_amount: Decimal,
    pub status: GuarantorStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Guarantor {
    pub fn pledge(loan_id: Uuid, guarantor_member_id: Uuid, amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            guarantor_member_id,
            guaranteed_amount: amount.value(),
            status: GuarantorStatus::Pending,
            approved_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        }
    }

    /// Approve, or reject with a non-blank reason. Only pending pledges
    /// can be decided.
    pub fn decide(&self, approve: bool, reason: Option<&str>, at: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != GuarantorStatus::Pending {
            let to = if approve {
                GuarantorStatus::Approved
            } else {
                GuarantorStatus::Rejected
            };
            return Err(DomainError::invalid_transition(self.status, to));
        }

        let mut next = self.clone();
        if approve {
            next.status = GuarantorStatus::Approved;
            next.approved_at = Some(at);
        } else {
            let reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or(DomainError::MissingReason)?;
            next.status = GuarantorStatus::Rejected;
            next.rejection_reason = Some(reason.to_string());
        }
        Ok(next)
    }

    /// Counts towards the loan's guaranteed total
    pub fn is_live(&self) -> bool {
        self.status != GuarantorStatus::Rejected
    }
}

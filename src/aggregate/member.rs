//! Member record
//!
//! Owned by the store; the loan engine only reads it through
//! [`MemberDirectory`](crate::store::MemberDirectory).

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::random_digits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

/// Identity verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub member_number: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub monthly_income: Decimal,
    /// 0 to 100
    pub loan_repayment_history: u32,
    pub status: MemberStatus,
    #[serde(default)]
    pub kyc_status: KycStatus,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    pub fn register(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        phone: impl Into<String>,
        monthly_income: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_number: format!("APL{}", random_digits(6)),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: phone.into(),
            monthly_income: monthly_income.round_dp(2),
            loan_repayment_history: 0,
            status: MemberStatus::Active,
            kyc_status: KycStatus::Pending,
            joined_at: Utc::now(),
        }
    }

    pub fn with_repayment_history(mut self, history: u32) -> Self {
        self.loan_repayment_history = history.min(100);
        self
    }

    pub fn with_kyc_status(mut self, kyc_status: KycStatus) -> Self {
        self.kyc_status = kyc_status;
        self
    }

    pub fn joined(mut self, joined_at: DateTime<Utc>) -> Self {
        self.joined_at = joined_at;
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Whole years of membership at `now`
    pub fn membership_years(&self, now: DateTime<Utc>) -> u32 {
        let joined = self.joined_at.date_naive();
        let today = now.date_naive();
        let mut years = today.year() - joined.year();
        if (today.month(), today.day()) < (joined.month(), joined.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

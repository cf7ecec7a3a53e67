//! Credit scoring
//!
//! Maps a member's financial profile to a bounded score used when
//! evaluating loan applications.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u16 = 300;
pub const MAX_SCORE: u16 = 850;

const BASE_SCORE: i64 = 500;
const PER_EXISTING_LOAN: i64 = -20;
const PER_REPAYMENT_POINT: i64 = 2;
const PER_ACCOUNT_YEAR: i64 = 2;
const ACCOUNT_AGE_CAP: i64 = 50;

/// (threshold, bonus), highest tier first
const INCOME_TIERS: [(i64, i64); 3] = [(100_000, 150), (50_000, 100), (30_000, 50)];
const SAVINGS_TIERS: [(i64, i64); 3] = [(100_000, 100), (50_000, 70), (20_000, 40)];

/// Financial attributes the scorer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemberProfile {
    pub monthly_income: Decimal,
    /// Loans currently disbursed or active
    pub existing_loans: u32,
    /// 0 to 100
    pub loan_repayment_history: u32,
    pub savings_balance: Decimal,
    pub account_age_years: u32,
}

/// Stateless credit scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditScorer;

impl CreditScorer {
    /// Score a profile into `[MIN_SCORE, MAX_SCORE]`.
    ///
    /// Deterministic and side-effect free.
    pub fn score(profile: &MemberProfile) -> u16 {
        let mut score = BASE_SCORE;

        score = score.saturating_add(tier_bonus(profile.monthly_income, &INCOME_TIERS));
        score = score
            .saturating_add(i64::from(profile.existing_loans).saturating_mul(PER_EXISTING_LOAN));
        score = score.saturating_add(
            i64::from(profile.loan_repayment_history).saturating_mul(PER_REPAYMENT_POINT),
        );
        score = score.saturating_add(tier_bonus(profile.savings_balance, &SAVINGS_TIERS));
        score = score.saturating_add(
            i64::from(profile.account_age_years)
                .saturating_mul(PER_ACCOUNT_YEAR)
                .min(ACCOUNT_AGE_CAP),
        );

        score.clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as u16
    }
}

fn tier_bonus(value: Decimal, tiers: &[(i64, i64)]) -> i64 {
    tiers
        .iter()
        .find(|(threshold, _)| value >= Decimal::from(*threshold))
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

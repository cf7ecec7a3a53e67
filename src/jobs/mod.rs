//! Scheduled Jobs
//!
//! Background jobs for periodic ledger maintenance: failing M-PESA
//! postings that were never confirmed, and month-end interest.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::interval;

use crate::aggregate::{AccountStatus, Aggregate, TransactionStatus, TransactionType};
use crate::domain::{DomainError, OperationContext};
use crate::handlers::Services;
use crate::store::{Repository, TransactionFilter};

// =========================================================================
// Pending settlement expiry
// =========================================================================

/// Fail pending postings older than `timeout`. Each group (a posting and
/// its fee) is compensated once.
pub async fn expire_stale_pending(
    services: &Services,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<u64, JobError> {
    let cutoff = now - ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::zero());
    let pending = services.store.transactions(&TransactionFilter {
        status: Some(TransactionStatus::Pending),
        ..TransactionFilter::default()
    })?;

    let context = OperationContext::system();
    let mut settled_groups = HashSet::new();
    let mut expired = 0;

    for txn in pending.iter().rev().filter(|t| t.created_at() < cutoff) {
        let group = txn
            .correlation()
            .map(str::to_string)
            .unwrap_or_else(|| txn.id().to_string());
        if !settled_groups.insert(group) {
            continue;
        }

        match services.ledger.confirm_transaction(txn.id(), false, &context).await {
            Ok(_) => expired += 1,
            // settled by someone else since the scan
            Err(DomainError::InvalidTransactionState { .. }) => {}
            Err(e) => {
                tracing::error!(transaction_id = %txn.id(), error = %e, "Could not expire pending transaction");
            }
        }
    }

    if expired > 0 {
        tracing::warn!(expired, "Expired unconfirmed pending transactions");
    }

    Ok(expired)
}

// =========================================================================
// Month-end interest
// =========================================================================

/// Credit monthly interest to every active account that has not had an
/// interest line this month
pub async fn accrue_month_end_interest(services: &Services, now: DateTime<Utc>) -> Result<u64, JobError> {
    let month_start = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .unwrap_or(now);

    let context = OperationContext::system();
    let mut credited = 0;

    for account in services.store.accounts()? {
        if account.status() != AccountStatus::Active || account.interest_rate().is_zero() {
            continue;
        }

        let already = services
            .store
            .transactions(&TransactionFilter {
                created_after: Some(month_start),
                ..TransactionFilter::for_account(account.id())
            })?
            .iter()
            .any(|t| t.transaction_type() == TransactionType::Interest);
        if already {
            continue;
        }

        match services.ledger.accrue_monthly_interest(account.id(), &context).await {
            Ok(Some(_)) => credited += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(account_id = %account.id(), error = %e, "Could not credit month-end interest");
            }
        }
    }

    if credited > 0 {
        tracing::info!(accounts = credited, "Credited month-end interest");
    }

    Ok(credited)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the pending settlement sweep (default: 1 minute)
    pub settlement_check_interval: Duration,
    /// Age at which an unconfirmed posting is failed (default: 5 minutes)
    pub pending_settlement_timeout: Duration,
    /// Interval for the month-end interest check (default: 1 hour)
    pub interest_check_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            settlement_check_interval: Duration::from_secs(60),
            pending_settlement_timeout: Duration::from_secs(300),
            interest_check_interval: Duration::from_secs(3600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    services: Services,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(services: Services) -> Self {
        Self {
            services,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(services: Services, config: JobSchedulerConfig) -> Self {
        Self { services, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!("Job scheduler started");

        let mut settlement_interval = interval(self.config.settlement_check_interval);
        let mut interest_interval = interval(self.config.interest_check_interval);

        loop {
            tokio::select! {
                _ = settlement_interval.tick() => {
                    let timeout = self.config.pending_settlement_timeout;
                    if let Err(e) = expire_stale_pending(&self.services, timeout, Utc::now()).await {
                        tracing::error!(error = %e, "Pending settlement sweep failed");
                    }
                }
                _ = interest_interval.tick() => {
                    let now = Utc::now();
                    if is_last_day_of_month(now.date_naive()) {
                        if let Err(e) = accrue_month_end_interest(&self.services, now).await {
                            tracing::error!(error = %e, "Interest accrual failed");
                        }
                    }
                }
            }
        }
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let now = Utc::now();

        match expire_stale_pending(&self.services, self.config.pending_settlement_timeout, now).await {
            Ok(count) => report.pending_expired = count,
            Err(e) => report.errors.push(format!("Pending settlement sweep: {}", e)),
        }

        if is_last_day_of_month(now.date_naive()) {
            match accrue_month_end_interest(&self.services, now).await {
                Ok(count) => report.interest_credited = count,
                Err(e) => report.errors.push(format!("Interest accrual: {}", e)),
            }
        }

        report.completed_at = now;
        report
    }
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt().map_or(true, |next| next.month() != date.month())
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub pending_expired: u64,
    pub interest_credited: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Ledger error: {0}")]
    Domain(#[from] DomainError),
}

impl From<crate::store::StoreError> for JobError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::Domain(err.into())
    }
}

// =========================================================================
// Tests
// =========================================================================

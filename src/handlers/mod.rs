//! Command Handlers module
//!
//! Services that orchestrate ledger and loan operations. Each one
//! coordinates aggregates, the repository and the notification sink.

mod commands;
mod ledger;
mod loan_engine;
mod members;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use commands::*;
pub use ledger::{
    monthly_interest, AccountLedger, PreparedPosting, MPESA_DAILY_WITHDRAWAL_LIMIT, MPESA_FEE,
    MPESA_FREE_DEPOSIT_LIMIT, MPESA_MINIMUM,
};
pub use loan_engine::LoanEngine;
pub use members::{MemberRegistry, MemberSummary, PortfolioStats};

use crate::audit::AuditLog;
use crate::notifications::{FanOut, NotificationCenter, NotificationSink, TracingSink};
use crate::store::{EntityLocks, InMemoryStore};

/// Everything the API and the jobs need, wired over one store
#[derive(Clone)]
pub struct Services {
    pub store: Arc<InMemoryStore>,
    pub members: MemberRegistry,
    pub ledger: AccountLedger,
    pub loans: LoanEngine,
    pub notifications: Arc<NotificationCenter>,
    pub audit: Arc<AuditLog>,
}

impl Services {
    /// In-memory wiring: events reach the member inbox, the audit chain
    /// and the logs.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let notifications = Arc::new(NotificationCenter::new());
        let audit = Arc::new(AuditLog::new());
        let sink: Arc<dyn NotificationSink> = Arc::new(
            FanOut::new()
                .with(notifications.clone())
                .with(audit.clone())
                .with(Arc::new(TracingSink)),
        );
        let locks = Arc::new(EntityLocks::new());

        let ledger = AccountLedger::new(store.clone(), locks.clone(), sink.clone());
        let loans = LoanEngine::new(store.clone(), store.clone(), ledger.clone(), locks, sink);

        Self {
            members: MemberRegistry::new(store.clone()),
            store,
            ledger,
            loans,
            notifications,
            audit,
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::in_memory()
    }
}

//! Store module
//!
//! Repository seam, its in-memory implementation and the per-entity
//! lock registry used by the services.

mod error;
mod locks;
mod memory;
mod repository;

pub use error::StoreError;
pub use locks::{EntityGuard, EntityLocks};
pub use memory::InMemoryStore;
pub use repository::{
    derive_profile, LoanFilter, MemberDirectory, Repository, TransactionFilter, WriteOp,
};

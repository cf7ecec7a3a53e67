//! In-memory repository
//!
//! All tables live behind one `RwLock`, so a commit holding the write
//! guard is atomic with respect to every reader.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

use crate::aggregate::{Account, Aggregate, Guarantor, Loan, Member, Transaction};
use crate::domain::MemberProfile;

use super::repository::{
    derive_profile, LoanFilter, MemberDirectory, Repository, TransactionFilter, WriteOp,
};
use super::StoreError;

#[derive(Debug, Default)]
struct Tables {
    members: HashMap<Uuid, Member>,
    member_order: Vec<Uuid>,
    accounts: HashMap<Uuid, Account>,
    account_order: Vec<Uuid>,
    transactions: HashMap<Uuid, Transaction>,
    transaction_order: Vec<Uuid>,
    references: HashSet<String>,
    loans: HashMap<Uuid, Loan>,
    loan_order: Vec<Uuid>,
    loan_numbers: HashSet<String>,
    guarantors: HashMap<Uuid, Guarantor>,
    guarantor_order: Vec<Uuid>,
}

impl Tables {
    /// Check a batch against current state plus the effect of earlier ops
    /// in the same batch.
    fn validate(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let mut staged_versions: HashMap<Uuid, i64> = HashMap::new();
        let mut staged_ids: HashSet<Uuid> = HashSet::new();
        let mut staged_keys: HashSet<&str> = HashSet::new();

        for op in ops {
            match op {
                WriteOp::InsertMember(member) => {
                    stage_insert(&mut staged_ids, member.id, self.members.contains_key(&member.id))?;
                }
                WriteOp::UpdateMember(member) => {
                    if !self.members.contains_key(&member.id) && !staged_ids.contains(&member.id) {
                        return Err(StoreError::MissingEntity {
                            kind: "Member",
                            id: member.id,
                        });
                    }
                }
                WriteOp::InsertAccount(account) => {
                    stage_insert(&mut staged_ids, account.id(), self.accounts.contains_key(&account.id()))?;
                    staged_versions.insert(account.id(), account.version());
                }
                WriteOp::UpdateAccount {
                    account,
                    expected_version,
                } => {
                    let found = staged_versions
                        .get(&account.id())
                        .copied()
                        .or_else(|| self.accounts.get(&account.id()).map(|a| a.version()))
                        .ok_or(StoreError::MissingEntity {
                            kind: "Account",
                            id: account.id(),
                        })?;
                    check_version(account.id(), *expected_version, found)?;
                    staged_versions.insert(account.id(), account.version());
                }
                WriteOp::InsertTransaction(txn) => {
                    stage_insert(&mut staged_ids, txn.id(), self.transactions.contains_key(&txn.id()))?;
                    if self.references.contains(txn.reference()) || !staged_keys.insert(txn.reference()) {
                        return Err(StoreError::DuplicateReference(txn.reference().to_string()));
                    }
                }
                WriteOp::UpdateTransaction(txn) => {
                    if !self.transactions.contains_key(&txn.id()) && !staged_ids.contains(&txn.id()) {
                        return Err(StoreError::MissingEntity {
                            kind: "Transaction",
                            id: txn.id(),
                        });
                    }
                }
                WriteOp::InsertLoan(loan) => {
                    stage_insert(&mut staged_ids, loan.id(), self.loans.contains_key(&loan.id()))?;
                    if self.loan_numbers.contains(loan.loan_number())
                        || !staged_keys.insert(loan.loan_number())
                    {
                        return Err(StoreError::DuplicateReference(loan.loan_number().to_string()));
                    }
                    staged_versions.insert(loan.id(), loan.version());
                }
                WriteOp::UpdateLoan {
                    loan,
                    expected_version,
                } => {
                    let found = staged_versions
                        .get(&loan.id())
                        .copied()
                        .or_else(|| self.loans.get(&loan.id()).map(|l| l.version()))
                        .ok_or(StoreError::MissingEntity {
                            kind: "Loan",
                            id: loan.id(),
                        })?;
                    check_version(loan.id(), *expected_version, found)?;
                    staged_versions.insert(loan.id(), loan.version());
                }
                WriteOp::InsertGuarantor(guarantor) => {
                    stage_insert(&mut staged_ids, guarantor.id, self.guarantors.contains_key(&guarantor.id))?;
                }
                WriteOp::UpdateGuarantor(guarantor) => {
                    if !self.guarantors.contains_key(&guarantor.id) && !staged_ids.contains(&guarantor.id) {
                        return Err(StoreError::MissingEntity {
                            kind: "Guarantor",
                            id: guarantor.id,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::InsertMember(member) => {
                self.member_order.push(member.id);
                self.members.insert(member.id, member);
            }
            WriteOp::UpdateMember(member) => {
                self.members.insert(member.id, member);
            }
            WriteOp::InsertAccount(account) => {
                self.account_order.push(account.id());
                self.accounts.insert(account.id(), account);
            }
            WriteOp::UpdateAccount { account, .. } => {
                self.accounts.insert(account.id(), account);
            }
            WriteOp::InsertTransaction(txn) => {
                self.transaction_order.push(txn.id());
                self.references.insert(txn.reference().to_string());
                self.transactions.insert(txn.id(), txn);
            }
            WriteOp::UpdateTransaction(txn) => {
                self.transactions.insert(txn.id(), txn);
            }
            WriteOp::InsertLoan(loan) => {
                self.loan_order.push(loan.id());
                self.loan_numbers.insert(loan.loan_number().to_string());
                self.loans.insert(loan.id(), loan);
            }
            WriteOp::UpdateLoan { loan, .. } => {
                self.loans.insert(loan.id(), loan);
            }
            WriteOp::InsertGuarantor(guarantor) => {
                self.guarantor_order.push(guarantor.id);
                self.guarantors.insert(guarantor.id, guarantor);
            }
            WriteOp::UpdateGuarantor(guarantor) => {
                self.guarantors.insert(guarantor.id, guarantor);
            }
        }
    }
}

fn stage_insert(staged: &mut HashSet<Uuid>, id: Uuid, exists: bool) -> Result<(), StoreError> {
    if exists || !staged.insert(id) {
        return Err(StoreError::DuplicateReference(id.to_string()));
    }
    Ok(())
}

fn check_version(entity_id: Uuid, expected: i64, found: i64) -> Result<(), StoreError> {
    if expected != found {
        return Err(StoreError::VersionConflict {
            entity_id,
            expected,
            found,
        });
    }
    Ok(())
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for InMemoryStore {
    fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tables = self.tables.write()?;
        tables.validate(&ops)?;

        let kinds: Vec<&'static str> = ops.iter().map(WriteOp::kind).collect();
        for op in ops {
            tables.apply(op);
        }
        tracing::trace!(ops = ?kinds, "Commit applied");
        Ok(())
    }

    fn member(&self, id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self.tables.read()?.members.get(&id).cloned())
    }

    fn members(&self) -> Result<Vec<Member>, StoreError> {
        let tables = self.tables.read()?;
        Ok(tables
            .member_order
            .iter()
            .filter_map(|id| tables.members.get(id).cloned())
            .collect())
    }

    fn account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.read()?.accounts.get(&id).cloned())
    }

    fn accounts_for_member(&self, member_id: Uuid) -> Result<Vec<Account>, StoreError> {
        let tables = self.tables.read()?;
        Ok(tables
            .account_order
            .iter()
            .filter_map(|id| tables.accounts.get(id))
            .filter(|account| account.member_id() == member_id)
            .cloned()
            .collect())
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let tables = self.tables.read()?;
        Ok(tables
            .account_order
            .iter()
            .filter_map(|id| tables.accounts.get(id).cloned())
            .collect())
    }

    fn transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.tables.read()?.transactions.get(&id).cloned())
    }

    fn transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables.read()?;
        let matching = tables
            .transaction_order
            .iter()
            .rev()
            .filter_map(|id| tables.transactions.get(id))
            .filter(|txn| filter.matches(txn))
            .cloned();

        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read()?.references.contains(reference))
    }

    fn loan(&self, id: Uuid) -> Result<Option<Loan>, StoreError> {
        Ok(self.tables.read()?.loans.get(&id).cloned())
    }

    fn loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StoreError> {
        let tables = self.tables.read()?;
        Ok(tables
            .loan_order
            .iter()
            .rev()
            .filter_map(|id| tables.loans.get(id))
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect())
    }

    fn loan_number_exists(&self, loan_number: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read()?.loan_numbers.contains(loan_number))
    }

    fn guarantor(&self, id: Uuid) -> Result<Option<Guarantor>, StoreError> {
        Ok(self.tables.read()?.guarantors.get(&id).cloned())
    }

    fn guarantors_for_loan(&self, loan_id: Uuid) -> Result<Vec<Guarantor>, StoreError> {
        let tables = self.tables.read()?;
        Ok(tables
            .guarantor_order
            .iter()
            .filter_map(|id| tables.guarantors.get(id))
            .filter(|g| g.loan_id == loan_id)
            .cloned()
            .collect())
    }
}

impl MemberDirectory for InMemoryStore {
    fn profile(&self, member_id: Uuid) -> Result<Option<MemberProfile>, StoreError> {
        derive_profile(self, member_id, Utc::now())
    }
}

//! Member Registry
//!
//! Registration and the read models behind the member and staff dashboards.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::{Account, Loan, LoanStatus, Member, MemberStatus, Transaction};
use crate::domain::{DomainError, OperationContext};
use crate::store::{LoanFilter, Repository, TransactionFilter, WriteOp};

use super::{MemberUpdate, RegisterMember};

/// Recent transactions shown on a dashboard
const RECENT_TRANSACTIONS: usize = 10;

/// Totals for one member
#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub member: Member,
    pub total_balance: Decimal,
    pub total_loan_balance: Decimal,
    pub accounts_count: usize,
    pub active_loans_count: usize,
    pub accounts: Vec<Account>,
    pub active_loans: Vec<Loan>,
    pub recent_transactions: Vec<Transaction>,
}

/// Portfolio totals for staff
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioStats {
    pub total_members: usize,
    pub active_members: usize,
    pub total_deposits: Decimal,
    pub total_loan_portfolio: Decimal,
    pub pending_loans_count: usize,
    pub active_loans_count: usize,
    pub defaulted_loans_count: usize,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Clone)]
pub struct MemberRegistry {
    repo: Arc<dyn Repository>,
}

impl MemberRegistry {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn register(&self, command: RegisterMember, context: &OperationContext) -> Result<Member, DomainError> {
        check_fields(
            &command.first_name,
            &command.last_name,
            &command.phone,
            command.monthly_income,
            command.loan_repayment_history,
        )?;

        let mut member = Member::register(
            command.first_name.trim(),
            command.last_name.trim(),
            command.phone.trim(),
            command.monthly_income,
        );
        if let Some(history) = command.loan_repayment_history {
            member = member.with_repayment_history(history);
        }

        self.repo.commit(vec![WriteOp::InsertMember(member.clone())])?;

        tracing::info!(
            member_id = %member.id,
            member_number = %member.member_number,
            actor_id = ?context.actor_id,
            "Member registered"
        );
        Ok(member)
    }

    /// Apply a partial update. The merged record is validated like a
    /// registration; nothing is written if it fails.
    pub fn update(
        &self,
        member_id: Uuid,
        update: MemberUpdate,
        context: &OperationContext,
    ) -> Result<Member, DomainError> {
        let current = self.member(member_id)?;

        let mut next = current.clone();
        if let Some(first_name) = update.first_name {
            next.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = update.last_name {
            next.last_name = last_name.trim().to_string();
        }
        if let Some(phone) = update.phone {
            next.phone = phone.trim().to_string();
        }
        if let Some(income) = update.monthly_income {
            next.monthly_income = income.round_dp(2);
        }
        if let Some(kyc_status) = update.kyc_status {
            next.kyc_status = kyc_status;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        check_fields(
            &next.first_name,
            &next.last_name,
            &next.phone,
            next.monthly_income,
            update.loan_repayment_history,
        )?;
        if let Some(history) = update.loan_repayment_history {
            next = next.with_repayment_history(history);
        }

        if next == current {
            return Ok(current);
        }
        self.repo.commit(vec![WriteOp::UpdateMember(next.clone())])?;

        tracing::info!(
            member_id = %member_id,
            kyc_status = ?next.kyc_status,
            status = ?next.status,
            actor_id = ?context.actor_id,
            "Member updated"
        );
        Ok(next)
    }

    /// Store an already-built member record (seeding)
    pub fn insert(&self, member: Member) -> Result<Member, DomainError> {
        self.repo.commit(vec![WriteOp::InsertMember(member.clone())])?;
        Ok(member)
    }

    pub fn member(&self, member_id: Uuid) -> Result<Member, DomainError> {
        self.repo
            .member(member_id)?
            .ok_or_else(|| DomainError::MemberNotFound(member_id.to_string()))
    }

    pub fn members(&self) -> Result<Vec<Member>, DomainError> {
        Ok(self.repo.members()?)
    }

    pub fn summary(&self, member_id: Uuid) -> Result<MemberSummary, DomainError> {
        let member = self.member(member_id)?;
        let accounts = self.repo.accounts_for_member(member_id)?;
        let active_loans: Vec<Loan> = self
            .repo
            .loans(&LoanFilter {
                member_id: Some(member_id),
                status: None,
            })?
            .into_iter()
            .filter(|l| l.status().is_outstanding())
            .collect();
        let recent_transactions = self.repo.transactions(&TransactionFilter {
            limit: Some(RECENT_TRANSACTIONS),
            ..TransactionFilter::for_member(member_id)
        })?;

        Ok(MemberSummary {
            total_balance: accounts.iter().map(|a| a.balance().value()).sum(),
            total_loan_balance: active_loans.iter().map(|l| l.outstanding_balance()).sum(),
            accounts_count: accounts.len(),
            active_loans_count: active_loans.len(),
            member,
            accounts,
            active_loans,
            recent_transactions,
        })
    }

    pub fn portfolio(&self) -> Result<PortfolioStats, DomainError> {
        let members = self.repo.members()?;
        let loans = self.repo.loans(&LoanFilter::default())?;
        let accounts = self.repo.accounts()?;

        let count = |status: LoanStatus| loans.iter().filter(|l| l.status() == status).count();
        let outstanding = loans.iter().filter(|l| l.status().is_outstanding());

        Ok(PortfolioStats {
            total_members: members.len(),
            active_members: members.iter().filter(|m| m.status == MemberStatus::Active).count(),
            total_deposits: accounts.iter().map(|a| a.balance().value()).sum(),
            total_loan_portfolio: outstanding.clone().map(|l| l.outstanding_balance()).sum(),
            pending_loans_count: count(LoanStatus::Pending),
            active_loans_count: outstanding.count(),
            defaulted_loans_count: count(LoanStatus::Defaulted),
            recent_transactions: self.repo.transactions(&TransactionFilter {
                limit: Some(RECENT_TRANSACTIONS),
                ..TransactionFilter::default()
            })?,
        })
    }
}

fn check_fields(
    first_name: &str,
    last_name: &str,
    phone: &str,
    monthly_income: Decimal,
    loan_repayment_history: Option<u32>,
) -> Result<(), DomainError> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(DomainError::InvalidMember("first and last name are required".to_string()));
    }
    if phone.trim().is_empty() {
        return Err(DomainError::InvalidMember("phone is required".to_string()));
    }
    if monthly_income < Decimal::ZERO {
        return Err(DomainError::InvalidMember("monthly income cannot be negative".to_string()));
    }
    if loan_repayment_history.is_some_and(|h| h > 100) {
        return Err(DomainError::InvalidMember("repayment history must be 0 to 100".to_string()));
    }
    Ok(())
}

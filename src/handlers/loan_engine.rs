//! Loan Engine
//!
//! Owns loan status, outstanding balance and repayment dates. Money
//! movements go through the [`AccountLedger`]; the posting and the loan
//! update are committed together.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::loan::{generate_loan_number, NewLoan};
use crate::aggregate::{
    Aggregate, Channel, Guarantor, Loan, LoanStatus, TransactionType,
};
use crate::domain::{
    compute_schedule, Amount, CreditScorer, DomainError, DomainEvent, MemberProfile,
    OperationContext, Schedule,
};
use crate::notifications::NotificationSink;
use crate::store::{EntityLocks, LoanFilter, MemberDirectory, Repository, StoreError, WriteOp};

use super::{AccountLedger, Decision, GuarantorPledge, LoanApplication, PostingRequest};

/// Attempts at finding a free loan number before giving up
const LOAN_NUMBER_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct LoanEngine {
    repo: Arc<dyn Repository>,
    directory: Arc<dyn MemberDirectory>,
    ledger: AccountLedger,
    locks: Arc<EntityLocks>,
    sink: Arc<dyn NotificationSink>,
}

impl LoanEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        directory: Arc<dyn MemberDirectory>,
        ledger: AccountLedger,
        locks: Arc<EntityLocks>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repo,
            directory,
            ledger,
            locks,
            sink,
        }
    }

    /// Amortized schedule for the given terms
    pub fn compute_schedule(
        &self,
        principal: Decimal,
        annual_rate_percent: Decimal,
        term_months: u32,
    ) -> Result<Schedule, DomainError> {
        compute_schedule(principal, annual_rate_percent, term_months)
    }

    /// Current profile and score of a member
    pub fn credit_score(&self, member_id: Uuid) -> Result<(MemberProfile, u16), DomainError> {
        let profile = self
            .directory
            .profile(member_id)?
            .ok_or_else(|| DomainError::MemberNotFound(member_id.to_string()))?;
        let score = CreditScorer::score(&profile);
        Ok((profile, score))
    }

    // =========================================================================
    // Application and decision
    // =========================================================================

    /// Score the member, price the loan and store it as `Pending`
    pub async fn apply(
        &self,
        application: LoanApplication,
        context: &OperationContext,
    ) -> Result<Loan, DomainError> {
        let (_, credit_score) = self.credit_score(application.member_id)?;

        let loan_type = application.loan_type;
        let interest_rate = loan_type.default_interest_rate();
        let term_months = application
            .term_months
            .unwrap_or_else(|| loan_type.default_term_months());
        let schedule = compute_schedule(application.principal.value(), interest_rate, term_months)?;

        let mut attempt = 0;
        let loan = loop {
            attempt += 1;
            let loan = Loan::application(NewLoan {
                member_id: application.member_id,
                loan_number: self.free_loan_number()?,
                loan_type,
                principal: application.principal,
                interest_rate,
                term_months,
                purpose: application.purpose.clone(),
                schedule,
                credit_score,
            });

            match self.repo.commit(vec![WriteOp::InsertLoan(loan.clone())]) {
                Ok(()) => break loan,
                Err(StoreError::DuplicateReference(number)) if attempt < LOAN_NUMBER_ATTEMPTS => {
                    tracing::warn!(loan_number = %number, attempt, "Loan number taken, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(
            loan_id = %loan.id(),
            member_id = %loan.member_id(),
            loan_number = %loan.loan_number(),
            principal = %loan.principal_amount(),
            credit_score,
            "Loan application received"
        );
        self.publish(&[status_changed(&loan, None)], context);
        Ok(loan)
    }

    /// Approve or reject a pending application. Rejection needs a reason.
    pub async fn decide(
        &self,
        loan_id: Uuid,
        decision: Decision,
        reason: Option<&str>,
        context: &OperationContext,
    ) -> Result<Loan, DomainError> {
        let _guard = self.locks.lock(loan_id).await;
        let loan = self.load_loan(loan_id)?;

        let decided = match decision {
            Decision::Approve => loan.approve(context.actor_id)?,
            Decision::Reject => loan.reject(reason)?,
        };
        self.save(&loan, &decided)?;

        tracing::info!(
            loan_id = %loan_id,
            status = %decided.status(),
            actor_id = ?context.actor_id,
            "Loan decided"
        );
        self.publish(&[status_changed(&decided, Some(loan.status()))], context);
        Ok(decided)
    }

    // =========================================================================
    // Money movements
    // =========================================================================

    /// Pay the principal into the member's designated account and start
    /// the repayment schedule.
    pub async fn disburse(&self, loan_id: Uuid, context: &OperationContext) -> Result<Loan, DomainError> {
        let _guard = self.locks.lock(loan_id).await;
        let loan = self.load_loan(loan_id)?;

        if !loan.status().can_transition_to(LoanStatus::Disbursed) {
            return Err(DomainError::invalid_transition(loan.status(), LoanStatus::Disbursed));
        }

        let account = self.ledger.designated_account(loan.member_id())?;
        let now = Utc::now();
        let disbursed = loan.disburse(account.id(), now)?;
        let active = disbursed.activate()?;

        let posting = PostingRequest::new(
            account.id(),
            TransactionType::LoanDisbursement,
            Amount::new(loan.principal_amount())?,
            Channel::Internal,
        )
        .with_description(format!("Loan {} disbursement", loan.loan_number()));
        let prepared = self.ledger.prepare_posting(posting, context).await?;

        let events = vec![
            status_changed(&disbursed, Some(loan.status())),
            status_changed(&active, Some(disbursed.status())),
        ];
        self.ledger.commit_prepared(
            prepared,
            vec![WriteOp::UpdateLoan {
                loan: active.clone(),
                expected_version: loan.version(),
            }],
            events,
            context,
        )?;

        tracing::info!(
            loan_id = %loan_id,
            account_id = %account.id(),
            amount = %loan.principal_amount(),
            first_repayment = ?active.first_repayment_date(),
            "Loan disbursed"
        );
        Ok(active)
    }

    /// Take a repayment from the loan's account. Completes the loan when the
    /// outstanding balance reaches zero.
    pub async fn repay(
        &self,
        loan_id: Uuid,
        amount: Amount,
        channel: Channel,
        context: &OperationContext,
    ) -> Result<Loan, DomainError> {
        let _guard = self.locks.lock(loan_id).await;
        let loan = self.load_loan(loan_id)?;

        let now = Utc::now();
        let repaid = loan.record_repayment(&amount, now)?;

        let account_id = self.repayment_account(&loan)?;
        let posting = PostingRequest::new(account_id, TransactionType::LoanRepayment, amount, channel)
            .with_description(format!("Loan {} repayment", loan.loan_number()));
        let prepared = self.ledger.prepare_posting(posting, context).await?;

        let mut events = vec![DomainEvent::LoanRepaymentReceived {
            loan_id,
            member_id: loan.member_id(),
            amount: amount.value(),
            outstanding_balance: repaid.outstanding_balance(),
            occurred_at: now,
        }];
        if repaid.status() != loan.status() {
            events.push(status_changed(&repaid, Some(loan.status())));
        }

        self.ledger.commit_prepared(
            prepared,
            vec![WriteOp::UpdateLoan {
                loan: repaid.clone(),
                expected_version: loan.version(),
            }],
            events,
            context,
        )?;

        tracing::info!(
            loan_id = %loan_id,
            amount = %amount,
            outstanding = %repaid.outstanding_balance(),
            status = %repaid.status(),
            "Loan repayment applied"
        );
        Ok(repaid)
    }

    /// Flag an active loan as defaulted
    pub async fn mark_defaulted(&self, loan_id: Uuid, context: &OperationContext) -> Result<Loan, DomainError> {
        let _guard = self.locks.lock(loan_id).await;
        let loan = self.load_loan(loan_id)?;

        let defaulted = loan.mark_defaulted(Utc::now())?;
        self.save(&loan, &defaulted)?;

        tracing::warn!(
            loan_id = %loan_id,
            outstanding = %defaulted.outstanding_balance(),
            actor_id = ?context.actor_id,
            "Loan marked as defaulted"
        );
        self.publish(&[status_changed(&defaulted, Some(loan.status()))], context);
        Ok(defaulted)
    }

    // =========================================================================
    // Guarantors
    // =========================================================================

    /// Record a pledge from another member. The pledged total is not
    /// capped at the principal.
    pub async fn add_guarantor(
        &self,
        loan_id: Uuid,
        pledge: GuarantorPledge,
        context: &OperationContext,
    ) -> Result<Guarantor, DomainError> {
        let _guard = self.locks.lock(loan_id).await;
        let loan = self.load_loan(loan_id)?;

        if !matches!(loan.status(), LoanStatus::Pending | LoanStatus::Approved) {
            return Err(DomainError::InvalidGuarantor(format!(
                "loan {} is {}",
                loan.loan_number(),
                loan.status()
            )));
        }
        if pledge.guarantor_member_id == loan.member_id() {
            return Err(DomainError::InvalidGuarantor(
                "a member cannot guarantee their own loan".to_string(),
            ));
        }
        if self.repo.member(pledge.guarantor_member_id)?.is_none() {
            return Err(DomainError::MemberNotFound(pledge.guarantor_member_id.to_string()));
        }

        let existing = self.repo.guarantors_for_loan(loan_id)?;
        if existing
            .iter()
            .any(|g| g.is_live() && g.guarantor_member_id == pledge.guarantor_member_id)
        {
            return Err(DomainError::InvalidGuarantor(
                "member already guarantees this loan".to_string(),
            ));
        }

        let pledged: Decimal = existing
            .iter()
            .filter(|g| g.is_live())
            .map(|g| g.guaranteed_amount)
            .sum::<Decimal>()
            + pledge.amount.value();
        if pledged > loan.principal_amount() {
            tracing::warn!(
                loan_id = %loan_id,
                pledged = %pledged,
                principal = %loan.principal_amount(),
                "Guaranteed total exceeds principal"
            );
        }

        let guarantor = Guarantor::pledge(loan_id, pledge.guarantor_member_id, pledge.amount);
        self.repo.commit(vec![WriteOp::InsertGuarantor(guarantor.clone())])?;

        tracing::info!(
            loan_id = %loan_id,
            guarantor_id = %guarantor.id,
            amount = %guarantor.guaranteed_amount,
            actor_id = ?context.actor_id,
            "Guarantor added"
        );
        Ok(guarantor)
    }

    /// Accept or decline a pending pledge
    pub async fn decide_guarantor(
        &self,
        guarantor_id: Uuid,
        approve: bool,
        reason: Option<&str>,
        context: &OperationContext,
    ) -> Result<Guarantor, DomainError> {
        let loan_id = self.load_guarantor(guarantor_id)?.loan_id;
        let _guard = self.locks.lock(loan_id).await;

        let guarantor = self.load_guarantor(guarantor_id)?;
        let decided = guarantor.decide(approve, reason, Utc::now())?;
        self.repo.commit(vec![WriteOp::UpdateGuarantor(decided.clone())])?;

        tracing::info!(
            guarantor_id = %guarantor_id,
            status = %decided.status,
            actor_id = ?context.actor_id,
            "Guarantor decided"
        );
        Ok(decided)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn loan(&self, loan_id: Uuid) -> Result<Loan, DomainError> {
        self.load_loan(loan_id)
    }

    pub fn loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, DomainError> {
        Ok(self.repo.loans(filter)?)
    }

    pub fn guarantors(&self, loan_id: Uuid) -> Result<Vec<Guarantor>, DomainError> {
        self.load_loan(loan_id)?;
        Ok(self.repo.guarantors_for_loan(loan_id)?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn load_loan(&self, loan_id: Uuid) -> Result<Loan, DomainError> {
        self.repo
            .loan(loan_id)?
            .ok_or_else(|| DomainError::LoanNotFound(loan_id.to_string()))
    }

    fn load_guarantor(&self, guarantor_id: Uuid) -> Result<Guarantor, DomainError> {
        self.repo
            .guarantor(guarantor_id)?
            .ok_or_else(|| DomainError::GuarantorNotFound(guarantor_id.to_string()))
    }

    fn free_loan_number(&self) -> Result<String, DomainError> {
        loop {
            let number = generate_loan_number();
            if !self.repo.loan_number_exists(&number)? {
                return Ok(number);
            }
        }
    }

    /// Account disbursed into while it is still open, else the designated one
    fn repayment_account(&self, loan: &Loan) -> Result<Uuid, DomainError> {
        if let Some(account_id) = loan.disbursement_account_id() {
            if let Some(account) = self.repo.account(account_id)? {
                if !account.is_closed() {
                    return Ok(account_id);
                }
            }
        }
        Ok(self.ledger.designated_account(loan.member_id())?.id())
    }

    fn save(&self, before: &Loan, after: &Loan) -> Result<(), DomainError> {
        self.repo.commit(vec![WriteOp::UpdateLoan {
            loan: after.clone(),
            expected_version: before.version(),
        }])?;
        Ok(())
    }

    fn publish(&self, events: &[DomainEvent], context: &OperationContext) {
        for event in events {
            self.sink.publish(event, context);
        }
    }
}

fn status_changed(loan: &Loan, from: Option<LoanStatus>) -> DomainEvent {
    DomainEvent::LoanStatusChanged {
        loan_id: loan.id(),
        member_id: loan.member_id(),
        loan_number: loan.loan_number().to_string(),
        from,
        to: loan.status(),
        principal: loan.principal_amount(),
        occurred_at: Utc::now(),
    }
}

//! Account Ledger
//!
//! The only writer of account balances. Every balance change is committed
//! together with its immutable transaction line in one repository call,
//! while the account's lock is held.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregate::transaction::NewTransaction;
use crate::aggregate::{
    Account, AccountStatus, AccountType, Aggregate, Channel, Direction, Transaction,
    TransactionStatus, TransactionType,
};
use crate::domain::{round_money, Amount, DomainError, DomainEvent, OperationContext};
use crate::notifications::NotificationSink;
use crate::store::{EntityGuard, EntityLocks, Repository, TransactionFilter, WriteOp};

use super::{PostingRequest, TransferCommand, TransferResult};

// =========================================================================
// M-PESA channel rules
// =========================================================================

/// Smallest amount accepted over M-PESA
pub const MPESA_MINIMUM: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
/// Per account, per UTC day
pub const MPESA_DAILY_WITHDRAWAL_LIMIT: Decimal = Decimal::from_parts(150_000, 0, 0, false, 0);
pub const MPESA_FEE: Decimal = Decimal::from_parts(3000, 0, 0, false, 2);
/// Deposits above this pay the fee
pub const MPESA_FREE_DEPOSIT_LIMIT: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

// =========================================================================
// Posting batch
// =========================================================================

/// Ops and events collected for one commit
#[derive(Debug, Default)]
pub(crate) struct PostingBatch {
    ops: Vec<WriteOp>,
    events: Vec<DomainEvent>,
    references: HashSet<String>,
}

impl PostingBatch {
    pub(crate) fn push_op(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub(crate) fn push_event(&mut self, event: DomainEvent) {
        self.events.push(event);
    }
}

/// A validated posting waiting to be committed, possibly alongside other
/// writes. Holds the account lock until committed or dropped.
pub struct PreparedPosting {
    batch: PostingBatch,
    transaction: Transaction,
    _guard: EntityGuard,
}

impl PreparedPosting {
    /// The main line this posting will write
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }
}

// =========================================================================
// AccountLedger
// =========================================================================

#[derive(Clone)]
pub struct AccountLedger {
    repo: Arc<dyn Repository>,
    locks: Arc<EntityLocks>,
    sink: Arc<dyn NotificationSink>,
}

impl AccountLedger {
    pub fn new(
        repo: Arc<dyn Repository>,
        locks: Arc<EntityLocks>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { repo, locks, sink }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Open an account with a zero balance. Without an explicit rate the
    /// product's standard rate applies.
    pub async fn open_account(
        &self,
        member_id: Uuid,
        account_type: AccountType,
        interest_rate: Option<Decimal>,
        context: &OperationContext,
    ) -> Result<Account, DomainError> {
        if self.repo.member(member_id)?.is_none() {
            return Err(DomainError::MemberNotFound(member_id.to_string()));
        }

        let rate = interest_rate
            .or_else(|| account_type.default_interest_rate())
            .ok_or_else(|| {
                DomainError::InvalidInterestRate(format!("{} accounts need an explicit rate", account_type))
            })?;
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(DomainError::InvalidInterestRate(rate.to_string()));
        }

        let account = Account::open(member_id, account_type, rate);
        self.repo.commit(vec![WriteOp::InsertAccount(account.clone())])?;

        tracing::info!(
            account_id = %account.id(),
            member_id = %member_id,
            account_type = %account_type,
            actor_id = ?context.actor_id,
            "Account opened"
        );
        Ok(account)
    }

    /// Close an account that holds no funds
    pub async fn close_account(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Account, DomainError> {
        let _guard = self.locks.lock(account_id).await;
        let account = self.load_account(account_id)?;

        if account.is_closed() {
            return Err(DomainError::AccountClosed(account_id.to_string()));
        }
        if !account.balance().value().is_zero() {
            return Err(DomainError::AccountNotEmpty(account_id.to_string()));
        }

        let closed = account.with_status(AccountStatus::Closed);
        self.repo.commit(vec![WriteOp::UpdateAccount {
            account: closed.clone(),
            expected_version: account.version(),
        }])?;

        tracing::info!(account_id = %account_id, actor_id = ?context.actor_id, "Account closed");
        Ok(closed)
    }

    /// The account loans are paid into: the member's first active savings account
    pub fn designated_account(&self, member_id: Uuid) -> Result<Account, DomainError> {
        self.repo
            .accounts_for_member(member_id)?
            .into_iter()
            .find(|a| a.account_type() == AccountType::Savings && a.status() == AccountStatus::Active)
            .ok_or_else(|| {
                DomainError::AccountNotFound(format!("no active savings account for member {}", member_id))
            })
    }

    // =========================================================================
    // Postings
    // =========================================================================

    /// Apply a single-account transaction.
    ///
    /// Returns the main line: `Completed`, or `Pending` for M-PESA deposits
    /// and withdrawals. Any channel fee is posted in the same commit.
    pub async fn apply_transaction(
        &self,
        request: PostingRequest,
        context: &OperationContext,
    ) -> Result<Transaction, DomainError> {
        let prepared = self.prepare_posting(request, context).await?;
        self.commit_prepared(prepared, Vec::new(), Vec::new(), context)
    }

    /// Validate a posting and stage its writes under the account lock
    /// without committing.
    pub async fn prepare_posting(
        &self,
        request: PostingRequest,
        context: &OperationContext,
    ) -> Result<PreparedPosting, DomainError> {
        let direction = request.transaction_type.direction().ok_or_else(|| {
            DomainError::UnsupportedTransactionType(format!(
                "{} must go through transfer",
                request.transaction_type
            ))
        })?;

        let guard = self.locks.lock(request.account_id).await;
        let account = self.load_account(request.account_id)?;

        let channel_rules = request.channel == Channel::Mpesa
            && matches!(
                request.transaction_type,
                TransactionType::Deposit | TransactionType::Withdrawal
            );
        let fee = if channel_rules {
            self.mpesa_fee(&account, request.transaction_type, &request.amount)?
        } else {
            None
        };

        let pending = channel_rules && request.channel.settles_asynchronously();
        let status = if pending {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Completed
        };
        // a pending line and its fee settle together
        let correlation = request
            .correlation
            .or_else(|| fee.map(|_| format!("MP{}", Uuid::new_v4().simple())))
            .or_else(|| pending.then(|| format!("MP{}", Uuid::new_v4().simple())));

        let mut batch = PostingBatch::default();
        let (account, transaction) = self.stage(
            &mut batch,
            &account,
            NewTransaction {
                transaction_type: request.transaction_type,
                direction,
                amount: request.amount,
                description: request.description,
                channel: request.channel,
                status,
                processed_by: context.actor_id,
                correlation: correlation.clone(),
                reverses: None,
            },
        )?;

        if let Some(fee) = fee {
            self.stage(
                &mut batch,
                &account,
                NewTransaction {
                    transaction_type: TransactionType::Fee,
                    direction: Direction::Debit,
                    amount: fee,
                    description: format!("M-PESA {} fee", request.transaction_type),
                    channel: request.channel,
                    status,
                    processed_by: context.actor_id,
                    correlation,
                    reverses: None,
                },
            )?;
        }

        Ok(PreparedPosting {
            batch,
            transaction,
            _guard: guard,
        })
    }

    /// Commit a prepared posting together with extra writes and events.
    /// Either everything lands or nothing does.
    pub fn commit_prepared(
        &self,
        prepared: PreparedPosting,
        extra_ops: Vec<WriteOp>,
        extra_events: Vec<DomainEvent>,
        context: &OperationContext,
    ) -> Result<Transaction, DomainError> {
        let PreparedPosting {
            mut batch,
            transaction,
            _guard,
        } = prepared;

        batch.ops.extend(extra_ops);
        batch.events.extend(extra_events);
        self.commit(batch, context)?;

        tracing::info!(
            account_id = %transaction.account_id(),
            transaction_id = %transaction.id(),
            transaction_type = %transaction.transaction_type(),
            amount = %transaction.amount(),
            balance_after = %transaction.balance_after(),
            status = %transaction.status(),
            "Transaction posted"
        );
        Ok(transaction)
    }

    /// Move funds between two accounts as two legs sharing one correlation
    /// reference, committed atomically.
    pub async fn transfer(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<TransferResult, DomainError> {
        if command.from_account_id == command.to_account_id {
            return Err(DomainError::SameAccountTransfer);
        }

        let _guards = self
            .locks
            .lock_many(&[command.from_account_id, command.to_account_id])
            .await;
        let from = self.load_account(command.from_account_id)?;
        let to = self.load_account(command.to_account_id)?;

        let correlation = format!("TRF{}", Uuid::new_v4().simple());
        let description = command.description.unwrap_or_else(|| "Transfer".to_string());

        let mut batch = PostingBatch::default();
        let (_, debit) = self.stage(
            &mut batch,
            &from,
            NewTransaction {
                transaction_type: TransactionType::Transfer,
                direction: Direction::Debit,
                amount: command.amount,
                description: format!("{} to {}", description, to.account_number()),
                channel: command.channel,
                status: TransactionStatus::Completed,
                processed_by: context.actor_id,
                correlation: Some(correlation.clone()),
                reverses: None,
            },
        )?;
        let (_, credit) = self.stage(
            &mut batch,
            &to,
            NewTransaction {
                transaction_type: TransactionType::Transfer,
                direction: Direction::Credit,
                amount: command.amount,
                description: format!("{} from {}", description, from.account_number()),
                channel: command.channel,
                status: TransactionStatus::Completed,
                processed_by: context.actor_id,
                correlation: Some(correlation.clone()),
                reverses: None,
            },
        )?;

        self.commit(batch, context)?;

        tracing::info!(
            from_account_id = %from.id(),
            to_account_id = %to.id(),
            amount = %command.amount,
            correlation = %correlation,
            "Transfer committed"
        );

        Ok(TransferResult {
            correlation,
            debit,
            credit,
        })
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Settle a pending line (and its fee). Failure posts compensating
    /// entries that restore the balance.
    pub async fn confirm_transaction(
        &self,
        transaction_id: Uuid,
        success: bool,
        context: &OperationContext,
    ) -> Result<Transaction, DomainError> {
        let account_id = self.load_transaction(transaction_id)?.account_id();
        let _guard = self.locks.lock(account_id).await;

        // re-read under the lock
        let txn = self.load_transaction(transaction_id)?;
        if txn.status() != TransactionStatus::Pending {
            return Err(DomainError::InvalidTransactionState {
                id: transaction_id.to_string(),
                status: txn.status().to_string(),
                action: "confirm",
            });
        }

        // newest first, so a fee is undone before its posting
        let group = match txn.correlation() {
            Some(correlation) => self.repo.transactions(&TransactionFilter {
                account_id: Some(account_id),
                status: Some(TransactionStatus::Pending),
                correlation: Some(correlation.to_string()),
                ..TransactionFilter::default()
            })?,
            None => vec![txn.clone()],
        };

        let new_status = if success {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };
        let mut batch = PostingBatch::default();
        let mut account = self.load_account(account_id)?;
        let now = Utc::now();

        for line in group {
            if !success {
                let (next, _) = self.stage_compensation(&mut batch, &account, &line, context)?;
                account = next;
            }
            batch.push_op(WriteOp::UpdateTransaction(line.with_status(new_status)));
            batch.push_event(DomainEvent::TransactionSettled {
                transaction_id: line.id(),
                member_id: line.member_id(),
                status: new_status,
                occurred_at: now,
            });
        }

        self.commit(batch, context)?;

        if success {
            tracing::info!(transaction_id = %transaction_id, "Pending transaction confirmed");
        } else {
            tracing::warn!(transaction_id = %transaction_id, "Pending transaction failed and was compensated");
        }
        Ok(txn.with_status(new_status))
    }

    /// Reverse a completed line with a compensating entry. Transfer legs
    /// are reversed together.
    pub async fn reverse_transaction(
        &self,
        transaction_id: Uuid,
        context: &OperationContext,
    ) -> Result<Transaction, DomainError> {
        let original = self.load_transaction(transaction_id)?;
        self.check_reversible(&original)?;

        let group = match (original.transaction_type(), original.correlation()) {
            (TransactionType::Transfer, Some(correlation)) => self
                .repo
                .transactions(&TransactionFilter {
                    correlation: Some(correlation.to_string()),
                    ..TransactionFilter::default()
                })?
                .into_iter()
                .filter(|t| t.reverses().is_none())
                .collect(),
            _ => vec![original.clone()],
        };

        let account_ids: Vec<Uuid> = group.iter().map(|t| t.account_id()).collect();
        let _guards = self.locks.lock_many(&account_ids).await;

        let mut batch = PostingBatch::default();
        let mut reversed_original = None;
        let now = Utc::now();

        for line in group {
            // re-read under the lock
            let line = self.load_transaction(line.id())?;
            self.check_reversible(&line)?;

            let account = self.load_account(line.account_id())?;
            let (_, compensation) = self.stage_compensation(&mut batch, &account, &line, context)?;
            let reversed = line.with_status(TransactionStatus::Reversed);
            batch.push_op(WriteOp::UpdateTransaction(reversed.clone()));
            batch.push_event(DomainEvent::TransactionReversed {
                transaction_id: line.id(),
                compensating_id: compensation.id(),
                member_id: line.member_id(),
                amount: line.amount(),
                occurred_at: now,
            });

            if line.id() == transaction_id {
                reversed_original = Some(reversed);
            }
        }

        self.commit(batch, context)?;
        tracing::info!(
            transaction_id = %transaction_id,
            actor_id = ?context.actor_id,
            "Transaction reversed"
        );

        reversed_original.ok_or_else(|| DomainError::TransactionNotFound(transaction_id.to_string()))
    }

    fn check_reversible(&self, txn: &Transaction) -> Result<(), DomainError> {
        let refused = |action| DomainError::InvalidTransactionState {
            id: txn.id().to_string(),
            status: txn.status().to_string(),
            action,
        };

        if txn.status() != TransactionStatus::Completed {
            return Err(refused("reverse"));
        }
        if txn.reverses().is_some() {
            return Err(refused("reverse a compensating entry"));
        }
        if matches!(
            txn.transaction_type(),
            TransactionType::LoanDisbursement | TransactionType::LoanRepayment
        ) {
            return Err(refused("reverse a loan posting"));
        }
        Ok(())
    }

    // =========================================================================
    // Interest
    // =========================================================================

    /// Credit one month of interest: `balance × rate / 100 / 12`, rounded.
    /// Returns `None` when that rounds to zero.
    pub async fn accrue_monthly_interest(
        &self,
        account_id: Uuid,
        context: &OperationContext,
    ) -> Result<Option<Transaction>, DomainError> {
        let guard = self.locks.lock(account_id).await;
        let account = self.load_account(account_id)?;

        let interest = monthly_interest(account.balance().value(), account.interest_rate());
        let Ok(amount) = Amount::new(interest) else {
            tracing::debug!(account_id = %account_id, "No interest due");
            return Ok(None);
        };

        let mut batch = PostingBatch::default();
        let (_, transaction) = self.stage(
            &mut batch,
            &account,
            NewTransaction {
                transaction_type: TransactionType::Interest,
                direction: Direction::Credit,
                amount,
                description: format!("Monthly interest at {}%", account.interest_rate()),
                channel: Channel::System,
                status: TransactionStatus::Completed,
                processed_by: context.actor_id,
                correlation: None,
                reverses: None,
            },
        )?;

        let prepared = PreparedPosting {
            batch,
            transaction,
            _guard: guard,
        };
        self.commit_prepared(prepared, Vec::new(), Vec::new(), context)
            .map(Some)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn load_account(&self, account_id: Uuid) -> Result<Account, DomainError> {
        self.repo
            .account(account_id)?
            .ok_or_else(|| DomainError::AccountNotFound(account_id.to_string()))
    }

    fn load_transaction(&self, transaction_id: Uuid) -> Result<Transaction, DomainError> {
        self.repo
            .transaction(transaction_id)?
            .ok_or_else(|| DomainError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Plan one line against `account`, add its writes to the batch and
    /// return the account as it will be after the commit.
    fn stage(
        &self,
        batch: &mut PostingBatch,
        account: &Account,
        new: NewTransaction,
    ) -> Result<(Account, Transaction), DomainError> {
        // compensations always run against the raw balance
        let held = match new.direction {
            Direction::Debit if new.reverses.is_none() => self.uncleared_credits(account.id())?,
            _ => Decimal::ZERO,
        };
        let balance = account.plan_posting_with_held(new.direction, &new.amount, held)?;
        let mut transaction = Transaction::record(account, balance.value(), new);
        while batch.references.contains(transaction.reference())
            || self.repo.reference_exists(transaction.reference())?
        {
            transaction = transaction.with_new_reference();
        }
        batch.references.insert(transaction.reference().to_string());

        let updated = account.with_balance(balance);
        batch.push_op(WriteOp::UpdateAccount {
            account: updated.clone(),
            expected_version: account.version(),
        });
        batch.push_op(WriteOp::InsertTransaction(transaction.clone()));
        batch.push_event(DomainEvent::TransactionPosted {
            transaction_id: transaction.id(),
            account_id: account.id(),
            member_id: account.member_id(),
            transaction_type: transaction.transaction_type(),
            amount: transaction.amount(),
            balance_after: transaction.balance_after(),
            status: transaction.status(),
            occurred_at: transaction.created_at(),
        });

        Ok((updated, transaction))
    }

    /// Opposite-direction line of the same type pointing at `original`
    fn stage_compensation(
        &self,
        batch: &mut PostingBatch,
        account: &Account,
        original: &Transaction,
        context: &OperationContext,
    ) -> Result<(Account, Transaction), DomainError> {
        let amount = Amount::new(original.amount())?;
        self.stage(
            batch,
            account,
            NewTransaction {
                transaction_type: original.transaction_type(),
                direction: original.direction().opposite(),
                amount,
                description: format!("Reversal of {}", original.reference()),
                channel: original.channel(),
                status: TransactionStatus::Completed,
                processed_by: context.actor_id,
                correlation: original.correlation().map(str::to_string),
                reverses: Some(original.id()),
            },
        )
    }

    /// Enforce the channel minimum and daily cap; return the fee, if any
    fn mpesa_fee(
        &self,
        account: &Account,
        transaction_type: TransactionType,
        amount: &Amount,
    ) -> Result<Option<Amount>, DomainError> {
        if amount.value() < MPESA_MINIMUM {
            return Err(DomainError::BelowChannelMinimum {
                channel: Channel::Mpesa.to_string(),
                amount: amount.value(),
                minimum: MPESA_MINIMUM,
            });
        }

        let fee = Amount::new(MPESA_FEE)?;
        match transaction_type {
            TransactionType::Withdrawal => {
                let used = self.mpesa_withdrawn_today(account.id(), Utc::now())?;
                if used + amount.value() > MPESA_DAILY_WITHDRAWAL_LIMIT {
                    return Err(DomainError::DailyLimitExceeded {
                        channel: Channel::Mpesa.to_string(),
                        limit: MPESA_DAILY_WITHDRAWAL_LIMIT,
                        used,
                    });
                }
                Ok(Some(fee))
            }
            TransactionType::Deposit if amount.value() > MPESA_FREE_DEPOSIT_LIMIT => Ok(Some(fee)),
            _ => Ok(None),
        }
    }

    /// Committed credits still awaiting settlement
    fn uncleared_credits(&self, account_id: Uuid) -> Result<Decimal, DomainError> {
        let lines = self.repo.transactions(&TransactionFilter {
            status: Some(TransactionStatus::Pending),
            ..TransactionFilter::for_account(account_id)
        })?;

        Ok(lines
            .iter()
            .filter(|t| t.direction() == Direction::Credit)
            .map(|t| t.amount())
            .sum())
    }

    fn mpesa_withdrawn_today(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<Decimal, DomainError> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        let lines = self.repo.transactions(&TransactionFilter {
            created_after: Some(midnight),
            ..TransactionFilter::for_account(account_id)
        })?;

        Ok(lines
            .iter()
            .filter(|t| {
                t.channel() == Channel::Mpesa
                    && t.transaction_type() == TransactionType::Withdrawal
                    && t.reverses().is_none()
                    && t.status().is_effective()
            })
            .map(|t| t.amount())
            .sum())
    }

    fn commit(&self, batch: PostingBatch, context: &OperationContext) -> Result<(), DomainError> {
        let PostingBatch { ops, events, .. } = batch;
        tracing::debug!(ops = ops.len(), events = events.len(), "Committing ledger batch");

        self.repo.commit(ops)?;
        for event in &events {
            self.sink.publish(event, context);
        }
        Ok(())
    }
}

/// One month of interest on `balance` at `annual_rate` percent
pub fn monthly_interest(balance: Decimal, annual_rate: Decimal) -> Decimal {
    round_money(balance * annual_rate / Decimal::ONE_HUNDRED / Decimal::from(12))
}

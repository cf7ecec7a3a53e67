//! Service-level tests for the ledger and loan engine
//!
//! Run against the in-memory store, so no external services are needed.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Months, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    use crate::aggregate::{
        Account, AccountStatus, AccountType, Aggregate, Channel, GuarantorStatus, KycStatus,
        LoanStatus, LoanType, Member, TransactionStatus, TransactionType,
    };
    use crate::domain::{Amount, DomainError, OperationContext, Role};
    use crate::handlers::{
        Decision, GuarantorPledge, LoanApplication, MemberUpdate, PostingRequest, RegisterMember,
        Services, TransferCommand,
    };
    use crate::store::{Repository, TransactionFilter};

    fn staff() -> OperationContext {
        OperationContext::new()
            .with_actor(Uuid::new_v4())
            .with_role(Role::Staff)
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn register(services: &Services, first_name: &str) -> Member {
        services
            .members
            .register(
                RegisterMember {
                    first_name: first_name.to_string(),
                    last_name: "Otieno".to_string(),
                    phone: "+254700000000".to_string(),
                    monthly_income: dec!(60000),
                    loan_repayment_history: Some(80),
                },
                &staff(),
            )
            .unwrap()
    }

    /// Member with one savings account holding `balance`
    async fn saver(services: &Services, balance: Decimal) -> (Member, Account) {
        let member = register(services, "Achieng");
        let account = services
            .ledger
            .open_account(member.id, AccountType::Savings, None, &staff())
            .await
            .unwrap();
        if balance > Decimal::ZERO {
            services
                .ledger
                .apply_transaction(
                    PostingRequest::deposit(account.id(), amount(balance), Channel::Cash),
                    &staff(),
                )
                .await
                .unwrap();
        }
        (member, account)
    }

    fn balance_of(services: &Services, account_id: Uuid) -> Decimal {
        services.store.account(account_id).unwrap().unwrap().balance().value()
    }

    fn lines_of(services: &Services, account_id: Uuid) -> usize {
        services
            .store
            .transactions(&TransactionFilter::for_account(account_id))
            .unwrap()
            .len()
    }

    // =========================================================================
    // Postings
    // =========================================================================

    #[tokio::test]
    async fn test_deposit_then_withdrawal_round_trip() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(2500)).await;
        let ctx = staff();

        let deposit = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(700.25)), Channel::Cash), &ctx)
            .await
            .unwrap();
        let withdrawal = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(700.25)), Channel::Cash),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(balance_of(&services, account.id()), dec!(2500));
        assert_eq!(deposit.balance_after(), withdrawal.balance_before());
        assert_eq!(deposit.balance_before(), dec!(2500));
        assert_eq!(withdrawal.balance_after(), dec!(2500));
        assert_eq!(deposit.status(), TransactionStatus::Completed);
        assert_eq!(withdrawal.processed_by(), ctx.actor_id);
        assert!(deposit.is_balanced() && withdrawal.is_balanced());
    }

    #[tokio::test]
    async fn test_withdrawal_over_balance_changes_nothing() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(3000)).await;

        let result = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(5000)), Channel::Cash),
                &staff(),
            )
            .await;

        assert!(matches!(result, Err(DomainError::InsufficientFunds { .. })));
        assert_eq!(balance_of(&services, account.id()), dec!(3000));
        assert_eq!(lines_of(&services, account.id()), 1);
    }

    #[tokio::test]
    async fn test_posting_to_unknown_or_closed_account() {
        let services = Services::in_memory();
        let (member, _) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let missing = services
            .ledger
            .apply_transaction(PostingRequest::deposit(Uuid::new_v4(), amount(dec!(10)), Channel::Cash), &ctx)
            .await;
        assert!(matches!(missing, Err(DomainError::AccountNotFound(_))));

        let emergency = services
            .ledger
            .open_account(member.id, AccountType::Emergency, None, &ctx)
            .await
            .unwrap();
        let closed = assert_ok!(services.ledger.close_account(emergency.id(), &ctx).await);
        assert_eq!(closed.status(), AccountStatus::Closed);

        let result = services
            .ledger
            .apply_transaction(PostingRequest::deposit(emergency.id(), amount(dec!(10)), Channel::Cash), &ctx)
            .await;
        assert!(matches!(result, Err(DomainError::AccountClosed(_))));
    }

    #[tokio::test]
    async fn test_close_account_requires_zero_balance() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(50)).await;

        let result = services.ledger.close_account(account.id(), &staff()).await;
        assert!(matches!(result, Err(DomainError::AccountNotEmpty(_))));
    }

    #[tokio::test]
    async fn test_transfer_type_is_not_a_single_posting() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(500)).await;

        let request = PostingRequest::new(account.id(), TransactionType::Transfer, amount(dec!(10)), Channel::Internal);
        let result = services.ledger.apply_transaction(request, &staff()).await;
        assert!(matches!(result, Err(DomainError::UnsupportedTransactionType(_))));
    }

    #[tokio::test]
    async fn test_open_account_rates() {
        let services = Services::in_memory();
        let member = register(&services, "Kamau");
        let ctx = staff();

        let shares = services
            .ledger
            .open_account(member.id, AccountType::Shares, None, &ctx)
            .await
            .unwrap();
        assert_eq!(shares.interest_rate(), dec!(8.00));
        assert!(shares.account_number().starts_with("SH"));

        let no_rate = services
            .ledger
            .open_account(member.id, AccountType::FixedDeposit, None, &ctx)
            .await;
        assert!(matches!(no_rate, Err(DomainError::InvalidInterestRate(_))));

        let fixed = services
            .ledger
            .open_account(member.id, AccountType::FixedDeposit, Some(dec!(9.5)), &ctx)
            .await
            .unwrap();
        assert_eq!(fixed.interest_rate(), dec!(9.5));

        let unknown = services
            .ledger
            .open_account(Uuid::new_v4(), AccountType::Savings, None, &ctx)
            .await;
        assert!(matches!(unknown, Err(DomainError::MemberNotFound(_))));
    }

    #[tokio::test]
    async fn test_monthly_interest_accrual() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(12000)).await;

        let interest = services
            .ledger
            .accrue_monthly_interest(account.id(), &OperationContext::system())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(interest.amount(), dec!(65.00));
        assert_eq!(interest.channel(), Channel::System);
        assert_eq!(interest.transaction_type(), TransactionType::Interest);
        assert_eq!(balance_of(&services, account.id()), dec!(12065.00));

        let (_, empty) = saver(&services, dec!(0)).await;
        let nothing = services
            .ledger
            .accrue_monthly_interest(empty.id(), &OperationContext::system())
            .await
            .unwrap();
        assert!(nothing.is_none());
    }

    // =========================================================================
    // M-PESA channel
    // =========================================================================

    #[tokio::test]
    async fn test_mpesa_minimum() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(1000)).await;

        let result = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(50)), Channel::Mpesa), &staff())
            .await;
        assert!(matches!(result, Err(DomainError::BelowChannelMinimum { .. })));
        assert_eq!(lines_of(&services, account.id()), 1);
    }

    #[tokio::test]
    async fn test_mpesa_withdrawal_is_pending_with_fee() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(10000)).await;
        let ctx = staff();

        let withdrawal = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(1000)), Channel::Mpesa),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(withdrawal.status(), TransactionStatus::Pending);
        assert_eq!(balance_of(&services, account.id()), dec!(8970.00));

        let pending = services
            .store
            .transactions(&TransactionFilter {
                status: Some(TransactionStatus::Pending),
                ..TransactionFilter::for_account(account.id())
            })
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .any(|t| t.transaction_type() == TransactionType::Fee && t.amount() == dec!(30.00)));

        let confirmed = services
            .ledger
            .confirm_transaction(withdrawal.id(), true, &ctx)
            .await
            .unwrap();
        assert_eq!(confirmed.status(), TransactionStatus::Completed);

        let still_pending = services
            .store
            .transactions(&TransactionFilter {
                status: Some(TransactionStatus::Pending),
                ..TransactionFilter::for_account(account.id())
            })
            .unwrap();
        assert!(still_pending.is_empty());
        assert_eq!(balance_of(&services, account.id()), dec!(8970.00));
    }

    #[tokio::test]
    async fn test_failed_mpesa_settlement_restores_balance() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(10000)).await;
        let ctx = staff();

        let withdrawal = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(1000)), Channel::Mpesa),
                &ctx,
            )
            .await
            .unwrap();

        let failed = services
            .ledger
            .confirm_transaction(withdrawal.id(), false, &ctx)
            .await
            .unwrap();
        assert_eq!(failed.status(), TransactionStatus::Failed);
        assert_eq!(balance_of(&services, account.id()), dec!(10000.00));

        let lines = services
            .store
            .transactions(&TransactionFilter::for_account(account.id()))
            .unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|t| t.reverses().is_some()).count(), 2);
        assert_eq!(
            lines.iter().filter(|t| t.status() == TransactionStatus::Failed).count(),
            2
        );

        let again = services.ledger.confirm_transaction(withdrawal.id(), true, &ctx).await;
        assert!(matches!(again, Err(DomainError::InvalidTransactionState { .. })));
    }

    #[tokio::test]
    async fn test_pending_mpesa_credit_cannot_be_spent() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let deposit = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(1000)), Channel::Mpesa), &ctx)
            .await
            .unwrap();
        assert_eq!(deposit.status(), TransactionStatus::Pending);
        assert_eq!(balance_of(&services, account.id()), dec!(1000));

        let spend = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(1000)), Channel::Cash),
                &ctx,
            )
            .await;
        assert!(matches!(
            spend,
            Err(DomainError::InsufficientFunds { available, .. }) if available == Decimal::ZERO
        ));

        let other = register(&services, "Wanjiru");
        let target = services
            .ledger
            .open_account(other.id, AccountType::Savings, None, &ctx)
            .await
            .unwrap();
        assert_err!(
            services
                .ledger
                .transfer(
                    TransferCommand {
                        from_account_id: account.id(),
                        to_account_id: target.id(),
                        amount: amount(dec!(500)),
                        channel: Channel::Cash,
                        description: None,
                    },
                    &ctx,
                )
                .await
        );

        let failed = services
            .ledger
            .confirm_transaction(deposit.id(), false, &ctx)
            .await
            .unwrap();
        assert_eq!(failed.status(), TransactionStatus::Failed);
        assert_eq!(balance_of(&services, account.id()), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_settled_mpesa_credit_becomes_spendable() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let deposit = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(1000)), Channel::Mpesa), &ctx)
            .await
            .unwrap();
        assert_ok!(services.ledger.confirm_transaction(deposit.id(), true, &ctx).await);

        let spent = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(1000)), Channel::Cash),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(spent.balance_after(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_mpesa_daily_withdrawal_limit() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(300000)).await;
        let ctx = staff();

        assert_ok!(
            services
                .ledger
                .apply_transaction(
                    PostingRequest::withdrawal(account.id(), amount(dec!(100000)), Channel::Mpesa),
                    &ctx,
                )
                .await
        );

        let over = services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(60000)), Channel::Mpesa),
                &ctx,
            )
            .await;
        assert!(matches!(over, Err(DomainError::DailyLimitExceeded { .. })));

        // cash is not capped
        assert_ok!(
            services
                .ledger
                .apply_transaction(
                    PostingRequest::withdrawal(account.id(), amount(dec!(60000)), Channel::Cash),
                    &ctx,
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_mpesa_deposit_fee_threshold() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(0)).await;
        let ctx = staff();

        services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(5000)), Channel::Mpesa), &ctx)
            .await
            .unwrap();
        assert_eq!(balance_of(&services, account.id()), dec!(5000));

        services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(20000)), Channel::Mpesa), &ctx)
            .await
            .unwrap();
        assert_eq!(balance_of(&services, account.id()), dec!(24970.00));
        assert_eq!(lines_of(&services, account.id()), 3);
    }

    // =========================================================================
    // Transfers and reversals
    // =========================================================================

    #[tokio::test]
    async fn test_transfer_moves_funds_atomically() {
        let services = Services::in_memory();
        let (_, from) = saver(&services, dec!(5000)).await;
        let (_, to) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let result = services
            .ledger
            .transfer(TransferCommand::new(from.id(), to.id(), amount(dec!(2000))), &ctx)
            .await
            .unwrap();

        assert_eq!(balance_of(&services, from.id()), dec!(3000));
        assert_eq!(balance_of(&services, to.id()), dec!(2000));
        assert_eq!(result.debit.correlation(), Some(result.correlation.as_str()));
        assert_eq!(result.credit.correlation(), Some(result.correlation.as_str()));

        let too_much = services
            .ledger
            .transfer(TransferCommand::new(from.id(), to.id(), amount(dec!(10000))), &ctx)
            .await;
        assert!(matches!(too_much, Err(DomainError::InsufficientFunds { .. })));
        assert_eq!(balance_of(&services, from.id()), dec!(3000));
        assert_eq!(balance_of(&services, to.id()), dec!(2000));
        assert_eq!(lines_of(&services, to.id()), 1);

        let same = services
            .ledger
            .transfer(TransferCommand::new(from.id(), from.id(), amount(dec!(1))), &ctx)
            .await;
        assert_eq!(same.unwrap_err(), DomainError::SameAccountTransfer);
    }

    #[tokio::test]
    async fn test_reverse_deposit() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let deposit = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(1000)), Channel::Cash), &ctx)
            .await
            .unwrap();

        let reversed = services.ledger.reverse_transaction(deposit.id(), &ctx).await.unwrap();
        assert_eq!(reversed.status(), TransactionStatus::Reversed);
        assert_eq!(balance_of(&services, account.id()), dec!(0));

        let compensation = services
            .store
            .transactions(&TransactionFilter::for_account(account.id()))
            .unwrap()
            .into_iter()
            .find(|t| t.reverses() == Some(deposit.id()))
            .unwrap();
        assert_eq!(compensation.direction(), deposit.direction().opposite());
        assert_eq!(compensation.transaction_type(), TransactionType::Deposit);

        let twice = services.ledger.reverse_transaction(deposit.id(), &ctx).await;
        assert!(matches!(twice, Err(DomainError::InvalidTransactionState { .. })));

        let of_compensation = services.ledger.reverse_transaction(compensation.id(), &ctx).await;
        assert!(matches!(of_compensation, Err(DomainError::InvalidTransactionState { .. })));
    }

    #[tokio::test]
    async fn test_reverse_spent_credit_fails() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let deposit = services
            .ledger
            .apply_transaction(PostingRequest::deposit(account.id(), amount(dec!(1000)), Channel::Cash), &ctx)
            .await
            .unwrap();
        services
            .ledger
            .apply_transaction(PostingRequest::withdrawal(account.id(), amount(dec!(800)), Channel::Cash), &ctx)
            .await
            .unwrap();

        let result = services.ledger.reverse_transaction(deposit.id(), &ctx).await;
        assert!(matches!(result, Err(DomainError::InsufficientFunds { .. })));
        assert_eq!(balance_of(&services, account.id()), dec!(200));
        assert_eq!(
            services.store.transaction(deposit.id()).unwrap().unwrap().status(),
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_reverse_transfer_restores_both_sides() {
        let services = Services::in_memory();
        let (_, from) = saver(&services, dec!(5000)).await;
        let (_, to) = saver(&services, dec!(0)).await;
        let ctx = staff();

        let result = services
            .ledger
            .transfer(TransferCommand::new(from.id(), to.id(), amount(dec!(1500))), &ctx)
            .await
            .unwrap();
        services
            .ledger
            .reverse_transaction(result.debit.id(), &ctx)
            .await
            .unwrap();

        assert_eq!(balance_of(&services, from.id()), dec!(5000));
        assert_eq!(balance_of(&services, to.id()), dec!(0));
        assert_eq!(
            services.store.transaction(result.credit.id()).unwrap().unwrap().status(),
            TransactionStatus::Reversed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let services = Services::in_memory();
        let (_, account) = saver(&services, dec!(1000)).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = services.ledger.clone();
            let account_id = account.id();
            handles.push(tokio::spawn(async move {
                ledger
                    .apply_transaction(
                        PostingRequest::withdrawal(account_id, Amount::from_integer(100).unwrap(), Channel::Cash),
                        &OperationContext::system(),
                    )
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(balance_of(&services, account.id()), dec!(0));
        assert_eq!(lines_of(&services, account.id()), 11);
    }

    // =========================================================================
    // Loans
    // =========================================================================

    async fn approved_loan(services: &Services, member: &Member, principal: Decimal) -> Uuid {
        let loan = services
            .loans
            .apply(
                LoanApplication::new(member.id, LoanType::Emergency, amount(principal), "Medical bills"),
                &staff(),
            )
            .await
            .unwrap();
        services
            .loans
            .decide(loan.id(), Decision::Approve, None, &staff())
            .await
            .unwrap();
        loan.id()
    }

    #[tokio::test]
    async fn test_apply_prices_the_loan() {
        let services = Services::in_memory();
        let (member, _) = saver(&services, dec!(25000)).await;

        let loan = services
            .loans
            .apply(
                LoanApplication::new(member.id, LoanType::Emergency, amount(dec!(100000)), "Medical bills"),
                &staff(),
            )
            .await
            .unwrap();

        assert_eq!(loan.status(), LoanStatus::Pending);
        assert_eq!(loan.interest_rate(), dec!(12));
        assert_eq!(loan.term_months(), 12);
        assert_eq!(loan.monthly_repayment(), dec!(8884.88));
        assert_eq!(loan.outstanding_balance(), loan.total_amount());
        assert!(loan.loan_number().starts_with("LN"));
        assert_eq!(loan.loan_number().len(), 12);

        let (_, score) = services.loans.credit_score(member.id).unwrap();
        assert_eq!(loan.credit_score(), score);

        let unknown = services
            .loans
            .apply(
                LoanApplication::new(Uuid::new_v4(), LoanType::Business, amount(dec!(1000)), "Stock"),
                &staff(),
            )
            .await;
        assert!(matches!(unknown, Err(DomainError::MemberNotFound(_))));
    }

    #[tokio::test]
    async fn test_reject_without_reason_keeps_pending() {
        let services = Services::in_memory();
        let (member, _) = saver(&services, dec!(0)).await;
        let loan = services
            .loans
            .apply(
                LoanApplication::new(member.id, LoanType::SchoolFees, amount(dec!(30000)), "Fees"),
                &staff(),
            )
            .await
            .unwrap();

        let result = services.loans.decide(loan.id(), Decision::Reject, Some("  "), &staff()).await;
        assert_eq!(result.unwrap_err(), DomainError::MissingReason);
        assert_eq!(services.loans.loan(loan.id()).unwrap().status(), LoanStatus::Pending);

        let rejected = services
            .loans
            .decide(loan.id(), Decision::Reject, Some("Insufficient savings"), &staff())
            .await
            .unwrap();
        assert_eq!(rejected.status(), LoanStatus::Rejected);
        assert_eq!(rejected.rejection_reason(), Some("Insufficient savings"));
    }

    #[tokio::test]
    async fn test_disburse_requires_approval() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(0)).await;
        let loan = services
            .loans
            .apply(
                LoanApplication::new(member.id, LoanType::Development, amount(dec!(50000)), "Roofing"),
                &staff(),
            )
            .await
            .unwrap();

        let result = services.loans.disburse(loan.id(), &staff()).await;
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
        assert_eq!(lines_of(&services, account.id()), 0);
        assert_eq!(balance_of(&services, account.id()), dec!(0));
    }

    #[tokio::test]
    async fn test_disburse_credits_designated_account() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(1000)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;

        let loan = services.loans.disburse(loan_id, &staff()).await.unwrap();

        assert_eq!(loan.status(), LoanStatus::Active);
        assert_eq!(loan.disbursed_amount(), Some(dec!(10000.00)));
        assert_eq!(loan.disbursement_account_id(), Some(account.id()));
        let disbursed_on = loan.disbursed_at().unwrap().date_naive();
        assert_eq!(loan.first_repayment_date(), Some(disbursed_on + Duration::days(30)));
        assert_eq!(loan.next_repayment_date(), loan.first_repayment_date());
        assert_eq!(balance_of(&services, account.id()), dec!(11000.00));

        let inbox = services.notifications.for_member(member.id);
        assert!(inbox.iter().any(|n| n.title == "Loan Disbursed"));

        let again = services.loans.disburse(loan_id, &staff()).await;
        assert!(matches!(again, Err(DomainError::InvalidTransition { .. })));
        assert_eq!(balance_of(&services, account.id()), dec!(11000.00));
    }

    #[tokio::test]
    async fn test_disburse_without_savings_account() {
        let services = Services::in_memory();
        let member = register(&services, "Wafula");
        let loan_id = approved_loan(&services, &member, dec!(5000)).await;

        let result = services.loans.disburse(loan_id, &staff()).await;
        assert!(matches!(result, Err(DomainError::AccountNotFound(_))));
        assert_eq!(services.loans.loan(loan_id).unwrap().status(), LoanStatus::Approved);
    }

    #[tokio::test]
    async fn test_partial_repayment_advances_schedule() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(0)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;
        let active = services.loans.disburse(loan_id, &staff()).await.unwrap();

        let repaid = services
            .loans
            .repay(loan_id, amount(dec!(1000)), Channel::Cash, &staff())
            .await
            .unwrap();

        assert_eq!(repaid.status(), LoanStatus::Active);
        assert_eq!(repaid.outstanding_balance(), active.outstanding_balance() - dec!(1000));
        assert_eq!(
            repaid.next_repayment_date(),
            active
                .first_repayment_date()
                .and_then(|d| d.checked_add_months(Months::new(1)))
        );
        assert_eq!(balance_of(&services, account.id()), dec!(9000.00));
    }

    #[tokio::test]
    async fn test_full_repayment_completes_loan() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(5000)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;
        let active = services.loans.disburse(loan_id, &staff()).await.unwrap();

        let before = Utc::now();
        let completed = services
            .loans
            .repay(loan_id, amount(active.outstanding_balance()), Channel::Cash, &staff())
            .await
            .unwrap();
        let after = Utc::now();

        assert_eq!(completed.status(), LoanStatus::Completed);
        assert!(completed.outstanding_balance().is_zero());
        assert!(completed.next_repayment_date().is_none());
        let completed_at = completed.completed_at().unwrap();
        assert!(completed_at >= before && completed_at <= after);
        assert_eq!(
            balance_of(&services, account.id()),
            dec!(15000) - active.outstanding_balance()
        );

        let inbox = services.notifications.for_member(member.id);
        assert!(inbox.iter().any(|n| n.title == "Loan Fully Repaid"));
    }

    #[tokio::test]
    async fn test_overpayment_is_rejected() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(20000)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;
        let active = services.loans.disburse(loan_id, &staff()).await.unwrap();
        let balance = balance_of(&services, account.id());

        let result = services
            .loans
            .repay(loan_id, amount(active.outstanding_balance() + dec!(1)), Channel::Cash, &staff())
            .await;

        assert!(matches!(result, Err(DomainError::Overpayment { .. })));
        assert_eq!(
            services.loans.loan(loan_id).unwrap().outstanding_balance(),
            active.outstanding_balance()
        );
        assert_eq!(balance_of(&services, account.id()), balance);
    }

    #[tokio::test]
    async fn test_repayment_needs_active_loan_and_funds() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(0)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;

        let early = services
            .loans
            .repay(loan_id, amount(dec!(100)), Channel::Cash, &staff())
            .await;
        assert!(matches!(early, Err(DomainError::InvalidTransition { .. })));

        services.loans.disburse(loan_id, &staff()).await.unwrap();
        services
            .ledger
            .apply_transaction(
                PostingRequest::withdrawal(account.id(), amount(dec!(9950)), Channel::Cash),
                &staff(),
            )
            .await
            .unwrap();

        let short = services
            .loans
            .repay(loan_id, amount(dec!(100)), Channel::Cash, &staff())
            .await;
        assert!(matches!(short, Err(DomainError::InsufficientFunds { .. })));
        let loan = services.loans.loan(loan_id).unwrap();
        assert_eq!(loan.outstanding_balance(), loan.total_amount());
    }

    #[tokio::test]
    async fn test_mark_defaulted() {
        let services = Services::in_memory();
        let (member, _) = saver(&services, dec!(0)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;

        assert_err!(services.loans.mark_defaulted(loan_id, &staff()).await);

        services.loans.disburse(loan_id, &staff()).await.unwrap();
        let defaulted = services.loans.mark_defaulted(loan_id, &staff()).await.unwrap();
        assert_eq!(defaulted.status(), LoanStatus::Defaulted);
        assert!(defaulted.defaulted_at().is_some());
        assert!(defaulted.status().is_terminal());
    }

    #[tokio::test]
    async fn test_guarantors() {
        let services = Services::in_memory();
        let (borrower, _) = saver(&services, dec!(0)).await;
        let backer = register(&services, "Njeri");
        let loan = services
            .loans
            .apply(
                LoanApplication::new(borrower.id, LoanType::Business, amount(dec!(20000)), "Stock"),
                &staff(),
            )
            .await
            .unwrap();
        let ctx = staff();

        let own = services
            .loans
            .add_guarantor(
                loan.id(),
                GuarantorPledge {
                    guarantor_member_id: borrower.id,
                    amount: amount(dec!(5000)),
                },
                &ctx,
            )
            .await;
        assert!(matches!(own, Err(DomainError::InvalidGuarantor(_))));

        // pledges above the principal are allowed
        let pledge = services
            .loans
            .add_guarantor(
                loan.id(),
                GuarantorPledge {
                    guarantor_member_id: backer.id,
                    amount: amount(dec!(25000)),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(pledge.status, GuarantorStatus::Pending);

        let duplicate = services
            .loans
            .add_guarantor(
                loan.id(),
                GuarantorPledge {
                    guarantor_member_id: backer.id,
                    amount: amount(dec!(1000)),
                },
                &ctx,
            )
            .await;
        assert!(matches!(duplicate, Err(DomainError::InvalidGuarantor(_))));

        let no_reason = services.loans.decide_guarantor(pledge.id, false, None, &ctx).await;
        assert_eq!(no_reason.unwrap_err(), DomainError::MissingReason);

        let approved = services
            .loans
            .decide_guarantor(pledge.id, true, None, &ctx)
            .await
            .unwrap();
        assert_eq!(approved.status, GuarantorStatus::Approved);
        assert_eq!(services.loans.guarantors(loan.id()).unwrap().len(), 1);
    }

    // =========================================================================
    // Events, audit and read models
    // =========================================================================

    #[tokio::test]
    async fn test_events_reach_inbox_and_audit_chain() {
        let services = Services::in_memory();
        let (member, account) = saver(&services, dec!(1000)).await;
        approved_loan(&services, &member, dec!(5000)).await;

        let inbox = services.notifications.for_member(member.id);
        assert_eq!(inbox[0].title, "Loan Approved!");
        assert!(inbox.iter().any(|n| n.title == "Transaction deposit"));
        assert_eq!(services.notifications.unread_count(member.id), inbox.len());

        let trail = services.audit.recent(10).unwrap();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0].action, "loan.approved");
        assert_eq!(trail[2].action, "transaction.posted");

        let verification = services.audit.verify_hash_chain().unwrap();
        assert!(verification.is_valid);
        assert_eq!(verification.entries_checked, 3);

        let by_account = services
            .store
            .transactions(&TransactionFilter::for_account(account.id()))
            .unwrap();
        assert_eq!(by_account.len(), 1);
    }

    #[tokio::test]
    async fn test_member_summary_and_portfolio() {
        let services = Services::in_memory();
        let (member, _) = saver(&services, dec!(4000)).await;
        let loan_id = approved_loan(&services, &member, dec!(10000)).await;
        let active = services.loans.disburse(loan_id, &staff()).await.unwrap();

        let summary = services.members.summary(member.id).unwrap();
        assert_eq!(summary.total_balance, dec!(14000.00));
        assert_eq!(summary.active_loans_count, 1);
        assert_eq!(summary.total_loan_balance, active.outstanding_balance());
        assert_eq!(summary.recent_transactions.len(), 2);

        let stats = services.members.portfolio().unwrap();
        assert_eq!(stats.total_members, 1);
        assert_eq!(stats.total_deposits, dec!(14000.00));
        assert_eq!(stats.active_loans_count, 1);
        assert_eq!(stats.pending_loans_count, 0);

        let invalid = services.members.register(
            RegisterMember {
                first_name: " ".to_string(),
                last_name: "Mwangi".to_string(),
                phone: "+254711111111".to_string(),
                monthly_income: dec!(1000),
                loan_repayment_history: None,
            },
            &staff(),
        );
        assert!(matches!(invalid, Err(DomainError::InvalidMember(_))));
    }

    #[tokio::test]
    async fn test_member_update_verifies_kyc_and_rescores() {
        let services = Services::in_memory();
        let member = register(&services, "Njeri");
        let ctx = staff();
        let (_, before) = services.loans.credit_score(member.id).unwrap();

        let updated = services
            .members
            .update(
                member.id,
                MemberUpdate {
                    monthly_income: Some(dec!(120000)),
                    kyc_status: Some(KycStatus::Verified),
                    phone: Some(" +254722000000 ".to_string()),
                    ..MemberUpdate::default()
                },
                &ctx,
            )
            .unwrap();
        assert_eq!(updated.kyc_status, KycStatus::Verified);
        assert_eq!(updated.phone, "+254722000000");
        assert_eq!(updated.first_name, member.first_name);
        assert_eq!(services.members.member(member.id).unwrap(), updated);

        let (profile, after) = services.loans.credit_score(member.id).unwrap();
        assert_eq!(profile.monthly_income, dec!(120000));
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_member_update_validation() {
        let services = Services::in_memory();
        let member = register(&services, "Kiprop");
        let ctx = staff();

        let blank = services.members.update(
            member.id,
            MemberUpdate {
                last_name: Some("  ".to_string()),
                ..MemberUpdate::default()
            },
            &ctx,
        );
        assert!(matches!(blank, Err(DomainError::InvalidMember(_))));

        let history = services.members.update(
            member.id,
            MemberUpdate {
                loan_repayment_history: Some(101),
                ..MemberUpdate::default()
            },
            &ctx,
        );
        assert!(matches!(history, Err(DomainError::InvalidMember(_))));

        let income = services.members.update(
            member.id,
            MemberUpdate {
                monthly_income: Some(dec!(-1)),
                ..MemberUpdate::default()
            },
            &ctx,
        );
        assert!(matches!(income, Err(DomainError::InvalidMember(_))));
        assert_eq!(services.members.member(member.id).unwrap(), member);

        let unknown = services
            .members
            .update(Uuid::new_v4(), MemberUpdate::default(), &ctx);
        assert!(matches!(unknown, Err(DomainError::MemberNotFound(_))));
    }
}

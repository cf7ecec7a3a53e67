//! Demo data
//!
//! Called once at startup when `SEED_DEMO_DATA` is set. Everything goes
//! through the services, so seeded balances carry full transaction
//! history and seeded loans follow the normal lifecycle.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use crate::aggregate::{AccountType, Aggregate, Channel, KycStatus, LoanType, Member};
use crate::domain::{Amount, DomainError, OperationContext};
use crate::handlers::{Decision, LoanApplication, PostingRequest, Services};

const FIRST_NAMES: [&str; 12] = [
    "John", "Jane", "Peter", "Mary", "David", "Grace", "James", "Alice", "Joseph", "Ruth", "Daniel", "Faith",
];
const LAST_NAMES: [&str; 8] = [
    "Kamau", "Wanjiku", "Omondi", "Nyambura", "Kiprop", "Akinyi", "Mwangi", "Chebet",
];
const LOAN_TYPES: [LoanType; 5] = [
    LoanType::Emergency,
    LoanType::Development,
    LoanType::SchoolFees,
    LoanType::Business,
    LoanType::AssetFinancing,
];

/// Counts of what was created
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub members: usize,
    pub accounts: usize,
    pub transactions: usize,
    pub loans: usize,
}

pub async fn seed_demo_data(services: &Services) -> Result<SeedReport, DomainError> {
    let context = OperationContext::system();
    let mut report = SeedReport::default();

    let mut members = Vec::new();
    for i in 0..FIRST_NAMES.len() {
        let joined_days_ago = 30 + (i as i64 * 97) % 730;
        let member = Member::register(
            FIRST_NAMES[i],
            LAST_NAMES[i % LAST_NAMES.len()],
            format!("+2547{:08}", 10_000_000 + i),
            Decimal::from(30_000 + (i as i64 * 5_000) % 150_000),
        )
        .with_repayment_history(60 + (i as u32 * 7) % 40)
        .with_kyc_status(if i % 15 == 0 { KycStatus::Pending } else { KycStatus::Verified })
        .joined(Utc::now() - Duration::days(joined_days_ago));
        let member = services.members.insert(member)?;
        report.members += 1;

        let shares = services
            .ledger
            .open_account(member.id, AccountType::Shares, None, &context)
            .await?;
        let savings = services
            .ledger
            .open_account(member.id, AccountType::Savings, None, &context)
            .await?;
        report.accounts += 2;

        let mut deposits = vec![
            (shares.id(), 20_000 + (i as i64 * 2_500) % 80_000),
            (savings.id(), 50_000 + (i as i64 * 7_000) % 200_000),
        ];

        if i % 3 == 0 {
            let emergency = services
                .ledger
                .open_account(member.id, AccountType::Emergency, None, &context)
                .await?;
            deposits.push((emergency.id(), 10_000 + (i as i64 * 1_000) % 30_000));
            report.accounts += 1;
        }
        if i % 4 == 1 {
            let fixed = services
                .ledger
                .open_account(member.id, AccountType::FixedDeposit, Some(Decimal::new(950, 2)), &context)
                .await?;
            deposits.push((fixed.id(), 100_000));
            report.accounts += 1;
        }

        for (account_id, shillings) in deposits {
            let request = PostingRequest::deposit(account_id, Amount::from_integer(shillings)?, Channel::Cash)
                .with_description("Opening contribution");
            services.ledger.apply_transaction(request, &context).await?;
            report.transactions += 1;
        }

        members.push(member);
    }

    // one loan per member, walked to a spread of statuses
    for (i, member) in members.iter().enumerate() {
        let loan_type = LOAN_TYPES[i % LOAN_TYPES.len()];
        let principal = Amount::from_integer((i as i64 + 1) * 15_000)?;
        let loan = services
            .loans
            .apply(
                LoanApplication::new(member.id, loan_type, principal, format!("{} purpose", loan_type)),
                &context,
            )
            .await?;
        report.loans += 1;

        match i % 5 {
            0 => {}
            1 => {
                services
                    .loans
                    .decide(loan.id(), Decision::Reject, Some("Insufficient savings balance"), &context)
                    .await?;
            }
            stage => {
                services.loans.decide(loan.id(), Decision::Approve, None, &context).await?;
                if stage >= 3 {
                    let active = services.loans.disburse(loan.id(), &context).await?;
                    report.transactions += 1;
                    if stage == 4 {
                        let installment = Amount::new(active.monthly_repayment())?;
                        services
                            .loans
                            .repay(loan.id(), installment, Channel::Mpesa, &context)
                            .await?;
                        report.transactions += 1;
                    }
                }
            }
        }
    }

    tracing::info!(
        members = report.members,
        accounts = report.accounts,
        transactions = report.transactions,
        loans = report.loans,
        "Demo data seeded"
    );
    Ok(report)
}

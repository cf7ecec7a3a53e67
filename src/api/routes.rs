//! API Routes
//!
//! HTTP endpoint definitions. Handlers translate JSON to service calls and
//! service errors to responses; no business rules live here.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{
    Account, AccountType, Aggregate, Channel, Guarantor, Loan, LoanStatus, Member, Transaction,
    TransactionStatus, TransactionType,
};
use crate::audit::{AuditAction, AuditLogBuilder, AuditLogEntry, ChainVerificationResult};
use crate::domain::{Amount, DomainError, MemberProfile, OperationContext, Schedule};
use crate::error::{AppError, AppResult};
use crate::handlers::{
    Decision, GuarantorPledge, LoanApplication, MemberSummary, MemberUpdate, PortfolioStats,
    PostingRequest, RegisterMember, ScheduleQuery, Services, TransferCommand, TransferResult,
};
use crate::notifications::Notification;
use crate::store::{LoanFilter, Repository, TransactionFilter};

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub member_id: Uuid,
    pub account_type: AccountType,
    #[serde(default)]
    pub interest_rate: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AccountsQuery {
    #[serde(default)]
    pub member_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PostTransactionRequest {
    pub transaction_type: TransactionType,
    pub amount: Amount,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: Channel,
}

fn default_channel() -> Channel {
    Channel::Cash
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

const MAX_LIMIT: usize = 500;

fn check_limit(limit: usize) -> AppResult<usize> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::InvalidRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    Ok(limit)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct CreditScoreResponse {
    pub member_id: Uuid,
    pub credit_score: u16,
    pub profile: MemberProfile,
}

#[derive(Debug, Deserialize)]
pub struct LoansQuery {
    #[serde(default)]
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<LoanStatus>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentRequest {
    pub amount: Amount,
    #[serde(default = "default_channel")]
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct GuarantorDecisionRequest {
    pub approve: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub member_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub entity_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<Services> {
    Router::new()
        // Members
        .route("/members", post(register_member).get(list_members))
        .route("/members/:member_id", get(get_member).patch(update_member))
        .route("/members/:member_id/credit-score", get(get_credit_score))
        .route("/members/:member_id/summary", get(get_member_summary))
        // Accounts
        .route("/accounts", post(open_account).get(list_accounts))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/close", post(close_account))
        .route("/accounts/:account_id/transactions", post(post_transaction))
        .route("/accounts/:account_id/interest", post(accrue_interest))
        // Transactions
        .route("/transactions", get(list_transactions))
        .route("/transactions/:transaction_id", get(get_transaction))
        .route("/transactions/:transaction_id/confirm", post(confirm_transaction))
        .route("/transactions/:transaction_id/reverse", post(reverse_transaction))
        .route("/transfers", post(transfer))
        // Loans
        .route("/loans/schedule", post(compute_schedule))
        .route("/loans", post(apply_for_loan).get(list_loans))
        .route("/loans/:loan_id", get(get_loan))
        .route("/loans/:loan_id/decision", post(decide_loan))
        .route("/loans/:loan_id/disburse", post(disburse_loan))
        .route("/loans/:loan_id/repayments", post(repay_loan))
        .route("/loans/:loan_id/default", post(mark_defaulted))
        .route("/loans/:loan_id/guarantors", get(list_guarantors).post(add_guarantor))
        .route("/guarantors/:guarantor_id/decision", post(decide_guarantor))
        // Notifications
        .route("/notifications", get(list_notifications))
        .route("/notifications/:notification_id/read", patch(mark_notification_read))
        // Staff
        .route("/audit-logs", get(get_audit_logs))
        .route("/audit-logs/verify", get(verify_audit_chain))
        .route("/stats/dashboard", get(get_dashboard_stats))
}

/// Refuse non-staff callers and leave a trace in the audit chain
fn require_staff(services: &Services, context: &OperationContext, operation: &str) -> AppResult<()> {
    if context.role.is_staff() {
        return Ok(());
    }

    let builder = AuditLogBuilder::new(AuditAction::PermissionDenied)
        .after_state(&serde_json::json!({ "operation": operation, "role": context.role }));
    services.audit.log(builder, context)?;

    tracing::warn!(operation, actor_id = ?context.actor_id, "Staff-only operation refused");
    Err(AppError::Forbidden(format!("{} requires a staff role", operation)))
}

fn audit(
    services: &Services,
    context: &OperationContext,
    action: AuditAction,
    resource_type: &str,
    resource_id: Uuid,
    state: &impl Serialize,
) -> AppResult<()> {
    let builder = AuditLogBuilder::new(action)
        .resource_type(resource_type)
        .resource_id(resource_id)
        .after_state(state);
    services.audit.log(builder, context)?;
    Ok(())
}

// =========================================================================
// Members
// =========================================================================

async fn register_member(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<RegisterMember>,
) -> AppResult<(StatusCode, Json<Member>)> {
    let member = services.members.register(request, &context)?;
    audit(&services, &context, AuditAction::MemberRegistered, "Member", member.id, &member)?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn list_members(State(services): State<Services>) -> AppResult<Json<Vec<Member>>> {
    Ok(Json(services.members.members()?))
}

async fn get_member(
    State(services): State<Services>,
    Path(member_id): Path<Uuid>,
) -> AppResult<Json<Member>> {
    Ok(Json(services.members.member(member_id)?))
}

async fn update_member(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<MemberUpdate>,
) -> AppResult<Json<Member>> {
    require_staff(&services, &context, "update member")?;

    let before = services.members.member(member_id)?;
    let member = services.members.update(member_id, request, &context)?;

    let builder = AuditLogBuilder::new(AuditAction::MemberUpdated)
        .resource_type("Member")
        .resource_id(member_id)
        .before_state(&before)
        .after_state(&member);
    services.audit.log(builder, &context)?;
    Ok(Json(member))
}

async fn get_credit_score(
    State(services): State<Services>,
    Path(member_id): Path<Uuid>,
) -> AppResult<Json<CreditScoreResponse>> {
    let (profile, credit_score) = services.loans.credit_score(member_id)?;
    Ok(Json(CreditScoreResponse {
        member_id,
        credit_score,
        profile,
    }))
}

async fn get_member_summary(
    State(services): State<Services>,
    Path(member_id): Path<Uuid>,
) -> AppResult<Json<MemberSummary>> {
    Ok(Json(services.members.summary(member_id)?))
}

// =========================================================================
// Accounts
// =========================================================================

async fn open_account(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<OpenAccountRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    require_staff(&services, &context, "open account")?;

    let account = services
        .ledger
        .open_account(request.member_id, request.account_type, request.interest_rate, &context)
        .await?;
    audit(&services, &context, AuditAction::AccountOpened, "Account", account.id(), &account)?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts(
    State(services): State<Services>,
    Query(query): Query<AccountsQuery>,
) -> AppResult<Json<Vec<Account>>> {
    let accounts = match query.member_id {
        Some(member_id) => services.store.accounts_for_member(member_id),
        None => services.store.accounts(),
    }
    .map_err(DomainError::from)?;
    Ok(Json(accounts))
}

async fn get_account(
    State(services): State<Services>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<Account>> {
    services
        .store
        .account(account_id)
        .map_err(DomainError::from)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))
}

async fn close_account(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<Account>> {
    require_staff(&services, &context, "close account")?;

    let before = services
        .store
        .account(account_id)
        .map_err(DomainError::from)?;
    let account = services.ledger.close_account(account_id, &context).await?;

    let builder = AuditLogBuilder::new(AuditAction::AccountClosed)
        .resource_type("Account")
        .resource_id(account_id)
        .before_state(&before)
        .after_state(&account);
    services.audit.log(builder, &context)?;
    Ok(Json(account))
}

async fn post_transaction(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<PostTransactionRequest>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let mut posting = PostingRequest::new(account_id, request.transaction_type, request.amount, request.channel);
    if let Some(description) = request.description {
        posting = posting.with_description(description);
    }

    let transaction = services.ledger.apply_transaction(posting, &context).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn accrue_interest(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<Option<Transaction>>> {
    require_staff(&services, &context, "accrue interest")?;
    Ok(Json(services.ledger.accrue_monthly_interest(account_id, &context).await?))
}

// =========================================================================
// Transactions
// =========================================================================

async fn list_transactions(
    State(services): State<Services>,
    Query(query): Query<TransactionsQuery>,
) -> AppResult<Json<Vec<Transaction>>> {
    let filter = TransactionFilter {
        member_id: query.member_id,
        account_id: query.account_id,
        status: query.status,
        limit: Some(check_limit(query.limit)?),
        ..TransactionFilter::default()
    };
    let transactions = services
        .store
        .transactions(&filter)
        .map_err(DomainError::from)?;
    Ok(Json(transactions))
}

async fn get_transaction(
    State(services): State<Services>,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    services
        .store
        .transaction(transaction_id)
        .map_err(DomainError::from)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))
}

async fn confirm_transaction(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<ConfirmRequest>,
) -> AppResult<Json<Transaction>> {
    let transaction = services
        .ledger
        .confirm_transaction(transaction_id, request.success, &context)
        .await?;
    Ok(Json(transaction))
}

async fn reverse_transaction(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<Transaction>> {
    require_staff(&services, &context, "reverse transaction")?;
    Ok(Json(services.ledger.reverse_transaction(transaction_id, &context).await?))
}

async fn transfer(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Json(command): Json<TransferCommand>,
) -> AppResult<(StatusCode, Json<TransferResult>)> {
    let result = services.ledger.transfer(command, &context).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

// =========================================================================
// Loans
// =========================================================================

async fn compute_schedule(
    State(services): State<Services>,
    Json(query): Json<ScheduleQuery>,
) -> AppResult<Json<Schedule>> {
    let schedule = services
        .loans
        .compute_schedule(query.principal, query.annual_rate, query.term_months)?;
    Ok(Json(schedule))
}

async fn apply_for_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Json(application): Json<LoanApplication>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    let loan = services.loans.apply(application, &context).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

async fn list_loans(
    State(services): State<Services>,
    Query(query): Query<LoansQuery>,
) -> AppResult<Json<Vec<Loan>>> {
    let loans = services.loans.loans(&LoanFilter {
        member_id: query.member_id,
        status: query.status,
    })?;
    Ok(Json(loans))
}

async fn get_loan(
    State(services): State<Services>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    Ok(Json(services.loans.loan(loan_id)?))
}

async fn decide_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> AppResult<Json<Loan>> {
    require_staff(&services, &context, "decide loan")?;
    let loan = services
        .loans
        .decide(loan_id, request.decision, request.reason.as_deref(), &context)
        .await?;
    Ok(Json(loan))
}

async fn disburse_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    require_staff(&services, &context, "disburse loan")?;
    Ok(Json(services.loans.disburse(loan_id, &context).await?))
}

async fn repay_loan(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<RepaymentRequest>,
) -> AppResult<Json<Loan>> {
    let loan = services
        .loans
        .repay(loan_id, request.amount, request.channel, &context)
        .await?;
    Ok(Json(loan))
}

async fn mark_defaulted(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    require_staff(&services, &context, "mark loan defaulted")?;
    Ok(Json(services.loans.mark_defaulted(loan_id, &context).await?))
}

async fn list_guarantors(
    State(services): State<Services>,
    Path(loan_id): Path<Uuid>,
) -> AppResult<Json<Vec<Guarantor>>> {
    Ok(Json(services.loans.guarantors(loan_id)?))
}

async fn add_guarantor(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(pledge): Json<GuarantorPledge>,
) -> AppResult<(StatusCode, Json<Guarantor>)> {
    let guarantor = services.loans.add_guarantor(loan_id, pledge, &context).await?;
    audit(&services, &context, AuditAction::GuarantorAdded, "Guarantor", guarantor.id, &guarantor)?;
    Ok((StatusCode::CREATED, Json(guarantor)))
}

async fn decide_guarantor(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Path(guarantor_id): Path<Uuid>,
    Json(request): Json<GuarantorDecisionRequest>,
) -> AppResult<Json<Guarantor>> {
    let guarantor = services
        .loans
        .decide_guarantor(guarantor_id, request.approve, request.reason.as_deref(), &context)
        .await?;
    audit(&services, &context, AuditAction::GuarantorDecided, "Guarantor", guarantor_id, &guarantor)?;
    Ok(Json(guarantor))
}

// =========================================================================
// Notifications
// =========================================================================

async fn list_notifications(
    State(services): State<Services>,
    Query(query): Query<NotificationsQuery>,
) -> Json<NotificationsResponse> {
    Json(NotificationsResponse {
        notifications: services.notifications.for_member(query.member_id),
        unread_count: services.notifications.unread_count(query.member_id),
    })
}

async fn mark_notification_read(
    State(services): State<Services>,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Notification>> {
    services
        .notifications
        .mark_read(notification_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("notification {}", notification_id)))
}

// =========================================================================
// Staff
// =========================================================================

async fn get_audit_logs(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    require_staff(&services, &context, "read audit logs")?;
    let limit = check_limit(query.limit)?;
    let entries = match query.entity_id {
        Some(entity_id) => services.audit.for_resource(entity_id, limit)?,
        None => services.audit.recent(limit)?,
    };
    Ok(Json(entries))
}

async fn verify_audit_chain(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
) -> AppResult<Json<ChainVerificationResult>> {
    require_staff(&services, &context, "verify audit chain")?;
    Ok(Json(services.audit.verify_hash_chain()?))
}

async fn get_dashboard_stats(
    State(services): State<Services>,
    Extension(context): Extension<OperationContext>,
) -> AppResult<Json<PortfolioStats>> {
    require_staff(&services, &context, "read portfolio stats")?;
    Ok(Json(services.members.portfolio()?))
}

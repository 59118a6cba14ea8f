//! Account Store routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use moeda_core::ledger::{
    AccountKey, AccountSnapshot, HistoryRange, LedgerError, Transaction, TransactionKind,
    retry_stale,
};
use moeda_shared::types::{DisciplineId, StudentId, TransactionId};

use crate::{ApiError, AppState};

/// Creates the account routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{student_id}/{discipline_id}", get(get_account))
        .route("/accounts/{student_id}/{discipline_id}/balance", get(get_balance))
        .route("/accounts/{student_id}/{discipline_id}/history", get(get_history))
        .route("/accounts/{student_id}/{discipline_id}/credit", post(credit))
        .route("/accounts/{student_id}/{discipline_id}/debit", post(debit))
        .route("/students/{student_id}/balance", get(get_pooled_balance))
        .route("/transactions/{transaction_id}", get(get_transaction))
}

fn default_credit_kind() -> TransactionKind {
    TransactionKind::Adjust
}

fn default_debit_kind() -> TransactionKind {
    TransactionKind::Spend
}

/// Request body for a credit.
#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    /// Coins to add.
    pub amount: i64,
    /// Credit kind (default: adjust). Earned coins go through `/awards`.
    #[serde(default = "default_credit_kind")]
    pub kind: TransactionKind,
    /// Idempotency key.
    pub origin_event_id: String,
    /// Lot validity in days. Defaults to the discipline's expiration policy
    /// for `earn` and `adjust` credits.
    pub lot_duration_days: Option<u32>,
}

/// Request body for a debit.
#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    /// Coins to remove.
    pub amount: i64,
    /// Debit kind (default: spend).
    #[serde(default = "default_debit_kind")]
    pub kind: TransactionKind,
    /// Idempotency key.
    pub origin_event_id: String,
}

/// Query parameters for history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

/// Balance of one account.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Student.
    pub student_id: StudentId,
    /// Discipline.
    pub discipline_id: DisciplineId,
    /// Current balance.
    pub balance: i64,
}

/// GET `/accounts/{student_id}/{discipline_id}` - Account with its live lots.
async fn get_account(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
) -> Result<Json<AccountSnapshot>, ApiError> {
    let key = AccountKey::new(student_id, discipline_id);
    Ok(Json(state.services.accounts.account(key).await?))
}

/// GET `/accounts/{student_id}/{discipline_id}/balance` - Current balance.
async fn get_balance(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let key = AccountKey::new(student_id, discipline_id);
    let balance = state.services.accounts.balance(key).await?;
    Ok(Json(BalanceResponse {
        student_id,
        discipline_id,
        balance,
    }))
}

/// GET `/accounts/{student_id}/{discipline_id}/history` - Transaction log.
async fn get_history(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = AccountKey::new(student_id, discipline_id);
    let range = HistoryRange {
        from: query.from,
        to: query.to,
    };
    let transactions = state
        .services
        .accounts
        .history(key, range)
        .collect_all()
        .await?;
    Ok(Json(json!({ "transactions": transactions })))
}

/// GET `/students/{student_id}/balance` - Sum over all disciplines.
async fn get_pooled_balance(
    State(state): State<AppState>,
    Path(student_id): Path<StudentId>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state.services.accounts.pooled_balance(student_id).await?;
    Ok(Json(json!({ "student_id": student_id, "balance": balance })))
}

/// GET `/transactions/{transaction_id}` - One transaction.
async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(state.services.accounts.transaction(transaction_id).await?))
}

/// POST `/accounts/{student_id}/{discipline_id}/credit` - Credit coins.
///
/// `earn` credits are refused here: they count against the period cap, which
/// only the rules engine behind `/awards` enforces.
async fn credit(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Json(payload): Json<CreditRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.kind == TransactionKind::Earn {
        return Err(LedgerError::InvalidKind(
            "earn credits are subject to the period cap; submit them to /awards".to_string(),
        )
        .into());
    }
    let key = AccountKey::new(student_id, discipline_id);
    let lot_duration = match payload.lot_duration_days {
        Some(days) => Some(Duration::days(i64::from(days))),
        None if payload.kind == TransactionKind::Adjust => state
            .services
            .policies
            .current()
            .lot_duration_for(discipline_id),
        None => None,
    };

    let accounts = &state.services.accounts;
    let tx = retry_stale(&state.services.retry, "credit", || {
        accounts.credit(
            key,
            payload.amount,
            payload.kind,
            &payload.origin_event_id,
            lot_duration,
        )
    })
    .await?;

    info!(account = %key, tx_id = %tx.id, "Credit accepted");
    Ok((StatusCode::CREATED, Json(tx)))
}

/// POST `/accounts/{student_id}/{discipline_id}/debit` - Debit coins.
async fn debit(
    State(state): State<AppState>,
    Path((student_id, discipline_id)): Path<(StudentId, DisciplineId)>,
    Json(payload): Json<DebitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = AccountKey::new(student_id, discipline_id);
    let accounts = &state.services.accounts;
    let tx = retry_stale(&state.services.retry, "debit", || {
        accounts.debit(key, payload.amount, payload.kind, &payload.origin_event_id)
    })
    .await?;

    info!(account = %key, tx_id = %tx.id, "Debit accepted");
    Ok((StatusCode::CREATED, Json(tx)))
}

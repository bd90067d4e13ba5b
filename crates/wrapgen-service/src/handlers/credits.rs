//! Credit balance, ledger, and top-up handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use wrapgen_core::LedgerEntry;
use wrapgen_store::Store;

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// Raw account balance in credits.
    pub balance: i64,
    /// Balance minus in-flight reservations; what a new submission sees.
    pub available: i64,
    /// Sum of in-flight reservations.
    pub reserved: i64,
}

/// Get the current credit balance.
///
/// An account that has never been credited reports a zero balance rather
/// than a not-found error.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .store
        .get_account(&auth.user_id)?
        .map_or(0, |account| account.balance);
    let reserved = state.store.reserved_in_flight(&auth.user_id)?;

    Ok(Json(BalanceResponse {
        balance,
        available: balance - reserved,
        reserved,
    }))
}

/// Ledger list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListLedgerQuery {
    /// Maximum number of entries to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// One ledger entry in API form.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryResponse {
    /// Entry ID.
    pub id: String,
    /// The related task, when the entry belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Signed amount in credits.
    pub amount: i64,
    /// Entry kind (`generation_charge`, `refund`, `top_up`, `adjustment`).
    pub entry_type: String,
    /// Human-readable description.
    pub description: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for LedgerEntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            task_id: entry.task_id.map(|id| id.to_string()),
            amount: entry.amount,
            entry_type: entry_type_str(entry.entry_type).to_string(),
            description: entry.description.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

fn entry_type_str(entry_type: wrapgen_core::LedgerEntryType) -> &'static str {
    use wrapgen_core::LedgerEntryType;
    match entry_type {
        LedgerEntryType::GenerationCharge => "generation_charge",
        LedgerEntryType::Refund => "refund",
        LedgerEntryType::TopUp => "top_up",
        LedgerEntryType::Adjustment => "adjustment",
    }
}

/// Ledger list response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntryResponse>,
    /// Whether more entries exist past this page.
    pub has_more: bool,
}

/// List the user's ledger history, newest first.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListLedgerQuery>,
) -> Result<Json<ListLedgerResponse>, ApiError> {
    // Fetch one more than requested to determine has_more.
    let limit = query.limit.min(100);
    let entries = state
        .store
        .list_ledger_by_user(&auth.user_id, limit + 1, query.offset)?;

    let has_more = entries.len() > limit;
    let entries: Vec<_> = entries
        .iter()
        .take(limit)
        .map(LedgerEntryResponse::from)
        .collect();

    Ok(Json(ListLedgerResponse { entries, has_more }))
}

/// Top-up request (admin only).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    /// User to credit.
    pub user_id: String,
    /// Amount in credits; must be positive.
    pub amount: i64,
    /// Reason recorded on the ledger entry.
    pub description: String,
}

/// Top-up response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpResponse {
    /// Balance after the credit.
    pub balance: i64,
}

/// Credit a user's account (admin only).
pub async fn top_up(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<TopUpRequest>,
) -> Result<Json<TopUpResponse>, ApiError> {
    let user_id = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID".into()))?;

    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let balance = state
        .store
        .top_up(&user_id, body.amount, &body.description)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user_id,
        amount = body.amount,
        balance,
        "credits added"
    );

    Ok(Json(TopUpResponse { balance }))
}

//! Chart of accounts endpoints.

use crate::dtos::{AccountListQuery, BalanceQuery, CreateAccountRequest, UpdateAccountRequest};
use crate::models::{Account, AccountBalance, CreateAccount, MasterKind, UpdateAccount};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_account(
    State(state): State<AppState>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    payload.validate()?;
    tracing::info!(code = %payload.code, account_type = ?payload.account_type, "Creating account");

    let account = state
        .db
        .create_account(&CreateAccount::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<Vec<Account>>, AppError> {
    let accounts = state
        .db
        .list_accounts(query.account_type, query.include_inactive)
        .await?;
    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.db.get_account(account_id).await?))
}

pub async fn update_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    payload.validate()?;
    let account = state
        .db
        .update_account(account_id, &UpdateAccount::from(payload))
        .await?;
    Ok(Json(account))
}

pub async fn deactivate_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    tracing::info!(account_id = %account_id, "Deactivating account");
    Ok(Json(state.db.set_account_active(account_id, false).await?))
}

pub async fn activate_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    tracing::info!(account_id = %account_id, "Activating account");
    Ok(Json(state.db.set_account_active(account_id, true).await?))
}

/// Cached balance; `?recompute=true` rebuilds it from posted lines.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<AccountBalance>, AppError> {
    Ok(Json(state.db.get_balance(account_id, query.recompute).await?))
}

/// Accounts can only be deleted while nothing references them.
pub async fn delete_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(account_id = %account_id, "Deleting account");
    state
        .db
        .delete_master(MasterKind::Account, account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

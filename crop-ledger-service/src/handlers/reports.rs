//! Financial statements.

use crate::dtos::{AsOfQuery, PeriodQuery};
use crate::models::{BalanceSheet, IncomeStatement, TrialBalance};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

pub async fn trial_balance(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<TrialBalance>, AppError> {
    let as_of = query.as_of_date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(state.db.trial_balance(as_of).await?))
}

pub async fn income_statement(
    State(state): State<AppState>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<IncomeStatement>, AppError> {
    let statement = state
        .db
        .income_statement(query.start_date, query.end_date)
        .await?;
    Ok(Json(statement))
}

pub async fn balance_sheet(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<BalanceSheet>, AppError> {
    let as_of = query.as_of_date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(state.db.balance_sheet(as_of).await?))
}

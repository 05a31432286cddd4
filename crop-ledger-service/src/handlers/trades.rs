//! Purchase, sale and expense endpoints.

use crate::dtos::{ExpenseRequest, PurchaseRequest, SaleRequest};
use crate::models::{Expense, NewExpense, NewPurchase, NewSale, Purchase, Sale};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use validator::Validate;

pub async fn create_purchase(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<Purchase>), AppError> {
    payload.validate()?;
    tracing::info!(
        crop_id = %payload.crop_id,
        supplier_id = %payload.supplier_id,
        quantity = %payload.quantity,
        unit = %payload.unit,
        "Recording purchase"
    );

    let purchase = state
        .db
        .create_purchase(&NewPurchase::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

pub async fn create_sale(
    State(state): State<AppState>,
    Json(payload): Json<SaleRequest>,
) -> Result<(StatusCode, Json<Sale>), AppError> {
    payload.validate()?;
    tracing::info!(
        crop_id = %payload.crop_id,
        customer_id = %payload.customer_id,
        quantity = %payload.quantity,
        unit = %payload.unit,
        "Recording sale"
    );

    let sale = state.db.create_sale(&NewSale::from(payload)).await?;
    Ok((StatusCode::CREATED, Json(sale)))
}

pub async fn create_expense(
    State(state): State<AppState>,
    Json(payload): Json<ExpenseRequest>,
) -> Result<(StatusCode, Json<Expense>), AppError> {
    payload.validate()?;
    tracing::info!(
        expense_account_id = %payload.expense_account_id,
        amount = %payload.amount,
        "Recording expense"
    );

    let expense = state.db.create_expense(&NewExpense::from(payload)).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

//! Stock, cardex and adjustment endpoints.

use crate::dtos::{AdjustmentRequest, DateRangeQuery};
use crate::models::{Cardex, InventoryMovement, NewAdjustment, StockSummary};
use crate::services::AdjustmentRemoval;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn stock_summary(
    State(state): State<AppState>,
) -> Result<Json<Vec<StockSummary>>, AppError> {
    Ok(Json(state.db.stock_summary().await?))
}

pub async fn get_cardex(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<Cardex>, AppError> {
    let cardex = state
        .db
        .cardex(crop_id, query.start_date, query.end_date)
        .await?;
    Ok(Json(cardex))
}

pub async fn create_adjustment(
    State(state): State<AppState>,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<(StatusCode, Json<InventoryMovement>), AppError> {
    payload.validate()?;
    tracing::info!(
        crop_id = %payload.crop_id,
        adjustment_type = ?payload.adjustment_type,
        quantity_kg = %payload.quantity_kg,
        "Recording stock adjustment"
    );

    let movement = state
        .db
        .record_adjustment(&NewAdjustment::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

pub async fn delete_adjustment(
    State(state): State<AppState>,
    Path(movement_id): Path<Uuid>,
) -> Result<Json<AdjustmentRemoval>, AppError> {
    tracing::info!(movement_id = %movement_id, "Deleting stock adjustment");
    Ok(Json(state.db.delete_adjustment(movement_id).await?))
}

//! Crop master data, daily prices and guarded crop deletion.

use crate::dtos::{
    CreateCropRequest, CropListQuery, DateRangeQuery, ForceDeleteRequest, MigrateRequest,
    PriceRequest, UpdateCropRequest,
};
use crate::models::{CreateCrop, Crop, DailyPrice, DeletionOutcome, MasterKind, UpdateCrop};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_crop(
    State(state): State<AppState>,
    Json(payload): Json<CreateCropRequest>,
) -> Result<(StatusCode, Json<Crop>), AppError> {
    payload.validate()?;
    tracing::info!(name = %payload.name, units = payload.units.len(), "Creating crop");

    let crop = state.db.create_crop(&CreateCrop::from(payload)).await?;
    Ok((StatusCode::CREATED, Json(crop)))
}

pub async fn list_crops(
    State(state): State<AppState>,
    Query(query): Query<CropListQuery>,
) -> Result<Json<Vec<Crop>>, AppError> {
    Ok(Json(state.db.list_crops(query.include_inactive).await?))
}

pub async fn get_crop(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
) -> Result<Json<Crop>, AppError> {
    Ok(Json(state.db.get_crop(crop_id).await?))
}

pub async fn update_crop(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Json(payload): Json<UpdateCropRequest>,
) -> Result<Json<Crop>, AppError> {
    payload.validate()?;
    let crop = state
        .db
        .update_crop(crop_id, &UpdateCrop::from(payload))
        .await?;
    Ok(Json(crop))
}

/// 204 when unreferenced, 409 with the dependent counts otherwise.
pub async fn delete_crop(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(crop_id = %crop_id, "Deleting crop");
    state.db.delete_master(MasterKind::Crop, crop_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn migrate_and_delete_crop(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Json(payload): Json<MigrateRequest>,
) -> Result<Json<DeletionOutcome>, AppError> {
    tracing::info!(crop_id = %crop_id, target_id = %payload.target_id, "Migrating crop dependents");
    let outcome = state
        .db
        .migrate_and_delete(MasterKind::Crop, crop_id, payload.target_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn force_delete_crop(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Json(payload): Json<ForceDeleteRequest>,
) -> Result<Json<DeletionOutcome>, AppError> {
    payload.validate()?;
    tracing::warn!(crop_id = %crop_id, "Force-deleting crop and its dependents");
    let outcome = state
        .db
        .force_delete(MasterKind::Crop, crop_id, &payload.confirmation_token)
        .await?;
    Ok(Json(outcome))
}

pub async fn upsert_price(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Json(payload): Json<PriceRequest>,
) -> Result<Json<DailyPrice>, AppError> {
    payload.validate()?;
    let price = state
        .db
        .upsert_price(crop_id, payload.price_date, &payload.unit, payload.price)
        .await?;
    Ok(Json(price))
}

pub async fn list_prices(
    State(state): State<AppState>,
    Path(crop_id): Path<Uuid>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<Vec<DailyPrice>>, AppError> {
    let prices = state
        .db
        .list_prices(crop_id, query.start_date, query.end_date)
        .await?;
    Ok(Json(prices))
}

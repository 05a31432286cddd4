//! Crop transformation endpoints.

use crate::dtos::TransformationRequest;
use crate::models::{NewTransformation, Transformation};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_transformation(
    State(state): State<AppState>,
    Json(payload): Json<TransformationRequest>,
) -> Result<(StatusCode, Json<Transformation>), AppError> {
    payload.validate()?;
    tracing::info!(
        source_crop_id = %payload.source_crop_id,
        source_quantity_kg = %payload.source_quantity_kg,
        outputs = payload.outputs.len(),
        "Recording transformation"
    );

    let transformation = state
        .db
        .transform(&NewTransformation::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(transformation)))
}

pub async fn list_transformations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Transformation>>, AppError> {
    Ok(Json(state.db.list_transformations().await?))
}

pub async fn get_transformation(
    State(state): State<AppState>,
    Path(transformation_id): Path<Uuid>,
) -> Result<Json<Transformation>, AppError> {
    Ok(Json(state.db.get_transformation(transformation_id).await?))
}

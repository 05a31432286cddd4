//! Journal entry endpoints.

use crate::dtos::{EntryListQuery, ManualEntryRequest, ReverseEntryRequest};
use crate::models::{JournalEntry, NewJournalEntry};
use crate::services::EntryFilter;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Post (or save as draft) a manually keyed entry.
pub async fn create_manual_entry(
    State(state): State<AppState>,
    Json(payload): Json<ManualEntryRequest>,
) -> Result<(StatusCode, Json<JournalEntry>), AppError> {
    payload.validate()?;
    tracing::info!(
        entry_date = %payload.date,
        lines = payload.lines.len(),
        status = ?payload.status,
        "Posting manual journal entry"
    );

    let entry = state
        .db
        .post_entry(&NewJournalEntry::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntryListQuery>,
) -> Result<Json<Vec<JournalEntry>>, AppError> {
    let entries = state.db.list_entries(&EntryFilter::from(query)).await?;
    Ok(Json(entries))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<JournalEntry>, AppError> {
    Ok(Json(state.db.get_entry(entry_id).await?))
}

pub async fn post_draft(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<JournalEntry>, AppError> {
    tracing::info!(entry_id = %entry_id, "Posting draft entry");
    Ok(Json(state.db.post_draft(entry_id).await?))
}

/// Body is optional; the reversal is dated today when no date is given.
pub async fn reverse_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    payload: Option<Json<ReverseEntryRequest>>,
) -> Result<(StatusCode, Json<JournalEntry>), AppError> {
    let Json(payload) = payload.unwrap_or_default();
    tracing::info!(entry_id = %entry_id, "Reversing journal entry");

    let reversal = state
        .db
        .reverse_entry(entry_id, payload.entry_date)
        .await?;
    Ok((StatusCode::CREATED, Json(reversal)))
}

/// Discard a draft. Posted entries are immutable and can only be reversed.
pub async fn delete_draft(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.db.delete_draft(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

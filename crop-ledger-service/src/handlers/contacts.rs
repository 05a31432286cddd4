//! Customer and supplier master data with guarded deletion.

use crate::dtos::{
    ContactListQuery, CreateContactRequest, ForceDeleteRequest, MigrateRequest,
    UpdateContactRequest,
};
use crate::models::{Contact, CreateContact, DeletionOutcome, MasterKind, UpdateContact};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_contact(
    State(state): State<AppState>,
    Json(payload): Json<CreateContactRequest>,
) -> Result<(StatusCode, Json<Contact>), AppError> {
    payload.validate()?;
    tracing::info!(
        name = %payload.name,
        is_customer = payload.is_customer,
        is_supplier = payload.is_supplier,
        "Creating contact"
    );

    let contact = state
        .db
        .create_contact(&CreateContact::from(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<Vec<Contact>>, AppError> {
    let contacts = state
        .db
        .list_contacts(query.role, query.include_inactive)
        .await?;
    Ok(Json(contacts))
}

pub async fn get_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> Result<Json<Contact>, AppError> {
    Ok(Json(state.db.get_contact(contact_id).await?))
}

pub async fn update_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Json(payload): Json<UpdateContactRequest>,
) -> Result<Json<Contact>, AppError> {
    payload.validate()?;
    let contact = state
        .db
        .update_contact(contact_id, &UpdateContact::from(payload))
        .await?;
    Ok(Json(contact))
}

pub async fn delete_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(contact_id = %contact_id, "Deleting contact");
    state
        .db
        .delete_master(MasterKind::Contact, contact_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn migrate_and_delete_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Json(payload): Json<MigrateRequest>,
) -> Result<Json<DeletionOutcome>, AppError> {
    tracing::info!(
        contact_id = %contact_id,
        target_id = %payload.target_id,
        "Migrating contact dependents"
    );
    let outcome = state
        .db
        .migrate_and_delete(MasterKind::Contact, contact_id, payload.target_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn force_delete_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Json(payload): Json<ForceDeleteRequest>,
) -> Result<Json<DeletionOutcome>, AppError> {
    payload.validate()?;
    tracing::warn!(contact_id = %contact_id, "Force-deleting contact and its dependents");
    let outcome = state
        .db
        .force_delete(MasterKind::Contact, contact_id, &payload.confirmation_token)
        .await?;
    Ok(Json(outcome))
}

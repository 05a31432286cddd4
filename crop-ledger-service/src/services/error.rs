//! Domain errors for crop-ledger-service and their HTTP mapping.

use crate::models::ConflictReport;
use crate::services::metrics::ERRORS_TOTAL;
use rust_decimal::Decimal;
use serde_json::json;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Rejected before any mutation; message is surfaced verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("Entry lines are not balanced")]
    UnbalancedEntry {
        total_debit: Decimal,
        total_credit: Decimal,
    },

    #[error("Cost allocation ratios sum to {total}, which exceeds 1")]
    AllocationOverflow { total: Decimal },

    #[error(
        "Insufficient stock for crop {crop_id}: available {available_kg} kg, requested {requested_kg} kg"
    )]
    InsufficientStock {
        crop_id: Uuid,
        available_kg: Decimal,
        requested_kg: Decimal,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{} {} is referenced by other records", .0.entity_type, .0.entity_id)]
    Conflict(ConflictReport),

    #[error(
        "Dependents of {} {} changed since the confirmation token was issued",
        .0.entity_type,
        .0.entity_id
    )]
    StaleConfirmation(ConflictReport),

    #[error("Invalid migration target: {0}")]
    InvalidTarget(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("Posting account with code '{0}' does not exist")]
    MissingPostingAccount(String),

    #[error("Transaction failure: {0}")]
    Transaction(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        LedgerError::NotFound { entity, id }
    }

    /// Label used for the error counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::UnbalancedEntry { .. } => "unbalanced_entry",
            LedgerError::AllocationOverflow { .. } => "allocation_overflow",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::StaleConfirmation(_) => "stale_confirmation",
            LedgerError::InvalidTarget(_) => "invalid_target",
            LedgerError::Duplicate(_) => "duplicate",
            LedgerError::MissingPostingAccount(_) => "missing_posting_account",
            LedgerError::Transaction(_) => "db_error",
        }
    }
}

/// Map a unique-constraint violation to `Duplicate`, anything else to `Transaction`.
pub fn map_unique_violation(err: sqlx::Error, message: impl FnOnce() -> String) -> LedgerError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            LedgerError::Duplicate(message())
        }
        other => LedgerError::Transaction(other),
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        ERRORS_TOTAL.with_label_values(&[err.error_type()]).inc();

        let detail = err.to_string();
        match err {
            LedgerError::Validation(_) => AppError::unprocessable(detail),
            LedgerError::UnbalancedEntry {
                total_debit,
                total_credit,
            } => AppError::Unprocessable {
                detail,
                context: Some(json!({
                    "total_debit": total_debit,
                    "total_credit": total_credit,
                })),
            },
            LedgerError::AllocationOverflow { total } => AppError::Unprocessable {
                detail,
                context: Some(json!({ "ratio_total": total })),
            },
            LedgerError::InsufficientStock {
                crop_id,
                available_kg,
                requested_kg,
            } => AppError::Unprocessable {
                detail,
                context: Some(json!({
                    "crop_id": crop_id,
                    "available_kg": available_kg,
                    "requested_kg": requested_kg,
                })),
            },
            LedgerError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(detail)),
            LedgerError::Conflict(report) | LedgerError::StaleConfirmation(report) => {
                AppError::ConflictWithDetails {
                    detail,
                    context: json!(report),
                }
            }
            LedgerError::InvalidTarget(_) => AppError::unprocessable(detail),
            LedgerError::Duplicate(_) => AppError::Conflict(anyhow::anyhow!(detail)),
            LedgerError::MissingPostingAccount(_) => AppError::ConfigError(anyhow::anyhow!(detail)),
            LedgerError::Transaction(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}

//! Guarded deletion of master records that transactional rows reference.

use crate::services::LedgerError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Master record kinds protected by the deletion guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasterKind {
    Crop,
    Contact,
    Account,
}

/// A column in another table that points at a master record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentTable {
    /// Key reported in conflict counts.
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
}

const fn dependent(name: &'static str, table: &'static str, column: &'static str) -> DependentTable {
    DependentTable {
        name,
        table,
        column,
    }
}

const CROP_DEPENDENTS: &[DependentTable] = &[
    dependent("inventory_movements", "inventory_movements", "crop_id"),
    dependent("daily_prices", "daily_prices", "crop_id"),
    dependent("purchases", "purchases", "crop_id"),
    dependent("sales", "sales", "crop_id"),
    dependent("transformations", "transformations", "source_crop_id"),
    dependent("transformation_outputs", "transformation_outputs", "output_crop_id"),
];

const CONTACT_DEPENDENTS: &[DependentTable] = &[
    dependent("purchases", "purchases", "supplier_id"),
    dependent("sales", "sales", "customer_id"),
    dependent("expenses", "expenses", "contact_id"),
    dependent("journal_lines", "journal_lines", "contact_id"),
];

const ACCOUNT_DEPENDENTS: &[DependentTable] = &[
    dependent("journal_lines", "journal_lines", "account_id"),
    dependent("expenses", "expenses", "expense_account_id"),
    dependent("expenses", "expenses", "payment_account_id"),
];

impl MasterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Contact => "contact",
            Self::Account => "account",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Crop => "crops",
            Self::Contact => "contacts",
            Self::Account => "accounts",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            Self::Crop => "crop_id",
            Self::Contact => "contact_id",
            Self::Account => "account_id",
        }
    }

    pub fn dependents(&self) -> &'static [DependentTable] {
        match self {
            Self::Crop => CROP_DEPENDENTS,
            Self::Contact => CONTACT_DEPENDENTS,
            Self::Account => ACCOUNT_DEPENDENTS,
        }
    }

    /// Accounts anchor the immutable journal and can only be deleted when unused.
    pub fn supports_resolution(&self) -> bool {
        !matches!(self, Self::Account)
    }
}

impl fmt::Display for MasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest of the dependents a caller saw, required to force-delete.
pub fn confirmation_token(kind: MasterKind, id: Uuid, conflicts: &BTreeMap<String, i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(id.as_bytes());
    for (name, count) in conflicts {
        hasher.update(b"|");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(count.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Dependents blocking the deletion of a master record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub entity_type: MasterKind,
    pub entity_id: Uuid,
    pub conflicts: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_delete_token: Option<String>,
}

impl ConflictReport {
    /// Build a report from raw per-table counts, dropping zero counts.
    pub fn new(entity_type: MasterKind, entity_id: Uuid, counts: BTreeMap<String, i64>) -> Self {
        let conflicts: BTreeMap<String, i64> =
            counts.into_iter().filter(|(_, count)| *count > 0).collect();
        let force_delete_token = (entity_type.supports_resolution() && !conflicts.is_empty())
            .then(|| confirmation_token(entity_type, entity_id, &conflicts));

        Self {
            entity_type,
            entity_id,
            conflicts,
            force_delete_token,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn total(&self) -> i64 {
        self.conflicts.values().sum()
    }

    /// Whether `token` still describes these dependents.
    pub fn confirms(&self, token: &str) -> bool {
        self.force_delete_token.as_deref() == Some(token)
    }
}

/// Lifecycle of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionState {
    Requested,
    Checked,
    Deleted,
    Conflicted,
    MigratedAndDeleted,
    ForceDeleted,
    /// Migration or force delete failed and was rolled back.
    Cancelled,
}

impl DeletionState {
    /// Move to `next`, rejecting transitions the protocol does not allow.
    pub fn advance(self, next: DeletionState) -> Result<DeletionState, LedgerError> {
        use DeletionState::*;

        let allowed = matches!(
            (self, next),
            (Requested, Checked)
                | (Checked, Deleted)
                | (Checked, Conflicted)
                | (Conflicted, MigratedAndDeleted)
                | (Conflicted, ForceDeleted)
                | (Conflicted, Cancelled)
        );

        if allowed {
            Ok(next)
        } else {
            Err(LedgerError::validation(format!(
                "Deletion cannot move from {:?} to {:?}",
                self, next
            )))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Deleted | Self::MigratedAndDeleted | Self::ForceDeleted | Self::Cancelled
        )
    }
}

/// Result of a completed deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionOutcome {
    pub entity_type: MasterKind,
    pub entity_id: Uuid,
    pub state: DeletionState,
    /// Dependents re-pointed or removed on the way.
    pub affected: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_to: Option<Uuid>,
}

//! Referential-integrity guard for deleting crops, contacts and accounts.
//!
//! A deletion is checked against every table that references the record.
//! Unreferenced records go straight away; referenced ones come back as a
//! conflict report the caller resolves by migrating the dependents to
//! another record or by force-deleting them with the report's token.

use super::cardex::{delete_document_movements, lock_crops, rebalance_crop};
use super::journal::compensate_entry;
use super::metrics::{DB_QUERY_DURATION, DELETIONS_TOTAL};
use super::{Database, LedgerError};
use crate::models::{ConflictReport, DeletionOutcome, DeletionState, MasterKind};
use chrono::NaiveDate;
use sqlx::postgres::PgConnection;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Crops whose cardex lost movements, with the earliest date to replay from.
#[derive(Debug, Default)]
struct TouchedCrops(BTreeMap<Uuid, NaiveDate>);

impl TouchedCrops {
    fn extend(&mut self, rows: Vec<(Uuid, NaiveDate)>) {
        for (crop_id, date) in rows {
            self.0
                .entry(crop_id)
                .and_modify(|d| *d = (*d).min(date))
                .or_insert(date);
        }
    }

    /// Replay each surviving crop; any negative snapshot aborts the transaction.
    /// The crops must already be locked.
    async fn replay(self, conn: &mut PgConnection, deleted: Option<Uuid>) -> Result<(), LedgerError> {
        for (crop_id, from) in self.0 {
            if Some(crop_id) == deleted {
                continue;
            }
            rebalance_crop(conn, crop_id, Some(from)).await?;
        }
        Ok(())
    }
}

/// Lock the master row; false when it does not exist.
async fn lock_master(conn: &mut PgConnection, kind: MasterKind, id: Uuid) -> Result<bool, LedgerError> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = $1 FOR UPDATE",
        kind.table(),
        kind.id_column()
    );
    let found: Option<i32> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Crops whose cardex a force delete of the record would rewrite.
async fn affected_crops(conn: &mut PgConnection, kind: MasterKind, id: Uuid) -> Result<Vec<Uuid>, LedgerError> {
    let sql = match kind {
        MasterKind::Crop => {
            r#"
            SELECT $1::uuid
            UNION
            SELECT m.crop_id FROM inventory_movements m
            WHERE m.reference_type = 'transformation'
              AND m.reference_id IN (
                    SELECT transformation_id FROM transformations WHERE source_crop_id = $1
                    UNION
                    SELECT transformation_id FROM transformation_outputs WHERE output_crop_id = $1)
            "#
        }
        MasterKind::Contact => {
            r#"
            SELECT DISTINCT m.crop_id FROM inventory_movements m
            WHERE (m.reference_type = 'purchase'
                   AND m.reference_id IN (SELECT purchase_id FROM purchases WHERE supplier_id = $1))
               OR (m.reference_type = 'sale'
                   AND m.reference_id IN (SELECT sale_id FROM sales WHERE customer_id = $1))
            "#
        }
        MasterKind::Account => return Ok(Vec::new()),
    };
    Ok(sqlx::query_scalar(sql).bind(id).fetch_all(&mut *conn).await?)
}

/// Count rows referencing the record, per dependent key.
async fn count_dependents(
    conn: &mut PgConnection,
    kind: MasterKind,
    id: Uuid,
) -> Result<ConflictReport, LedgerError> {
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for dependent in kind.dependents() {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            dependent.table, dependent.column
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        *counts.entry(dependent.name.to_string()).or_default() += count;
    }
    Ok(ConflictReport::new(kind, id, counts))
}

async fn is_system_account(conn: &mut PgConnection, account_id: Uuid) -> Result<bool, LedgerError> {
    let is_system: Option<bool> =
        sqlx::query_scalar("SELECT is_system FROM accounts WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(is_system.unwrap_or(false))
}

async fn delete_master(conn: &mut PgConnection, kind: MasterKind, id: Uuid) -> Result<(), LedgerError> {
    let sql = format!("DELETE FROM {} WHERE {} = $1", kind.table(), kind.id_column());
    sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(())
}

/// Delete a transactional document with its movements, reversing its journal entry.
async fn remove_document(
    conn: &mut PgConnection,
    touched: &mut TouchedCrops,
    reference_type: &str,
    table: &str,
    id_column: &str,
    id: Uuid,
    journal_entry_id: Option<Uuid>,
) -> Result<(), LedgerError> {
    touched.extend(delete_document_movements(conn, reference_type, id).await?);
    compensate_entry(conn, journal_entry_id).await?;
    let sql = format!("DELETE FROM {} WHERE {} = $1", table, id_column);
    sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(())
}

async fn documents(
    conn: &mut PgConnection,
    sql: &str,
    id: Uuid,
) -> Result<Vec<(Uuid, Option<Uuid>)>, LedgerError> {
    Ok(sqlx::query_as(sql).bind(id).fetch_all(&mut *conn).await?)
}

/// Remove everything that references a crop, leaving only the crop row.
async fn cascade_crop(conn: &mut PgConnection, crop_id: Uuid) -> Result<TouchedCrops, LedgerError> {
    let mut touched = TouchedCrops::default();

    let transformations = documents(
        conn,
        r#"
        SELECT transformation_id, journal_entry_id FROM transformations
        WHERE source_crop_id = $1
           OR transformation_id IN (
                SELECT transformation_id FROM transformation_outputs WHERE output_crop_id = $1)
        "#,
        crop_id,
    )
    .await?;
    for (id, entry) in transformations {
        remove_document(conn, &mut touched, "transformation", "transformations", "transformation_id", id, entry).await?;
    }

    let purchases = documents(
        conn,
        "SELECT purchase_id, journal_entry_id FROM purchases WHERE crop_id = $1",
        crop_id,
    )
    .await?;
    for (id, entry) in purchases {
        remove_document(conn, &mut touched, "purchase", "purchases", "purchase_id", id, entry).await?;
    }

    let sales = documents(
        conn,
        "SELECT sale_id, journal_entry_id FROM sales WHERE crop_id = $1",
        crop_id,
    )
    .await?;
    for (id, entry) in sales {
        remove_document(conn, &mut touched, "sale", "sales", "sale_id", id, entry).await?;
    }

    let adjustments = documents(
        conn,
        "SELECT movement_id, journal_entry_id FROM inventory_movements WHERE crop_id = $1 AND movement_type = 'adjustment'",
        crop_id,
    )
    .await?;
    for (id, entry) in adjustments {
        touched.extend(delete_document_movements(conn, "adjustment", id).await?);
        compensate_entry(conn, entry).await?;
    }

    sqlx::query("DELETE FROM inventory_movements WHERE crop_id = $1")
        .bind(crop_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM daily_prices WHERE crop_id = $1")
        .bind(crop_id)
        .execute(&mut *conn)
        .await?;

    Ok(touched)
}

/// Remove a contact's documents and detach it from remaining journal lines.
async fn cascade_contact(conn: &mut PgConnection, contact_id: Uuid) -> Result<TouchedCrops, LedgerError> {
    let mut touched = TouchedCrops::default();

    let purchases = documents(
        conn,
        "SELECT purchase_id, journal_entry_id FROM purchases WHERE supplier_id = $1",
        contact_id,
    )
    .await?;
    for (id, entry) in purchases {
        remove_document(conn, &mut touched, "purchase", "purchases", "purchase_id", id, entry).await?;
    }

    let sales = documents(
        conn,
        "SELECT sale_id, journal_entry_id FROM sales WHERE customer_id = $1",
        contact_id,
    )
    .await?;
    for (id, entry) in sales {
        remove_document(conn, &mut touched, "sale", "sales", "sale_id", id, entry).await?;
    }

    let expenses = documents(
        conn,
        "SELECT expense_id, journal_entry_id FROM expenses WHERE contact_id = $1",
        contact_id,
    )
    .await?;
    for (id, entry) in expenses {
        remove_document(conn, &mut touched, "expense", "expenses", "expense_id", id, entry).await?;
    }

    sqlx::query("UPDATE journal_lines SET contact_id = NULL WHERE contact_id = $1")
        .bind(contact_id)
        .execute(&mut *conn)
        .await?;

    Ok(touched)
}

/// Re-point every dependent of `source` to `target`.
async fn repoint(
    conn: &mut PgConnection,
    kind: MasterKind,
    source: Uuid,
    target: Uuid,
) -> Result<(), LedgerError> {
    if kind == MasterKind::Crop {
        sqlx::query(
            r#"
            INSERT INTO crop_units (crop_id, unit, kg_factor)
            SELECT $2, unit, kg_factor FROM crop_units WHERE crop_id = $1
            ON CONFLICT (crop_id, unit) DO NOTHING
            "#,
        )
        .bind(source)
        .bind(target)
        .execute(&mut *conn)
        .await?;

        // The target's own quote wins where both crops priced the same day and unit.
        sqlx::query(
            r#"
            DELETE FROM daily_prices s
            USING daily_prices t
            WHERE s.crop_id = $1 AND t.crop_id = $2
              AND s.price_date = t.price_date AND s.unit = t.unit
            "#,
        )
        .bind(source)
        .bind(target)
        .execute(&mut *conn)
        .await?;
    }

    if kind == MasterKind::Contact {
        sqlx::query(
            r#"
            UPDATE contacts t
            SET is_customer = t.is_customer OR s.is_customer,
                is_supplier = t.is_supplier OR s.is_supplier,
                updated_utc = NOW()
            FROM contacts s
            WHERE s.contact_id = $1 AND t.contact_id = $2
            "#,
        )
        .bind(source)
        .bind(target)
        .execute(&mut *conn)
        .await?;
    }

    for dependent in kind.dependents() {
        let sql = format!(
            "UPDATE {table} SET {column} = $2 WHERE {column} = $1",
            table = dependent.table,
            column = dependent.column
        );
        sqlx::query(&sql)
            .bind(source)
            .bind(target)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

impl Database {
    /// Delete a master record if nothing references it; otherwise report the
    /// dependents and leave the record untouched.
    #[instrument(skip(self), fields(entity_type = %kind))]
    pub async fn delete_master(&self, kind: MasterKind, id: Uuid) -> Result<DeletionOutcome, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_master"])
            .start_timer();

        let state = DeletionState::Requested;
        let mut tx = self.begin().await?;
        if !lock_master(&mut tx, kind, id).await? {
            return Err(LedgerError::not_found(entity_name(kind), id));
        }

        if kind == MasterKind::Account && is_system_account(&mut tx, id).await? {
            return Err(LedgerError::validation("System accounts cannot be deleted"));
        }

        let report = count_dependents(&mut tx, kind, id).await?;
        let state = state.advance(DeletionState::Checked)?;

        if !report.is_clear() {
            state.advance(DeletionState::Conflicted)?;
            tx.rollback().await?;
            DELETIONS_TOTAL
                .with_label_values(&[kind.as_str(), "conflicted"])
                .inc();
            info!(entity_id = %id, dependents = report.total(), "Deletion blocked by dependents");
            return Err(LedgerError::Conflict(report));
        }

        delete_master(&mut tx, kind, id).await?;
        tx.commit().await?;
        timer.observe_duration();

        DELETIONS_TOTAL.with_label_values(&[kind.as_str(), "deleted"]).inc();
        info!(entity_id = %id, "Master record deleted");

        Ok(DeletionOutcome {
            entity_type: kind,
            entity_id: id,
            state: state.advance(DeletionState::Deleted)?,
            affected: BTreeMap::new(),
            migrated_to: None,
        })
    }

    /// Move every dependent of `source` onto `target`, then delete `source`.
    #[instrument(skip(self), fields(entity_type = %kind))]
    pub async fn migrate_and_delete(
        &self,
        kind: MasterKind,
        source: Uuid,
        target: Uuid,
    ) -> Result<DeletionOutcome, LedgerError> {
        if !kind.supports_resolution() {
            return Err(LedgerError::validation(format!(
                "A referenced {} cannot be migrated",
                kind
            )));
        }
        if source == target {
            return Err(LedgerError::InvalidTarget(format!(
                "{} cannot be migrated onto itself",
                entity_name(kind)
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["migrate_and_delete"])
            .start_timer();

        let state = DeletionState::Requested;
        let mut tx = self.begin().await?;

        // Lock both rows in id order.
        let (first, second) = if source < target { (source, target) } else { (target, source) };
        let first_found = lock_master(&mut tx, kind, first).await?;
        let second_found = lock_master(&mut tx, kind, second).await?;
        let (source_found, target_found) = if first == source {
            (first_found, second_found)
        } else {
            (second_found, first_found)
        };
        if !source_found {
            return Err(LedgerError::not_found(entity_name(kind), source));
        }
        if !target_found {
            return Err(LedgerError::InvalidTarget(format!(
                "{} {} does not exist",
                entity_name(kind),
                target
            )));
        }

        let report = count_dependents(&mut tx, kind, source).await?;
        let state = state.advance(DeletionState::Checked)?;

        let state = if report.is_clear() {
            delete_master(&mut tx, kind, source).await?;
            state.advance(DeletionState::Deleted)?
        } else {
            let state = state.advance(DeletionState::Conflicted)?;
            let migrated: Result<(), LedgerError> = async {
                repoint(&mut tx, kind, source, target).await?;
                delete_master(&mut tx, kind, source).await?;
                if kind == MasterKind::Crop {
                    rebalance_crop(&mut tx, target, None).await?;
                }
                Ok(())
            }
            .await;
            migrated.map_err(|e| cancel(kind, source, state, e))?;
            state.advance(DeletionState::MigratedAndDeleted)?
        };

        tx.commit().await?;
        timer.observe_duration();

        DELETIONS_TOTAL
            .with_label_values(&[kind.as_str(), outcome_label(state)])
            .inc();
        info!(
            source_id = %source,
            target_id = %target,
            dependents = report.total(),
            "Master record migrated and deleted"
        );

        Ok(DeletionOutcome {
            entity_type: kind,
            entity_id: source,
            state,
            affected: report.conflicts,
            migrated_to: Some(target),
        })
    }

    /// Delete a record together with everything referencing it.
    ///
    /// `confirmation_token` must match the token of the conflict report the
    /// caller saw; if the dependents changed since, a fresh report is returned.
    /// Financial effects of removed documents are reversed and every affected
    /// cardex is replayed, all in one transaction.
    #[instrument(skip(self, confirmation_token), fields(entity_type = %kind))]
    pub async fn force_delete(
        &self,
        kind: MasterKind,
        id: Uuid,
        confirmation_token: &str,
    ) -> Result<DeletionOutcome, LedgerError> {
        if !kind.supports_resolution() {
            return Err(LedgerError::validation(format!(
                "A referenced {} cannot be force-deleted",
                kind
            )));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["force_delete"])
            .start_timer();

        let state = DeletionState::Requested;
        let mut tx = self.begin().await?;

        // Crops go first, in id order, as on every stock write; the
        // reversing entries lock their accounts after them.
        let mut crops = affected_crops(&mut tx, kind, id).await?;
        lock_crops(&mut tx, &crops).await?;
        if !lock_master(&mut tx, kind, id).await? {
            return Err(LedgerError::not_found(entity_name(kind), id));
        }

        let report = count_dependents(&mut tx, kind, id).await?;
        let state = state.advance(DeletionState::Checked)?;

        let state = if report.is_clear() {
            delete_master(&mut tx, kind, id).await?;
            state.advance(DeletionState::Deleted)?
        } else {
            let state = state.advance(DeletionState::Conflicted)?;
            if !report.confirms(confirmation_token) {
                warn!(entity_id = %id, "Force delete refused: stale confirmation token");
                return Err(LedgerError::StaleConfirmation(report));
            }

            // Documents written between the first read and the locks.
            let late: Vec<Uuid> = affected_crops(&mut tx, kind, id)
                .await?
                .into_iter()
                .filter(|c| !crops.contains(c))
                .collect();
            lock_crops(&mut tx, &late).await?;
            crops.extend(late);

            let removed: Result<(), LedgerError> = async {
                let touched = if kind == MasterKind::Crop {
                    cascade_crop(&mut tx, id).await?
                } else {
                    cascade_contact(&mut tx, id).await?
                };
                delete_master(&mut tx, kind, id).await?;
                touched.replay(&mut tx, Some(id)).await
            }
            .await;
            removed.map_err(|e| cancel(kind, id, state, e))?;
            state.advance(DeletionState::ForceDeleted)?
        };

        tx.commit().await?;
        timer.observe_duration();

        DELETIONS_TOTAL
            .with_label_values(&[kind.as_str(), outcome_label(state)])
            .inc();
        info!(
            entity_id = %id,
            dependents = report.total(),
            crops = crops.len(),
            "Master record force-deleted"
        );

        Ok(DeletionOutcome {
            entity_type: kind,
            entity_id: id,
            state,
            affected: report.conflicts,
            migrated_to: None,
        })
    }
}

fn entity_name(kind: MasterKind) -> &'static str {
    match kind {
        MasterKind::Crop => "Crop",
        MasterKind::Contact => "Contact",
        MasterKind::Account => "Account",
    }
}

fn outcome_label(state: DeletionState) -> &'static str {
    match state {
        DeletionState::MigratedAndDeleted => "migrated",
        DeletionState::ForceDeleted => "forced",
        DeletionState::Conflicted => "conflicted",
        DeletionState::Cancelled => "cancelled",
        _ => "deleted",
    }
}

/// A confirmed resolution failed part way; the transaction rolls back and
/// the record stays as it was.
fn cancel(kind: MasterKind, id: Uuid, state: DeletionState, error: LedgerError) -> LedgerError {
    if let Ok(cancelled) = state.advance(DeletionState::Cancelled) {
        DELETIONS_TOTAL
            .with_label_values(&[kind.as_str(), outcome_label(cancelled)])
            .inc();
    }
    warn!(entity_id = %id, error = %error, "Deletion cancelled");
    error
}

//! Inventory cardex: movement posting, replay and adjustments.

use super::journal::{compensate_entry, insert_entry};
use super::metrics::{DB_QUERY_DURATION, INVENTORY_MOVEMENTS_TOTAL};
use super::{Database, LedgerError};
use crate::models::{
    replay_balances, round_money, AdjustmentType, Cardex, Direction, InventoryMovement,
    JournalLineInput, MovementType, NewAdjustment, NewJournalEntry, NewMovement, SourceType,
    StockSummary, StockTotals, StockValuation,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgConnection;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const MOVEMENT_COLUMNS: &str = "movement_id, sequence, crop_id, movement_date, movement_type, direction, adjustment_type, quantity_kg, unit_cost, total_value, balance_kg, is_waste, reference_type, reference_id, journal_entry_id, notes, created_utc";

/// Result of removing an adjustment.
#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentRemoval {
    pub movement_id: Uuid,
    pub crop_id: Uuid,
    pub reversal_entry_id: Option<Uuid>,
    pub balance_kg: Decimal,
}

/// Lock one crop row for the rest of the transaction and return its name.
pub(crate) async fn lock_crop(conn: &mut PgConnection, crop_id: Uuid) -> Result<String, LedgerError> {
    sqlx::query_scalar("SELECT name FROM crops WHERE crop_id = $1 FOR UPDATE")
        .bind(crop_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Crop", crop_id))
}

/// Lock several crops in id order.
pub(crate) async fn lock_crops(conn: &mut PgConnection, crop_ids: &[Uuid]) -> Result<(), LedgerError> {
    let mut ids = crop_ids.to_vec();
    ids.sort();
    ids.dedup();
    for crop_id in ids {
        lock_crop(conn, crop_id).await?;
    }
    Ok(())
}

/// Quantity and weighted-average value currently on hand.
pub(crate) async fn stock_valuation(
    conn: &mut PgConnection,
    crop_id: Uuid,
) -> Result<StockValuation, LedgerError> {
    let (quantity_kg, value): (Decimal, Decimal) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN direction = 'in' THEN quantity_kg ELSE -quantity_kg END), 0),
            COALESCE(SUM(CASE WHEN direction = 'in' THEN total_value ELSE -total_value END), 0)
        FROM inventory_movements
        WHERE crop_id = $1
        "#,
    )
    .bind(crop_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(StockValuation { quantity_kg, value })
}

/// Balance snapshot of the last movement ordered before `date` (or on it,
/// when `inclusive`).
async fn balance_before(
    conn: &mut PgConnection,
    crop_id: Uuid,
    date: NaiveDate,
    inclusive: bool,
) -> Result<Decimal, LedgerError> {
    let sql = format!(
        r#"
        SELECT balance_kg FROM inventory_movements
        WHERE crop_id = $1 AND movement_date {} $2
        ORDER BY movement_date DESC, sequence DESC
        LIMIT 1
        "#,
        if inclusive { "<=" } else { "<" }
    );
    let balance: Option<Decimal> = sqlx::query_scalar(&sql)
        .bind(crop_id)
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(balance.unwrap_or(Decimal::ZERO))
}

/// Replay the crop's movements from `from` (or from the first one) and
/// rewrite every snapshot that changed. The crop must already be locked.
pub(crate) async fn rebalance_crop(
    conn: &mut PgConnection,
    crop_id: Uuid,
    from: Option<NaiveDate>,
) -> Result<usize, LedgerError> {
    let opening = match from {
        Some(date) => balance_before(conn, crop_id, date, false).await?,
        None => Decimal::ZERO,
    };

    let rows: Vec<(Uuid, String, Decimal, Decimal)> = sqlx::query_as(
        r#"
        SELECT movement_id, direction, quantity_kg, balance_kg
        FROM inventory_movements
        WHERE crop_id = $1 AND ($2::date IS NULL OR movement_date >= $2)
        ORDER BY movement_date, sequence
        "#,
    )
    .bind(crop_id)
    .bind(from)
    .fetch_all(&mut *conn)
    .await?;

    let mut steps = Vec::with_capacity(rows.len());
    for (_, direction, quantity, _) in &rows {
        let direction = Direction::try_from(direction.clone())
            .map_err(|e| LedgerError::Transaction(sqlx::Error::Decode(Box::new(e))))?;
        steps.push((direction, *quantity));
    }

    let balances = replay_balances(opening, steps).map_err(|s| LedgerError::InsufficientStock {
        crop_id,
        available_kg: s.available_kg,
        requested_kg: s.requested_kg,
    })?;

    let mut rewritten = 0;
    for ((movement_id, _, _, stored), balance) in rows.iter().zip(balances) {
        if *stored != balance {
            sqlx::query("UPDATE inventory_movements SET balance_kg = $2 WHERE movement_id = $1")
                .bind(movement_id)
                .bind(balance)
                .execute(&mut *conn)
                .await?;
            rewritten += 1;
        }
    }

    if rewritten > 0 {
        debug!(crop_id = %crop_id, rewritten = rewritten, "Cardex snapshots rewritten");
    }
    Ok(rewritten)
}

/// Append a movement to a locked crop's cardex.
///
/// The snapshot is the balance after the last movement on or before the
/// movement date; later movements are replayed when the movement is back-dated.
pub(crate) async fn append_movement(
    conn: &mut PgConnection,
    movement: &NewMovement,
) -> Result<InventoryMovement, LedgerError> {
    if movement.quantity_kg <= Decimal::ZERO {
        return Err(LedgerError::validation(
            "Movement quantity must be greater than zero",
        ));
    }
    let direction = movement.direction()?;

    if direction == Direction::Out {
        let on_hand = stock_valuation(conn, movement.crop_id).await?.quantity_kg;
        if movement.quantity_kg > on_hand {
            return Err(LedgerError::InsufficientStock {
                crop_id: movement.crop_id,
                available_kg: on_hand,
                requested_kg: movement.quantity_kg,
            });
        }
    }

    let before = balance_before(conn, movement.crop_id, movement.movement_date, true).await?;
    let balance_kg = direction.apply(before, movement.quantity_kg);
    if balance_kg < Decimal::ZERO {
        return Err(LedgerError::InsufficientStock {
            crop_id: movement.crop_id,
            available_kg: before,
            requested_kg: movement.quantity_kg,
        });
    }

    let stored = sqlx::query_as::<_, InventoryMovement>(&format!(
        r#"
        INSERT INTO inventory_movements
            (movement_id, crop_id, movement_date, movement_type, direction, adjustment_type,
             quantity_kg, unit_cost, total_value, balance_kg, is_waste,
             reference_type, reference_id, journal_entry_id, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        MOVEMENT_COLUMNS
    ))
    .bind(movement.movement_id)
    .bind(movement.crop_id)
    .bind(movement.movement_date)
    .bind(movement.movement_type.as_str())
    .bind(direction.as_str())
    .bind(movement.adjustment_type.map(|a| a.as_str()))
    .bind(movement.quantity_kg)
    .bind(movement.unit_cost)
    .bind(movement.total_value)
    .bind(balance_kg)
    .bind(movement.is_waste)
    .bind(movement.reference_type)
    .bind(movement.reference_id)
    .bind(movement.journal_entry_id)
    .bind(&movement.notes)
    .fetch_one(&mut *conn)
    .await?;

    let later: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM inventory_movements WHERE crop_id = $1 AND movement_date > $2)",
    )
    .bind(movement.crop_id)
    .bind(movement.movement_date)
    .fetch_one(&mut *conn)
    .await?;
    if later {
        rebalance_crop(conn, movement.crop_id, Some(movement.movement_date)).await?;
    }

    INVENTORY_MOVEMENTS_TOTAL
        .with_label_values(&[movement.movement_type.as_str()])
        .inc();

    Ok(stored)
}

/// Delete the movements of one source document, returning the crops they
/// touched and the earliest date on each.
pub(crate) async fn delete_document_movements(
    conn: &mut PgConnection,
    reference_type: &str,
    reference_id: Uuid,
) -> Result<Vec<(Uuid, NaiveDate)>, LedgerError> {
    let rows: Vec<(Uuid, NaiveDate)> = sqlx::query_as(
        r#"
        DELETE FROM inventory_movements
        WHERE reference_type = $1 AND reference_id = $2
        RETURNING crop_id, movement_date
        "#,
    )
    .bind(reference_type)
    .bind(reference_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

impl Database {
    /// Record a spoilage, shortage or surplus at weighted-average cost.
    #[instrument(skip(self, adjustment), fields(crop_id = %adjustment.crop_id, adjustment_type = adjustment.adjustment_type.as_str()))]
    pub async fn record_adjustment(
        &self,
        adjustment: &NewAdjustment,
    ) -> Result<InventoryMovement, LedgerError> {
        let quantity_kg = adjustment.normalized_quantity()?;
        let direction = adjustment.adjustment_type.direction();

        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_adjustment"])
            .start_timer();

        let mut tx = self.begin().await?;
        let crop_name = lock_crop(&mut tx, adjustment.crop_id).await?;
        let stock = stock_valuation(&mut tx, adjustment.crop_id).await?;

        let value = match direction {
            Direction::Out => {
                if quantity_kg > stock.quantity_kg {
                    return Err(LedgerError::InsufficientStock {
                        crop_id: adjustment.crop_id,
                        available_kg: stock.quantity_kg,
                        requested_kg: quantity_kg,
                    });
                }
                stock.issue_cost(quantity_kg)
            }
            Direction::In => round_money(stock.unit_cost() * quantity_kg),
        };

        let mut movement = NewMovement::valued(
            adjustment.crop_id,
            adjustment.adjustment_date,
            MovementType::Adjustment,
            quantity_kg,
            value,
            "adjustment",
            Uuid::nil(),
        );
        movement.reference_id = movement.movement_id;
        movement.adjustment_type = Some(adjustment.adjustment_type);
        movement.notes = adjustment.notes.clone();

        if value > Decimal::ZERO {
            let accounts = self.posting_accounts(&mut tx).await?;
            let lines = match adjustment.adjustment_type {
                AdjustmentType::Spoilage | AdjustmentType::Shortage => vec![
                    JournalLineInput::debit(accounts.inventory_loss, value),
                    JournalLineInput::credit(accounts.inventory, value),
                ],
                AdjustmentType::Surplus => vec![
                    JournalLineInput::debit(accounts.inventory, value),
                    JournalLineInput::credit(accounts.inventory_gain, value),
                ],
            };
            let entry = insert_entry(
                &mut tx,
                &NewJournalEntry::posted(
                    adjustment.adjustment_date,
                    format!(
                        "Inventory {} of {} kg {}",
                        adjustment.adjustment_type.as_str(),
                        quantity_kg,
                        crop_name
                    ),
                    SourceType::Adjustment,
                    movement.movement_id,
                    lines,
                ),
            )
            .await?;
            movement.journal_entry_id = Some(entry.entry_id);
        }

        let stored = append_movement(&mut tx, &movement).await?;
        tx.commit().await?;
        timer.observe_duration();

        info!(
            movement_id = %stored.movement_id,
            quantity_kg = %quantity_kg,
            direction = direction.as_str(),
            balance_kg = %stored.balance_kg,
            "Inventory adjustment recorded"
        );
        Ok(stored)
    }

    /// Remove an adjustment: delete the movement, replay the crop and
    /// reverse its journal entry, all or nothing.
    #[instrument(skip(self))]
    pub async fn delete_adjustment(
        &self,
        movement_id: Uuid,
    ) -> Result<AdjustmentRemoval, LedgerError> {
        let mut tx = self.begin().await?;

        let movement = sqlx::query_as::<_, InventoryMovement>(&format!(
            "SELECT {} FROM inventory_movements WHERE movement_id = $1",
            MOVEMENT_COLUMNS
        ))
        .bind(movement_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("Inventory movement", movement_id))?;

        if movement.movement_type != MovementType::Adjustment {
            return Err(LedgerError::validation(
                "Only adjustment movements can be deleted",
            ));
        }

        lock_crop(&mut tx, movement.crop_id).await?;
        sqlx::query("DELETE FROM inventory_movements WHERE movement_id = $1")
            .bind(movement_id)
            .execute(&mut *tx)
            .await?;
        rebalance_crop(&mut tx, movement.crop_id, Some(movement.movement_date)).await?;

        let reversal_entry_id = compensate_entry(&mut tx, movement.journal_entry_id).await?;
        let balance_kg = stock_valuation(&mut tx, movement.crop_id).await?.quantity_kg;
        tx.commit().await?;

        info!(
            movement_id = %movement_id,
            crop_id = %movement.crop_id,
            balance_kg = %balance_kg,
            "Inventory adjustment removed"
        );

        Ok(AdjustmentRemoval {
            movement_id,
            crop_id: movement.crop_id,
            reversal_entry_id,
            balance_kg,
        })
    }

    /// Movements of one crop in (date, sequence) order with window totals.
    #[instrument(skip(self))]
    pub async fn cardex(
        &self,
        crop_id: Uuid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Cardex, LedgerError> {
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(LedgerError::validation("start_date must not be after end_date"));
            }
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["cardex"])
            .start_timer();

        let mut tx = self.begin_snapshot().await?;
        let crop_name: String = sqlx::query_scalar("SELECT name FROM crops WHERE crop_id = $1")
            .bind(crop_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::not_found("Crop", crop_id))?;

        let opening = match start_date {
            Some(start) => balance_before(&mut tx, crop_id, start, false).await?,
            None => Decimal::ZERO,
        };

        let movements = sqlx::query_as::<_, InventoryMovement>(&format!(
            r#"
            SELECT {}
            FROM inventory_movements
            WHERE crop_id = $1
              AND ($2::date IS NULL OR movement_date >= $2)
              AND ($3::date IS NULL OR movement_date <= $3)
            ORDER BY movement_date, sequence
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(crop_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        timer.observe_duration();
        Ok(Cardex::build(
            crop_id, crop_name, start_date, end_date, opening, movements,
        ))
    }

    /// Stock position of every crop.
    #[instrument(skip(self))]
    pub async fn stock_summary(&self) -> Result<Vec<StockSummary>, LedgerError> {
        let totals = sqlx::query_as::<_, StockTotals>(
            r#"
            SELECT
                c.crop_id,
                c.name AS crop_name,
                COALESCE(SUM(CASE WHEN m.direction = 'in' THEN m.quantity_kg ELSE -m.quantity_kg END), 0) AS balance_kg,
                COALESCE(SUM(CASE WHEN m.direction = 'in' THEN m.total_value ELSE -m.total_value END), 0) AS stock_value,
                COALESCE(SUM(CASE WHEN m.direction = 'in' THEN m.quantity_kg ELSE 0 END), 0) AS received_kg,
                COALESCE(SUM(CASE WHEN m.movement_type = 'transform_in' AND m.is_waste THEN m.quantity_kg ELSE 0 END), 0) AS waste_received_kg
            FROM crops c
            LEFT JOIN inventory_movements m ON m.crop_id = c.crop_id
            GROUP BY c.crop_id, c.name
            ORDER BY c.name
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(totals.into_iter().map(StockSummary::from).collect())
    }
}

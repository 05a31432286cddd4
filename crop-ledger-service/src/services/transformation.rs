//! Crop transformations: one source crop into several outputs.

use super::cardex::{append_movement, lock_crops, stock_valuation};
use super::journal::insert_entry;
use super::metrics::DB_QUERY_DURATION;
use super::{Database, LedgerError};
use crate::models::{
    allocate, round_money, JournalLineInput, MovementType, NewJournalEntry, NewMovement,
    NewTransformation, SourceType, Transformation, TransformationOutput,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

const TRANSFORMATION_COLUMNS: &str = "transformation_id, source_crop_id, source_quantity_kg, source_cost, processing_cost, total_cost, transformation_date, journal_entry_id, notes, created_utc";
const OUTPUT_COLUMNS: &str = "output_id, line_no, output_crop_id, output_quantity_kg, cost_allocation_ratio, allocated_cost, unit_cost, is_waste";

async fn load_outputs(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<TransformationOutput>>, LedgerError> {
    let rows: Vec<(Uuid, TransformationOutput)> = sqlx::query_as::<_, TransformationOutputRow>(&format!(
        "SELECT transformation_id, {} FROM transformation_outputs WHERE transformation_id = ANY($1) ORDER BY transformation_id, line_no",
        OUTPUT_COLUMNS
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|r| (r.transformation_id, r.output))
    .collect();

    let mut grouped: HashMap<Uuid, Vec<TransformationOutput>> = HashMap::new();
    for (id, output) in rows {
        grouped.entry(id).or_default().push(output);
    }
    Ok(grouped)
}

#[derive(sqlx::FromRow)]
struct TransformationOutputRow {
    transformation_id: Uuid,
    #[sqlx(flatten)]
    output: TransformationOutput,
}

impl Database {
    /// Consume source stock and produce the outputs, splitting source cost
    /// plus processing cost by ratio. Cardex and journal move together.
    #[instrument(skip(self, input), fields(source_crop_id = %input.source_crop_id, outputs = input.outputs.len()))]
    pub async fn transform(&self, input: &NewTransformation) -> Result<Transformation, LedgerError> {
        input.check()?;
        let input = &input.rounded();
        if input
            .outputs
            .iter()
            .any(|o| o.output_crop_id == input.source_crop_id)
        {
            return Err(LedgerError::validation(
                "An output crop cannot be the source crop",
            ));
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["transform"])
            .start_timer();

        let mut tx = self.begin().await?;

        let mut crops: Vec<Uuid> = input.outputs.iter().map(|o| o.output_crop_id).collect();
        crops.push(input.source_crop_id);
        lock_crops(&mut tx, &crops).await?;

        let stock = stock_valuation(&mut tx, input.source_crop_id).await?;
        if input.source_quantity_kg > stock.quantity_kg {
            return Err(LedgerError::InsufficientStock {
                crop_id: input.source_crop_id,
                available_kg: stock.quantity_kg,
                requested_kg: input.source_quantity_kg,
            });
        }

        let source_cost = stock.issue_cost(input.source_quantity_kg);
        let processing_cost = round_money(input.processing_cost);
        let plan = allocate(source_cost + processing_cost, &input.outputs)?;

        let transformation_id = Uuid::new_v4();
        let accounts = self.posting_accounts(&mut tx).await?;

        let journal_entry_id = if plan.total_cost > Decimal::ZERO {
            let candidates = [
                JournalLineInput::debit(accounts.inventory, plan.allocated_total)
                    .with_memo("Transformation outputs"),
                JournalLineInput::debit(accounts.transformation_loss, plan.unallocated)
                    .with_memo("Unallocated transformation cost"),
                JournalLineInput::credit(accounts.inventory, source_cost)
                    .with_memo("Transformation source"),
                JournalLineInput::credit(
                    input.payment_account_id.unwrap_or(accounts.cash),
                    processing_cost,
                )
                .with_memo("Processing cost"),
            ];
            let lines: Vec<JournalLineInput> = candidates
                .into_iter()
                .filter(|l| !(l.debit + l.credit).is_zero())
                .collect();

            let entry = insert_entry(
                &mut tx,
                &NewJournalEntry::posted(
                    input.transformation_date,
                    format!("Transformation of {} kg", input.source_quantity_kg),
                    SourceType::Transformation,
                    transformation_id,
                    lines,
                ),
            )
            .await?;
            Some(entry.entry_id)
        } else {
            None
        };

        let mut transformation = sqlx::query_as::<_, Transformation>(&format!(
            r#"
            INSERT INTO transformations
                (transformation_id, source_crop_id, source_quantity_kg, source_cost, processing_cost,
                 total_cost, transformation_date, journal_entry_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            TRANSFORMATION_COLUMNS
        ))
        .bind(transformation_id)
        .bind(input.source_crop_id)
        .bind(input.source_quantity_kg)
        .bind(source_cost)
        .bind(processing_cost)
        .bind(plan.total_cost)
        .bind(input.transformation_date)
        .bind(journal_entry_id)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?;

        let mut out = NewMovement::valued(
            input.source_crop_id,
            input.transformation_date,
            MovementType::TransformOut,
            input.source_quantity_kg,
            source_cost,
            "transformation",
            transformation_id,
        );
        out.journal_entry_id = journal_entry_id;
        append_movement(&mut tx, &out).await?;

        for (i, allocated) in plan.outputs.iter().enumerate() {
            let output = sqlx::query_as::<_, TransformationOutput>(&format!(
                r#"
                INSERT INTO transformation_outputs
                    (output_id, transformation_id, line_no, output_crop_id, output_quantity_kg,
                     cost_allocation_ratio, allocated_cost, unit_cost, is_waste)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {}
                "#,
                OUTPUT_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(transformation_id)
            .bind(i as i32 + 1)
            .bind(allocated.output.output_crop_id)
            .bind(allocated.output.output_quantity_kg)
            .bind(allocated.output.cost_allocation_ratio)
            .bind(allocated.allocated_cost)
            .bind(allocated.unit_cost)
            .bind(allocated.output.is_waste)
            .fetch_one(&mut *tx)
            .await?;

            let mut incoming = NewMovement::valued(
                allocated.output.output_crop_id,
                input.transformation_date,
                MovementType::TransformIn,
                allocated.output.output_quantity_kg,
                allocated.allocated_cost,
                "transformation",
                transformation_id,
            );
            incoming.unit_cost = allocated.unit_cost;
            incoming.is_waste = allocated.output.is_waste;
            incoming.journal_entry_id = journal_entry_id;
            append_movement(&mut tx, &incoming).await?;

            transformation.outputs.push(output);
        }

        tx.commit().await?;
        timer.observe_duration();

        info!(
            transformation_id = %transformation_id,
            total_cost = %plan.total_cost,
            unallocated = %plan.unallocated,
            "Transformation recorded"
        );
        Ok(transformation)
    }

    #[instrument(skip(self))]
    pub async fn get_transformation(
        &self,
        transformation_id: Uuid,
    ) -> Result<Transformation, LedgerError> {
        let mut conn = self.pool().acquire().await?;
        let mut transformation = sqlx::query_as::<_, Transformation>(&format!(
            "SELECT {} FROM transformations WHERE transformation_id = $1",
            TRANSFORMATION_COLUMNS
        ))
        .bind(transformation_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Transformation", transformation_id))?;

        transformation.outputs = load_outputs(&mut conn, &[transformation_id])
            .await?
            .remove(&transformation_id)
            .unwrap_or_default();
        Ok(transformation)
    }

    #[instrument(skip(self))]
    pub async fn list_transformations(&self) -> Result<Vec<Transformation>, LedgerError> {
        let mut tx = self.begin_snapshot().await?;
        let mut transformations = sqlx::query_as::<_, Transformation>(&format!(
            "SELECT {} FROM transformations ORDER BY transformation_date, created_utc",
            TRANSFORMATION_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = transformations.iter().map(|t| t.transformation_id).collect();
        let mut outputs = load_outputs(&mut tx, &ids).await?;
        for t in &mut transformations {
            t.outputs = outputs.remove(&t.transformation_id).unwrap_or_default();
        }
        tx.commit().await?;
        Ok(transformations)
    }
}

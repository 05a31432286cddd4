//! Crop, price and contact master data.

use super::cardex::lock_crop;
use super::error::map_unique_violation;
use super::{Database, LedgerError};
use crate::models::{
    check_units, Contact, ContactRole, CreateContact, CreateCrop, Crop, CropUnit, DailyPrice,
    UpdateContact, UpdateCrop, KG,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

const CROP_COLUMNS: &str = "crop_id, name, is_active, created_utc, updated_utc";
const CONTACT_COLUMNS: &str =
    "contact_id, name, phone, is_customer, is_supplier, is_active, created_utc, updated_utc";

pub(crate) async fn crop_units(
    conn: &mut PgConnection,
    crop_id: Uuid,
) -> Result<Vec<CropUnit>, LedgerError> {
    Ok(sqlx::query_as::<_, CropUnit>(
        "SELECT unit, kg_factor FROM crop_units WHERE crop_id = $1 ORDER BY unit",
    )
    .bind(crop_id)
    .fetch_all(&mut *conn)
    .await?)
}

async fn replace_units(
    conn: &mut PgConnection,
    crop_id: Uuid,
    units: &[CropUnit],
) -> Result<(), LedgerError> {
    sqlx::query("DELETE FROM crop_units WHERE crop_id = $1")
        .bind(crop_id)
        .execute(&mut *conn)
        .await?;
    for unit in units {
        sqlx::query("INSERT INTO crop_units (crop_id, unit, kg_factor) VALUES ($1, $2, $3)")
            .bind(crop_id)
            .bind(unit.unit.trim())
            .bind(unit.kg_factor)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn required(value: &str, what: &str) -> Result<String, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(format!("{} is required", what)));
    }
    Ok(trimmed.to_string())
}

async fn fetch_contact(
    conn: &mut PgConnection,
    contact_id: Uuid,
    for_update: bool,
) -> Result<Contact, LedgerError> {
    let sql = format!(
        "SELECT {} FROM contacts WHERE contact_id = $1{}",
        CONTACT_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, Contact>(&sql)
        .bind(contact_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Contact", contact_id))
}

impl Database {
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_crop(&self, input: &CreateCrop) -> Result<Crop, LedgerError> {
        let name = required(&input.name, "Crop name")?;
        check_units(&input.units)?;

        let mut tx = self.begin().await?;
        let crop_id = Uuid::new_v4();
        let mut crop = sqlx::query_as::<_, Crop>(&format!(
            "INSERT INTO crops (crop_id, name) VALUES ($1, $2) RETURNING {}",
            CROP_COLUMNS
        ))
        .bind(crop_id)
        .bind(&name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, || format!("Crop '{}' already exists", name)))?;

        replace_units(&mut tx, crop_id, &input.units).await?;
        crop.units = crop_units(&mut tx, crop_id).await?;
        tx.commit().await?;

        info!(crop_id = %crop_id, "Crop created");
        Ok(crop)
    }

    #[instrument(skip(self))]
    pub async fn get_crop(&self, crop_id: Uuid) -> Result<Crop, LedgerError> {
        let mut conn = self.pool().acquire().await?;
        let mut crop = sqlx::query_as::<_, Crop>(&format!(
            "SELECT {} FROM crops WHERE crop_id = $1",
            CROP_COLUMNS
        ))
        .bind(crop_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Crop", crop_id))?;

        crop.units = crop_units(&mut conn, crop_id).await?;
        Ok(crop)
    }

    #[instrument(skip(self))]
    pub async fn list_crops(&self, include_inactive: bool) -> Result<Vec<Crop>, LedgerError> {
        let mut tx = self.begin_snapshot().await?;
        let mut crops = sqlx::query_as::<_, Crop>(&format!(
            "SELECT {} FROM crops WHERE ($1 OR is_active) ORDER BY name",
            CROP_COLUMNS
        ))
        .bind(include_inactive)
        .fetch_all(&mut *tx)
        .await?;

        let rows: Vec<(Uuid, String, Decimal)> =
            sqlx::query_as("SELECT crop_id, unit, kg_factor FROM crop_units ORDER BY unit")
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        let mut units: HashMap<Uuid, Vec<CropUnit>> = HashMap::new();
        for (crop_id, unit, kg_factor) in rows {
            units
                .entry(crop_id)
                .or_default()
                .push(CropUnit { unit, kg_factor });
        }
        for crop in &mut crops {
            crop.units = units.remove(&crop.crop_id).unwrap_or_default();
        }
        Ok(crops)
    }

    /// Rename, re-unit or (de)activate a crop. A unit list replaces the old one.
    #[instrument(skip(self, input))]
    pub async fn update_crop(&self, crop_id: Uuid, input: &UpdateCrop) -> Result<Crop, LedgerError> {
        let name = input
            .name
            .as_deref()
            .map(|n| required(n, "Crop name"))
            .transpose()?;
        if let Some(units) = &input.units {
            check_units(units)?;
        }

        let mut tx = self.begin().await?;
        lock_crop(&mut tx, crop_id).await?;

        let mut crop = sqlx::query_as::<_, Crop>(&format!(
            r#"
            UPDATE crops
            SET name = COALESCE($2, name),
                is_active = COALESCE($3, is_active),
                updated_utc = NOW()
            WHERE crop_id = $1
            RETURNING {}
            "#,
            CROP_COLUMNS
        ))
        .bind(crop_id)
        .bind(&name)
        .bind(input.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                format!("Crop '{}' already exists", name.clone().unwrap_or_default())
            })
        })?;

        if let Some(units) = &input.units {
            replace_units(&mut tx, crop_id, units).await?;
        }
        crop.units = crop_units(&mut tx, crop_id).await?;
        tx.commit().await?;

        info!(crop_id = %crop_id, "Crop updated");
        Ok(crop)
    }

    /// Set the price of a crop in one unit for one day, replacing any earlier quote.
    #[instrument(skip(self))]
    pub async fn upsert_price(
        &self,
        crop_id: Uuid,
        price_date: NaiveDate,
        unit: &str,
        price: Decimal,
    ) -> Result<DailyPrice, LedgerError> {
        if price < Decimal::ZERO {
            return Err(LedgerError::validation("Price must not be negative"));
        }
        let unit = required(unit, "Unit")?;

        let mut tx = self.begin().await?;
        lock_crop(&mut tx, crop_id).await?;
        if unit != KG && !crop_units(&mut tx, crop_id).await?.iter().any(|u| u.unit == unit) {
            return Err(LedgerError::validation(format!(
                "Unit '{}' is not allowed for this crop",
                unit
            )));
        }

        let stored = sqlx::query_as::<_, DailyPrice>(
            r#"
            INSERT INTO daily_prices (price_id, crop_id, price_date, unit, price)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (crop_id, price_date, unit) DO UPDATE SET price = EXCLUDED.price
            RETURNING price_id, crop_id, price_date, unit, price, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(crop_id)
        .bind(price_date)
        .bind(&unit)
        .bind(price)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(stored)
    }

    #[instrument(skip(self))]
    pub async fn list_prices(
        &self,
        crop_id: Uuid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<DailyPrice>, LedgerError> {
        // 404 for unknown crops rather than an empty list.
        self.get_crop(crop_id).await?;

        Ok(sqlx::query_as::<_, DailyPrice>(
            r#"
            SELECT price_id, crop_id, price_date, unit, price, created_utc
            FROM daily_prices
            WHERE crop_id = $1
              AND ($2::date IS NULL OR price_date >= $2)
              AND ($3::date IS NULL OR price_date <= $3)
            ORDER BY price_date, unit
            "#,
        )
        .bind(crop_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_contact(&self, input: &CreateContact) -> Result<Contact, LedgerError> {
        let name = required(&input.name, "Contact name")?;

        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            INSERT INTO contacts (contact_id, name, phone, is_customer, is_supplier)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            CONTACT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&name)
        .bind(&input.phone)
        .bind(input.is_customer)
        .bind(input.is_supplier)
        .fetch_one(self.pool())
        .await?;

        info!(contact_id = %contact.contact_id, "Contact created");
        Ok(contact)
    }

    #[instrument(skip(self))]
    pub async fn get_contact(&self, contact_id: Uuid) -> Result<Contact, LedgerError> {
        let mut conn = self.pool().acquire().await?;
        fetch_contact(&mut conn, contact_id, false).await
    }

    #[instrument(skip(self))]
    pub async fn list_contacts(
        &self,
        role: Option<ContactRole>,
        include_inactive: bool,
    ) -> Result<Vec<Contact>, LedgerError> {
        let contacts = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {} FROM contacts WHERE ($1 OR is_active) ORDER BY name",
            CONTACT_COLUMNS
        ))
        .bind(include_inactive)
        .fetch_all(self.pool())
        .await?;

        Ok(match role {
            Some(role) => contacts.into_iter().filter(|c| role.matches(c)).collect(),
            None => contacts,
        })
    }

    #[instrument(skip(self, input))]
    pub async fn update_contact(
        &self,
        contact_id: Uuid,
        input: &UpdateContact,
    ) -> Result<Contact, LedgerError> {
        let name = input
            .name
            .as_deref()
            .map(|n| required(n, "Contact name"))
            .transpose()?;

        let mut tx = self.begin().await?;
        fetch_contact(&mut tx, contact_id, true).await?;

        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts
            SET name = COALESCE($2, name),
                phone = COALESCE($3, phone),
                is_customer = COALESCE($4, is_customer),
                is_supplier = COALESCE($5, is_supplier),
                is_active = COALESCE($6, is_active),
                updated_utc = NOW()
            WHERE contact_id = $1
            RETURNING {}
            "#,
            CONTACT_COLUMNS
        ))
        .bind(contact_id)
        .bind(&name)
        .bind(&input.phone)
        .bind(input.is_customer)
        .bind(input.is_supplier)
        .bind(input.is_active)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(contact_id = %contact_id, "Contact updated");
        Ok(contact)
    }
}

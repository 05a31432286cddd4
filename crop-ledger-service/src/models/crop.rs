//! Crop master data: pricing units and daily prices.

use crate::services::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Base unit every crop accepts.
pub const KG: &str = "kg";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Crop {
    pub crop_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub units: Vec<CropUnit>,
}

/// A pricing unit and how many kilograms it holds.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CropUnit {
    pub unit: String,
    pub kg_factor: Decimal,
}

#[derive(Debug, Clone)]
pub struct CreateCrop {
    pub name: String,
    pub units: Vec<CropUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCrop {
    pub name: Option<String>,
    pub units: Option<Vec<CropUnit>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyPrice {
    pub price_id: Uuid,
    pub crop_id: Uuid,
    pub price_date: NaiveDate,
    pub unit: String,
    pub price: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Reject duplicate or non-positive unit definitions. `kg` may only carry factor 1.
pub fn check_units(units: &[CropUnit]) -> Result<(), LedgerError> {
    let mut seen = std::collections::HashSet::new();
    for unit in units {
        let name = unit.unit.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Unit name must not be empty"));
        }
        if unit.kg_factor <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "Unit '{}' must have a positive kg factor",
                name
            )));
        }
        if name == KG && unit.kg_factor != Decimal::ONE {
            return Err(LedgerError::validation("Unit 'kg' always has factor 1"));
        }
        if !seen.insert(name.to_string()) {
            return Err(LedgerError::validation(format!(
                "Unit '{}' is listed twice",
                name
            )));
        }
    }
    Ok(())
}

/// Convert a quantity in `unit` to kilograms using the crop's unit table.
pub fn to_kg(quantity: Decimal, unit: &str, units: &[CropUnit]) -> Result<Decimal, LedgerError> {
    let factor = if unit == KG {
        Decimal::ONE
    } else {
        units
            .iter()
            .find(|u| u.unit == unit)
            .map(|u| u.kg_factor)
            .ok_or_else(|| {
                LedgerError::validation(format!("Unit '{}' is not allowed for this crop", unit))
            })?
    };

    Ok((quantity * factor).round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sack() -> Vec<CropUnit> {
        vec![CropUnit {
            unit: "sack".to_string(),
            kg_factor: dec!(50),
        }]
    }

    #[test]
    fn kg_is_always_allowed() {
        assert_eq!(to_kg(dec!(12.5), KG, &[]).unwrap(), dec!(12.5));
    }

    #[test]
    fn converts_with_unit_factor() {
        assert_eq!(to_kg(dec!(3), "sack", &sack()).unwrap(), dec!(150));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = to_kg(dec!(1), "ton", &sack()).unwrap_err();
        assert!(err.to_string().contains("ton"));
    }

    #[test]
    fn unit_table_is_checked() {
        assert!(check_units(&sack()).is_ok());

        let mut twice = sack();
        twice.extend(sack());
        assert!(check_units(&twice).is_err());

        let zero = vec![CropUnit {
            unit: "box".to_string(),
            kg_factor: Decimal::ZERO,
        }];
        assert!(check_units(&zero).is_err());

        let bad_kg = vec![CropUnit {
            unit: KG.to_string(),
            kg_factor: dec!(2),
        }];
        assert!(check_units(&bad_kg).is_err());
    }
}

//! Inventory cardex: per-crop movements with running balances.

use super::journal::round_money;
use super::UnknownVariant;
use crate::services::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgTypeInfo, PgValueRef, Postgres};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    /// Signed effect of `quantity` on a balance.
    pub fn apply(&self, balance: Decimal, quantity: Decimal) -> Decimal {
        match self {
            Self::In => balance + quantity,
            Self::Out => balance - quantity,
        }
    }
}

impl TryFrom<String> for Direction {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            _ => Err(UnknownVariant::new("direction", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Purchase,
    Sale,
    Adjustment,
    TransformIn,
    TransformOut,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::Adjustment => "adjustment",
            Self::TransformIn => "transform_in",
            Self::TransformOut => "transform_out",
        }
    }

    /// Direction is fixed by the movement type, or by the adjustment type for adjustments.
    pub fn direction(
        &self,
        adjustment_type: Option<AdjustmentType>,
    ) -> Result<Direction, LedgerError> {
        match (self, adjustment_type) {
            (Self::Purchase | Self::TransformIn, None) => Ok(Direction::In),
            (Self::Sale | Self::TransformOut, None) => Ok(Direction::Out),
            (Self::Adjustment, Some(adjustment)) => Ok(adjustment.direction()),
            (Self::Adjustment, None) => Err(LedgerError::validation(
                "Adjustment movements require an adjustment type",
            )),
            (_, Some(_)) => Err(LedgerError::validation(
                "Only adjustment movements carry an adjustment type",
            )),
        }
    }
}

impl TryFrom<String> for MovementType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "purchase" => Ok(Self::Purchase),
            "sale" => Ok(Self::Sale),
            "adjustment" => Ok(Self::Adjustment),
            "transform_in" => Ok(Self::TransformIn),
            "transform_out" => Ok(Self::TransformOut),
            _ => Err(UnknownVariant::new("movement_type", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    Spoilage,
    Shortage,
    Surplus,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spoilage => "spoilage",
            Self::Shortage => "shortage",
            Self::Surplus => "surplus",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Spoilage | Self::Shortage => Direction::Out,
            Self::Surplus => Direction::In,
        }
    }
}

impl TryFrom<String> for AdjustmentType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "spoilage" => Ok(Self::Spoilage),
            "shortage" => Ok(Self::Shortage),
            "surplus" => Ok(Self::Surplus),
            _ => Err(UnknownVariant::new("adjustment_type", value)),
        }
    }
}

// Decoded directly so that the nullable column maps to `Option<AdjustmentType>`.
impl sqlx::Type<Postgres> for AdjustmentType {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for AdjustmentType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <String as sqlx::Decode<'r, Postgres>>::decode(value)?;
        Ok(Self::try_from(raw)?)
    }
}

/// Stored cardex line.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub movement_id: Uuid,
    pub sequence: i64,
    pub crop_id: Uuid,
    pub movement_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub movement_type: MovementType,
    #[sqlx(try_from = "String")]
    pub direction: Direction,
    pub adjustment_type: Option<AdjustmentType>,
    pub quantity_kg: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub balance_kg: Decimal,
    pub is_waste: bool,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// A movement about to be appended.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub movement_id: Uuid,
    pub crop_id: Uuid,
    pub movement_date: NaiveDate,
    pub movement_type: MovementType,
    pub adjustment_type: Option<AdjustmentType>,
    pub quantity_kg: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub is_waste: bool,
    pub reference_type: &'static str,
    pub reference_id: Uuid,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl NewMovement {
    /// Movement with value derived from `total_value` over the quantity.
    pub fn valued(
        crop_id: Uuid,
        movement_date: NaiveDate,
        movement_type: MovementType,
        quantity_kg: Decimal,
        total_value: Decimal,
        reference_type: &'static str,
        reference_id: Uuid,
    ) -> Self {
        Self {
            movement_id: Uuid::new_v4(),
            crop_id,
            movement_date,
            movement_type,
            adjustment_type: None,
            quantity_kg,
            unit_cost: unit_cost(total_value, quantity_kg),
            total_value,
            is_waste: false,
            reference_type,
            reference_id,
            journal_entry_id: None,
            notes: None,
        }
    }

    pub fn direction(&self) -> Result<Direction, LedgerError> {
        self.movement_type.direction(self.adjustment_type)
    }
}

/// Caller-supplied adjustment before sign normalization.
#[derive(Debug, Clone)]
pub struct NewAdjustment {
    pub crop_id: Uuid,
    pub adjustment_date: NaiveDate,
    pub adjustment_type: AdjustmentType,
    pub quantity_kg: Decimal,
    pub notes: Option<String>,
}

impl NewAdjustment {
    /// Magnitude of the adjustment; the caller's sign is ignored.
    pub fn normalized_quantity(&self) -> Result<Decimal, LedgerError> {
        let quantity = round_kg(self.quantity_kg.abs());
        if quantity.is_zero() {
            return Err(LedgerError::validation(
                "Adjustment quantity must be non-zero",
            ));
        }
        Ok(quantity)
    }
}

pub fn round_kg(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

/// Value per kilogram, kept at 6 decimal places.
pub fn unit_cost(total_value: Decimal, quantity_kg: Decimal) -> Decimal {
    if quantity_kg.is_zero() {
        return Decimal::ZERO;
    }
    (total_value / quantity_kg).round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
}

/// Running balance went negative during a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub index: usize,
    pub available_kg: Decimal,
    pub requested_kg: Decimal,
}

/// Replay movements in cardex order starting from `opening`, returning the
/// balance after each one. Fails at the first movement that would take the
/// balance below zero.
pub fn replay_balances<I>(opening: Decimal, movements: I) -> Result<Vec<Decimal>, Shortfall>
where
    I: IntoIterator<Item = (Direction, Decimal)>,
{
    let mut balance = opening;
    let mut balances = Vec::new();

    for (index, (direction, quantity)) in movements.into_iter().enumerate() {
        let next = direction.apply(balance, quantity);
        if next < Decimal::ZERO {
            return Err(Shortfall {
                index,
                available_kg: balance,
                requested_kg: quantity,
            });
        }
        balances.push(next);
        balance = next;
    }

    Ok(balances)
}

/// Weighted-average valuation of a crop's stock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValuation {
    pub quantity_kg: Decimal,
    pub value: Decimal,
}

impl StockValuation {
    pub fn unit_cost(&self) -> Decimal {
        unit_cost(self.value, self.quantity_kg)
    }

    /// Cost of taking `quantity_kg` out of this stock.
    pub fn issue_cost(&self, quantity_kg: Decimal) -> Decimal {
        cost_of_issue(self.quantity_kg, self.value, quantity_kg)
    }
}

/// Weighted-average cost of issuing `quantity_kg` from a stock of
/// `stock_kg` worth `stock_value`. Issuing the whole stock takes the whole
/// remaining value so no residue is stranded.
pub fn cost_of_issue(stock_kg: Decimal, stock_value: Decimal, quantity_kg: Decimal) -> Decimal {
    if stock_kg <= Decimal::ZERO || stock_value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if quantity_kg >= stock_kg {
        return stock_value;
    }
    round_money(stock_value * quantity_kg / stock_kg)
}

/// One row of a cardex listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardexLine {
    pub movement_id: Uuid,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub adjustment_type: Option<AdjustmentType>,
    pub direction: Direction,
    pub quantity_kg: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub balance_kg: Decimal,
    pub is_waste: bool,
    /// Source document: purchase, sale, adjustment or transformation.
    pub reference_type: String,
    pub reference_id: Uuid,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl From<InventoryMovement> for CardexLine {
    fn from(m: InventoryMovement) -> Self {
        Self {
            movement_id: m.movement_id,
            date: m.movement_date,
            movement_type: m.movement_type,
            adjustment_type: m.adjustment_type,
            direction: m.direction,
            quantity_kg: m.quantity_kg,
            unit_cost: m.unit_cost,
            total_value: m.total_value,
            balance_kg: m.balance_kg,
            is_waste: m.is_waste,
            reference_type: m.reference_type,
            reference_id: m.reference_id,
            journal_entry_id: m.journal_entry_id,
            notes: m.notes,
        }
    }
}

/// Cardex of one crop over an optional date window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cardex {
    pub crop_id: Uuid,
    pub crop_name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub opening_balance: Decimal,
    pub movements: Vec<CardexLine>,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub current_balance: Decimal,
}

impl Cardex {
    /// Assemble a cardex from movements already in (date, sequence) order.
    ///
    /// With a window start the closing balance is recomputed from the
    /// opening balance; otherwise it is the last stored snapshot.
    pub fn build(
        crop_id: Uuid,
        crop_name: String,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        opening_balance: Decimal,
        movements: Vec<InventoryMovement>,
    ) -> Self {
        let mut total_in = Decimal::ZERO;
        let mut total_out = Decimal::ZERO;
        for m in &movements {
            match m.direction {
                Direction::In => total_in += m.quantity_kg,
                Direction::Out => total_out += m.quantity_kg,
            }
        }

        let current_balance = if start_date.is_some() {
            opening_balance + total_in - total_out
        } else {
            movements
                .last()
                .map(|m| m.balance_kg)
                .unwrap_or(opening_balance)
        };

        Self {
            crop_id,
            crop_name,
            start_date,
            end_date,
            opening_balance,
            movements: movements.into_iter().map(CardexLine::from).collect(),
            total_in,
            total_out,
            current_balance,
        }
    }
}

/// Aggregates of one crop's cardex as read from the database.
#[derive(Debug, Clone, FromRow)]
pub struct StockTotals {
    pub crop_id: Uuid,
    pub crop_name: String,
    pub balance_kg: Decimal,
    pub stock_value: Decimal,
    /// Everything ever received, waste included.
    pub received_kg: Decimal,
    /// Received as waste output of a transformation.
    pub waste_received_kg: Decimal,
}

/// Stock position of one crop.
///
/// Stock is one weighted-average pool, so issues drain waste and saleable
/// kilograms in proportion to what was received. `waste_kg` is the waste
/// still on hand; `saleable_value` is the stock value less its waste share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSummary {
    pub crop_id: Uuid,
    pub crop_name: String,
    pub balance_kg: Decimal,
    pub stock_value: Decimal,
    pub weighted_unit_cost: Decimal,
    pub waste_kg: Decimal,
    pub available_for_sale_kg: Decimal,
    pub saleable_value: Decimal,
}

impl From<StockTotals> for StockSummary {
    fn from(t: StockTotals) -> Self {
        let balance = t.balance_kg.max(Decimal::ZERO);
        let waste = if t.received_kg > Decimal::ZERO {
            round_kg(balance * t.waste_received_kg / t.received_kg).min(balance)
        } else {
            Decimal::ZERO
        };
        let available = balance - waste;
        let saleable_value = if balance.is_zero() {
            Decimal::ZERO
        } else {
            round_money(t.stock_value * available / balance)
        };

        Self {
            weighted_unit_cost: unit_cost(t.stock_value, t.balance_kg),
            crop_id: t.crop_id,
            crop_name: t.crop_name,
            balance_kg: t.balance_kg,
            stock_value: t.stock_value,
            waste_kg: waste,
            available_for_sale_kg: available,
            saleable_value,
        }
    }
}

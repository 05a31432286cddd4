//! Crop transformations and cost allocation across outputs.

use super::inventory::{round_kg, unit_cost};
use super::journal::round_money;
use crate::services::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transformation {
    pub transformation_id: Uuid,
    pub source_crop_id: Uuid,
    pub source_quantity_kg: Decimal,
    pub source_cost: Decimal,
    pub processing_cost: Decimal,
    pub total_cost: Decimal,
    pub transformation_date: NaiveDate,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    #[sqlx(skip)]
    pub outputs: Vec<TransformationOutput>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransformationOutput {
    pub output_id: Uuid,
    pub line_no: i32,
    pub output_crop_id: Uuid,
    pub output_quantity_kg: Decimal,
    pub cost_allocation_ratio: Decimal,
    pub allocated_cost: Decimal,
    pub unit_cost: Decimal,
    pub is_waste: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputInput {
    pub output_crop_id: Uuid,
    pub output_quantity_kg: Decimal,
    pub cost_allocation_ratio: Decimal,
    #[serde(default)]
    pub is_waste: bool,
}

#[derive(Debug, Clone)]
pub struct NewTransformation {
    pub source_crop_id: Uuid,
    pub source_quantity_kg: Decimal,
    pub processing_cost: Decimal,
    pub transformation_date: NaiveDate,
    /// Account credited with the processing cost; cash when absent.
    pub payment_account_id: Option<Uuid>,
    pub notes: Option<String>,
    pub outputs: Vec<OutputInput>,
}

impl NewTransformation {
    /// Quantities rounded to the gram, as they are stored.
    pub fn rounded(&self) -> Self {
        let mut rounded = self.clone();
        rounded.source_quantity_kg = round_kg(self.source_quantity_kg);
        for output in &mut rounded.outputs {
            output.output_quantity_kg = round_kg(output.output_quantity_kg);
        }
        rounded
    }

    /// Checks that need no stock or cost information.
    pub fn check(&self) -> Result<(), LedgerError> {
        if round_kg(self.source_quantity_kg) <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "Source quantity must be greater than zero",
            ));
        }
        if self.processing_cost < Decimal::ZERO {
            return Err(LedgerError::validation(
                "Processing cost must not be negative",
            ));
        }
        check_outputs(&self.outputs)
    }
}

fn check_outputs(outputs: &[OutputInput]) -> Result<(), LedgerError> {
    if outputs.is_empty() {
        return Err(LedgerError::validation(
            "A transformation needs at least one output",
        ));
    }

    let mut total = Decimal::ZERO;
    for (i, output) in outputs.iter().enumerate() {
        if round_kg(output.output_quantity_kg) <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "Output {} quantity must be greater than zero",
                i + 1
            )));
        }
        if output.cost_allocation_ratio < Decimal::ZERO
            || output.cost_allocation_ratio > Decimal::ONE
        {
            return Err(LedgerError::validation(format!(
                "Output {} cost allocation ratio must be between 0 and 1",
                i + 1
            )));
        }
        total += output.cost_allocation_ratio;
    }

    if total > Decimal::ONE {
        return Err(LedgerError::AllocationOverflow { total });
    }
    Ok(())
}

/// One output with its share of the cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedOutput {
    #[serde(flatten)]
    pub output: OutputInput,
    pub allocated_cost: Decimal,
    pub unit_cost: Decimal,
}

/// Cost split of a transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub total_cost: Decimal,
    pub outputs: Vec<AllocatedOutput>,
    pub allocated_total: Decimal,
    /// Share of the cost no output absorbs (ratios summing below 1).
    pub unallocated: Decimal,
}

/// Apportion `total_cost` to outputs by ratio.
///
/// Each share is rounded to cents. When the ratios sum to exactly 1 the
/// rounding residue lands on the last output so the shares add up to the
/// total.
pub fn allocate(total_cost: Decimal, outputs: &[OutputInput]) -> Result<AllocationPlan, LedgerError> {
    check_outputs(outputs)?;

    let total_cost = round_money(total_cost);
    let ratio_sum: Decimal = outputs.iter().map(|o| o.cost_allocation_ratio).sum();

    let mut allocated: Vec<Decimal> = outputs
        .iter()
        .map(|o| round_money(total_cost * o.cost_allocation_ratio))
        .collect();

    if ratio_sum == Decimal::ONE {
        let residue = total_cost - allocated.iter().copied().sum::<Decimal>();
        if let Some(last) = allocated.last_mut() {
            *last += residue;
        }
    }

    let allocated_total: Decimal = allocated.iter().copied().sum();
    let planned = outputs
        .iter()
        .zip(allocated)
        .map(|(output, allocated_cost)| AllocatedOutput {
            unit_cost: unit_cost(allocated_cost, output.output_quantity_kg),
            allocated_cost,
            output: output.clone(),
        })
        .collect();

    Ok(AllocationPlan {
        total_cost,
        outputs: planned,
        allocated_total,
        unallocated: total_cost - allocated_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockValuation;
    use rust_decimal_macros::dec;

    fn output(quantity: Decimal, ratio: Decimal, is_waste: bool) -> OutputInput {
        OutputInput {
            output_crop_id: Uuid::new_v4(),
            output_quantity_kg: quantity,
            cost_allocation_ratio: ratio,
            is_waste,
        }
    }

    #[test]
    fn splits_source_and_processing_cost_by_ratio() {
        // 100 kg at 2/kg plus 50 processing.
        let source = StockValuation {
            quantity_kg: dec!(100),
            value: dec!(200),
        };
        let total = source.issue_cost(dec!(100)) + dec!(50);
        let outputs = vec![
            output(dec!(60), dec!(0.7), false),
            output(dec!(40), dec!(0.3), true),
        ];

        let plan = allocate(total, &outputs).unwrap();

        assert_eq!(plan.total_cost, dec!(250));
        assert_eq!(plan.outputs[0].allocated_cost, dec!(175));
        assert_eq!(plan.outputs[0].unit_cost, dec!(2.916667));
        assert_eq!(plan.outputs[1].allocated_cost, dec!(75));
        assert_eq!(plan.outputs[1].unit_cost, dec!(1.875));
        assert!(plan.outputs[1].output.is_waste);
        assert_eq!(plan.unallocated, Decimal::ZERO);
    }

    #[test]
    fn ratios_above_one_overflow() {
        let outputs = vec![
            output(dec!(10), dec!(0.6), false),
            output(dec!(10), dec!(0.5), false),
        ];
        let err = allocate(dec!(100), &outputs).unwrap_err();
        assert!(matches!(err, LedgerError::AllocationOverflow { total } if total == dec!(1.1)));
    }

    #[test]
    fn rounding_residue_goes_to_last_output() {
        let third = dec!(0.333333);
        let outputs = vec![
            output(dec!(1), third, false),
            output(dec!(1), third, false),
            output(dec!(1), dec!(0.333334), false),
        ];
        let plan = allocate(dec!(100), &outputs).unwrap();

        let sum: Decimal = plan.outputs.iter().map(|o| o.allocated_cost).sum();
        assert_eq!(sum, dec!(100));
        assert_eq!(plan.outputs[0].allocated_cost, dec!(33.33));
        assert_eq!(plan.outputs[2].allocated_cost, dec!(33.34));
    }

    #[test]
    fn partial_ratios_leave_cost_unallocated() {
        let outputs = vec![output(dec!(50), dec!(0.8), false)];
        let plan = allocate(dec!(100), &outputs).unwrap();
        assert_eq!(plan.allocated_total, dec!(80));
        assert_eq!(plan.unallocated, dec!(20));
    }

    #[test]
    fn outputs_are_checked() {
        assert!(allocate(dec!(10), &[]).is_err());
        assert!(allocate(dec!(10), &[output(Decimal::ZERO, dec!(0.5), false)]).is_err());
        assert!(allocate(dec!(10), &[output(dec!(1), dec!(-0.1), false)]).is_err());
    }

    #[test]
    fn transformation_input_is_checked_before_any_lookup() {
        let transformation = NewTransformation {
            source_crop_id: Uuid::new_v4(),
            source_quantity_kg: dec!(100),
            processing_cost: dec!(-1),
            transformation_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            payment_account_id: None,
            notes: None,
            outputs: vec![output(dec!(100), dec!(1), false)],
        };
        assert!(transformation.check().is_err());
    }

    #[test]
    fn quantities_below_a_gram_are_rejected() {
        let transformation = NewTransformation {
            source_crop_id: Uuid::new_v4(),
            source_quantity_kg: dec!(9.9996),
            processing_cost: Decimal::ZERO,
            transformation_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            payment_account_id: None,
            notes: None,
            outputs: vec![
                output(dec!(9.9995), dec!(0.9), false),
                output(dec!(0.0004), dec!(0.1), true),
            ],
        };
        let err = transformation.check().unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ref m) if m.contains("Output 2")));

        let rounded = transformation.rounded();
        assert_eq!(rounded.source_quantity_kg, dec!(10.000));
        assert_eq!(rounded.outputs[0].output_quantity_kg, dec!(10.000));
        assert_eq!(rounded.outputs[1].output_quantity_kg, Decimal::ZERO);

        let source_too_small = NewTransformation {
            source_quantity_kg: dec!(0.0004),
            outputs: vec![output(dec!(1), dec!(1), false)],
            ..transformation
        };
        assert!(source_too_small.check().is_err());
    }
}

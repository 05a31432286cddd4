//! Purchases, sales and expenses: the documents that post to the ledger.

use super::journal::round_money;
use crate::services::LedgerError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Purchase {
    pub purchase_id: Uuid,
    pub crop_id: Uuid,
    pub supplier_id: Uuid,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity_kg: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sale {
    pub sale_id: Uuid,
    pub crop_id: Uuid,
    pub customer_id: Uuid,
    pub sale_date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub quantity_kg: Decimal,
    pub total_amount: Decimal,
    pub amount_received: Decimal,
    pub cost_of_goods: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: Uuid,
    pub expense_date: NaiveDate,
    pub contact_id: Option<Uuid>,
    pub expense_account_id: Uuid,
    pub payment_account_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub journal_entry_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub crop_id: Uuid,
    pub supplier_id: Uuid,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub amount_paid: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub crop_id: Uuid,
    pub customer_id: Uuid,
    pub sale_date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub amount_received: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub expense_date: NaiveDate,
    pub contact_id: Option<Uuid>,
    pub expense_account_id: Uuid,
    /// Cash when absent.
    pub payment_account_id: Option<Uuid>,
    pub amount: Decimal,
    pub description: String,
}

/// Total of a priced quantity and how it splits between settled and open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub total: Decimal,
    pub settled: Decimal,
    pub open: Decimal,
}

/// Price `quantity` at `unit_price` and split off the settled part.
pub fn settle(quantity: Decimal, unit_price: Decimal, settled: Decimal) -> Result<Settlement, LedgerError> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::validation("Quantity must be greater than zero"));
    }
    if unit_price < Decimal::ZERO {
        return Err(LedgerError::validation("Unit price must not be negative"));
    }

    let total = round_money(quantity * unit_price);
    let settled = round_money(settled);
    if settled < Decimal::ZERO || settled > total {
        return Err(LedgerError::validation(format!(
            "Settled amount must be between 0 and the total of {}",
            total
        )));
    }

    Ok(Settlement {
        total,
        settled,
        open: total - settled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_payment_leaves_open_balance() {
        let s = settle(dec!(20), dec!(12.5), dec!(100)).unwrap();
        assert_eq!(s.total, dec!(250));
        assert_eq!(s.settled, dec!(100));
        assert_eq!(s.open, dec!(150));
    }

    #[test]
    fn overpayment_is_rejected() {
        assert!(settle(dec!(1), dec!(10), dec!(10.01)).is_err());
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        assert!(settle(Decimal::ZERO, dec!(10), Decimal::ZERO).is_err());
    }
}

//! Purchases, sales and expenses, each posting its journal entry and stock movement.

use super::cardex::{append_movement, lock_crop, stock_valuation};
use super::journal::insert_entry;
use super::masters::crop_units;
use super::metrics::DB_QUERY_DURATION;
use super::{Database, LedgerError};
use crate::models::{
    round_money, settle, to_kg, AccountType, Expense, JournalLineInput, MovementType, NewExpense,
    NewJournalEntry, NewMovement, NewPurchase, NewSale, Purchase, Sale, SourceType,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;

/// Look up a contact's roles, failing when it does not exist.
async fn contact_roles(
    conn: &mut PgConnection,
    contact_id: Uuid,
) -> Result<(String, bool, bool), LedgerError> {
    sqlx::query_as("SELECT name, is_customer, is_supplier FROM contacts WHERE contact_id = $1")
        .bind(contact_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("Contact", contact_id))
}

fn non_zero(lines: impl IntoIterator<Item = JournalLineInput>) -> Vec<JournalLineInput> {
    lines
        .into_iter()
        .filter(|l| !(l.debit + l.credit).is_zero())
        .collect()
}

impl Database {
    /// Buy stock: Dr inventory, Cr cash for the paid part and payables for the rest.
    #[instrument(skip(self, input), fields(crop_id = %input.crop_id, supplier_id = %input.supplier_id))]
    pub async fn create_purchase(&self, input: &NewPurchase) -> Result<Purchase, LedgerError> {
        let settlement = settle(input.quantity, input.unit_price, input.amount_paid)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_purchase"])
            .start_timer();

        let mut tx = self.begin().await?;
        let crop_name = lock_crop(&mut tx, input.crop_id).await?;
        let units = crop_units(&mut tx, input.crop_id).await?;
        let quantity_kg = to_kg(input.quantity, &input.unit, &units)?;

        let (supplier, _, is_supplier) = contact_roles(&mut tx, input.supplier_id).await?;
        if !is_supplier {
            return Err(LedgerError::validation(format!(
                "Contact {} is not a supplier",
                supplier
            )));
        }

        let purchase_id = Uuid::new_v4();
        let journal_entry_id = if settlement.total > Decimal::ZERO {
            let accounts = self.posting_accounts(&mut tx).await?;
            let lines = non_zero([
                JournalLineInput::debit(accounts.inventory, settlement.total),
                JournalLineInput::credit(accounts.cash, settlement.settled),
                JournalLineInput::credit(accounts.payable, settlement.open)
                    .with_contact(Some(input.supplier_id)),
            ]);
            let entry = insert_entry(
                &mut tx,
                &NewJournalEntry::posted(
                    input.purchase_date,
                    format!("Purchase of {} {} {} from {}", input.quantity, input.unit, crop_name, supplier),
                    SourceType::Purchase,
                    purchase_id,
                    lines,
                ),
            )
            .await?;
            Some(entry.entry_id)
        } else {
            None
        };

        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
            INSERT INTO purchases
                (purchase_id, crop_id, supplier_id, purchase_date, quantity, unit, unit_price,
                 quantity_kg, total_amount, amount_paid, journal_entry_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING purchase_id, crop_id, supplier_id, purchase_date, quantity, unit, unit_price,
                      quantity_kg, total_amount, amount_paid, journal_entry_id, notes, created_utc
            "#,
        )
        .bind(purchase_id)
        .bind(input.crop_id)
        .bind(input.supplier_id)
        .bind(input.purchase_date)
        .bind(input.quantity)
        .bind(&input.unit)
        .bind(input.unit_price)
        .bind(quantity_kg)
        .bind(settlement.total)
        .bind(settlement.settled)
        .bind(journal_entry_id)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?;

        let mut movement = NewMovement::valued(
            input.crop_id,
            input.purchase_date,
            MovementType::Purchase,
            quantity_kg,
            settlement.total,
            "purchase",
            purchase_id,
        );
        movement.journal_entry_id = journal_entry_id;
        append_movement(&mut tx, &movement).await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(
            purchase_id = %purchase_id,
            quantity_kg = %quantity_kg,
            total = %settlement.total,
            "Purchase recorded"
        );
        Ok(purchase)
    }

    /// Sell stock at weighted-average cost: revenue and cost of goods post together.
    #[instrument(skip(self, input), fields(crop_id = %input.crop_id, customer_id = %input.customer_id))]
    pub async fn create_sale(&self, input: &NewSale) -> Result<Sale, LedgerError> {
        let settlement = settle(input.quantity, input.unit_price, input.amount_received)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_sale"])
            .start_timer();

        let mut tx = self.begin().await?;
        let crop_name = lock_crop(&mut tx, input.crop_id).await?;
        let units = crop_units(&mut tx, input.crop_id).await?;
        let quantity_kg = to_kg(input.quantity, &input.unit, &units)?;

        let (customer, is_customer, _) = contact_roles(&mut tx, input.customer_id).await?;
        if !is_customer {
            return Err(LedgerError::validation(format!(
                "Contact {} is not a customer",
                customer
            )));
        }

        let stock = stock_valuation(&mut tx, input.crop_id).await?;
        if quantity_kg > stock.quantity_kg {
            return Err(LedgerError::InsufficientStock {
                crop_id: input.crop_id,
                available_kg: stock.quantity_kg,
                requested_kg: quantity_kg,
            });
        }
        let cost_of_goods = stock.issue_cost(quantity_kg);

        let sale_id = Uuid::new_v4();
        let lines = if settlement.total > Decimal::ZERO || cost_of_goods > Decimal::ZERO {
            let accounts = self.posting_accounts(&mut tx).await?;
            non_zero([
                JournalLineInput::debit(accounts.cash, settlement.settled),
                JournalLineInput::debit(accounts.receivable, settlement.open)
                    .with_contact(Some(input.customer_id)),
                JournalLineInput::credit(accounts.sales, settlement.total)
                    .with_contact(Some(input.customer_id)),
                JournalLineInput::debit(accounts.cost_of_goods, cost_of_goods),
                JournalLineInput::credit(accounts.inventory, cost_of_goods),
            ])
        } else {
            Vec::new()
        };

        let journal_entry_id = if lines.is_empty() {
            None
        } else {
            let entry = insert_entry(
                &mut tx,
                &NewJournalEntry::posted(
                    input.sale_date,
                    format!("Sale of {} {} {} to {}", input.quantity, input.unit, crop_name, customer),
                    SourceType::Sale,
                    sale_id,
                    lines,
                ),
            )
            .await?;
            Some(entry.entry_id)
        };

        let sale = sqlx::query_as::<_, Sale>(
            r#"
            INSERT INTO sales
                (sale_id, crop_id, customer_id, sale_date, quantity, unit, unit_price, quantity_kg,
                 total_amount, amount_received, cost_of_goods, journal_entry_id, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING sale_id, crop_id, customer_id, sale_date, quantity, unit, unit_price, quantity_kg,
                      total_amount, amount_received, cost_of_goods, journal_entry_id, notes, created_utc
            "#,
        )
        .bind(sale_id)
        .bind(input.crop_id)
        .bind(input.customer_id)
        .bind(input.sale_date)
        .bind(input.quantity)
        .bind(&input.unit)
        .bind(input.unit_price)
        .bind(quantity_kg)
        .bind(settlement.total)
        .bind(settlement.settled)
        .bind(cost_of_goods)
        .bind(journal_entry_id)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?;

        let mut movement = NewMovement::valued(
            input.crop_id,
            input.sale_date,
            MovementType::Sale,
            quantity_kg,
            cost_of_goods,
            "sale",
            sale_id,
        );
        movement.journal_entry_id = journal_entry_id;
        append_movement(&mut tx, &movement).await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(
            sale_id = %sale_id,
            quantity_kg = %quantity_kg,
            total = %settlement.total,
            cost_of_goods = %cost_of_goods,
            "Sale recorded"
        );
        Ok(sale)
    }

    /// Book an expense: Dr the expense account, Cr the payment account.
    #[instrument(skip(self, input), fields(expense_account_id = %input.expense_account_id))]
    pub async fn create_expense(&self, input: &NewExpense) -> Result<Expense, LedgerError> {
        let amount = round_money(input.amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("Expense amount must be greater than zero"));
        }
        if input.description.trim().is_empty() {
            return Err(LedgerError::validation("Expense description is required"));
        }

        let mut tx = self.begin().await?;

        let account_type: Option<String> =
            sqlx::query_scalar("SELECT account_type FROM accounts WHERE account_id = $1")
                .bind(input.expense_account_id)
                .fetch_optional(&mut *tx)
                .await?;
        match account_type.as_deref() {
            None => return Err(LedgerError::not_found("Account", input.expense_account_id)),
            Some(t) if t != AccountType::Expense.as_str() => {
                return Err(LedgerError::validation(
                    "Expenses must be booked to an expense account",
                ))
            }
            Some(_) => {}
        }
        if let Some(contact_id) = input.contact_id {
            contact_roles(&mut tx, contact_id).await?;
        }

        let payment_account_id = match input.payment_account_id {
            Some(id) => id,
            None => self.posting_accounts(&mut tx).await?.cash,
        };

        let expense_id = Uuid::new_v4();
        let entry = insert_entry(
            &mut tx,
            &NewJournalEntry::posted(
                input.expense_date,
                input.description.trim(),
                SourceType::Expense,
                expense_id,
                vec![
                    JournalLineInput::debit(input.expense_account_id, amount)
                        .with_contact(input.contact_id),
                    JournalLineInput::credit(payment_account_id, amount),
                ],
            ),
        )
        .await?;

        let expense = sqlx::query_as::<_, Expense>(
            r#"
            INSERT INTO expenses
                (expense_id, expense_date, contact_id, expense_account_id, payment_account_id,
                 amount, description, journal_entry_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING expense_id, expense_date, contact_id, expense_account_id, payment_account_id,
                      amount, description, journal_entry_id, created_utc
            "#,
        )
        .bind(expense_id)
        .bind(input.expense_date)
        .bind(input.contact_id)
        .bind(input.expense_account_id)
        .bind(payment_account_id)
        .bind(amount)
        .bind(input.description.trim())
        .bind(entry.entry_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(expense_id = %expense_id, amount = %amount, "Expense recorded");
        Ok(expense)
    }
}

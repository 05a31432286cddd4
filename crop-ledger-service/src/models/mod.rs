//! Domain models for crop-ledger-service.

mod account;
mod contact;
mod crop;
mod integrity;
mod inventory;
mod journal;
mod report;
mod trade;
mod transformation;

pub use account::{Account, AccountBalance, AccountType, CreateAccount, UpdateAccount};
pub use contact::{Contact, ContactRole, CreateContact, UpdateContact};
pub use crop::{check_units, to_kg, CreateCrop, Crop, CropUnit, DailyPrice, UpdateCrop, KG};
pub use integrity::{
    confirmation_token, ConflictReport, DeletionOutcome, DeletionState, DependentTable,
    MasterKind,
};
pub use inventory::{
    cost_of_issue, replay_balances, round_kg, unit_cost, AdjustmentType, Cardex, CardexLine,
    Direction, InventoryMovement, MovementType, NewAdjustment, NewMovement,
    Shortfall, StockSummary, StockTotals, StockValuation,
};
pub use journal::{
    round_money, validate_lines, EntryStatus, EntryTotals, JournalEntry, JournalLine,
    JournalLineInput, NewJournalEntry, SourceType,
};
pub use report::{
    AccountTotals, BalanceSheet, IncomeStatement, ReportLine, TrialBalance, TrialBalanceLine,
};
pub use trade::{settle, Expense, NewExpense, NewPurchase, NewSale, Purchase, Sale, Settlement};
pub use transformation::{
    allocate, AllocatedOutput, AllocationPlan, NewTransformation, OutputInput, Transformation,
    TransformationOutput,
};

use thiserror::Error;

/// A stored enum column held a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {field} value '{value}'")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(field: &'static str, value: String) -> Self {
        Self { field, value }
    }
}

//! Request bodies and query strings for the HTTP API.
//!
//! Shape checks (required text, list sizes) run through `validator`; domain
//! rules such as balancing and ratio sums are enforced by the services.

use crate::models::{
    AccountType, AdjustmentType, ContactRole, CreateAccount, CreateContact, CreateCrop, CropUnit,
    EntryStatus, JournalLineInput, NewAdjustment, NewExpense, NewJournalEntry, NewPurchase,
    NewSale, NewTransformation, OutputInput, SourceType, UpdateAccount, UpdateContact, UpdateCrop,
};
use crate::services::EntryFilter;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

// Accounts

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 32, message = "Account code must be 1-32 characters"))]
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "Account name must be 1-200 characters"))]
    pub name: String,
    pub account_type: AccountType,
}

impl From<CreateAccountRequest> for CreateAccount {
    fn from(req: CreateAccountRequest) -> Self {
        Self {
            code: req.code,
            name: req.name,
            account_type: req.account_type,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(length(min = 1, max = 32, message = "Account code must be 1-32 characters"))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Account name must be 1-200 characters"))]
    pub name: Option<String>,
}

impl From<UpdateAccountRequest> for UpdateAccount {
    fn from(req: UpdateAccountRequest) -> Self {
        Self {
            code: req.code,
            name: req.name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountListQuery {
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BalanceQuery {
    #[serde(default)]
    pub recompute: bool,
}

// Journal

/// Manually keyed entry. Balance is checked by the ledger.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualEntryRequest {
    #[serde(alias = "entry_date")]
    pub date: NaiveDate,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    pub lines: Vec<JournalLineInput>,
    #[serde(default)]
    pub status: EntryStatus,
}

impl From<ManualEntryRequest> for NewJournalEntry {
    fn from(req: ManualEntryRequest) -> Self {
        Self {
            entry_date: req.date,
            description: req.description,
            status: req.status,
            source_type: SourceType::Manual,
            source_id: None,
            reverses_entry_id: None,
            lines: req.lines,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReverseEntryRequest {
    #[serde(alias = "date")]
    pub entry_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryListQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub account_id: Option<Uuid>,
}

impl From<EntryListQuery> for EntryFilter {
    fn from(query: EntryListQuery) -> Self {
        Self {
            start_date: query.start_date,
            end_date: query.end_date,
            account_id: query.account_id,
        }
    }
}

// Inventory

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustmentRequest {
    pub crop_id: Uuid,
    pub adjustment_date: NaiveDate,
    pub adjustment_type: AdjustmentType,
    pub quantity_kg: Decimal,
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

impl From<AdjustmentRequest> for NewAdjustment {
    fn from(req: AdjustmentRequest) -> Self {
        Self {
            crop_id: req.crop_id,
            adjustment_date: req.adjustment_date,
            adjustment_type: req.adjustment_type,
            quantity_kg: req.quantity_kg,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// Transformations

#[derive(Debug, Deserialize, Validate)]
pub struct TransformationRequest {
    pub source_crop_id: Uuid,
    pub source_quantity_kg: Decimal,
    #[serde(default)]
    pub processing_cost: Decimal,
    pub transformation_date: NaiveDate,
    pub payment_account_id: Option<Uuid>,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "At least one output is required"))]
    pub outputs: Vec<OutputInput>,
}

impl From<TransformationRequest> for NewTransformation {
    fn from(req: TransformationRequest) -> Self {
        Self {
            source_crop_id: req.source_crop_id,
            source_quantity_kg: req.source_quantity_kg,
            processing_cost: req.processing_cost,
            transformation_date: req.transformation_date,
            payment_account_id: req.payment_account_id,
            notes: req.notes,
            outputs: req.outputs,
        }
    }
}

// Crops and prices

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCropRequest {
    #[validate(length(min = 1, max = 200, message = "Crop name must be 1-200 characters"))]
    pub name: String,
    #[serde(default)]
    pub units: Vec<CropUnit>,
}

impl From<CreateCropRequest> for CreateCrop {
    fn from(req: CreateCropRequest) -> Self {
        Self {
            name: req.name,
            units: req.units,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCropRequest {
    #[validate(length(min = 1, max = 200, message = "Crop name must be 1-200 characters"))]
    pub name: Option<String>,
    pub units: Option<Vec<CropUnit>>,
    pub is_active: Option<bool>,
}

impl From<UpdateCropRequest> for UpdateCrop {
    fn from(req: UpdateCropRequest) -> Self {
        Self {
            name: req.name,
            units: req.units,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PriceRequest {
    #[serde(alias = "date")]
    pub price_date: NaiveDate,
    #[validate(length(min = 1, max = 32, message = "Unit must be 1-32 characters"))]
    pub unit: String,
    pub price: Decimal,
}

// Contacts

#[derive(Debug, Deserialize, Validate)]
pub struct CreateContactRequest {
    #[validate(length(min = 1, max = 200, message = "Contact name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_customer: bool,
    #[serde(default)]
    pub is_supplier: bool,
}

impl From<CreateContactRequest> for CreateContact {
    fn from(req: CreateContactRequest) -> Self {
        Self {
            name: req.name,
            phone: req.phone,
            is_customer: req.is_customer,
            is_supplier: req.is_supplier,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateContactRequest {
    #[validate(length(min = 1, max = 200, message = "Contact name must be 1-200 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<String>,
    pub is_customer: Option<bool>,
    pub is_supplier: Option<bool>,
    pub is_active: Option<bool>,
}

impl From<UpdateContactRequest> for UpdateContact {
    fn from(req: UpdateContactRequest) -> Self {
        Self {
            name: req.name,
            phone: req.phone,
            is_customer: req.is_customer,
            is_supplier: req.is_supplier,
            is_active: req.is_active,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactListQuery {
    pub role: Option<ContactRole>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CropListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

// Deletion guard

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    #[serde(alias = "target_crop_id", alias = "target_contact_id")]
    pub target_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForceDeleteRequest {
    #[validate(length(min = 1, message = "Confirmation token is required"))]
    pub confirmation_token: String,
}

// Trade documents

#[derive(Debug, Deserialize, Validate)]
pub struct PurchaseRequest {
    pub crop_id: Uuid,
    pub supplier_id: Uuid,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 32, message = "Unit must be 1-32 characters"))]
    pub unit: String,
    pub unit_price: Decimal,
    #[serde(default)]
    pub amount_paid: Decimal,
    pub notes: Option<String>,
}

impl From<PurchaseRequest> for NewPurchase {
    fn from(req: PurchaseRequest) -> Self {
        Self {
            crop_id: req.crop_id,
            supplier_id: req.supplier_id,
            purchase_date: req.purchase_date,
            quantity: req.quantity,
            unit: req.unit,
            unit_price: req.unit_price,
            amount_paid: req.amount_paid,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaleRequest {
    pub crop_id: Uuid,
    pub customer_id: Uuid,
    pub sale_date: NaiveDate,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 32, message = "Unit must be 1-32 characters"))]
    pub unit: String,
    pub unit_price: Decimal,
    #[serde(default)]
    pub amount_received: Decimal,
    pub notes: Option<String>,
}

impl From<SaleRequest> for NewSale {
    fn from(req: SaleRequest) -> Self {
        Self {
            crop_id: req.crop_id,
            customer_id: req.customer_id,
            sale_date: req.sale_date,
            quantity: req.quantity,
            unit: req.unit,
            unit_price: req.unit_price,
            amount_received: req.amount_received,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExpenseRequest {
    pub expense_date: NaiveDate,
    pub contact_id: Option<Uuid>,
    pub expense_account_id: Uuid,
    pub payment_account_id: Option<Uuid>,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
}

impl From<ExpenseRequest> for NewExpense {
    fn from(req: ExpenseRequest) -> Self {
        Self {
            expense_date: req.expense_date,
            contact_id: req.contact_id,
            expense_account_id: req.expense_account_id,
            payment_account_id: req.payment_account_id,
            amount: req.amount,
            description: req.description,
        }
    }
}

// Reports

#[derive(Debug, Deserialize)]
pub struct AsOfQuery {
    pub as_of_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    #[serde(alias = "start")]
    pub start_date: NaiveDate,
    #[serde(alias = "end")]
    pub end_date: NaiveDate,
}

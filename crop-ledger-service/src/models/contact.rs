//! Customers and suppliers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub is_customer: bool,
    pub is_supplier: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Role filter for contact listings. A contact may hold both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactRole {
    Customer,
    Supplier,
}

impl ContactRole {
    pub fn matches(&self, contact: &Contact) -> bool {
        match self {
            Self::Customer => contact.is_customer,
            Self::Supplier => contact.is_supplier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateContact {
    pub name: String,
    pub phone: Option<String>,
    pub is_customer: bool,
    pub is_supplier: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub is_customer: Option<bool>,
    pub is_supplier: Option<bool>,
    pub is_active: Option<bool>,
}

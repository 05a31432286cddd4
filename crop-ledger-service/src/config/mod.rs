//! Configuration module for crop-ledger-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub posting_accounts: PostingAccountCodes,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Codes of the accounts that purchases, sales, expenses, adjustments and
/// transformations post to. Defaults match the seeded chart of accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingAccountCodes {
    pub cash: String,
    pub receivable: String,
    pub inventory: String,
    pub payable: String,
    pub sales: String,
    pub inventory_gain: String,
    pub cost_of_goods: String,
    pub inventory_loss: String,
    pub transformation_loss: String,
}

impl Default for PostingAccountCodes {
    fn default() -> Self {
        Self {
            cash: "1100".to_string(),
            receivable: "1200".to_string(),
            inventory: "1300".to_string(),
            payable: "2100".to_string(),
            sales: "4100".to_string(),
            inventory_gain: "4200".to_string(),
            cost_of_goods: "5100".to_string(),
            inventory_loss: "5200".to_string(),
            transformation_loss: "5300".to_string(),
        }
    }
}

impl PostingAccountCodes {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let code = |key: &str, default: String| env::var(key).unwrap_or(default);

        Self {
            cash: code("POSTING_ACCOUNT_CASH", defaults.cash),
            receivable: code("POSTING_ACCOUNT_RECEIVABLE", defaults.receivable),
            inventory: code("POSTING_ACCOUNT_INVENTORY", defaults.inventory),
            payable: code("POSTING_ACCOUNT_PAYABLE", defaults.payable),
            sales: code("POSTING_ACCOUNT_SALES", defaults.sales),
            inventory_gain: code("POSTING_ACCOUNT_INVENTORY_GAIN", defaults.inventory_gain),
            cost_of_goods: code("POSTING_ACCOUNT_COST_OF_GOODS", defaults.cost_of_goods),
            inventory_loss: code("POSTING_ACCOUNT_INVENTORY_LOSS", defaults.inventory_loss),
            transformation_loss: code(
                "POSTING_ACCOUNT_TRANSFORMATION_LOSS",
                defaults.transformation_loss,
            ),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "crop-ledger-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            posting_accounts: PostingAccountCodes::from_env(),
        })
    }
}

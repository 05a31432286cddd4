//! Database service for crop-ledger-service.
//!
//! Domain operations live in sibling modules as further `impl Database`
//! blocks; the transaction-scoped helpers they share take a `PgConnection`
//! so they compose inside one transaction.

use crate::config::PostingAccountCodes;
use crate::services::LedgerError;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    posting_codes: PostingAccountCodes,
}

/// Posting account ids resolved from their configured codes.
#[derive(Debug, Clone, Copy)]
pub struct PostingAccounts {
    pub cash: Uuid,
    pub receivable: Uuid,
    pub inventory: Uuid,
    pub payable: Uuid,
    pub sales: Uuid,
    pub inventory_gain: Uuid,
    pub cost_of_goods: Uuid,
    pub inventory_loss: Uuid,
    pub transformation_loss: Uuid,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url, posting_codes), fields(service = "crop-ledger-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        posting_codes: PostingAccountCodes,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            posting_codes,
        })
    }

    /// Pool that connects on first use. Requests rejected before touching
    /// the database never open a connection.
    pub fn connect_lazy(
        database_url: &str,
        posting_codes: PostingAccountCodes,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Invalid database url: {}", e)))?;

        Ok(Self {
            pool,
            posting_codes,
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Begin a read-write transaction.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        Ok(self.pool.begin().await?)
    }

    /// Begin a transaction that reads one consistent snapshot and never blocks writers.
    pub(crate) async fn begin_snapshot(
        &self,
    ) -> Result<Transaction<'static, Postgres>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Resolve the configured posting account codes to ids.
    pub(crate) async fn posting_accounts(
        &self,
        conn: &mut PgConnection,
    ) -> Result<PostingAccounts, LedgerError> {
        let codes = &self.posting_codes;
        let wanted = [
            &codes.cash,
            &codes.receivable,
            &codes.inventory,
            &codes.payable,
            &codes.sales,
            &codes.inventory_gain,
            &codes.cost_of_goods,
            &codes.inventory_loss,
            &codes.transformation_loss,
        ];
        let code_list: Vec<String> = wanted.iter().map(|c| c.to_string()).collect();

        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT account_id, code FROM accounts WHERE code = ANY($1)")
                .bind(&code_list)
                .fetch_all(&mut *conn)
                .await?;

        let find = |code: &String| -> Result<Uuid, LedgerError> {
            rows.iter()
                .find(|(_, c)| c == code)
                .map(|(id, _)| *id)
                .ok_or_else(|| LedgerError::MissingPostingAccount(code.clone()))
        };

        Ok(PostingAccounts {
            cash: find(&codes.cash)?,
            receivable: find(&codes.receivable)?,
            inventory: find(&codes.inventory)?,
            payable: find(&codes.payable)?,
            sales: find(&codes.sales)?,
            inventory_gain: find(&codes.inventory_gain)?,
            cost_of_goods: find(&codes.cost_of_goods)?,
            inventory_loss: find(&codes.inventory_loss)?,
            transformation_loss: find(&codes.transformation_loss)?,
        })
    }
}

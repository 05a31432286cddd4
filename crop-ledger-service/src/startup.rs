//! Application startup and lifecycle management.

use crate::config::LedgerConfig;
use crate::handlers::{
    accounts, contacts, crops, health_check, inventory, journal, metrics_handler,
    readiness_check, reports, trades, transformations,
};
use crate::services::{init_metrics, Database};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: LedgerConfig,
    pub db: Arc<Database>,
}

/// Full HTTP surface of the service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // Chart of accounts
        .route(
            "/accounts",
            post(accounts::create_account).get(accounts::list_accounts),
        )
        .route(
            "/accounts/:id",
            get(accounts::get_account)
                .patch(accounts::update_account)
                .delete(accounts::delete_account),
        )
        .route("/accounts/:id/activate", post(accounts::activate_account))
        .route("/accounts/:id/deactivate", post(accounts::deactivate_account))
        .route("/accounts/:id/balance", get(accounts::get_balance))
        // Journal
        .route("/journal-entries", get(journal::list_entries))
        .route("/journal-entries/manual", post(journal::create_manual_entry))
        .route(
            "/journal-entries/:id",
            get(journal::get_entry).delete(journal::delete_draft),
        )
        .route("/journal-entries/:id/post", post(journal::post_draft))
        .route("/journal-entries/:id/reverse", post(journal::reverse_entry))
        // Inventory
        .route("/inventory", get(inventory::stock_summary))
        .route("/inventory/:crop_id/cardex", get(inventory::get_cardex))
        .route("/inventory/adjustments", post(inventory::create_adjustment))
        .route(
            "/inventory/adjustments/:movement_id",
            delete(inventory::delete_adjustment),
        )
        // Transformations
        .route(
            "/transformations",
            post(transformations::create_transformation).get(transformations::list_transformations),
        )
        .route(
            "/transformations/:id",
            get(transformations::get_transformation),
        )
        // Crops and prices
        .route("/crops", post(crops::create_crop).get(crops::list_crops))
        .route(
            "/crops/:id",
            get(crops::get_crop)
                .patch(crops::update_crop)
                .delete(crops::delete_crop),
        )
        .route(
            "/crops/:id/migrate-and-delete",
            post(crops::migrate_and_delete_crop),
        )
        .route("/crops/:id/force", delete(crops::force_delete_crop))
        .route(
            "/crops/:id/prices",
            post(crops::upsert_price).get(crops::list_prices),
        )
        // Contacts
        .route(
            "/contacts",
            post(contacts::create_contact).get(contacts::list_contacts),
        )
        .route(
            "/contacts/:id",
            get(contacts::get_contact)
                .patch(contacts::update_contact)
                .delete(contacts::delete_contact),
        )
        .route(
            "/contacts/:id/migrate-and-delete",
            post(contacts::migrate_and_delete_contact),
        )
        .route("/contacts/:id/force", delete(contacts::force_delete_contact))
        // Trade documents
        .route("/purchases", post(trades::create_purchase))
        .route("/sales", post(trades::create_sale))
        .route("/expenses", post(trades::create_expense))
        // Reports
        .route("/reports/trial-balance", get(reports::trial_balance))
        .route("/reports/income-statement", get(reports::income_statement))
        .route("/reports/balance-sheet", get(reports::balance_sheet))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LedgerConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: LedgerConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: LedgerConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
            config.posting_accounts.clone(),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
        };

        let addr = config.common.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Crop ledger service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

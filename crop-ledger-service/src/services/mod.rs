pub mod accounts;
pub mod cardex;
pub mod database;
pub mod error;
pub mod integrity;
pub mod journal;
pub mod masters;
pub mod metrics;
pub mod reports;
pub mod trades;
pub mod transformation;

pub use cardex::AdjustmentRemoval;
pub use database::{Database, PostingAccounts};
pub use error::LedgerError;
pub use journal::EntryFilter;
pub use metrics::{get_metrics, init_metrics};

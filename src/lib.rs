pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod store;
pub mod vault;

pub use audit::AuditLedger;
pub use error::{LedgerError, LedgerResult};

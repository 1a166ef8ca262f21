//! Persistence layer — tenant-scoped storage for transactions and the
//! ingestion attempt ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AttemptClaim, Database, Tenant, TransactionFilter, TransactionRecord};

//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single
//! `libsql::Connection` is reused for all operations; it is `Send + Sync`
//! and safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::validate::ValidatedTransaction;
use crate::store::migrations;
use crate::store::traits::{AttemptClaim, Database, Tenant, TransactionFilter, TransactionRecord};

/// An `in_progress` attempt older than this may be reclaimed by a later
/// delivery. Covers crashes between claim and completion.
const STALE_ATTEMPT_AFTER: Duration = Duration::minutes(5);

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        Self::from_db(db).await
    }

    async fn from_db(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        // SQLite leaves cascade deletes off unless asked.
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql error, surfacing uniqueness violations as `Constraint`.
fn map_query_err(e: libsql::Error, context: &str) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{context}: {msg}"))
    } else {
        DatabaseError::Query(format!("{context}: {msg}"))
    }
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_to_tenant(row: &libsql::Row) -> Result<Tenant, libsql::Error> {
    let created_str: String = row.get(4)?;
    let display_name: Option<String> = row.get(2).ok();
    let default_currency: Option<String> = row.get(3).ok();
    Ok(Tenant {
        id: row.get(0)?,
        external_id: row.get(1)?,
        display_name,
        default_currency,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_transaction(row: &libsql::Row) -> Result<TransactionRecord, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("Failed to read row: {e}"));

    let amount_str: String = row.get(3).map_err(read)?;
    let amount = amount_str.parse().map_err(|e| {
        DatabaseError::Serialization(format!("Bad amount '{amount_str}' in store: {e}"))
    })?;
    let occurred_str: String = row.get(7).map_err(read)?;
    let created_str: String = row.get(9).map_err(read)?;
    let raw_extraction: Option<String> = row.get(8).ok();

    Ok(TransactionRecord {
        id: row.get(0).map_err(read)?,
        tenant_id: row.get(1).map_err(read)?,
        source_message_id: row.get(2).map_err(read)?,
        amount,
        currency: row.get(4).map_err(read)?,
        merchant: row.get(5).map_err(read)?,
        category: row.get(6).map_err(read)?,
        occurred_at: parse_datetime(&occurred_str),
        raw_extraction,
        created_at: parse_datetime(&created_str),
    })
}

const TRANSACTION_COLUMNS: &str = "id, tenant_id, source_message_id, amount, currency, \
     merchant, category, occurred_at, raw_extraction, created_at";

// ── Database impl ───────────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tenants ─────────────────────────────────────────────────────

    async fn get_tenant_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Tenant>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, external_id, display_name, default_currency, created_at
                 FROM tenants WHERE external_id = ?1",
                params![external_id],
            )
            .await
            .map_err(|e| map_query_err(e, "get_tenant_by_external_id"))?;

        match rows
            .next()
            .await
            .map_err(|e| map_query_err(e, "get_tenant_by_external_id"))?
        {
            Some(row) => {
                let tenant = row_to_tenant(&row)
                    .map_err(|e| DatabaseError::Query(format!("Failed to read tenant: {e}")))?;
                Ok(Some(tenant))
            }
            None => Ok(None),
        }
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tenants (id, external_id, display_name, default_currency, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    tenant.id.as_str(),
                    tenant.external_id.as_str(),
                    opt_text(tenant.display_name.as_deref()),
                    opt_text(tenant.default_currency.as_deref()),
                    tenant.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_query_err(e, "insert_tenant"))?;

        debug!(tenant_id = %tenant.id, external_id = %tenant.external_id, "Tenant created");
        Ok(())
    }

    // ── Transactions ────────────────────────────────────────────────

    async fn insert_transaction(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        txn: &ValidatedTransaction,
    ) -> Result<TransactionRecord, DatabaseError> {
        let record = TransactionRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            source_message_id: source_message_id.to_string(),
            amount: txn.amount,
            currency: txn.currency.clone(),
            merchant: txn.merchant.clone(),
            category: txn.category.clone(),
            occurred_at: txn.occurred_at,
            raw_extraction: (!txn.raw_extraction.is_null())
                .then(|| txn.raw_extraction.to_string()),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO transactions
                    (id, tenant_id, source_message_id, amount, currency,
                     merchant, category, occurred_at, raw_extraction, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.as_str(),
                    record.tenant_id.as_str(),
                    record.source_message_id.as_str(),
                    record.amount.to_string(),
                    record.currency.as_str(),
                    record.merchant.as_str(),
                    record.category.as_str(),
                    record.occurred_at.to_rfc3339(),
                    opt_text(record.raw_extraction.as_deref()),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_query_err(e, "insert_transaction"))?;

        debug!(
            transaction_id = %record.id,
            tenant_id = %record.tenant_id,
            source_message_id = %record.source_message_id,
            "Transaction persisted"
        );
        Ok(record)
    }

    async fn get_transaction_by_source(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     WHERE tenant_id = ?1 AND source_message_id = ?2"
                ),
                params![tenant_id, source_message_id],
            )
            .await
            .map_err(|e| map_query_err(e, "get_transaction_by_source"))?;

        match rows
            .next()
            .await
            .map_err(|e| map_query_err(e, "get_transaction_by_source"))?
        {
            Some(row) => Ok(Some(row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(
        &self,
        tenant_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        // LIMIT -1 means "no limit" to SQLite.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     WHERE tenant_id = ?1
                       AND (?2 IS NULL OR occurred_at >= ?2)
                       AND (?3 IS NULL OR occurred_at < ?3)
                       AND (?4 IS NULL OR category = ?4)
                     ORDER BY occurred_at DESC
                     LIMIT ?5"
                ),
                params![
                    tenant_id,
                    opt_text_owned(filter.from.map(|t| t.to_rfc3339())),
                    opt_text_owned(filter.to.map(|t| t.to_rfc3339())),
                    opt_text(filter.category.as_deref()),
                    limit,
                ],
            )
            .await
            .map_err(|e| map_query_err(e, "list_transactions"))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| map_query_err(e, "list_transactions"))?
        {
            records.push(row_to_transaction(&row)?);
        }
        Ok(records)
    }

    // ── Attempt ledger ──────────────────────────────────────────────

    async fn begin_attempt(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<AttemptClaim, DatabaseError> {
        let now = Utc::now();

        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO ingestion_attempts
                    (tenant_id, source_message_id, status, started_at, updated_at)
                 VALUES (?1, ?2, 'in_progress', ?3, ?3)",
                params![tenant_id, source_message_id, now.to_rfc3339()],
            )
            .await
            .map_err(|e| map_query_err(e, "begin_attempt"))?;

        if inserted == 1 {
            return Ok(AttemptClaim::Claimed);
        }

        // Key already present — inspect the prior attempt.
        let mut rows = self
            .conn()
            .query(
                "SELECT status, transaction_id, started_at FROM ingestion_attempts
                 WHERE tenant_id = ?1 AND source_message_id = ?2",
                params![tenant_id, source_message_id],
            )
            .await
            .map_err(|e| map_query_err(e, "begin_attempt"))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| map_query_err(e, "begin_attempt"))?
        else {
            // Released between our insert and select; very narrow window.
            return Ok(AttemptClaim::InProgress);
        };

        let status: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("Failed to read attempt: {e}")))?;
        let transaction_id: Option<String> = row.get(1).ok();
        let started_str: String = row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("Failed to read attempt: {e}")))?;

        match status.as_str() {
            "succeeded" => Ok(AttemptClaim::AlreadySucceeded { transaction_id }),
            "failed_permanent" => Ok(AttemptClaim::AlreadyFailed),
            _ => {
                let started_at = parse_datetime(&started_str);
                if now - started_at < STALE_ATTEMPT_AFTER {
                    return Ok(AttemptClaim::InProgress);
                }

                // Stale claim — take it over, guarded against a
                // concurrent reclaimer by the old started_at value.
                let reclaimed = self
                    .conn()
                    .execute(
                        "UPDATE ingestion_attempts
                         SET started_at = ?3, updated_at = ?3
                         WHERE tenant_id = ?1 AND source_message_id = ?2
                           AND status = 'in_progress' AND started_at = ?4",
                        params![
                            tenant_id,
                            source_message_id,
                            now.to_rfc3339(),
                            started_str,
                        ],
                    )
                    .await
                    .map_err(|e| map_query_err(e, "begin_attempt"))?;

                if reclaimed == 1 {
                    debug!(
                        tenant_id,
                        source_message_id, "Reclaimed stale in-progress attempt"
                    );
                    Ok(AttemptClaim::Claimed)
                } else {
                    Ok(AttemptClaim::InProgress)
                }
            }
        }
    }

    async fn mark_attempt_succeeded(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        transaction_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE ingestion_attempts
                 SET status = 'succeeded', transaction_id = ?3, updated_at = ?4
                 WHERE tenant_id = ?1 AND source_message_id = ?2",
                params![
                    tenant_id,
                    source_message_id,
                    transaction_id,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_query_err(e, "mark_attempt_succeeded"))?;
        Ok(())
    }

    async fn mark_attempt_failed(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        detail: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE ingestion_attempts
                 SET status = 'failed_permanent', detail = ?3, updated_at = ?4
                 WHERE tenant_id = ?1 AND source_message_id = ?2",
                params![
                    tenant_id,
                    source_message_id,
                    detail,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_query_err(e, "mark_attempt_failed"))?;
        Ok(())
    }

    async fn release_attempt(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM ingestion_attempts
                 WHERE tenant_id = ?1 AND source_message_id = ?2
                   AND status = 'in_progress'",
                params![tenant_id, source_message_id],
            )
            .await
            .map_err(|e| map_query_err(e, "release_attempt"))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

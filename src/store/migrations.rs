//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            display_name TEXT,
            default_currency TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tenants_external_id ON tenants(external_id);

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
            source_message_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            merchant TEXT NOT NULL,
            category TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            raw_extraction TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (tenant_id, source_message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_tenant ON transactions(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_tenant_occurred
            ON transactions(tenant_id, occurred_at);

        CREATE TABLE IF NOT EXISTS ingestion_attempts (
            tenant_id TEXT NOT NULL,
            source_message_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'in_progress',
            transaction_id TEXT,
            detail TEXT,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, source_message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_status ON ingestion_attempts(status);
    "#,
}];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` tracking table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &["tenants", "transactions", "ingestion_attempts", "_migrations"] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let v: i64 = row.get(0).unwrap();
        let n: String = row.get(1).unwrap();
        assert_eq!(v, 1);
        assert_eq!(n, "initial_schema");
    }

    #[tokio::test]
    async fn transactions_unique_per_tenant_and_source() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO tenants (id, external_id, created_at) VALUES ('t1', 'ext1', '2026-01-01')",
            (),
        )
        .await
        .unwrap();

        let insert = "INSERT INTO transactions
            (id, tenant_id, source_message_id, amount, currency, merchant, category, occurred_at, created_at)
            VALUES (?1, 't1', 'm1', '10', 'INR', 'X', 'Y', '2026-01-01', '2026-01-01')";
        conn.execute(insert, libsql::params!["tx1"]).await.unwrap();

        let dup = conn.execute(insert, libsql::params!["tx2"]).await;
        assert!(dup.is_err(), "duplicate (tenant, source) must be rejected");
    }
}

//! Unified `Database` trait — single async interface for persistence.
//!
//! Every transaction query takes a `tenant_id`; there is no cross-tenant
//! read path. This is the enforcement point for multi-tenancy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::validate::ValidatedTransaction;

/// One chat sender — the isolation boundary that owns its transactions.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    /// Stable external sender id (unique).
    pub external_id: String,
    pub display_name: Option<String>,
    /// Fallback currency used by the validator when extraction yields
    /// no recognizable code.
    pub default_currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Build a fresh tenant candidate for first contact.
    pub fn new(
        external_id: &str,
        display_name: Option<&str>,
        default_currency: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            external_id: external_id.to_string(),
            display_name: display_name.map(String::from),
            default_currency: default_currency.map(String::from),
            created_at: Utc::now(),
        }
    }
}

/// A persisted transaction. Immutable after creation.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub tenant_id: String,
    /// The inbound update identifier that produced this row.
    pub source_message_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub category: String,
    pub occurred_at: DateTime<Utc>,
    /// Raw extraction payload retained for audit, as JSON text.
    pub raw_extraction: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filters for listing a tenant's transactions.
///
/// `from` is inclusive and `to` exclusive, both in UTC.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

/// Outcome of claiming a delivery key in the attempt ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptClaim {
    /// This caller owns the pipeline for the key.
    Claimed,
    /// Another pipeline is currently processing the key.
    InProgress,
    /// A previous attempt already persisted a transaction.
    AlreadySucceeded { transaction_id: Option<String> },
    /// A previous attempt failed permanently; reprocessing won't help.
    AlreadyFailed,
}

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Tenants ─────────────────────────────────────────────────────

    /// Look up a tenant by its external sender id.
    async fn get_tenant_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Tenant>, DatabaseError>;

    /// Insert a tenant. Fails with `Constraint` when the external id
    /// already exists (first-contact race).
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DatabaseError>;

    // ── Transactions ────────────────────────────────────────────────

    /// Persist a validated transaction under the given tenant.
    ///
    /// Fails with `Constraint` if `(tenant_id, source_message_id)`
    /// already exists — the caller treats that as "already succeeded".
    async fn insert_transaction(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        txn: &ValidatedTransaction,
    ) -> Result<TransactionRecord, DatabaseError>;

    /// Fetch the transaction a given delivery produced, if any.
    async fn get_transaction_by_source(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;

    /// List a tenant's transactions, most recent first.
    async fn list_transactions(
        &self,
        tenant_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, DatabaseError>;

    // ── Attempt ledger ──────────────────────────────────────────────

    /// Atomically claim `(tenant_id, source_message_id)` for processing.
    async fn begin_attempt(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<AttemptClaim, DatabaseError>;

    /// Record success for the key, pointing at the persisted row.
    async fn mark_attempt_succeeded(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        transaction_id: &str,
    ) -> Result<(), DatabaseError>;

    /// Record permanent failure for the key.
    async fn mark_attempt_failed(
        &self,
        tenant_id: &str,
        source_message_id: &str,
        detail: &str,
    ) -> Result<(), DatabaseError>;

    /// Release a claim after a transient failure so a redelivery can
    /// start clean.
    async fn release_attempt(
        &self,
        tenant_id: &str,
        source_message_id: &str,
    ) -> Result<(), DatabaseError>;
}

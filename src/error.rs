//! Error types for ledger-bot.

use rust_decimal::Decimal;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Whether this error is a uniqueness conflict.
    ///
    /// The ingestion controller treats a conflict on
    /// `(tenant_id, source_message_id)` as "already persisted", not a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

/// Tenant resolution errors — store failure during lookup/create only.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("Tenant store failure: {0}")]
    Store(#[from] DatabaseError),
}

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message: {reason}")]
    SendFailed { reason: String },

    #[error("Failed to download file {file_ref}: {reason}")]
    DownloadFailed { file_ref: String, reason: String },

    #[error("Invalid update envelope: {0}")]
    InvalidUpdate(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Extraction backend errors.
///
/// The split drives the controller's acknowledgment decision: transient
/// failures invite redelivery, permanent ones terminate the attempt.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// Infra-level failure (timeout, connect error, 429/5xx). Retry-eligible.
    #[error("Transient extraction failure: {reason}")]
    Transient { reason: String },

    /// Retrying the same input will not change the outcome.
    #[error("Permanent extraction failure: {reason}")]
    Permanent { reason: String },

    /// The backend answered, but not in the agreed payload shape.
    #[error("Extraction output did not match the expected schema: {reason}")]
    SchemaMismatch { reason: String },
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Draft validation errors. Always permanent for the attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No transaction amount present in the draft")]
    MissingAmount,

    #[error("Negative transaction amount: {0}")]
    NegativeAmount(Decimal),

    #[error("Unrecognized currency code: {0}")]
    UnknownCurrency(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

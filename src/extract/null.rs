//! Null extractor — canned-draft test double.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExtractionError;
use crate::extract::fields::{ParseStatus, TransactionDraft};
use crate::extract::Extractor;

/// What the null extractor answers with.
enum CannedResponse {
    Draft(TransactionDraft),
    Transient(String),
    Permanent(String),
    SchemaMismatch(String),
}

/// Extraction backend that never looks at the image.
///
/// Used by tests and by local development without an API key.
pub struct NullExtractor {
    response: CannedResponse,
}

impl NullExtractor {
    /// Always answer with the given draft.
    pub fn with_draft(draft: TransactionDraft) -> Self {
        Self {
            response: CannedResponse::Draft(draft),
        }
    }

    /// Always fail with a transient error.
    pub fn failing_transient(reason: &str) -> Self {
        Self {
            response: CannedResponse::Transient(reason.to_string()),
        }
    }

    /// Always fail with a permanent error.
    pub fn failing_permanent(reason: &str) -> Self {
        Self {
            response: CannedResponse::Permanent(reason.to_string()),
        }
    }

    /// Always fail with a schema mismatch.
    pub fn failing_schema(reason: &str) -> Self {
        Self {
            response: CannedResponse::SchemaMismatch(reason.to_string()),
        }
    }

    /// A plausible sample draft.
    pub fn sample_draft() -> TransactionDraft {
        TransactionDraft {
            amount: Some(Decimal::new(450, 0)),
            currency: Some("INR".to_string()),
            merchant: Some("Starbucks".to_string()),
            category: Some("Coffee".to_string()),
            occurred_at: None,
            raw_extraction: serde_json::json!({
                "merchant": "Starbucks",
                "amount": 450,
                "currency": "INR",
                "category": "Coffee"
            }),
            parse_status: ParseStatus::Parsed,
        }
    }
}

impl Default for NullExtractor {
    fn default() -> Self {
        Self::with_draft(Self::sample_draft())
    }
}

#[async_trait]
impl Extractor for NullExtractor {
    fn name(&self) -> &str {
        "null"
    }

    async fn extract(
        &self,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<TransactionDraft, ExtractionError> {
        match &self.response {
            CannedResponse::Draft(draft) => Ok(draft.clone()),
            CannedResponse::Transient(reason) => Err(ExtractionError::Transient {
                reason: reason.clone(),
            }),
            CannedResponse::Permanent(reason) => Err(ExtractionError::Permanent {
                reason: reason.clone(),
            }),
            CannedResponse::SchemaMismatch(reason) => Err(ExtractionError::SchemaMismatch {
                reason: reason.clone(),
            }),
        }
    }
}

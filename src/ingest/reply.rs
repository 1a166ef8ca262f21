//! User-facing reply text. Plain language only — internal errors never
//! leak to the chat.

use crate::error::ValidationError;
use crate::store::TransactionRecord;

/// Sent before the (slow) vision call on an image ingestion.
pub const PROCESSING: &str = "⏳ Processing your invoice...";

/// Sent when an update carries neither an image nor usable text.
pub const HELP: &str = "Please send:\n\
    • A payment screenshot or invoice image, or\n\
    • Text like: 'add 15rs as coffee' or 'spent 50 on food'";

/// Sent when a text message could not be understood as a transaction.
pub const USAGE_HINT: &str = "Could not understand your message. Please send:\n\
    • A payment screenshot/invoice image, or\n\
    • Text like: 'add 15rs as coffee' or 'spent 50 on food'";

/// Sent when extraction fails permanently on an image.
pub const UNREADABLE_IMAGE: &str =
    "Could not read this image. Please try again with a clearer photo.";

/// Confirmation for a stored transaction, composed from the persisted
/// record so redeliveries answer with identical content.
pub fn confirmation(record: &TransactionRecord) -> String {
    let amount = record.amount.normalize();
    if record.merchant == crate::ingest::validate::UNKNOWN_MERCHANT {
        format!("Tracked {amount} {} ({})", record.currency, record.category)
    } else {
        format!(
            "Tracked {amount} {} at {} ({})",
            record.currency, record.merchant, record.category
        )
    }
}

/// Failure text for a rejected draft.
pub fn validation_failure(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::MissingAmount => {
            "Could not extract a transaction amount from the image. \
             Please try with a clearer image."
        }
        ValidationError::NegativeAmount(_) => {
            "The extracted amount looks wrong. Please try with a clearer image."
        }
        ValidationError::UnknownCurrency(_) => {
            "Could not determine the currency for this transaction."
        }
    }
}

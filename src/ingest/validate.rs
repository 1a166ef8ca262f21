//! Draft validation — the gate between AI output and the store.
//!
//! No partial success: a draft either becomes a fully populated
//! `ValidatedTransaction` or fails with exactly one error kind.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::extract::TransactionDraft;

/// Sentinel for an unreadable merchant. Downstream formatting never
/// branches on missing fields.
pub const UNKNOWN_MERCHANT: &str = "Unknown";

/// Sentinel for an unreadable category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// ISO 4217 codes the validator recognizes.
///
/// The AI is prompted for ISO codes, so a curated list of codes it
/// actually produces is enough; anything else falls back to the tenant
/// default or is rejected.
const RECOGNIZED_CURRENCIES: &[&str] = &[
    "AED", "ARS", "AUD", "BDT", "BGN", "BRL", "CAD", "CHF", "CLP", "CNY", "COP", "CZK", "DKK",
    "EGP", "EUR", "GBP", "HKD", "HUF", "IDR", "ILS", "INR", "JPY", "KES", "KRW", "KWD", "LKR",
    "MAD", "MXN", "MYR", "NGN", "NOK", "NPR", "NZD", "PHP", "PKR", "PLN", "QAR", "RON", "RUB",
    "SAR", "SEK", "SGD", "THB", "TRY", "TWD", "UAH", "USD", "VND", "ZAR",
];

/// Sentinel the extraction layer may use for "currency unreadable".
const UNKNOWN_CURRENCY_SENTINEL: &str = "UNKNOWN";

/// How far in the future a document date may sit before it is treated
/// as implausible.
const MAX_FUTURE_SKEW: Duration = Duration::days(1);

/// Context the validator needs beyond the draft itself.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// When the inbound update was received. Substitutes for absent or
    /// implausible document dates.
    pub received_at: DateTime<Utc>,
    /// The tenant's configured fallback currency, if any.
    pub default_currency: Option<String>,
}

/// A draft that passed all business rules — every field populated.
#[derive(Debug, Clone)]
pub struct ValidatedTransaction {
    pub amount: Decimal,
    pub currency: String,
    pub merchant: String,
    pub category: String,
    pub occurred_at: DateTime<Utc>,
    pub raw_extraction: serde_json::Value,
}

/// Apply the business rules in order; first failure wins.
pub fn validate(
    draft: TransactionDraft,
    ctx: &ValidationContext,
) -> Result<ValidatedTransaction, ValidationError> {
    // Rule 1: amount present and non-negative.
    let amount = draft.amount.ok_or(ValidationError::MissingAmount)?;
    if amount < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount(amount));
    }

    // Rule 2: recognized currency, or the tenant's default.
    let currency = resolve_currency(draft.currency.as_deref(), ctx)?;

    // Rule 3: merchant/category coerced to sentinels, never absent.
    let merchant = draft
        .merchant
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_MERCHANT.to_string());
    let category = draft
        .category
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| UNCATEGORIZED.to_string());

    // Rule 4: implausible document dates give way to the receipt time.
    let occurred_at = match draft.occurred_at {
        Some(ts) if plausible(ts, ctx.received_at) => ts,
        _ => ctx.received_at,
    };

    Ok(ValidatedTransaction {
        amount,
        currency,
        merchant,
        category,
        occurred_at,
        raw_extraction: draft.raw_extraction,
    })
}

fn resolve_currency(
    draft_currency: Option<&str>,
    ctx: &ValidationContext,
) -> Result<String, ValidationError> {
    let code = draft_currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty() && c != UNKNOWN_CURRENCY_SENTINEL);

    match code {
        Some(code) if is_recognized_currency(&code) => Ok(code),
        other => match &ctx.default_currency {
            Some(default) if is_recognized_currency(&default.to_uppercase()) => {
                Ok(default.to_uppercase())
            }
            _ => Err(ValidationError::UnknownCurrency(
                other.unwrap_or_else(|| UNKNOWN_CURRENCY_SENTINEL.to_string()),
            )),
        },
    }
}

pub fn is_recognized_currency(code: &str) -> bool {
    RECOGNIZED_CURRENCIES.binary_search(&code).is_ok()
}

fn plausible(occurred_at: DateTime<Utc>, received_at: DateTime<Utc>) -> bool {
    let earliest = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    occurred_at >= earliest && occurred_at <= received_at + MAX_FUTURE_SKEW
}

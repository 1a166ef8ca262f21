//! Draft types shared by all extraction backends, and the numeric
//! normalization that turns locale-formatted strings into `Decimal`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Whether the backend produced a usable numeric amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Fields parsed cleanly (individual fields may still be absent).
    Parsed,
    /// An amount was present but could not be normalized. The amount is
    /// dropped rather than guessed; validation rejects the draft.
    Unparseable,
}

/// Unvalidated transaction data as extracted from an image or text,
/// prior to business-rule checks.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Opaque backend payload, retained for audit/debug.
    pub raw_extraction: serde_json::Value,
    pub parse_status: ParseStatus,
}

/// Raw field payload in the shape the extraction prompt requests.
///
/// Everything is optional — the AI output is non-deterministic and the
/// validator decides what is acceptable.
#[derive(Debug, Deserialize)]
pub struct RawFields {
    pub merchant: Option<String>,
    /// Number or string; strings may carry currency symbols and
    /// thousands separators.
    pub amount: Option<serde_json::Value>,
    pub currency: Option<String>,
    /// `YYYY-MM-DD`.
    pub date: Option<String>,
    pub category: Option<String>,
}

impl RawFields {
    /// Normalize into a draft, keeping the raw payload for audit.
    pub fn into_draft(self, raw: serde_json::Value) -> TransactionDraft {
        let (amount, parse_status) = match &self.amount {
            None | Some(serde_json::Value::Null) => (None, ParseStatus::Parsed),
            Some(value) => match parse_amount(value) {
                Some(amount) => (Some(amount), ParseStatus::Parsed),
                None => (None, ParseStatus::Unparseable),
            },
        };

        TransactionDraft {
            amount,
            currency: self.currency.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()),
            merchant: self.merchant.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            category: self.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            occurred_at: self.date.as_deref().and_then(parse_date),
            raw_extraction: raw,
            parse_status,
        }
    }
}

/// Parse an amount from a JSON value — number or locale-formatted string.
///
/// Fails closed: `None` means "don't store anything" rather than a guess.
pub fn parse_amount(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) => normalize_amount_str(s),
        _ => None,
    }
}

/// Normalize a human-formatted amount string.
///
/// Handles currency symbols ("₹450", "$1,234.56"), abbreviations
/// ("Rs. 300"), thousands separators ("1,23,456.78", "1 234,56") and
/// decimal commas. Ambiguous input yields `None`.
fn normalize_amount_str(s: &str) -> Option<Decimal> {
    // The numeric region starts at the first digit; symbols and
    // abbreviations before it (and their stray dots) drop out.
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let negative = s[..start].contains('-');

    let region: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ' '))
        .collect();
    let region = region.trim_end_matches([' ', '.', ',']);

    // Spaces inside the region are digit grouping.
    let cleaned = region.replace(' ', "");
    if cleaned.is_empty() {
        return None;
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    let canonical = if has_dot && has_comma {
        // The rightmost separator is the decimal point.
        let last_dot = cleaned.rfind('.').unwrap();
        let last_comma = cleaned.rfind(',').unwrap();
        if last_dot > last_comma {
            cleaned.replace(',', "")
        } else {
            cleaned.replace('.', "").replace(',', ".")
        }
    } else if has_comma {
        // A single comma followed by exactly two digits reads as a
        // decimal comma; everything else as grouping.
        let parts: Vec<&str> = cleaned.split(',').collect();
        if parts.len() == 2 && parts[1].len() == 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    let signed = if negative {
        format!("-{canonical}")
    } else {
        canonical
    };
    signed.parse().ok()
}

/// Parse a `YYYY-MM-DD` document date into a UTC midnight timestamp.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

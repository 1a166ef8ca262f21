//! Text command parser — turns short messages like "add 15rs as coffee"
//! or "spent 50 on food" into a transaction draft without an AI call.

use regex::Regex;

use crate::extract::fields::{ParseStatus, TransactionDraft};

/// Leading verbs that carry no data.
const PREFIXES: &[&str] = &["add", "spent", "spend", "paid", "expense", "exp"];

/// Connector words between amount and category.
const CONNECTORS: &[&str] = &["as", "for", "on", "at", "to", "from"];

/// Regex-based parser for short transaction messages.
///
/// Understood shapes:
/// - "add 15rs as coffee"
/// - "spent 50 on food"
/// - "₹15 coffee"
/// - "15 INR coffee at Blue Tokai"
pub struct TextCommandParser {
    /// Amount with an explicit rupee marker ("15rs", "15 INR", "₹15").
    rupee_amount: Regex,
    /// Bare numeric amount.
    bare_amount: Regex,
}

impl TextCommandParser {
    pub fn new() -> Self {
        Self {
            rupee_amount: Regex::new(r"(?i)(?:₹|rs\.?\s*)(\d+(?:\.\d+)?)|(\d+(?:\.\d+)?)\s*(?:rs|rupees?|inr|₹)\b").unwrap(),
            bare_amount: Regex::new(r"(\d+(?:\.\d+)?)").unwrap(),
        }
    }

    /// Parse a text command. `None` means the message is not a
    /// transaction (the caller answers with a usage hint).
    pub fn parse(&self, text: &str) -> Option<TransactionDraft> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut working = trimmed.to_lowercase();
        for prefix in PREFIXES {
            if let Some(rest) = working.strip_prefix(prefix) {
                working = rest.trim_start().to_string();
                break;
            }
        }

        let (amount_str, currency, remainder) =
            if let Some(caps) = self.rupee_amount.captures(&working) {
                let m = caps.get(0).unwrap();
                let digits = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|g| g.as_str().to_string())?;
                let rest = format!("{} {}", &working[..m.start()], &working[m.end()..]);
                (digits, Some("INR".to_string()), rest)
            } else if let Some(caps) = self.bare_amount.captures(&working) {
                let m = caps.get(0).unwrap();
                let rest = format!("{} {}", &working[..m.start()], &working[m.end()..]);
                (m.as_str().to_string(), None, rest)
            } else {
                return None;
            };

        let amount = amount_str.parse().ok()?;

        let mut remainder = remainder.trim().to_string();
        for connector in CONNECTORS {
            if let Some(rest) = remainder.strip_prefix(&format!("{connector} ")) {
                remainder = rest.trim_start().to_string();
                break;
            }
        }

        // First word is the category; an "at <merchant>" tail names the
        // merchant.
        let (category, merchant) = split_category_merchant(&remainder);

        Some(TransactionDraft {
            amount: Some(amount),
            currency,
            merchant,
            category,
            occurred_at: None,
            raw_extraction: serde_json::json!({"text": trimmed}),
            parse_status: ParseStatus::Parsed,
        })
    }
}

impl Default for TextCommandParser {
    fn default() -> Self {
        Self::new()
    }
}

fn split_category_merchant(remainder: &str) -> (Option<String>, Option<String>) {
    if remainder.is_empty() {
        return (None, None);
    }

    if let Some((category, merchant)) = remainder.split_once(" at ") {
        let category = category.trim();
        let merchant = merchant.trim();
        return (
            (!category.is_empty()).then(|| category.to_string()),
            (!merchant.is_empty()).then(|| merchant.to_string()),
        );
    }

    let mut parts = remainder.splitn(2, char::is_whitespace);
    let category = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let merchant = parts.next().map(str::trim).filter(|s| !s.is_empty());
    (
        category.map(String::from),
        merchant.map(String::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(text: &str) -> Option<TransactionDraft> {
        TextCommandParser::new().parse(text)
    }

    #[test]
    fn add_with_rupee_suffix() {
        let draft = parse("add 15rs as coffee").unwrap();
        assert_eq!(draft.amount, Some(dec!(15)));
        assert_eq!(draft.currency.as_deref(), Some("INR"));
        assert_eq!(draft.category.as_deref(), Some("coffee"));
        assert!(draft.merchant.is_none());
    }

    #[test]
    fn spent_on_food() {
        let draft = parse("spent 50 on food").unwrap();
        assert_eq!(draft.amount, Some(dec!(50)));
        assert!(draft.currency.is_none());
        assert_eq!(draft.category.as_deref(), Some("food"));
    }

    #[test]
    fn rupee_symbol_prefix() {
        let draft = parse("₹15 coffee").unwrap();
        assert_eq!(draft.amount, Some(dec!(15)));
        assert_eq!(draft.currency.as_deref(), Some("INR"));
        assert_eq!(draft.category.as_deref(), Some("coffee"));
    }

    #[test]
    fn inr_code_amount() {
        let draft = parse("15 INR coffee").unwrap();
        assert_eq!(draft.amount, Some(dec!(15)));
        assert_eq!(draft.currency.as_deref(), Some("INR"));
        assert_eq!(draft.category.as_deref(), Some("coffee"));
    }

    #[test]
    fn decimal_amount() {
        let draft = parse("paid 99.50 for groceries").unwrap();
        assert_eq!(draft.amount, Some(dec!(99.50)));
        assert_eq!(draft.category.as_deref(), Some("groceries"));
    }

    #[test]
    fn merchant_after_at() {
        let draft = parse("spent 450 on coffee at blue tokai").unwrap();
        assert_eq!(draft.amount, Some(dec!(450)));
        assert_eq!(draft.category.as_deref(), Some("coffee"));
        assert_eq!(draft.merchant.as_deref(), Some("blue tokai"));
    }

    #[test]
    fn bare_number_only() {
        let draft = parse("120").unwrap();
        assert_eq!(draft.amount, Some(dec!(120)));
        assert!(draft.category.is_none());
    }

    #[test]
    fn non_transaction_text_rejected() {
        assert!(parse("hello there").is_none());
        assert!(parse("").is_none());
        assert!(parse("   ").is_none());
    }

    #[test]
    fn raw_extraction_keeps_original_text() {
        let draft = parse("Add 15rs as Coffee").unwrap();
        assert_eq!(
            draft.raw_extraction,
            serde_json::json!({"text": "Add 15rs as Coffee"})
        );
    }
}

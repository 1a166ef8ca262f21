//! Configuration types.
//!
//! All environment reading happens here, once, at startup. Components
//! receive constructed dependencies and never touch the environment.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Which extraction backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorBackend {
    /// Gemini vision API (default).
    Gemini,
    /// Local OCR. Reserved — selection fails at startup until implemented.
    LocalOcr,
    /// Canned-draft test double.
    Null,
}

impl ExtractorBackend {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ocr" | "local" => Ok(Self::LocalOcr),
            "null" => Ok(Self::Null),
            other => Err(ConfigError::InvalidValue {
                key: "LEDGER_BOT_PARSER".into(),
                message: format!("unknown backend '{other}' (expected gemini, ocr, or null)"),
            }),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Port for the webhook server.
    pub port: u16,
    /// Telegram Bot API token.
    pub telegram_bot_token: SecretString,
    /// Extraction backend selection.
    pub extractor: ExtractorBackend,
    /// Gemini API key (required when `extractor` is Gemini).
    pub gemini_api_key: Option<SecretString>,
    /// Gemini model name.
    pub gemini_model: String,
    /// Currency assumed for new tenants when extraction yields none.
    pub default_currency: String,
}

impl AppConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let telegram_bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingRequired {
                key: "TELEGRAM_BOT_TOKEN".into(),
                hint: "Set it to your Bot API token from @BotFather.".into(),
            })?;

        let extractor = match std::env::var("LEDGER_BOT_PARSER") {
            Ok(v) => ExtractorBackend::parse(&v)?,
            Err(_) => ExtractorBackend::Gemini,
        };

        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok().map(SecretString::from);
        if extractor == ExtractorBackend::Gemini && gemini_api_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "GEMINI_API_KEY".into(),
                hint: "Required for the gemini parser backend.".into(),
            });
        }

        let port: u16 = match std::env::var("LEDGER_BOT_PORT") {
            Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LEDGER_BOT_PORT".into(),
                message: format!("'{v}' is not a valid port"),
            })?,
            Err(_) => 8000,
        };

        Ok(Self {
            db_path: std::env::var("LEDGER_BOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/ledger-bot.db")),
            port,
            telegram_bot_token,
            extractor,
            gemini_api_key,
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            default_currency: std::env::var("LEDGER_BOT_DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "INR".to_string()),
        })
    }
}

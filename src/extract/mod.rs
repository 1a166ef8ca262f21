//! Extraction strategy — pluggable backends that turn an invoice image
//! into a transaction draft.
//!
//! The `Extractor` trait is the seam that lets the backend change without
//! touching the ingestion controller. Backends are selected once at
//! startup by `create_extractor`.

pub mod fields;
pub mod null;
pub mod text;
pub mod vision;

pub use fields::{ParseStatus, RawFields, TransactionDraft};
pub use null::NullExtractor;
pub use text::TextCommandParser;
pub use vision::{AiVisionExtractor, GeminiClient};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, ExtractorBackend};
use crate::error::{ConfigError, ExtractionError};

/// A parsing strategy over some extraction backend.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Extract a transaction draft from image bytes.
    async fn extract(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<TransactionDraft, ExtractionError>;
}

/// Build the configured extraction backend.
pub fn create_extractor(config: &AppConfig) -> Result<Arc<dyn Extractor>, ConfigError> {
    match config.extractor {
        ExtractorBackend::Gemini => {
            let api_key = config.gemini_api_key.clone().ok_or_else(|| {
                ConfigError::MissingRequired {
                    key: "GEMINI_API_KEY".into(),
                    hint: "Required for the gemini parser backend.".into(),
                }
            })?;
            let client = GeminiClient::new(api_key, config.gemini_model.clone());
            tracing::info!(model = %config.gemini_model, "Using Gemini vision extractor");
            Ok(Arc::new(AiVisionExtractor::new(Arc::new(client))))
        }
        ExtractorBackend::LocalOcr => Err(ConfigError::InvalidValue {
            key: "LEDGER_BOT_PARSER".into(),
            message: "local OCR backend is not implemented yet".into(),
        }),
        ExtractorBackend::Null => {
            tracing::info!("Using null extractor (canned drafts)");
            Ok(Arc::new(NullExtractor::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn base_config() -> AppConfig {
        AppConfig {
            db_path: "/tmp/test.db".into(),
            port: 8000,
            telegram_bot_token: SecretString::from("t"),
            extractor: ExtractorBackend::Null,
            gemini_api_key: Some(SecretString::from("k")),
            gemini_model: "gemini-2.0-flash".into(),
            default_currency: "INR".into(),
        }
    }

    #[test]
    fn factory_builds_gemini() {
        let config = AppConfig {
            extractor: ExtractorBackend::Gemini,
            ..base_config()
        };
        let extractor = create_extractor(&config).unwrap();
        assert_eq!(extractor.name(), "gemini-vision");
    }

    #[test]
    fn factory_builds_null() {
        let extractor = create_extractor(&base_config()).unwrap();
        assert_eq!(extractor.name(), "null");
    }

    #[test]
    fn factory_rejects_gemini_without_key() {
        let config = AppConfig {
            extractor: ExtractorBackend::Gemini,
            gemini_api_key: None,
            ..base_config()
        };
        assert!(create_extractor(&config).is_err());
    }

    #[test]
    fn factory_rejects_unimplemented_ocr() {
        let config = AppConfig {
            extractor: ExtractorBackend::LocalOcr,
            ..base_config()
        };
        let err = create_extractor(&config).err().unwrap();
        assert!(err.to_string().contains("not implemented"));
    }
}

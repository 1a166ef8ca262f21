//! Telegram transport — outbound messaging and file downloads over the
//! Bot API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::Transport;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram transport — talks to the Bot API via HTTPS.
pub struct TelegramTransport {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{file_path}",
            self.bot_token.expose_secret()
        )
    }

    /// Send a single message chunk (≤4096 chars).
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    /// Health check: getMe must answer.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Http(format!(
                "getMe returned {}",
                resp.status()
            )))
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Send a text message, splitting chunks that exceed Telegram's limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Download a file by file_id: getFile for the path, then fetch it.
    async fn download_file(&self, file_ref: &str) -> Result<Vec<u8>, ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getFile"))
            .query(&[("file_id", file_ref)])
            .send()
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: format!("getFile returned {}", resp.status()),
            });
        }

        let info: serde_json::Value =
            resp.json().await.map_err(|e| ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: format!("getFile response unreadable: {e}"),
            })?;

        let file_path = info
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: format!("getFile response missing file_path: {info}"),
            })?;

        let file_resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: e.to_string(),
            })?;

        if !file_resp.status().is_success() {
            return Err(ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: format!("file fetch returned {}", file_resp.status()),
            });
        }

        let bytes = file_resp
            .bytes()
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                file_ref: file_ref.into(),
                reason: e.to_string(),
            })?;

        tracing::debug!(file_ref, size = bytes.len(), "File downloaded");
        Ok(bytes.to_vec())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let chunk = &remaining[..max_len];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(max_len);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { max_len } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> TelegramTransport {
        TelegramTransport::new(SecretString::from("123:ABC"))
    }

    #[test]
    fn transport_name() {
        assert_eq!(transport().name(), "telegram");
    }

    #[test]
    fn api_url_embeds_token_and_method() {
        assert_eq!(
            transport().api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        assert_eq!(
            transport().api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn file_url_uses_file_host() {
        assert_eq!(
            transport().file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123:ABC/photos/file_1.jpg"
        );
    }

    // ── Message splitting ───────────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    // ── Network error paths (no server behind the fake token) ───────

    #[tokio::test]
    async fn download_nonexistent_file_errors() {
        let result = transport().download_file("no-such-file").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_message_unreachable_errors() {
        let result = transport().send_message("123456", "hello").await;
        assert!(result.is_err());
    }
}

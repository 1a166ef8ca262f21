//! Webhook update envelope — the Bot API's inbound message shape.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A webhook update as delivered by the Bot API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEnvelope {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

/// An inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Transport-assigned message id, unique per chat. Used as the
    /// idempotency key together with the resolved tenant.
    pub message_id: i64,
    pub from: Option<MessageSender>,
    pub chat: MessageChat,
    /// Unix timestamp of the message.
    pub date: i64,
    pub text: Option<String>,
    /// Photo attachments come in multiple resolutions.
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub document: Option<DocumentAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSender {
    pub id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentAttachment {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

/// Reference to a downloadable image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub file_id: String,
    pub mime_type: String,
}

impl IncomingMessage {
    /// Pick the image attachment from this message, if any.
    ///
    /// Photos are offered in several sizes; the largest is chosen for
    /// extraction quality. Documents count only when their mime type is
    /// an image type.
    pub fn image_attachment(&self) -> Option<ImageRef> {
        if let Some(best) = self.photo.iter().max_by_key(|p| p.width * p.height) {
            return Some(ImageRef {
                file_id: best.file_id.clone(),
                // The Bot API serves photos as JPEG.
                mime_type: "image/jpeg".to_string(),
            });
        }

        if let Some(doc) = &self.document {
            if let Some(mime) = &doc.mime_type {
                if mime.starts_with("image/") {
                    return Some(ImageRef {
                        file_id: doc.file_id.clone(),
                        mime_type: mime.clone(),
                    });
                }
            }
        }

        None
    }

    /// Sender display name: first name, falling back to username.
    pub fn display_name(&self) -> Option<&str> {
        let from = self.from.as_ref()?;
        from.first_name.as_deref().or(from.username.as_deref())
    }

    /// Message timestamp as UTC, falling back to now for bogus values.
    pub fn received_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.date, 0).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(v: serde_json::Value) -> UpdateEnvelope {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn photo_picks_largest_size() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "from": {"id": 7, "first_name": "Asha"},
                "chat": {"id": 7},
                "date": 1700000000,
                "photo": [
                    {"file_id": "small", "width": 90, "height": 60},
                    {"file_id": "big", "width": 1280, "height": 960},
                    {"file_id": "mid", "width": 320, "height": 240}
                ]
            }
        }));
        let img = update.message.unwrap().image_attachment().unwrap();
        assert_eq!(img.file_id, "big");
        assert_eq!(img.mime_type, "image/jpeg");
    }

    #[test]
    fn image_document_accepted() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "chat": {"id": 7},
                "date": 1700000000,
                "document": {"file_id": "doc1", "mime_type": "image/png", "file_name": "bill.png"}
            }
        }));
        let img = update.message.unwrap().image_attachment().unwrap();
        assert_eq!(img.file_id, "doc1");
        assert_eq!(img.mime_type, "image/png");
    }

    #[test]
    fn non_image_document_rejected() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "chat": {"id": 7},
                "date": 1700000000,
                "document": {"file_id": "doc1", "mime_type": "application/pdf"}
            }
        }));
        assert!(update.message.unwrap().image_attachment().is_none());
    }

    #[test]
    fn text_only_message_has_no_attachment() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "chat": {"id": 7},
                "date": 1700000000,
                "text": "spent 50 on food"
            }
        }));
        let msg = update.message.unwrap();
        assert!(msg.image_attachment().is_none());
        assert_eq!(msg.text.as_deref(), Some("spent 50 on food"));
    }

    #[test]
    fn display_name_prefers_first_name() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 7, "first_name": "Asha", "username": "asha_k"},
                "chat": {"id": 7},
                "date": 1700000000
            }
        }));
        assert_eq!(update.message.unwrap().display_name(), Some("Asha"));
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 7, "username": "asha_k"},
                "chat": {"id": 7},
                "date": 1700000000
            }
        }));
        assert_eq!(update.message.unwrap().display_name(), Some("asha_k"));
    }

    #[test]
    fn received_at_converts_unix_timestamp() {
        let update = parse(serde_json::json!({
            "update_id": 1,
            "message": {"message_id": 1, "chat": {"id": 7}, "date": 1700000000}
        }));
        let ts = update.message.unwrap().received_at();
        assert_eq!(ts.timestamp(), 1700000000);
    }
}

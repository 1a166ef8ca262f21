//! Chat transport abstraction — message I/O with the bot platform.

pub mod telegram;
pub mod update;

pub use telegram::TelegramTransport;
pub use update::{ImageRef, IncomingMessage, UpdateEnvelope};

use async_trait::async_trait;

use crate::error::ChannelError;

/// Outbound capability of the chat transport.
///
/// The ingestion pipeline only ever needs these two operations; keeping
/// them behind a trait lets tests record replies instead of hitting the
/// Bot API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g. "telegram").
    fn name(&self) -> &str;

    /// Send a text message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Download a file by its transport-native reference.
    async fn download_file(&self, file_ref: &str) -> Result<Vec<u8>, ChannelError>;
}

//! Chat transport: the five operations the bot core needs, and the teloxide client behind them.

use std::path::PathBuf;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};
use tracing::{info, warn};

/// How message text should be parsed by the chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Markdown,
    Html,
}

impl TextFormat {
    fn parse_mode(self) -> Option<ParseMode> {
        match self {
            Self::Plain => None,
            #[allow(deprecated)]
            Self::Markdown => Some(ParseMode::Markdown),
            Self::Html => Some(ParseMode::Html),
        }
    }
}

/// Where a photo comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    /// A local file, uploaded by the transport.
    File(PathBuf),
    /// A public URL, fetched by the chat platform.
    Url(String),
}

/// A failed chat operation.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed: {detail}")]
pub struct TransportError {
    pub operation: &'static str,
    pub detail: String,
}

impl TransportError {
    pub fn new(operation: &'static str, detail: impl ToString) -> Self {
        Self {
            operation,
            detail: detail.to_string(),
        }
    }
}

/// Outbound chat operations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message. Returns the new message id.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, TransportError>;

    /// Send a photo. Returns the new message id.
    async fn send_photo(
        &self,
        chat_id: i64,
        photo: PhotoSource,
        caption: Option<&str>,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, TransportError>;

    /// Replace the text of a message the bot sent.
    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError>;

    /// Resolve a photo attachment to a downloadable link.
    async fn file_url(&self, file_id: &str) -> Result<String, TransportError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn is_parse_error(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::CantParseEntities(_)))
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, TransportError> {
        let send = |format: TextFormat| {
            let mut request = self.bot.send_message(ChatId(chat_id), text);
            if let Some(mode) = format.parse_mode() {
                request = request.parse_mode(mode);
            }
            if let Some(msg_id) = reply_to_message_id {
                request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
            }
            request
        };

        let result = match send(format).await {
            // Model output is not always valid markup; resend it verbatim.
            Err(e) if format != TextFormat::Plain && is_parse_error(&e) => {
                warn!("Markup rejected ({e}), resending as plain text");
                send(TextFormat::Plain).await
            }
            other => other,
        };

        result.map(|msg| msg.id.0 as i64).map_err(|e| {
            warn!("Failed to send message to chat {}: {e}", chat_id);
            TransportError::new("send message", e)
        })
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: PhotoSource,
        caption: Option<&str>,
        format: TextFormat,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, TransportError> {
        let input_file = match photo {
            PhotoSource::File(path) => {
                info!(
                    "📷 Uploading image {:?} to chat {}",
                    path.file_name().unwrap_or_default(),
                    chat_id
                );
                InputFile::file(path)
            }
            PhotoSource::Url(url) => {
                info!("📷 Sending image URL to chat {}", chat_id);
                let url =
                    reqwest::Url::parse(&url).map_err(|e| TransportError::new("send photo", e))?;
                InputFile::url(url)
            }
        };

        let mut request = self.bot.send_photo(ChatId(chat_id), input_file);

        if let Some(cap) = caption {
            request = request.caption(cap);
            if let Some(mode) = format.parse_mode() {
                request = request.parse_mode(mode);
            }
        }

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            warn!("Failed to send photo to chat {}: {e}", chat_id);
            TransportError::new("send photo", e)
        })
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .await
            .map_err(|e| {
                warn!("Failed to edit message {}: {e}", message_id);
                TransportError::new("edit message", e)
            })?;

        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(|e| {
                warn!("Failed to delete message {}: {e}", message_id);
                TransportError::new("delete message", e)
            })?;

        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String, TransportError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| TransportError::new("get file", e))?;

        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot.token(),
            file.path
        ))
    }
}

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::{ApiError, RequestError};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org/";

/// Handle to a sent message, used to edit the progress message in place.
pub type MessageRef = i32;

/// User-visible notifications for one chat: one mutable progress message per
/// run plus final/summary messages.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn send(&self, text: &str) -> Result<MessageRef>;
    async fn edit(&self, message: MessageRef, text: &str) -> Result<()>;
}

pub struct ChatReporter {
    bot: Bot,
    chat_id: ChatId,
}

impl ChatReporter {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl Reporter for ChatReporter {
    async fn send(&self, text: &str) -> Result<MessageRef> {
        let message = self
            .bot
            .send_message(self.chat_id, text)
            .await
            .context("failed to send message")?;
        Ok(message.id.0)
    }

    async fn edit(&self, message: MessageRef, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(self.chat_id, MessageId(message), text)
            .await
            .context("failed to edit message")?;
        Ok(())
    }
}

/// Fetches the raw bytes of an inbound photo by file id.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>>;
}

pub struct TelegramFetcher {
    bot: Bot,
    token: String,
    http: reqwest::Client,
    base_url: Url,
}

impl TelegramFetcher {
    pub fn new(bot: Bot, token: String) -> Self {
        let base_url = Url::parse(TELEGRAM_API_BASE).expect("valid default Telegram URL");
        Self::with_base_url(bot, token, base_url)
    }

    pub fn with_base_url(bot: Bot, token: String, base_url: Url) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("tg-poembot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            bot,
            token,
            http,
            base_url,
        }
    }
}

#[async_trait]
impl MediaFetcher for TelegramFetcher {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(file_id)
            .await
            .context("failed to resolve file path")?;
        let url = self
            .base_url
            .join(&format!("file/bot{}/{}", self.token, file.path))
            .context("invalid Telegram file URL")?;
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to download photo")?;
        if !res.status().is_success() {
            bail!("failed to download photo: {}", res.status());
        }
        Ok(res
            .bytes()
            .await
            .context("failed to read photo body")?
            .to_vec())
    }
}

/// True when the transport rejected a call because a second process is
/// polling getUpdates with the same bot token.
pub fn is_instance_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RequestError>(),
            Some(RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classifies_terminated_by_other_get_updates() {
        let err = anyhow::Error::from(RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
            .context("failed to send message");
        assert!(is_instance_conflict(&err));
    }

    #[test]
    fn other_errors_are_not_conflicts() {
        assert!(!is_instance_conflict(&anyhow!("storage exploded")));
        let err = anyhow::Error::from(RequestError::Api(ApiError::MessageNotModified));
        assert!(!is_instance_conflict(&err));
    }
}

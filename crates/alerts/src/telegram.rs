//! Telegram transport.

use async_trait::async_trait;
use monitor_core::ChatTarget;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ParseMode, ThreadId};
use tracing::debug;

use crate::notifier::{ChartImage, Notifier, NotifyError};

/// Notifier backed by a teloxide `Bot`.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    /// Create a bot with the given token.
    ///
    /// The HTTP client honours `TELOXIDE_PROXY` for networks where
    /// api.telegram.org is only reachable through a proxy.
    pub fn new(token: &str) -> Self {
        let bot = Bot::with_client(token, teloxide::net::client_from_env());
        Self { bot }
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self { bot }
    }

    /// Get the underlying bot, shared with the command router.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

pub(crate) fn thread_of(target: ChatTarget) -> Option<ThreadId> {
    target.thread_id.map(|id| ThreadId(MessageId(id)))
}

fn is_svg(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(".svg")
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, target: ChatTarget, text: &str) -> Result<(), NotifyError> {
        let mut request = self
            .bot
            .send_message(ChatId(target.chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(thread) = thread_of(target) {
            request = request.message_thread_id(thread);
        }
        request.await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        target: ChatTarget,
        image: ChartImage,
        caption: &str,
    ) -> Result<(), NotifyError> {
        let svg = is_svg(&image.file_name);
        let file = InputFile::memory(image.bytes).file_name(image.file_name);

        // Telegram does not render SVG as a photo
        if svg {
            let mut request = self
                .bot
                .send_document(ChatId(target.chat_id), file)
                .caption(caption)
                .parse_mode(ParseMode::Html);
            if let Some(thread) = thread_of(target) {
                request = request.message_thread_id(thread);
            }
            request.await?;
        } else {
            let mut request = self
                .bot
                .send_photo(ChatId(target.chat_id), file)
                .caption(caption)
                .parse_mode(ParseMode::Html);
            if let Some(thread) = thread_of(target) {
                request = request.message_thread_id(thread);
            }
            request.await?;
        }

        debug!(chat_id = target.chat_id, svg = svg, "Chart sent");
        Ok(())
    }
}

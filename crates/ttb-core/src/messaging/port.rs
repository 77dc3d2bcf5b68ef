use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{InlineKeyboard, MessagingCapabilities},
    Result,
};

/// Outbound messenger port.
///
/// All text arguments are Telegram-flavoured HTML; callers escape user content.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    async fn send_photo(&self, chat_id: ChatId, url: &str, caption_html: &str)
        -> Result<MessageRef>;

    /// Send an album; the caption is attached to the first item.
    async fn send_media_group(
        &self,
        chat_id: ChatId,
        urls: &[String],
        caption_html: &str,
    ) -> Result<Vec<MessageRef>>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use ttb_core::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::port::MessagingPort,
    service::RuleCallback,
};

use crate::router::AppState;

use super::reply_error;

/// Validate callback data against the chat the keyboard was posted in.
fn parse_delete(data: &str, chat_id: ChatId) -> Result<RuleCallback, &'static str> {
    let cb = RuleCallback::parse(data).ok_or("Invalid callback data")?;
    if cb.chat_id != chat_id {
        return Err("This keyboard belongs to another chat");
    }
    Ok(cb)
}

async fn answer(messenger: &dyn MessagingPort, cb_id: &str, text: Option<&str>) {
    if let Err(e) = messenger.answer_callback_query(cb_id, text).await {
        warn!(error = %e, "failed to answer callback query");
    }
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let messenger = state.messenger.as_ref();
    let data = q.data.clone().unwrap_or_default();

    // Always answer callback query eventually.
    let Some(message) = q.message.as_ref() else {
        answer(messenger, &q.id, None).await;
        return Ok(());
    };
    if data.is_empty() {
        answer(messenger, &q.id, None).await;
        return Ok(());
    }

    let chat_id = ChatId(message.chat.id.0);
    let cb = match parse_delete(&data, chat_id) {
        Ok(cb) => cb,
        Err(why) => {
            answer(messenger, &q.id, Some(why)).await;
            return Ok(());
        }
    };

    let deleting = format!("Deleting rule {}", cb.rule_id);
    answer(messenger, &q.id, Some(deleting.as_str())).await;

    if let Err(e) = state.service.delete_rule(cb.chat_id, &cb.rule_id).await {
        reply_error(&state, chat_id, &e).await;
        return Ok(());
    }

    let keyboard_msg = MessageRef {
        chat_id,
        message_id: MessageId(message.id.0),
    };
    let done = format!("Successfully deleted rule {}", cb.rule_id);
    if let Err(e) = messenger.edit_html(keyboard_msg, &done).await {
        warn!(chat_id = chat_id.0, error = %e, "failed to edit rules keyboard");
    }
    Ok(())
}

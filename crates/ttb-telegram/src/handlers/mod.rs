//! Telegram update handlers.
//!
//! Each handler is a thin adapter that parses the update, calls into the
//! `ttb-core` relay service and reports the outcome back to the chat.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::warn;

use ttb_core::{domain::ChatId, errors::Error, formatting::escape_html};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = ChatId(msg.chat.id.0);

    if text.starts_with('/') {
        return commands::handle_command(chat_id, text, state).await;
    }
    text::handle_text(chat_id, text, state).await
}

async fn reply(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html).await {
        warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
    }
}

async fn reply_error(state: &AppState, chat_id: ChatId, err: &Error) {
    match err {
        Error::NotLoggedIn(_) | Error::InvalidInput(_) => {}
        other => warn!(chat_id = chat_id.0, error = %other, "request failed"),
    }
    reply(state, chat_id, &escape_html(&err.user_message())).await;
}

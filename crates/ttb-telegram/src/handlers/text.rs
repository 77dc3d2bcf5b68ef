use std::sync::Arc;

use teloxide::prelude::*;

use ttb_core::{domain::ChatId, formatting::escape_html, service::is_verifier};

use crate::router::AppState;

use super::{reply, reply_error};

#[derive(Debug, PartialEq, Eq)]
enum TextAction<'a> {
    /// Login PIN.
    Verifier(&'a str),
    /// Starts with a digit but is not a PIN.
    NotAPin,
    AddRule(&'a str),
    Ignore,
}

fn classify(text: &str) -> TextAction<'_> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return TextAction::Ignore;
    }
    if is_verifier(trimmed) {
        return TextAction::Verifier(trimmed);
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return TextAction::NotAPin;
    }
    TextAction::AddRule(trimmed)
}

pub async fn handle_text(chat_id: ChatId, text: &str, state: Arc<AppState>) -> ResponseResult<()> {
    match classify(text) {
        TextAction::Ignore => {}
        TextAction::Verifier(pin) => match state.service.complete_login(chat_id, pin).await {
            Ok(()) => reply(&state, chat_id, "Successfully logged in!").await,
            Err(e) => reply_error(&state, chat_id, &e).await,
        },
        TextAction::NotAPin => {
            reply(
                &state,
                chat_id,
                "That does not look like a PIN. Paste the 7-digit code shown by Twitter.",
            )
            .await
        }
        TextAction::AddRule(value) => match state.service.add_rule(chat_id, value).await {
            Ok(rule) => {
                let html = format!("Successfully added rule {}", escape_html(&rule.value));
                reply(&state, chat_id, &html).await;
            }
            Err(e) => reply_error(&state, chat_id, &e).await,
        },
    }
    Ok(())
}

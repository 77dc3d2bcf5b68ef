use std::sync::Arc;

use teloxide::prelude::*;

use ttb_core::{
    domain::ChatId,
    formatting::{escape_html, link},
    messaging::types::InlineKeyboard,
    service::RuleCallback,
};

use crate::router::AppState;

use super::{reply, reply_error};

const MAX_BUTTON_LABEL: usize = 60;

const USAGE: &str = "<b>Twitter to Telegram relay</b>\n\n\
/login - connect a Twitter account (paste the 7-digit PIN afterwards)\n\
/edit - list rules and tap one to delete it\n\
/logout - stop forwarding and forget this chat\n\n\
Any other text is added as a filtered-stream rule, e.g. <code>cats has:images</code>.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn rules_keyboard(chat_id: ChatId, rules: &[ttb_core::twitter::StreamRule]) -> InlineKeyboard {
    InlineKeyboard::one_per_row(
        rules.iter().map(|r| {
            let data = RuleCallback {
                chat_id,
                rule_id: r.id.clone(),
            };
            (r.value.clone(), data.encode())
        }),
        MAX_BUTTON_LABEL,
    )
}

pub async fn handle_command(
    chat_id: ChatId,
    text: &str,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let (cmd, _args) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            reply(&state, chat_id, USAGE).await;
            Ok(())
        }

        "login" => {
            match state.service.login(chat_id).await {
                Ok(url) => {
                    let html = format!(
                        "Please visit the following {} to obtain the key and paste it in the chat",
                        link(&url, "link")
                    );
                    reply(&state, chat_id, &html).await;
                }
                Err(e) => reply_error(&state, chat_id, &e).await,
            }
            Ok(())
        }

        "edit" => {
            let rules = match state.service.list_rules(chat_id).await {
                Ok(rules) => rules,
                Err(e) => {
                    reply_error(&state, chat_id, &e).await;
                    return Ok(());
                }
            };

            if rules.is_empty() {
                reply(
                    &state,
                    chat_id,
                    "You have not set up any rules, paste text in the chat to add a rule",
                )
                .await;
                return Ok(());
            }

            let keyboard = rules_keyboard(chat_id, &rules);
            if let Err(e) = state
                .messenger
                .send_inline_keyboard(chat_id, "Delete subscription rules", keyboard)
                .await
            {
                reply_error(&state, chat_id, &e).await;
            }
            Ok(())
        }

        "logout" => {
            match state.service.logout(chat_id).await {
                Ok(true) => {
                    reply(
                        &state,
                        chat_id,
                        "Logged out. Tweets are no longer forwarded to this chat.",
                    )
                    .await
                }
                Ok(false) => reply(&state, chat_id, "This chat is not logged in.").await,
                Err(e) => reply_error(&state, chat_id, &e).await,
            }
            Ok(())
        }

        _ => {
            let msg = format!("Unknown command: /{}\n\n{USAGE}", escape_html(&cmd));
            reply(&state, chat_id, &msg).await;
            Ok(())
        }
    }
}

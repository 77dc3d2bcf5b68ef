//! In-memory port implementations shared by unit tests.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    twitter::{AccessCredentials, RequestToken, StreamConnection, StreamRule, TwitterPort},
    Result,
};

pub fn creds(consumer_key: &str) -> AccessCredentials {
    AccessCredentials {
        consumer_key: consumer_key.to_string(),
        consumer_secret: "cs".to_string(),
        access_token: "at".to_string(),
        access_token_secret: "ats".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Html {
        chat_id: ChatId,
        html: String,
    },
    Edit {
        msg: MessageRef,
        html: String,
    },
    Photo {
        chat_id: ChatId,
        url: String,
        caption: String,
    },
    Album {
        chat_id: ChatId,
        urls: Vec<String>,
        caption: String,
    },
    Keyboard {
        chat_id: ChatId,
        text: String,
        keyboard: InlineKeyboard,
    },
    CallbackAnswer {
        callback_id: String,
        text: Option<String>,
    },
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<HashSet<ChatId>>,
    no_albums: bool,
}

impl FakeMessenger {
    /// A messenger that cannot send media groups.
    pub fn without_albums() -> Self {
        Self {
            no_albums: true,
            ..Self::default()
        }
    }

    pub fn fail_chat(&self, chat_id: ChatId) {
        self.failing.lock().unwrap().insert(chat_id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// HTML text messages sent to `chat_id`, in order.
    pub fn texts(&self, chat_id: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Html { chat_id: c, html } if c == chat_id => Some(html),
                _ => None,
            })
            .collect()
    }

    fn record(&self, chat_id: ChatId, sent: Sent) -> Result<MessageRef> {
        if self.failing.lock().unwrap().contains(&chat_id) {
            return Err(Error::External("telegram error: chat not found".to_string()));
        }
        self.sent.lock().unwrap().push(sent);
        let mut guard = self.next_id.lock().unwrap();
        *guard += 1;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(*guard),
        })
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_media_groups: !self.no_albums,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.record(
            chat_id,
            Sent::Html {
                chat_id,
                html: html.to_string(),
            },
        )
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.record(
            msg.chat_id,
            Sent::Edit {
                msg,
                html: html.to_string(),
            },
        )?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        url: &str,
        caption_html: &str,
    ) -> Result<MessageRef> {
        self.record(
            chat_id,
            Sent::Photo {
                chat_id,
                url: url.to_string(),
                caption: caption_html.to_string(),
            },
        )
    }

    async fn send_media_group(
        &self,
        chat_id: ChatId,
        urls: &[String],
        caption_html: &str,
    ) -> Result<Vec<MessageRef>> {
        let first = self.record(
            chat_id,
            Sent::Album {
                chat_id,
                urls: urls.to_vec(),
                caption: caption_html.to_string(),
            },
        )?;
        Ok(vec![first])
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.record(
            chat_id,
            Sent::Keyboard {
                chat_id,
                text: text.to_string(),
                keyboard,
            },
        )
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

/// Scripted outcome of one `connect_stream` call.
pub enum Script {
    RateLimited(Option<chrono::DateTime<chrono::Utc>>),
    Fail,
    Lines { lines: Vec<String>, hold_open: bool },
}

#[derive(Default)]
pub struct FakeTwitter {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    rules: Mutex<Vec<StreamRule>>,
    next_rule_id: AtomicUsize,
}

impl FakeTwitter {
    pub fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn rules(&self) -> Vec<StreamRule> {
        self.rules.lock().unwrap().clone()
    }
}

#[async_trait]
impl TwitterPort for FakeTwitter {
    async fn request_token(&self) -> Result<RequestToken> {
        Ok(RequestToken {
            oauth_token: "req-token".to_string(),
            oauth_token_secret: "req-secret".to_string(),
            oauth_callback_confirmed: Some("true".to_string()),
        })
    }

    fn authorize_url(&self, token: &RequestToken) -> String {
        format!(
            "https://api.twitter.com/oauth/authorize?oauth_token={}",
            token.oauth_token
        )
    }

    async fn access_token(
        &self,
        token: &RequestToken,
        verifier: &str,
    ) -> Result<AccessCredentials> {
        if verifier != "1234567" {
            return Err(Error::Twitter {
                status: 401,
                body: "Error processing your OAuth request: Invalid oauth_verifier parameter"
                    .to_string(),
            });
        }
        Ok(AccessCredentials {
            consumer_key: "ignored".to_string(),
            consumer_secret: "ignored".to_string(),
            access_token: format!("access-for-{}", token.oauth_token),
            access_token_secret: "access-secret".to_string(),
        })
    }

    async fn list_rules(&self, _creds: &AccessCredentials) -> Result<Vec<StreamRule>> {
        Ok(self.rules())
    }

    async fn add_rule(
        &self,
        _creds: &AccessCredentials,
        value: &str,
        tag: Option<&str>,
    ) -> Result<StreamRule> {
        let id = self.next_rule_id.fetch_add(1, Ordering::SeqCst) + 100;
        let rule = StreamRule {
            id: id.to_string(),
            value: value.to_string(),
            tag: tag.map(str::to_string),
        };
        self.rules.lock().unwrap().push(rule.clone());
        Ok(rule)
    }

    async fn delete_rules(&self, _creds: &AccessCredentials, ids: &[String]) -> Result<()> {
        self.rules.lock().unwrap().retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn connect_stream(&self, _creds: &AccessCredentials) -> Result<StreamConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            None => futures::future::pending::<Result<StreamConnection>>().await,
            Some(Script::Fail) => Err(Error::Twitter {
                status: 503,
                body: "Service Unavailable".to_string(),
            }),
            Some(Script::RateLimited(reset_at)) => Ok(StreamConnection::RateLimited { reset_at }),
            Some(Script::Lines { lines, hold_open }) => {
                let items = futures::stream::iter(lines.into_iter().map(Ok));
                let stream = if hold_open {
                    items.chain(futures::stream::pending()).boxed()
                } else {
                    items.boxed()
                };
                Ok(StreamConnection::Connected(stream))
            }
        }
    }
}

//! Relay operations behind the bot commands, independent of the chat framework.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    chats::{Chat, ChatStore, OAuthToken},
    config::Config,
    dispatcher::{chat_tag, parse_chat_tag},
    domain::ChatId,
    errors::Error,
    subscriptions::SubscriptionManager,
    twitter::{AccessCredentials, StreamRule, TwitterPort},
    Result,
};

/// Callback payload of a "delete rule" keyboard button:
/// `rule:<chat_id>:<rule_id>:delete`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleCallback {
    pub chat_id: ChatId,
    pub rule_id: String,
}

impl RuleCallback {
    const PREFIX: &'static str = "rule";
    const ACTION_DELETE: &'static str = "delete";

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            Self::PREFIX,
            self.chat_id.0,
            self.rule_id,
            Self::ACTION_DELETE
        )
    }

    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let (prefix, chat, rule, action) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || prefix != Self::PREFIX || action != Self::ACTION_DELETE {
            return None;
        }
        if rule.is_empty() || !rule.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            chat_id: ChatId(chat.parse().ok()?),
            rule_id: rule.to_string(),
        })
    }
}

/// The PIN shown by Twitter in out-of-band mode starts with 7 digits.
pub fn is_verifier(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{7}").expect("valid regex"))
        .is_match(text.trim())
}

pub struct RelayService {
    cfg: Arc<Config>,
    twitter: Arc<dyn TwitterPort>,
    store: Mutex<ChatStore>,
    subscriptions: SubscriptionManager,
}

impl RelayService {
    pub fn new(
        cfg: Arc<Config>,
        twitter: Arc<dyn TwitterPort>,
        store: ChatStore,
        subscriptions: SubscriptionManager,
    ) -> Self {
        Self {
            cfg,
            twitter,
            store: Mutex::new(store),
            subscriptions,
        }
    }

    /// Restore the stream subscriptions of all authorized chats.
    pub async fn start(&self) -> usize {
        let chats = self.store.lock().await.authorized();
        self.subscriptions.start_all(chats).await
    }

    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
    }

    pub async fn is_logged_in(&self, chat_id: ChatId) -> bool {
        self.store
            .lock()
            .await
            .get(chat_id)
            .and_then(Chat::credentials)
            .is_some()
    }

    /// Begin the PIN flow; returns the URL the user must open.
    ///
    /// A chat that logs in again stops forwarding until the new PIN is entered.
    pub async fn login(&self, chat_id: ChatId) -> Result<String> {
        let token = self.twitter.request_token().await?;
        let url = self.twitter.authorize_url(&token);

        self.subscriptions.unsubscribe(chat_id).await;
        self.store.lock().await.upsert(Chat {
            id: chat_id.0,
            oauth_token: OAuthToken::Pending(token),
        })?;
        info!(chat_id = chat_id.0, "login started");
        Ok(url)
    }

    /// Exchange the PIN for access credentials and start forwarding.
    pub async fn complete_login(&self, chat_id: ChatId, verifier: &str) -> Result<()> {
        let token = {
            let store = self.store.lock().await;
            store
                .get(chat_id)
                .and_then(Chat::request_token)
                .cloned()
                .ok_or(Error::NotLoggedIn(chat_id.0))?
        };

        let granted = self.twitter.access_token(&token, verifier.trim()).await?;
        let creds = AccessCredentials {
            consumer_key: self.cfg.consumer_key.clone(),
            consumer_secret: self.cfg.consumer_secret.clone(),
            access_token: granted.access_token,
            access_token_secret: granted.access_token_secret,
        };

        self.store.lock().await.upsert(Chat {
            id: chat_id.0,
            oauth_token: OAuthToken::Authorized(creds.clone()),
        })?;
        self.subscriptions.subscribe(chat_id, creds).await;
        info!(chat_id = chat_id.0, "login completed");
        Ok(())
    }

    /// Forget the chat and stop forwarding to it. Returns whether it was known.
    pub async fn logout(&self, chat_id: ChatId) -> Result<bool> {
        self.subscriptions.unsubscribe(chat_id).await;
        let removed = self.store.lock().await.remove(chat_id)?;
        if removed.is_some() {
            info!(chat_id = chat_id.0, "chat logged out");
        }
        Ok(removed.is_some())
    }

    /// Rules visible to the chat: its own tagged rules plus untagged ones.
    pub async fn list_rules(&self, chat_id: ChatId) -> Result<Vec<StreamRule>> {
        let creds = self.credentials(chat_id).await?;
        let rules = self.twitter.list_rules(&creds).await?;
        Ok(rules
            .into_iter()
            .filter(|r| rule_visible_to(r, chat_id))
            .collect())
    }

    pub async fn add_rule(&self, chat_id: ChatId, value: &str) -> Result<StreamRule> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("Rule text is empty".to_string()));
        }
        let creds = self.credentials(chat_id).await?;
        let rule = self
            .twitter
            .add_rule(&creds, value, Some(&chat_tag(chat_id)))
            .await?;
        info!(chat_id = chat_id.0, rule_id = %rule.id, "rule added");
        Ok(rule)
    }

    pub async fn delete_rule(&self, chat_id: ChatId, rule_id: &str) -> Result<()> {
        let creds = self.credentials(chat_id).await?;
        let rules = self.twitter.list_rules(&creds).await?;
        let Some(rule) = rules.iter().find(|r| r.id == rule_id) else {
            return Err(Error::InvalidInput(format!("Rule {rule_id} does not exist")));
        };
        if !rule_visible_to(rule, chat_id) {
            return Err(Error::InvalidInput(format!(
                "Rule {rule_id} belongs to another chat"
            )));
        }
        self.twitter
            .delete_rules(&creds, &[rule_id.to_string()])
            .await?;
        info!(chat_id = chat_id.0, rule_id, "rule deleted");
        Ok(())
    }

    async fn credentials(&self, chat_id: ChatId) -> Result<AccessCredentials> {
        self.store
            .lock()
            .await
            .get(chat_id)
            .and_then(Chat::credentials)
            .cloned()
            .ok_or(Error::NotLoggedIn(chat_id.0))
    }
}

fn rule_visible_to(rule: &StreamRule, chat_id: ChatId) -> bool {
    match rule.tag.as_deref().and_then(parse_chat_tag) {
        Some(owner) => owner == chat_id,
        None => true,
    }
}

//! Routes stream events to subscribed chats and posts them via the messenger.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::ChatId,
    messaging::port::MessagingPort,
    tweet::{OutgoingPost, TweetEvent},
    Result,
};

const CHAT_TAG_PREFIX: &str = "chat:";

/// Rule tag binding a filtered-stream rule to the chat that created it.
pub fn chat_tag(chat_id: ChatId) -> String {
    format!("{CHAT_TAG_PREFIX}{}", chat_id.0)
}

pub fn parse_chat_tag(tag: &str) -> Option<ChatId> {
    tag.strip_prefix(CHAT_TAG_PREFIX)?
        .parse::<i64>()
        .ok()
        .map(ChatId)
}

/// Select the chats that should receive `tweet`.
///
/// Tweets matched by chat-tagged rules go only to those chats (if subscribed).
/// A tweet that also matched a shared rule (no chat tag) goes to every subscriber.
pub fn route(tweet: &TweetEvent, subscribers: &[ChatId]) -> Vec<ChatId> {
    let tagged: Vec<ChatId> = tweet
        .matching_rule_tags
        .iter()
        .filter_map(|t| parse_chat_tag(t))
        .collect();

    if tagged.is_empty() || tweet.matched_untagged {
        return subscribers.to_vec();
    }
    subscribers
        .iter()
        .copied()
        .filter(|c| tagged.contains(c))
        .collect()
}

#[derive(Clone)]
pub struct Dispatcher {
    messenger: Arc<dyn MessagingPort>,
}

impl Dispatcher {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    /// Deliver one tweet. Returns the number of chats it reached.
    pub async fn dispatch(&self, tweet: &TweetEvent, subscribers: &[ChatId]) -> usize {
        let targets = route(tweet, subscribers);
        if targets.is_empty() {
            debug!(tweet_id = %tweet.id, "tweet matched no subscribed chat");
            return 0;
        }

        let post = tweet.outgoing();
        let mut delivered = 0;
        for chat_id in targets {
            match self.deliver(chat_id, &post).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(chat_id = chat_id.0, tweet_id = %tweet.id, error = %e, "failed to forward tweet")
                }
            }
        }
        delivered
    }

    /// Plain HTML notice to every chat; failures are logged.
    pub async fn broadcast(&self, chats: &[ChatId], html: &str) {
        for &chat_id in chats {
            if let Err(e) = self.messenger.send_html(chat_id, html).await {
                warn!(chat_id = chat_id.0, error = %e, "failed to send notice");
            }
        }
    }

    async fn deliver(&self, chat_id: ChatId, post: &OutgoingPost) -> Result<()> {
        match post {
            OutgoingPost::Text { html } => {
                self.messenger.send_html(chat_id, html).await?;
            }
            OutgoingPost::Photo { url, caption_html } => {
                self.messenger.send_photo(chat_id, url, caption_html).await?;
            }
            OutgoingPost::Album { urls, caption_html }
                if self.messenger.capabilities().supports_media_groups =>
            {
                self.messenger
                    .send_media_group(chat_id, urls, caption_html)
                    .await?;
            }
            // Messengers without albums get the first picture.
            OutgoingPost::Album { urls, caption_html } => {
                let first = urls.first().map(String::as_str).unwrap_or_default();
                self.messenger.send_photo(chat_id, first, caption_html).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{FakeMessenger, Sent},
        tweet::StreamEvent,
    };

    fn tweet(tags: &[&str], media: &[&str]) -> TweetEvent {
        TweetEvent {
            id: "1".to_string(),
            text: "hello".to_string(),
            lang: Some("en".to_string()),
            users: vec!["jack".to_string()],
            media_urls: media.iter().map(|s| s.to_string()).collect(),
            matching_rule_tags: tags.iter().map(|s| s.to_string()).collect(),
            matched_untagged: false,
        }
    }

    #[test]
    fn chat_tags_round_trip_and_reject_garbage() {
        assert_eq!(chat_tag(ChatId(-100)), "chat:-100");
        assert_eq!(parse_chat_tag("chat:-100"), Some(ChatId(-100)));
        assert_eq!(parse_chat_tag("chat:x"), None);
        assert_eq!(parse_chat_tag("news"), None);
    }

    #[test]
    fn routes_by_tag_or_to_everyone() {
        let subs = [ChatId(1), ChatId(2), ChatId(3)];
        assert_eq!(route(&tweet(&[], &[]), &subs), subs.to_vec());
        assert_eq!(route(&tweet(&["news"], &[]), &subs), subs.to_vec());
        assert_eq!(
            route(&tweet(&["chat:2", "chat:9"], &[]), &subs),
            vec![ChatId(2)]
        );
    }

    #[test]
    fn tagged_and_shared_rules_reach_everyone() {
        let subs = [ChatId(1), ChatId(2)];
        let mut t = tweet(&["chat:1"], &[]);
        assert_eq!(route(&t, &subs), vec![ChatId(1)]);

        t.matched_untagged = true;
        assert_eq!(route(&t, &subs), subs.to_vec());

        let line = r#"{"data":{"id":"5","text":"hi"},"matching_rules":[{"id":"1","tag":"chat:1"},{"id":"2"}]}"#;
        let StreamEvent::Tweet(parsed) = StreamEvent::parse(line).unwrap() else {
            panic!("expected tweet");
        };
        assert_eq!(route(&parsed, &subs), subs.to_vec());
    }

    #[tokio::test]
    async fn delivers_photos_and_albums() {
        let fake = Arc::new(FakeMessenger::default());
        let d = Dispatcher::new(fake.clone());

        let n = d
            .dispatch(&tweet(&["chat:1"], &["https://x/a.jpg"]), &[ChatId(1), ChatId(2)])
            .await;
        assert_eq!(n, 1);

        let n = d
            .dispatch(
                &tweet(&[], &["https://x/a.jpg", "https://x/b.jpg"]),
                &[ChatId(2)],
            )
            .await;
        assert_eq!(n, 1);

        assert_eq!(
            fake.sent(),
            vec![
                Sent::Photo {
                    chat_id: ChatId(1),
                    url: "https://x/a.jpg".to_string(),
                    caption: "jack: hello".to_string(),
                },
                Sent::Album {
                    chat_id: ChatId(2),
                    urls: vec!["https://x/a.jpg".to_string(), "https://x/b.jpg".to_string()],
                    caption: "jack: hello".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn albums_fall_back_to_the_first_photo() {
        let fake = Arc::new(FakeMessenger::without_albums());
        let d = Dispatcher::new(fake.clone());

        let n = d
            .dispatch(
                &tweet(&[], &["https://x/a.jpg", "https://x/b.jpg"]),
                &[ChatId(3)],
            )
            .await;
        assert_eq!(n, 1);
        assert_eq!(
            fake.sent(),
            vec![Sent::Photo {
                chat_id: ChatId(3),
                url: "https://x/a.jpg".to_string(),
                caption: "jack: hello".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn one_failing_chat_does_not_block_others() {
        let fake = Arc::new(FakeMessenger::default());
        fake.fail_chat(ChatId(1));
        let d = Dispatcher::new(fake.clone());

        let n = d.dispatch(&tweet(&[], &[]), &[ChatId(1), ChatId(2)]).await;
        assert_eq!(n, 1);
        assert_eq!(fake.texts(ChatId(2)), vec!["jack: hello"]);
    }
}

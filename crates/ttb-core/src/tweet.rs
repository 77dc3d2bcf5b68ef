//! Filtered-stream events and their Telegram rendering.

use serde::Deserialize;

use crate::{
    dispatcher::parse_chat_tag,
    formatting::{decode_entities, escape_html, truncate_chars},
    Result,
};

/// Telegram caps: message text, media caption, items per album.
pub const MAX_TEXT_LEN: usize = 4096;
pub const MAX_CAPTION_LEN: usize = 1024;
pub const MAX_ALBUM_ITEMS: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Blank line sent by the API to keep the connection open.
    KeepAlive,
    Tweet(TweetEvent),
    /// Error payload without `data` (e.g. operational disconnect).
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TweetEvent {
    pub id: String,
    pub text: String,
    pub lang: Option<String>,
    pub users: Vec<String>,
    pub media_urls: Vec<String>,
    pub matching_rule_tags: Vec<String>,
    /// Some matching rule carries no `chat:<id>` tag and is shared by every chat.
    pub matched_untagged: bool,
}

/// What to send to Telegram for one tweet. Text fields are already HTML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingPost {
    Text { html: String },
    Photo { url: String, caption_html: String },
    Album { urls: Vec<String>, caption_html: String },
}

#[derive(Deserialize)]
struct RawEvent {
    data: Option<RawTweet>,
    #[serde(default)]
    includes: RawIncludes,
    #[serde(default)]
    matching_rules: Vec<RawMatchingRule>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawTweet {
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: String,
    lang: Option<String>,
}

#[derive(Default, Deserialize)]
struct RawIncludes {
    #[serde(default)]
    media: Vec<RawMedia>,
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Deserialize)]
struct RawMedia {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    username: Option<String>,
}

#[derive(Deserialize)]
struct RawMatchingRule {
    tag: Option<String>,
}

impl StreamEvent {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(StreamEvent::KeepAlive);
        }

        let raw: RawEvent = serde_json::from_str(line)?;
        let Some(data) = raw.data else {
            return Ok(StreamEvent::Error(describe_errors(&raw.errors)));
        };

        let matched_untagged = raw
            .matching_rules
            .iter()
            .any(|r| r.tag.as_deref().and_then(parse_chat_tag).is_none());

        Ok(StreamEvent::Tweet(TweetEvent {
            id: data.id,
            // v2 delivers `&`, `<` and `>` entity-encoded.
            text: decode_entities(&data.text),
            lang: data.lang,
            users: raw
                .includes
                .users
                .into_iter()
                .filter_map(|u| u.username)
                .filter(|u| !u.is_empty())
                .collect(),
            media_urls: raw
                .includes
                .media
                .into_iter()
                .filter_map(|m| m.url)
                .filter(|u| !u.is_empty())
                .collect(),
            matching_rule_tags: raw
                .matching_rules
                .into_iter()
                .filter_map(|r| r.tag)
                .collect(),
            matched_untagged,
        }))
    }
}

fn describe_errors(errors: &[serde_json::Value]) -> String {
    if errors.is_empty() {
        return "stream event without data".to_string();
    }
    errors
        .iter()
        .map(|e| {
            ["detail", "message", "title"]
                .iter()
                .find_map(|k| e.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl TweetEvent {
    /// `"user1, user2: text"`; just the text when no author was expanded.
    pub fn caption(&self) -> String {
        if self.users.is_empty() {
            return self.text.clone();
        }
        format!("{}: {}", self.users.join(", "), self.text)
    }

    pub fn outgoing(&self) -> OutgoingPost {
        let caption = self.caption();
        match self.media_urls.as_slice() {
            [] => OutgoingPost::Text {
                html: escape_html(&truncate_chars(&caption, MAX_TEXT_LEN)),
            },
            [url] => OutgoingPost::Photo {
                url: url.clone(),
                caption_html: escape_html(&truncate_chars(&caption, MAX_CAPTION_LEN)),
            },
            urls => OutgoingPost::Album {
                urls: urls.iter().take(MAX_ALBUM_ITEMS).cloned().collect(),
                caption_html: escape_html(&truncate_chars(&caption, MAX_CAPTION_LEN)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWEET_WITH_MEDIA: &str = r#"{
      "data": {"id": "1", "text": "look <here> & there", "lang": "en",
               "author_id": "9", "attachments": {"media_keys": ["3_1", "3_2"]}},
      "includes": {
        "media": [
          {"media_key": "3_1", "type": "photo", "url": "https://pbs.twimg.com/a.jpg"},
          {"media_key": "3_2", "type": "video"},
          {"media_key": "3_3", "type": "photo", "url": "https://pbs.twimg.com/b.jpg"}
        ],
        "users": [{"id": "9", "name": "Jack", "username": "jack"}]
      },
      "matching_rules": [{"id": "100", "tag": "chat:42"}, {"id": "101"}]
    }"#;

    #[test]
    fn blank_lines_are_keep_alives() {
        assert_eq!(StreamEvent::parse("").unwrap(), StreamEvent::KeepAlive);
        assert_eq!(StreamEvent::parse("\r").unwrap(), StreamEvent::KeepAlive);
    }

    #[test]
    fn parses_tweet_with_expansions() {
        let StreamEvent::Tweet(t) = StreamEvent::parse(TWEET_WITH_MEDIA).unwrap() else {
            panic!("expected tweet");
        };
        assert_eq!(t.id, "1");
        assert_eq!(t.lang.as_deref(), Some("en"));
        assert_eq!(t.users, vec!["jack"]);
        assert_eq!(
            t.media_urls,
            vec!["https://pbs.twimg.com/a.jpg", "https://pbs.twimg.com/b.jpg"]
        );
        assert_eq!(t.matching_rule_tags, vec!["chat:42"]);
        assert!(t.matched_untagged);

        assert_eq!(
            t.outgoing(),
            OutgoingPost::Album {
                urls: t.media_urls.clone(),
                caption_html: "jack: look &lt;here&gt; &amp; there".to_string(),
            }
        );
    }

    #[test]
    fn only_chat_tagged_rules_are_not_shared() {
        let line = r#"{"data":{"id":"2","text":"hi"},"matching_rules":[{"id":"1","tag":"chat:7"},{"id":"2","tag":"chat:8"}]}"#;
        let StreamEvent::Tweet(t) = StreamEvent::parse(line).unwrap() else {
            panic!("expected tweet");
        };
        assert_eq!(t.matching_rule_tags, vec!["chat:7", "chat:8"]);
        assert!(!t.matched_untagged);
    }

    #[test]
    fn encoded_text_is_escaped_once() {
        let line = r#"{"data":{"id":"3","text":"Tom &amp; Jerry &lt;3 &gt;_&lt;"},
                       "includes":{"users":[{"username":"jack"}]}}"#;
        let StreamEvent::Tweet(t) = StreamEvent::parse(line).unwrap() else {
            panic!("expected tweet");
        };
        assert_eq!(t.text, "Tom & Jerry <3 >_<");
        assert_eq!(
            t.outgoing(),
            OutgoingPost::Text {
                html: "jack: Tom &amp; Jerry &lt;3 &gt;_&lt;".to_string()
            }
        );
    }

    #[test]
    fn error_payloads_are_reported() {
        let line = r#"{"errors":[{"title":"operational-disconnect","detail":"This stream has been disconnected upstream for operational reasons."}]}"#;
        assert_eq!(
            StreamEvent::parse(line).unwrap(),
            StreamEvent::Error(
                "This stream has been disconnected upstream for operational reasons.".to_string()
            )
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(StreamEvent::parse("{\"data\":").is_err());
    }

    #[test]
    fn single_photo_and_plain_text_rendering() {
        let mut t = TweetEvent {
            id: "1".to_string(),
            text: "hi".to_string(),
            lang: None,
            users: vec![],
            media_urls: vec![],
            matching_rule_tags: vec![],
            matched_untagged: false,
        };
        assert_eq!(
            t.outgoing(),
            OutgoingPost::Text {
                html: "hi".to_string()
            }
        );

        t.users = vec!["a".to_string(), "b".to_string()];
        t.media_urls = vec!["https://x/1.png".to_string()];
        assert_eq!(
            t.outgoing(),
            OutgoingPost::Photo {
                url: "https://x/1.png".to_string(),
                caption_html: "a, b: hi".to_string(),
            }
        );
    }

    #[test]
    fn long_captions_and_albums_are_capped() {
        let t = TweetEvent {
            id: "1".to_string(),
            text: "x".repeat(2000),
            lang: None,
            users: vec!["u".to_string()],
            media_urls: (0..12).map(|i| format!("https://x/{i}.png")).collect(),
            matching_rule_tags: vec![],
            matched_untagged: false,
        };
        let OutgoingPost::Album { urls, caption_html } = t.outgoing() else {
            panic!("expected album");
        };
        assert_eq!(urls.len(), MAX_ALBUM_ITEMS);
        assert_eq!(caption_html.chars().count(), MAX_CAPTION_LEN);
        assert!(caption_html.ends_with('…'));
    }
}

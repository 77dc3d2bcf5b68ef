use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, twitter::AppCredentials, Result};

pub const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com";

/// Typed configuration for the relay, read from the process environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_bot_token: String,
    pub consumer_key: String,
    pub consumer_secret: String,

    // Persistence
    pub chats_path: PathBuf,

    // Twitter API
    pub twitter_api_base: String,

    // Stream supervision
    pub stream_timeout: Duration,
    pub stream_stall_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub rate_limit_fallback: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_ID")
            .and_then(non_empty)
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_ID environment variable is required".to_string())
            })?;
        let consumer_key = required("CONSUMER_KEY")?;
        let consumer_secret = required("CONSUMER_SECRET")?;

        let chats_path = env_str("CHATS_PATH")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("chats.json"));

        let twitter_api_base = env_str("TWITTER_API_BASE")
            .and_then(non_empty)
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_TWITTER_API_BASE.to_string());

        // A day-long connection mirrors the stream's expected lifetime.
        let stream_timeout = Duration::from_secs(env_u64("STREAM_TIMEOUT_SECS").unwrap_or(86_400));
        let stream_stall_timeout =
            Duration::from_secs(env_u64("STREAM_STALL_TIMEOUT_SECS").unwrap_or(90));
        let reconnect_delay = Duration::from_millis(env_u64("RECONNECT_DELAY_MS").unwrap_or(1000));
        let reconnect_max_delay =
            Duration::from_millis(env_u64("RECONNECT_MAX_DELAY_MS").unwrap_or(60_000))
                .max(reconnect_delay);
        let rate_limit_fallback =
            Duration::from_secs(env_u64("RATE_LIMIT_FALLBACK_SECS").unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            consumer_key,
            consumer_secret,
            chats_path,
            twitter_api_base,
            stream_timeout,
            stream_stall_timeout,
            reconnect_delay,
            reconnect_max_delay,
            rate_limit_fallback,
        })
    }

    pub fn app_credentials(&self) -> AppCredentials {
        AppCredentials {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
        }
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
impl Config {
    /// Fixed configuration for unit tests (no env access).
    pub fn for_tests(chats_path: PathBuf) -> Self {
        Self {
            telegram_bot_token: "x".to_string(),
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            chats_path,
            twitter_api_base: DEFAULT_TWITTER_API_BASE.to_string(),
            stream_timeout: Duration::from_secs(3600),
            stream_stall_timeout: Duration::from_secs(90),
            reconnect_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(8),
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parsing_handles_quotes_comments_and_export() {
        let parsed = parse_dotenv(
            "# comment\n\nCONSUMER_KEY=abc\nexport CHATS_PATH=\"/data/chats.json\"\nBAD LINE\nX='y z'\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("CONSUMER_KEY".to_string(), "abc".to_string()),
                ("CHATS_PATH".to_string(), "/data/chats.json".to_string()),
                ("X".to_string(), "y z".to_string()),
            ]
        );
    }

    #[test]
    fn non_empty_rejects_whitespace() {
        assert_eq!(non_empty("  ".to_string()), None);
        assert_eq!(non_empty("a".to_string()), Some("a".to_string()));
    }
}

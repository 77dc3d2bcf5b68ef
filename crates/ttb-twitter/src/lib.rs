//! Twitter adapter: OAuth 1.0a PIN login, app-only bearer token, filtered-stream
//! rules and the streaming connection itself.
//!
//! Rules and the stream are app-level resources, so they are called with the
//! app's bearer token (fetched once per consumer key and cached).

pub mod oauth;
pub mod rules;
pub mod stream;

use std::{collections::HashMap, io, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ttb_core::{
    config::Config,
    errors::Error,
    twitter::{
        AccessCredentials, AppCredentials, RequestToken, StreamConnection, StreamRule,
        TwitterPort,
    },
    Result,
};

use oauth::{percent_encode, Signer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";

#[derive(Debug, Deserialize)]
struct BearerResponse {
    token_type: String,
    access_token: String,
}

pub struct TwitterClient {
    api_base: String,
    app: AppCredentials,
    stream_timeout: Duration,
    http: reqwest::Client,
    bearer_tokens: Mutex<HashMap<String, String>>,
}

impl TwitterClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("ttb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::External(format!("twitter client build error: {e}")))?;
        Ok(Self {
            api_base: cfg.twitter_api_base.trim_end_matches('/').to_string(),
            app: cfg.app_credentials(),
            stream_timeout: cfg.stream_timeout,
            http,
            bearer_tokens: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    /// App-only bearer token for `app`, fetched on first use.
    async fn bearer(&self, app: &AppCredentials) -> Result<String> {
        if let Some(token) = self.bearer_tokens.lock().await.get(&app.consumer_key) {
            return Ok(token.clone());
        }

        let resp = self
            .http
            .post(self.url("/oauth2/token"))
            .basic_auth(
                percent_encode(&app.consumer_key),
                Some(percent_encode(&app.consumer_secret)),
            )
            .form(&[("grant_type", "client_credentials")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;
        let resp = ensure_success(resp).await?;
        let bearer: BearerResponse = resp.json().await.map_err(request_error)?;
        if !bearer.token_type.eq_ignore_ascii_case("bearer") {
            return Err(Error::External(format!(
                "unexpected token type from oauth2/token: {}",
                bearer.token_type
            )));
        }

        debug!(consumer_key = %app.consumer_key, "obtained app bearer token");
        self.bearer_tokens
            .lock()
            .await
            .insert(app.consumer_key.clone(), bearer.access_token.clone());
        Ok(bearer.access_token)
    }

    async fn forget_bearer(&self, app: &AppCredentials) {
        self.bearer_tokens.lock().await.remove(&app.consumer_key);
    }

    /// Send a bearer-authenticated request, refreshing the token once on 401.
    async fn send_app_request<F>(&self, app: &AppCredentials, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder,
    {
        let token = self.bearer(app).await?;
        let resp = build(&self.http, &token)
            .send()
            .await
            .map_err(request_error)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!(consumer_key = %app.consumer_key, "bearer token rejected, refreshing");
        self.forget_bearer(app).await;
        let token = self.bearer(app).await?;
        build(&self.http, &token)
            .send()
            .await
            .map_err(request_error)
    }

    async fn rules_call(
        &self,
        creds: &AccessCredentials,
        body: Option<serde_json::Value>,
    ) -> Result<rules::RulesResponse> {
        let url = self.url(RULES_PATH);
        let resp = self
            .send_app_request(&creds.app(), |http, token| {
                let req = match &body {
                    Some(body) => http.post(&url).json(body),
                    None => http.get(&url),
                };
                req.bearer_auth(token).timeout(REQUEST_TIMEOUT)
            })
            .await?;

        let status = resp.status();
        let text = resp.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(Error::Twitter {
                status: status.as_u16(),
                body: rules::preview(&text),
            });
        }
        rules::parse(status.as_u16(), &text)
    }

    /// Signed OAuth 1.0a POST to one of the `/oauth/*` token endpoints.
    async fn oauth_post(
        &self,
        path: &str,
        signer: Signer<'_>,
        params: &[(&str, &str)],
    ) -> Result<HashMap<String, String>> {
        let url = self.url(path);
        let header =
            signer.authorization("POST", &url, params, &oauth::nonce(), oauth::timestamp())?;
        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, header)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;
        let resp = ensure_success(resp).await?;
        let body = resp.text().await.map_err(request_error)?;
        Ok(oauth::parse_form(&body))
    }
}

#[async_trait]
impl TwitterPort for TwitterClient {
    async fn request_token(&self) -> Result<RequestToken> {
        let signer = Signer::consumer(&self.app.consumer_key, &self.app.consumer_secret);
        let mut form = self
            .oauth_post("/oauth/request_token", signer, &[("oauth_callback", "oob")])
            .await?;
        Ok(RequestToken {
            oauth_token: take_field(&mut form, "oauth_token")?,
            oauth_token_secret: take_field(&mut form, "oauth_token_secret")?,
            oauth_callback_confirmed: form.remove("oauth_callback_confirmed"),
        })
    }

    fn authorize_url(&self, token: &RequestToken) -> String {
        format!(
            "{}/oauth/authorize?oauth_token={}",
            self.api_base,
            percent_encode(&token.oauth_token)
        )
    }

    async fn access_token(
        &self,
        token: &RequestToken,
        verifier: &str,
    ) -> Result<AccessCredentials> {
        let signer = Signer::consumer(&self.app.consumer_key, &self.app.consumer_secret)
            .with_token(&token.oauth_token, &token.oauth_token_secret);
        let mut form = self
            .oauth_post("/oauth/access_token", signer, &[("oauth_verifier", verifier)])
            .await?;

        if let Some(name) = form.get("screen_name") {
            info!(screen_name = %name, "twitter login completed");
        }
        Ok(AccessCredentials {
            consumer_key: self.app.consumer_key.clone(),
            consumer_secret: self.app.consumer_secret.clone(),
            access_token: take_field(&mut form, "oauth_token")?,
            access_token_secret: take_field(&mut form, "oauth_token_secret")?,
        })
    }

    async fn list_rules(&self, creds: &AccessCredentials) -> Result<Vec<StreamRule>> {
        Ok(self.rules_call(creds, None).await?.data)
    }

    async fn add_rule(
        &self,
        creds: &AccessCredentials,
        value: &str,
        tag: Option<&str>,
    ) -> Result<StreamRule> {
        let resp = self
            .rules_call(creds, Some(rules::add_body(value, tag)?))
            .await?;
        let rule = rules::created_rule(200, resp)?;
        debug!(rule_id = %rule.id, value = %rule.value, "added stream rule");
        Ok(rule)
    }

    async fn delete_rules(&self, creds: &AccessCredentials, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let resp = self
            .rules_call(creds, Some(rules::delete_body(ids)?))
            .await?;
        if let Some(errors) = rules::describe_errors(&resp.errors) {
            return Err(Error::Twitter {
                status: 200,
                body: errors,
            });
        }
        Ok(())
    }

    async fn connect_stream(&self, creds: &AccessCredentials) -> Result<StreamConnection> {
        let url = self.url(STREAM_PATH);
        let timeout = self.stream_timeout;
        let resp = self
            .send_app_request(&creds.app(), |http, token| {
                http.get(&url)
                    .query(&stream::STREAM_QUERY)
                    .bearer_auth(token)
                    .timeout(timeout)
            })
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_at = stream::rate_limit_reset(resp.headers());
            return Ok(StreamConnection::RateLimited { reset_at });
        }
        let resp = ensure_success(resp).await?;

        info!("connected to filtered stream");
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
        Ok(StreamConnection::Connected(stream::into_lines(body)))
    }
}

fn request_error(e: reqwest::Error) -> Error {
    Error::External(format!("twitter request error: {e}"))
}

async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Twitter {
        status: status.as_u16(),
        body: rules::preview(&body),
    })
}

fn take_field(form: &mut HashMap<String, String>, key: &str) -> Result<String> {
    form.remove(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::External(format!("twitter token response is missing {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn client(base: &str) -> TwitterClient {
        let cfg = Config {
            telegram_bot_token: "x".to_string(),
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            chats_path: PathBuf::from("chats.json"),
            twitter_api_base: base.to_string(),
            stream_timeout: Duration::from_secs(60),
            stream_stall_timeout: Duration::from_secs(90),
            reconnect_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            rate_limit_fallback: Duration::from_secs(60),
        };
        TwitterClient::new(&cfg).unwrap()
    }

    #[test]
    fn authorize_url_uses_configured_base() {
        let c = client("https://api.twitter.com/");
        let token = RequestToken {
            oauth_token: "abc+def".to_string(),
            oauth_token_secret: "s".to_string(),
            oauth_callback_confirmed: None,
        };
        assert_eq!(
            c.authorize_url(&token),
            "https://api.twitter.com/oauth/authorize?oauth_token=abc%2Bdef"
        );
        assert_eq!(c.url(RULES_PATH), "https://api.twitter.com/2/tweets/search/stream/rules");
    }

    #[test]
    fn missing_token_fields_are_errors() {
        let mut form = oauth::parse_form("oauth_token=t&oauth_token_secret=");
        assert_eq!(take_field(&mut form, "oauth_token").unwrap(), "t");
        assert!(take_field(&mut form, "oauth_token_secret").is_err());
        assert!(take_field(&mut form, "oauth_token").is_err());
    }

    #[tokio::test]
    async fn empty_delete_makes_no_request() {
        // Unroutable base: any HTTP call would fail.
        let c = client("http://127.0.0.1:9");
        let creds = AccessCredentials {
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            access_token: "at".to_string(),
            access_token_secret: "ats".to_string(),
        };
        c.delete_rules(&creds, &[]).await.unwrap();
    }
}

//! OAuth 1.0a request signing (HMAC-SHA1), as used by the PIN login flow.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{distr::Alphanumeric, Rng};
use sha1::Sha1;

use ttb_core::{errors::Error, Result};

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding (everything but `A-Z a-z 0-9 - . _ ~`).
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Signing identity for one request. `token`/`token_secret` are empty before a
/// request token exists.
#[derive(Clone, Copy, Debug)]
pub struct Signer<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: Option<&'a str>,
    pub token_secret: &'a str,
}

impl<'a> Signer<'a> {
    pub fn consumer(consumer_key: &'a str, consumer_secret: &'a str) -> Self {
        Self {
            consumer_key,
            consumer_secret,
            token: None,
            token_secret: "",
        }
    }

    pub fn with_token(mut self, token: &'a str, token_secret: &'a str) -> Self {
        self.token = Some(token);
        self.token_secret = token_secret;
        self
    }

    /// Build the `Authorization: OAuth ...` header value.
    ///
    /// `params` are all query/body parameters of the request plus extra
    /// protocol parameters such as `oauth_callback` or `oauth_verifier`; the
    /// `oauth_*` ones are echoed in the header.
    pub fn authorization(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: u64,
    ) -> Result<String> {
        let timestamp = timestamp.to_string();
        let mut protocol: Vec<(&str, &str)> = vec![
            ("oauth_consumer_key", self.consumer_key),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", &timestamp),
            ("oauth_version", "1.0"),
        ];
        if let Some(token) = self.token {
            protocol.push(("oauth_token", token));
        }

        let mut all = protocol.clone();
        all.extend_from_slice(params);
        let base = signature_base_string(method, url, &all);
        let signature = sign(&base, self.consumer_secret, self.token_secret)?;

        let mut header_params: Vec<(&str, &str)> = protocol;
        header_params.extend(params.iter().filter(|(k, _)| k.starts_with("oauth_")));
        header_params.push(("oauth_signature", &signature));
        header_params.sort();

        let fields = header_params
            .iter()
            .map(|(k, v)| format!(r#"{}="{}""#, percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {fields}"))
    }
}

/// `METHOD&enc(url)&enc(sorted k=v pairs)`.
pub fn signature_base_string(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    )
}

pub fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> Result<String> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| Error::External(format!("hmac key error: {e}")))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Decode an `application/x-www-form-urlencoded` token response.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    body.trim()
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            Some((form_decode(k), form_decode(v)))
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn form_decode(s: &str) -> String {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|c| c.into_owned())
        .unwrap_or(s)
}

//! Wire shapes of `/2/tweets/search/stream/rules`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ttb_core::{errors::Error, twitter::StreamRule, Result};

#[derive(Debug, Serialize)]
struct NewRule<'a> {
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct AddRules<'a> {
    add: [NewRule<'a>; 1],
}

#[derive(Debug, Serialize)]
struct DeleteIds<'a> {
    ids: &'a [String],
}

#[derive(Debug, Serialize)]
struct DeleteRules<'a> {
    delete: DeleteIds<'a>,
}

/// Common envelope of rules responses; `data` is absent when no rules exist.
#[derive(Debug, Default, Deserialize)]
pub struct RulesResponse {
    #[serde(default)]
    pub data: Vec<StreamRule>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

pub fn add_body(value: &str, tag: Option<&str>) -> Result<Value> {
    Ok(serde_json::to_value(AddRules {
        add: [NewRule { value, tag }],
    })?)
}

pub fn delete_body(ids: &[String]) -> Result<Value> {
    Ok(serde_json::to_value(DeleteRules {
        delete: DeleteIds { ids },
    })?)
}

pub fn parse(status: u16, body: &str) -> Result<RulesResponse> {
    serde_json::from_str(body).map_err(|e| Error::Twitter {
        status,
        body: format!("unexpected rules response ({e}): {}", preview(body)),
    })
}

/// The single rule created by an add request, or the API's rejection.
pub fn created_rule(status: u16, resp: RulesResponse) -> Result<StreamRule> {
    if let Some(rule) = resp.data.into_iter().next() {
        return Ok(rule);
    }
    Err(Error::Twitter {
        status,
        body: describe_errors(&resp.errors).unwrap_or_else(|| "rule was not created".to_string()),
    })
}

/// Human-readable summary of an `errors` array (`title: value` per entry).
pub fn describe_errors(errors: &[Value]) -> Option<String> {
    let parts: Vec<String> = errors
        .iter()
        .map(|e| {
            let title = e
                .get("title")
                .or_else(|| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("error");
            match e.get("value").and_then(Value::as_str) {
                Some(v) => format!("{title}: {v}"),
                None => title.to_string(),
            }
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

pub fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

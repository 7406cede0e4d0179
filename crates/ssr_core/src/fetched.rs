//! Inlining of responses fetched during server rendering, so the client can
//! replay them instead of fetching again during hydration.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::escape::{escape_for_inline_script, escape_html_attr};
use crate::hash::hash;

/// Response snapshot of a fetch made while loading data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchedResponse {
    pub status: u16,
    pub status_text: String,
    /// Lowercase header names.
    pub headers: Vec<(String, String)>,
}

/// A fetch captured during server rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fetched {
    pub url: String,
    pub method: String,
    pub request_headers: Option<Vec<(String, String)>>,
    pub request_body: Option<String>,
    pub response: FetchedResponse,
    pub response_body: String,
    /// `response_body` is base64 encoded binary.
    pub is_b64: bool,
}

#[derive(Serialize)]
struct Payload<'a> {
    status: u16,
    #[serde(rename = "statusText")]
    status_text: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    body: &'a str,
}

/// Never expose response headers unless the app opts in.
pub fn no_headers(_name: &str, _value: &str) -> bool {
    false
}

/// Render `fetched` as a `<script type="application/json">` element.
///
/// `filter` decides which response headers are exposed to the client.
pub fn serialize_fetched(
    fetched: &Fetched,
    filter: &dyn Fn(&str, &str) -> bool,
    prerendering: bool,
) -> Result<String> {
    let mut headers = BTreeMap::new();
    let mut cache_control = None;
    let mut age = None;
    let mut vary_any = false;

    for (key, value) in &fetched.response.headers {
        if filter(key, value) {
            headers.insert(key.as_str(), value.as_str());
        }
        match key.as_str() {
            "cache-control" => cache_control = Some(value.as_str()),
            "age" => age = Some(value.as_str()),
            "vary" if value.trim() == "*" => vary_any = true,
            _ => {}
        }
    }

    let payload = Payload {
        status: fetched.response.status,
        status_text: &fetched.response.status_text,
        headers,
        body: &fetched.response_body,
    };
    let json = serde_json::to_string(&payload).map_err(|e| CoreError::unserializable(&[], e.to_string()))?;

    let mut attrs = vec![
        "type=\"application/json\"".to_string(),
        "data-sveltekit-fetched".to_string(),
        format!("data-url=\"{}\"", escape_html_attr(&fetched.url)),
    ];
    if fetched.is_b64 {
        attrs.push("data-b64".to_string());
    }

    let request_headers = fetched
        .request_headers
        .as_ref()
        .filter(|h| !h.is_empty())
        .map(|h| normalized_headers(h));
    let request_body = fetched.request_body.as_deref().filter(|b| !b.is_empty());
    if request_headers.is_some() || request_body.is_some() {
        let mut values = Vec::new();
        if let Some(h) = &request_headers {
            values.push(h.as_str());
        }
        if let Some(body) = request_body {
            values.push(body);
        }
        attrs.push(format!("data-hash=\"{}\"", hash(&values)));
    }

    if !prerendering && fetched.method == "GET" && !vary_any {
        if let Some(ttl) = cache_control.and_then(|cc| ttl(cc, age)) {
            attrs.push(format!("data-ttl=\"{ttl}\""));
        }
    }

    Ok(format!(
        "<script {}>{}</script>",
        attrs.join(" "),
        escape_for_inline_script(&json)
    ))
}

/// Request headers as the client's `Headers` iterates them: lowercase names,
/// sorted, flattened to `name,value,name,value`.
fn normalized_headers(headers: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, &str)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
        .iter()
        .map(|(k, v)| format!("{k},{v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Seconds left to cache, from `s-maxage` (preferred) or `max-age`, minus `age`.
fn ttl(cache_control: &str, age: Option<&str>) -> Option<i64> {
    let directive = |name: &str| {
        cache_control.split(',').find_map(|part| {
            let (key, value) = part.trim().split_once('=')?;
            if key.trim() != name {
                return None;
            }
            let digits: String = value.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<i64>().ok()
        })
    };
    let max_age = directive("s-maxage").or_else(|| directive("max-age"))?;
    let age = age.and_then(|a| a.trim().parse::<i64>().ok()).unwrap_or(0);
    Some(max_age - age)
}

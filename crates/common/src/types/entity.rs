use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A retrieved source result: URL plus metadata and optional full text.
///
/// Unique by normalized URL within a session. Provider-specific extras
/// (relevance scores, DOIs, publication years) ride in `extensions` as
/// opaque passthrough.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized URL — always equal to `normalize_url(url)`.
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    /// Full extracted text, filled by the content fetcher. None until
    /// enrichment; a failed fetch leaves it None and keeps the snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Name of the provider that returned this result.
    pub provider: String,
    pub retrieved_at: DateTime<Utc>,
    /// Provider-reported relevance score, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Publication date as reported by the provider, unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Opaque per-provider metadata passthrough.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, Value>,
}

impl Entity {
    pub fn new(url: &str, title: &str, snippet: &str, provider: &str) -> Self {
        Self {
            url: normalize_url(url),
            title: title.to_string(),
            snippet: snippet.to_string(),
            content: None,
            provider: provider.to_string(),
            retrieved_at: Utc::now(),
            score: None,
            published: None,
            extensions: HashMap::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Query parameters stripped during normalization. Tracking decoration only —
/// removing them must never change the resource addressed.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid",
];

/// Canonicalize a URL: lowercase scheme and host, strip the fragment, drop
/// tracking query parameters. Idempotent — `normalize_url` of its own output
/// is a no-op.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();

    // Strip fragment.
    let url = url.split('#').next().unwrap_or(url);

    // Split scheme from the rest.
    let (scheme, rest) = match url.split_once("://") {
        Some((s, r)) => (s.to_lowercase(), r),
        None => return url.to_string(),
    };

    // Split host from path+query; lowercase the host.
    let (host, path_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = host.to_lowercase();

    // Split path from query and filter tracking parameters.
    let (path, query) = match path_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_query, None),
    };

    let kept_query = query.map(|q| {
        q.split('&')
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or(pair);
                !TRACKING_PARAMS.contains(&key) && !key.starts_with("utm_")
            })
            .collect::<Vec<_>>()
            .join("&")
    });

    match kept_query {
        Some(q) if !q.is_empty() => format!("{}://{}{}?{}", scheme, host, path, q),
        _ => format!("{}://{}{}", scheme, host, path),
    }
}

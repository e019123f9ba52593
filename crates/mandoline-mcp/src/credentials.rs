use crate::http::{HeaderValue, Headers};

const KEY_PREFIX: &str = "sk_";
const BEARER_PREFIX: &str = "Bearer sk_";

/// Pulls the caller's API key from `X-API-KEY`, falling back to
/// `Authorization: Bearer sk_...`. Repeated headers never match.
pub fn extract_api_key(headers: &Headers) -> Option<String> {
    if let HeaderValue::Single(raw) = headers.lookup("x-api-key") {
        let key = raw.trim();
        if key.starts_with(KEY_PREFIX) {
            return Some(key.to_string());
        }
    }

    if let HeaderValue::Single(raw) = headers.lookup("authorization") {
        if let Some(rest) = raw.strip_prefix(BEARER_PREFIX) {
            return Some(format!("{KEY_PREFIX}{}", rest.trim_end()));
        }
    }

    None
}

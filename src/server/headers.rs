//! Response header policy: CORS, caching and upstream header filtering.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL,
    },
};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Upstream headers replaced by our own policy or by the HTTP framing of
/// the outgoing response.
const STRIPPED_HEADERS: [&str; 5] = [
    "cache-control",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// Allow any origin, method and header.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
}

/// `Cache-Control: public, max-age=<ttl>`
pub fn apply_cache_control(headers: &mut HeaderMap, ttl_secs: u64) {
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={ttl_secs}")) {
        headers.insert(CACHE_CONTROL, value);
    }
}

/// CORS headers for a pre-flight answer, cacheable for `max_age_secs`.
pub fn apply_preflight(headers: &mut HeaderMap, max_age_secs: u64) {
    apply_cors(headers);
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age_secs));
}

/// Copy upstream headers for a pass-through response, dropping caching,
/// cross-origin and framing headers.
pub fn passthrough_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if STRIPPED_HEADERS.contains(&name.as_str())
            || name.as_str().starts_with("access-control-")
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

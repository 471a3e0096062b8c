//! URL resolution for playlist references.
//!
//! Every URI found in a playlist goes through the same pipeline: resolve it
//! against the base of the playlist it came from, then embed the absolute
//! result in a proxy path so the player fetches it back through us.

use url::Url;

/// Path prefix the proxy endpoint is mounted under.
pub const PROXY_PREFIX: &str = "/proxy/";

/// Returns `true` if `value` starts with `http://` or `https://` (ASCII case-insensitive).
pub fn is_absolute_http(value: &str) -> bool {
    let prefix = |p: &str| {
        value
            .get(..p.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(p))
    };
    prefix("http://") || prefix("https://")
}

/// Compute the directory-equivalent base URL of `url`.
///
/// The result is the origin plus the path without its final segment, and
/// always ends in `/`. Query and fragment are dropped. Never fails: strings
/// that do not parse fall back to plain truncation at the last slash.
pub fn compute_base(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let origin = parsed.origin().ascii_serialization();
            let path = parsed.path();
            if path.is_empty() || path == "/" {
                return format!("{origin}/");
            }
            let dir = path.rfind('/').map_or("", |idx| &path[..idx]);
            format!("{origin}{dir}/")
        }
        Err(_) => {
            let authority_start = url.find("://").map_or(0, |idx| idx + 3);
            match url.rfind('/') {
                Some(idx) if idx >= authority_start => url[..=idx].to_string(),
                _ => format!("{url}/"),
            }
        }
    }
}

/// Resolve `reference` against `base`.
///
/// Absolute http(s) references are returned untouched. Everything else goes
/// through standard RFC 3986 resolution, with a string-level fallback for
/// bases the `url` crate rejects.
pub fn resolve(base: &str, reference: &str) -> String {
    if is_absolute_http(reference) {
        return reference.to_string();
    }

    match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(resolved) => resolved.into(),
        Err(_) => {
            if reference.starts_with('/')
                && let Some(origin) = string_origin(base)
            {
                return format!("{origin}{reference}");
            }
            join_with_single_slash(base, reference)
        }
    }
}

/// Decode the raw (still percent-encoded) target taken from the proxy path.
///
/// Returns `None` when the value does not name an absolute http(s) URL.
pub fn decode_path(raw: &str) -> Option<String> {
    match urlencoding::decode(raw) {
        Ok(decoded) if is_absolute_http(&decoded) => Some(decoded.into_owned()),
        Ok(_) => None,
        // Decoded bytes were not UTF-8; tolerate targets that were never encoded
        Err(_) if is_absolute_http(raw) => Some(raw.to_string()),
        Err(_) => None,
    }
}

/// Embed an absolute URL as a single segment under [`PROXY_PREFIX`].
pub fn to_proxy_path(absolute_url: &str) -> String {
    format!("{PROXY_PREFIX}{}", urlencoding::encode(absolute_url))
}

/// Scheme and authority of `url` without parsing, e.g. `https://host:8080`.
fn string_origin(url: &str) -> Option<&str> {
    let authority_start = url.find("://")? + 3;
    let end = url[authority_start..]
        .find('/')
        .map_or(url.len(), |idx| authority_start + idx);
    Some(&url[..end])
}

fn join_with_single_slash(base: &str, reference: &str) -> String {
    match (base.ends_with('/'), reference.starts_with('/')) {
        (true, true) => format!("{base}{}", &reference[1..]),
        (false, false) => format!("{base}/{reference}"),
        _ => format!("{base}{reference}"),
    }
}

//! Media playlist rewriting.
//!
//! The playlist is transformed line by line instead of being parsed into a
//! model and serialized again, so tags this code knows nothing about survive
//! byte for byte.

use super::classify::strip_bom;
use super::url_resolver::{compute_base, resolve, to_proxy_path};
use tracing::debug;

/// Rewrite every URI in a media playlist fetched from `source_url` so it
/// routes back through the proxy.
///
/// Lines are trimmed. Empty lines are dropped, except a trailing one which
/// keeps the body's final newline.
pub fn rewrite_media(source_url: &str, body: &str) -> String {
    let base = compute_base(source_url);
    let lines: Vec<&str> = strip_bom(body).split('\n').collect();
    let last = lines.len() - 1;

    let mut out = Vec::with_capacity(lines.len());
    let mut rewritten = 0usize;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if line.is_empty() {
            if idx == last {
                out.push(String::new());
            }
            continue;
        }

        if line.starts_with("#EXT-X-KEY") || line.starts_with("#EXT-X-MAP") {
            match rewrite_uri_attribute(line, &base) {
                Some(updated) => {
                    rewritten += 1;
                    out.push(updated);
                }
                None => out.push(line.to_string()),
            }
        } else if line.starts_with('#') {
            out.push(line.to_string());
        } else {
            rewritten += 1;
            out.push(to_proxy_path(&resolve(&base, line)));
        }
    }

    debug!(
        "Rewrote {} URIs in media playlist from {} (base {})",
        rewritten, source_url, base
    );

    out.join("\n")
}

/// Replace the value of the first non-empty `URI="..."` attribute in a tag line.
///
/// Returns `None` when the line carries no such attribute.
fn rewrite_uri_attribute(line: &str, base: &str) -> Option<String> {
    const ATTR: &str = "URI=\"";

    let value_start = line.find(ATTR)? + ATTR.len();
    let value_len = line[value_start..].find('"')?;
    if value_len == 0 {
        return None;
    }
    let value_end = value_start + value_len;

    let proxied = to_proxy_path(&resolve(base, &line[value_start..value_end]));
    Some(format!(
        "{}{}{}",
        &line[..value_start],
        proxied,
        &line[value_end..]
    ))
}

use crate::{
    error::{ProxyError, Result},
    fetch::FetchedContent,
    hls::{
        PlaylistResolver, classify_bytes, decode_path,
        url_resolver::{PROXY_PREFIX, is_absolute_http},
    },
    metrics,
    server::{
        headers::{
            HLS_CONTENT_TYPE, apply_cache_control, apply_cors, apply_preflight,
            passthrough_headers,
        },
        state::AppState,
    },
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::info;

/// What a successful proxy request served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Playlist,
    Passthrough,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Playlist => "playlist",
            Outcome::Passthrough => "passthrough",
        }
    }
}

/// Proxy the upstream resource encoded in the request path.
///
/// Playlists come back rewritten so every reference routes through this
/// endpoint again; master playlists are resolved down to one media playlist.
/// Anything else is passed through with the upstream headers.
pub async fn serve_proxy(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let start = Instant::now();
    let result = proxy(&state, &uri, &headers).await;

    let (outcome, status) = match &result {
        Ok((outcome, response)) => (outcome.as_str(), response.status()),
        Err(ProxyError::InvalidTarget { .. }) => ("invalid", StatusCode::BAD_REQUEST),
        Err(e) => ("error", e.status_code()),
    };
    metrics::record_request(outcome, status.as_u16());
    metrics::record_duration(outcome, start);

    result.map(|(_, response)| response)
}

/// Answer a CORS pre-flight request.
pub async fn preflight(State(state): State<AppState>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_preflight(response.headers_mut(), state.config.cache_ttl_secs);
    response
}

async fn proxy(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<(Outcome, Response)> {
    let target = target_url(uri)?;
    info!("Proxying {}", target);

    let fetched = state.fetcher.fetch(&target, headers).await?;
    let kind = classify_bytes(&fetched.body, &fetched.content_type);

    if !kind.is_playlist() {
        info!(
            "Passing through {} ({} bytes, content-type {:?})",
            target,
            fetched.body.len(),
            fetched.content_type
        );
        return Ok((
            Outcome::Passthrough,
            passthrough_response(fetched, state.config.cache_ttl_secs),
        ));
    }

    let body = fetched.text().into_owned();
    let resolver = PlaylistResolver::new(&state.fetcher, headers, state.config.max_recursion);
    let rewritten = resolver.dispatch(&target, body, kind, 0).await?;

    info!("Serving rewritten {:?} playlist for {}", kind, target);
    Ok((
        Outcome::Playlist,
        playlist_response(rewritten, state.config.cache_ttl_secs),
    ))
}

/// Decode the target URL from the request path.
///
/// The path is read straight from the URI so undecodable bytes reach
/// [`decode_path`] instead of being rejected by an extractor. A query string
/// on the request belongs to the target only when the target was sent
/// unencoded, so only then is it re-attached.
fn target_url(uri: &Uri) -> Result<String> {
    let raw = uri.path().strip_prefix(PROXY_PREFIX).unwrap_or_default();

    let raw = match uri.query() {
        Some(query) if !query.is_empty() && is_absolute_http(raw) => format!("{raw}?{query}"),
        _ => raw.to_string(),
    };

    decode_path(&raw).ok_or(ProxyError::InvalidTarget { raw })
}

fn playlist_response(body: String, ttl_secs: u64) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(HLS_CONTENT_TYPE));
    apply_cache_control(headers, ttl_secs);
    apply_cors(headers);
    response
}

fn passthrough_response(fetched: FetchedContent, ttl_secs: u64) -> Response {
    let mut response = Response::new(Body::from(fetched.body));
    let headers = response.headers_mut();
    *headers = passthrough_headers(&fetched.headers);
    apply_cache_control(headers, ttl_secs);
    apply_cors(headers);
    response
}

//! Outbound fetches to upstream servers.
//!
//! [`ContentFetcher`] owns the request policy (User-Agent rotation, forwarded
//! headers, error classification) while the actual HTTP exchange sits behind
//! the [`Transport`] trait. No request is ever retried: a failed fetch fails
//! the whole proxied request.

use crate::error::{BoxError, FetchError};
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::IndexedRandom;
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, REFERER, USER_AGENT},
};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// User-Agent sent when the configured pool is empty.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Accept-Language sent when the client did not provide one.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Maximum number of characters of an error body kept in [`FetchError::Status`].
pub const ERROR_EXCERPT_CHARS: usize = 150;

/// Raw upstream response as seen by the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The HTTP exchange itself.
///
/// Implementations follow redirects and return non-success statuses as
/// ordinary responses. Only failures that produced no response at all are
/// errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, BoxError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse, BoxError> {
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        let body = if status.is_success() {
            response.bytes().await?
        } else {
            // Error bodies are only used for diagnostics
            response.bytes().await.unwrap_or_else(|e| {
                debug!("Failed to read error body from {}: {}", url, e);
                Bytes::new()
            })
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// A successfully fetched upstream resource.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub body: Bytes,
    /// Declared content type, empty when upstream sent none.
    pub content_type: String,
    /// Full upstream header set, for pass-through responses.
    pub headers: HeaderMap,
}

impl FetchedContent {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Fetches upstream resources with the proxy's request policy applied.
#[derive(Clone)]
pub struct ContentFetcher {
    transport: Arc<dyn Transport>,
    user_agents: Arc<[String]>,
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn Transport>, user_agents: Vec<String>) -> Self {
        Self {
            transport,
            user_agents: user_agents.into(),
        }
    }

    /// Pick a User-Agent uniformly at random from the pool.
    pub fn user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Headers for one outbound request to `target_url`.
    ///
    /// `Accept-Language` and `Referer` are forwarded from the inbound request
    /// when present. Otherwise they default to a fixed locale and the
    /// target's own origin.
    pub fn request_headers(&self, target_url: &str, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let user_agent = self.user_agent();
        let user_agent = HeaderValue::from_str(user_agent).unwrap_or_else(|_| {
            warn!("Configured User-Agent is not a valid header value: {:?}", user_agent);
            HeaderValue::from_static(DEFAULT_USER_AGENT)
        });
        headers.insert(USER_AGENT, user_agent);

        let accept_language = inbound
            .get(ACCEPT_LANGUAGE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
        headers.insert(ACCEPT_LANGUAGE, accept_language);

        let referer = inbound.get(REFERER).cloned().or_else(|| {
            let origin = Url::parse(target_url).ok()?.origin().ascii_serialization();
            HeaderValue::from_str(&origin).ok()
        });
        if let Some(referer) = referer {
            headers.insert(REFERER, referer);
        }

        headers
    }

    /// Fetch `target_url`.
    ///
    /// Redirects are followed by the transport, but the caller keeps using
    /// `target_url` as the resource's location: relative references in a
    /// redirected playlist resolve against the pre-redirect URL.
    pub async fn fetch(
        &self,
        target_url: &str,
        inbound: &HeaderMap,
    ) -> Result<FetchedContent, FetchError> {
        let headers = self.request_headers(target_url, inbound);
        debug!("Fetching {}", target_url);

        let response = self
            .transport
            .get(target_url, headers)
            .await
            .map_err(|source| {
                warn!("Upstream request to {} failed: {}", target_url, source);
                metrics::record_upstream_error("transport");
                FetchError::Transport {
                    url: target_url.to_string(),
                    source,
                }
            })?;

        if !response.status.is_success() {
            warn!("Upstream {} returned {}", target_url, response.status);
            metrics::record_upstream_error("status");
            return Err(FetchError::Status {
                url: target_url.to_string(),
                status: response.status,
                excerpt: excerpt(&response.body),
            });
        }

        let content_type = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(
            "Fetched {} ({} bytes, content-type {:?})",
            target_url,
            response.body.len(),
            content_type
        );

        Ok(FetchedContent {
            body: response.body,
            content_type,
            headers: response.headers,
        })
    }
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_EXCERPT_CHARS)
        .collect()
}

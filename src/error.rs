use crate::server::headers::apply_cors;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Boxed error produced by a [`Transport`](crate::fetch::Transport) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failure of a single outbound fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream answered with a non-success status.
    #[error("upstream {url} responded with {status}: {excerpt}")]
    Status {
        url: String,
        status: StatusCode,
        /// Start of the response body, at most 150 characters.
        excerpt: String,
    },

    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Status { url, .. } | FetchError::Transport { url, .. } => url,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The proxy path does not decode to an absolute http(s) URL.
    #[error("invalid proxy target: {raw:?}")]
    InvalidTarget { raw: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Master playlists kept pointing at further master playlists.
    #[error("playlist recursion depth {depth} exceeds the maximum of {max_depth}")]
    RecursionLimit { depth: u32, max_depth: u32 },
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Fetch(_) | ProxyError::RecursionLimit { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message exposed to the client in the JSON error body.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::InvalidTarget { .. } => "Invalid proxy request path.".to_string(),
            other => format!("Proxy processing error: {other}"),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_client_error() {
            warn!("Rejected request: {}", self);
        } else {
            error!("Proxy error: {}", self);
        }

        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();
        apply_cors(response.headers_mut());
        response
    }
}

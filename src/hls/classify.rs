//! Playlist type detection.
//!
//! Detection is substring based rather than a structural parse, so it
//! tolerates arbitrary surrounding content and line ordering.

/// Content types that identify an HLS playlist regardless of body.
const HLS_CONTENT_TYPES: [&str; 3] = [
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
];

/// Marker every HLS playlist starts with.
const PLAYLIST_MARKER: &str = "#EXTM3U";

/// What a fetched body turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    /// Opaque content, passed through untouched.
    NotPlaylist,
    /// Single-variant playlist listing segments.
    Media,
    /// Multi-variant playlist listing alternative streams.
    Master,
}

impl PlaylistKind {
    pub fn is_playlist(self) -> bool {
        self != PlaylistKind::NotPlaylist
    }
}

/// Returns `true` if the declared content type is one of the HLS MIME types.
pub fn is_hls_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    HLS_CONTENT_TYPES
        .iter()
        .any(|mime| content_type.contains(mime))
}

/// Drop a leading UTF-8 byte-order mark, which `str::trim` keeps.
pub fn strip_bom(body: &str) -> &str {
    body.strip_prefix('\u{FEFF}').unwrap_or(body)
}

/// Classify a text body using its declared content type.
pub fn classify(body: &str, content_type: &str) -> PlaylistKind {
    if !is_hls_content_type(content_type)
        && !strip_bom(body.trim_start()).trim_start().starts_with(PLAYLIST_MARKER)
    {
        return PlaylistKind::NotPlaylist;
    }

    if body.contains("#EXT-X-STREAM-INF") || body.contains("#EXT-X-MEDIA:") {
        PlaylistKind::Master
    } else {
        PlaylistKind::Media
    }
}

/// Classify a raw body.
///
/// Bodies that are not valid UTF-8 are only considered when the content
/// type claims a playlist, so binary segments are never copied for the check.
pub fn classify_bytes(body: &[u8], content_type: &str) -> PlaylistKind {
    match std::str::from_utf8(body) {
        Ok(text) => classify(text, content_type),
        Err(_) if is_hls_content_type(content_type) => {
            classify(&String::from_utf8_lossy(body), content_type)
        }
        Err(_) => PlaylistKind::NotPlaylist,
    }
}

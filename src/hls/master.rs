//! Master playlist resolution.
//!
//! A master playlist is never rewritten itself. The proxy picks one variant,
//! fetches it and keeps going until it reaches a media playlist, which is
//! what the client finally receives. Nested masters are followed up to a
//! configured depth.

use super::classify::{PlaylistKind, classify, strip_bom};
use super::media::rewrite_media;
use super::url_resolver::{compute_base, resolve};
use crate::error::{ProxyError, Result};
use crate::fetch::ContentFetcher;
use crate::metrics;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};

/// A variant stream declared by `#EXT-X-STREAM-INF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// URI as written in the playlist, not yet resolved.
    pub uri: String,
    /// Declared `BANDWIDTH`, 0 when absent.
    pub bandwidth: u64,
}

/// Pick the highest-bandwidth `#EXT-X-STREAM-INF` variant.
///
/// Ties go to the variant listed last.
pub fn best_stream_variant(body: &str) -> Option<Variant> {
    let lines: Vec<&str> = body.lines().map(str::trim).collect();
    let mut best: Option<Variant> = None;
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;
        if !line.starts_with("#EXT-X-STREAM-INF") {
            continue;
        }

        let bandwidth = parse_bandwidth(line).unwrap_or(0);
        let Some(offset) = lines[idx..]
            .iter()
            .position(|next| !next.is_empty() && !next.starts_with('#'))
        else {
            break;
        };
        let uri = lines[idx + offset];
        // The URI belongs to this tag only, resume after it
        idx += offset + 1;

        if best.as_ref().is_none_or(|b| bandwidth >= b.bandwidth) {
            best = Some(Variant {
                uri: uri.to_string(),
                bandwidth,
            });
        }
    }

    best
}

/// First URI line that looks like a playlist, for masters without usable
/// `#EXT-X-STREAM-INF` blocks.
pub fn fallback_variant(body: &str) -> Option<&str> {
    body.lines().map(str::trim).find(|line| {
        !line.is_empty()
            && !line.starts_with('#')
            && (line.ends_with(".m3u8") || line.contains(".m3u8?"))
    })
}

/// Absolute URL of the variant to follow from a master playlist fetched
/// from `source_url`.
pub fn select_variant(source_url: &str, body: &str) -> Option<String> {
    let base = compute_base(source_url);
    let body = strip_bom(body);

    if let Some(variant) = best_stream_variant(body) {
        debug!(
            "Selected variant {} (BANDWIDTH={}) from {}",
            variant.uri, variant.bandwidth, source_url
        );
        return Some(resolve(&base, &variant.uri));
    }

    fallback_variant(body).map(|uri| {
        debug!("Selected fallback variant {} from {}", uri, source_url);
        resolve(&base, uri)
    })
}

/// Value of the `BANDWIDTH` attribute, ignoring `AVERAGE-BANDWIDTH`.
fn parse_bandwidth(line: &str) -> Option<u64> {
    const ATTR: &str = "BANDWIDTH=";

    let (_, attrs) = line.split_once(':')?;
    let mut from = 0;
    while let Some(pos) = attrs[from..].find(ATTR) {
        let start = from + pos;
        let value_start = start + ATTR.len();
        if start == 0 || attrs.as_bytes()[start - 1] == b',' {
            let value = &attrs[value_start..];
            let end = value
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(value.len());
            return value[..end].parse().ok();
        }
        from = value_start;
    }
    None
}

/// One state of the resolution chain: a playlist body together with the URL
/// it was fetched from and how many masters deep it sits.
#[derive(Debug, Clone)]
struct ResolveStep {
    depth: u32,
    source_url: String,
    body: String,
}

/// Resolves fetched playlists into the media playlist served to the client.
///
/// One resolver serves one inbound request. Fetches run strictly one after
/// another; alternative variants are never prefetched.
pub struct PlaylistResolver<'a> {
    fetcher: &'a ContentFetcher,
    inbound: &'a HeaderMap,
    max_depth: u32,
}

impl<'a> PlaylistResolver<'a> {
    pub fn new(fetcher: &'a ContentFetcher, inbound: &'a HeaderMap, max_depth: u32) -> Self {
        Self {
            fetcher,
            inbound,
            max_depth,
        }
    }

    /// Route a classified body to the matching rewriter.
    ///
    /// A body that is not a playlist is still rewritten as a media playlist.
    /// Callers that want pass-through must check the kind first.
    pub async fn dispatch(
        &self,
        source_url: &str,
        body: String,
        kind: PlaylistKind,
        depth: u32,
    ) -> Result<String> {
        match kind {
            PlaylistKind::Master => self.resolve_master(source_url, body, depth).await,
            PlaylistKind::Media | PlaylistKind::NotPlaylist => {
                metrics::record_resolution_depth(depth);
                Ok(rewrite_media(source_url, &body))
            }
        }
    }

    /// Follow a master playlist down to a rewritten media playlist.
    ///
    /// # Errors
    /// - [`ProxyError::RecursionLimit`] once `depth` exceeds the configured
    ///   maximum, checked before any fetch at that depth
    /// - [`ProxyError::Fetch`] if any variant fetch fails
    pub async fn resolve_master(
        &self,
        source_url: &str,
        body: String,
        depth: u32,
    ) -> Result<String> {
        let mut step = ResolveStep {
            depth,
            source_url: source_url.to_string(),
            body,
        };

        loop {
            if step.depth > self.max_depth {
                warn!(
                    "Master playlist chain at {} exceeded depth {} (max {})",
                    step.source_url, step.depth, self.max_depth
                );
                return Err(ProxyError::RecursionLimit {
                    depth: step.depth,
                    max_depth: self.max_depth,
                });
            }

            let Some(variant_url) = select_variant(&step.source_url, &step.body) else {
                warn!(
                    "No variant found in master playlist {}, rewriting it as a media playlist",
                    step.source_url
                );
                metrics::record_resolution_depth(step.depth);
                return Ok(rewrite_media(&step.source_url, &step.body));
            };

            info!("Following variant {} (depth {})", variant_url, step.depth);
            let fetched = self.fetcher.fetch(&variant_url, self.inbound).await?;
            let body = fetched.text().into_owned();

            match classify(&body, &fetched.content_type) {
                PlaylistKind::Master => {
                    step = ResolveStep {
                        depth: step.depth + 1,
                        source_url: variant_url,
                        body,
                    };
                }
                kind => {
                    if kind == PlaylistKind::NotPlaylist {
                        // Upstreams mislabel variants often enough to keep going
                        warn!(
                            "Variant {} does not look like a playlist, rewriting it anyway",
                            variant_url
                        );
                    }
                    metrics::record_resolution_depth(step.depth + 1);
                    return Ok(rewrite_media(&variant_url, &body));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::ReqwestTransport;
    use crate::hls::url_resolver::to_proxy_path;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ContentFetcher {
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        ContentFetcher::new(Arc::new(transport), vec![])
    }

    fn playlist(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_raw(body, "application/vnd.apple.mpegurl")
    }

    #[test]
    fn tie_prefers_later_variant() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=500000\nfirst.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=500000\nsecond.m3u8\n";
        let best = best_stream_variant(body).unwrap();
        assert_eq!(best.uri, "second.m3u8");
        assert_eq!(best.bandwidth, 500000);
    }

    #[test]
    fn highest_bandwidth_wins() {
        let body = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=300000,RESOLUTION=640x360\nlow/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=1920x1080\nhigh/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=1280x720\nmid/index.m3u8\n";
        assert_eq!(
            select_variant("https://cdn.example.com/show/master.m3u8", body).as_deref(),
            Some("https://cdn.example.com/show/high/index.m3u8")
        );
    }

    #[test]
    fn average_bandwidth_is_not_bandwidth() {
        let body = "#EXT-X-STREAM-INF:AVERAGE-BANDWIDTH=9000000,BANDWIDTH=100\na.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=200,AVERAGE-BANDWIDTH=1\nb.m3u8";
        let best = best_stream_variant(body).unwrap();
        assert_eq!(best.uri, "b.m3u8");
        assert_eq!(best.bandwidth, 200);
    }

    #[test]
    fn missing_bandwidth_counts_as_zero() {
        let body = "#EXT-X-STREAM-INF:RESOLUTION=1x1\nnone.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=1\none.m3u8\n#EXT-X-STREAM-INF:CODECS=\"avc1\"\nlater.m3u8";
        assert_eq!(best_stream_variant(body).unwrap().uri, "one.m3u8");

        let body = "#EXT-X-STREAM-INF:RESOLUTION=1x1\nonly.m3u8\n";
        assert_eq!(
            best_stream_variant(body),
            Some(Variant {
                uri: "only.m3u8".to_string(),
                bandwidth: 0
            })
        );
    }

    #[test]
    fn variant_uri_skips_blank_and_comment_lines() {
        let body = "#EXT-X-STREAM-INF:BANDWIDTH=10\n\n# note\n#EXT-X-PROGRAM-ID:1\n  video.m3u8  \n";
        assert_eq!(best_stream_variant(body).unwrap().uri, "video.m3u8");
    }

    #[test]
    fn consecutive_stream_inf_tags_do_not_share_a_uri() {
        let body = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=100000\n\
            #EXT-X-STREAM-INF:BANDWIDTH=900000\n\
            low.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=400000\n\
            mid.m3u8\n";
        assert_eq!(
            best_stream_variant(body),
            Some(Variant {
                uri: "mid.m3u8".to_string(),
                bandwidth: 400000
            })
        );
    }

    #[test]
    fn byte_order_mark_does_not_hide_variants() {
        let body = "\u{FEFF}#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=10\nv.m3u8\n";
        assert_eq!(
            select_variant("https://host/a/master.m3u8", body).as_deref(),
            Some("https://host/a/v.m3u8")
        );
    }

    #[test]
    fn stream_inf_without_uri_is_ignored() {
        assert_eq!(best_stream_variant("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=10\n"), None);
    }

    #[test]
    fn fallback_picks_first_playlist_line() {
        let body = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\",URI=\"audio.m3u8\"\nsegment.ts\nalt/index.m3u8?token=1\nlast.m3u8\n";
        assert_eq!(fallback_variant(body), Some("alt/index.m3u8?token=1"));
        assert_eq!(
            select_variant("https://host/x/master.m3u8", body).as_deref(),
            Some("https://host/x/alt/index.m3u8?token=1")
        );
    }

    #[test]
    fn no_variant_at_all() {
        let body = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,URI=\"audio.m3u8\"\n";
        assert_eq!(select_variant("https://host/master.m3u8", body), None);
    }

    #[tokio::test]
    async fn resolves_master_to_rewritten_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/show/hd/index.m3u8"))
            .respond_with(playlist("#EXTM3U\n#EXTINF:6,\nseg0.ts\n"))
            .expect(1)
            .mount(&server)
            .await;

        let source = format!("{}/show/master.m3u8", server.uri());
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=100\nsd/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=900\nhd/index.m3u8\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let resolver = PlaylistResolver::new(&fetcher, &inbound, 5);
        let out = resolver
            .resolve_master(&source, master.to_string(), 0)
            .await
            .unwrap();

        let expected_segment = to_proxy_path(&format!("{}/show/hd/seg0.ts", server.uri()));
        assert_eq!(out, format!("#EXTM3U\n#EXTINF:6,\n{expected_segment}\n"));
    }

    #[tokio::test]
    async fn nested_master_resolves_against_its_own_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/b/inner.m3u8"))
            .respond_with(playlist(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nc/media.m3u8\n",
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/b/c/media.m3u8"))
            .respond_with(playlist("#EXTM3U\n#EXTINF:2,\npart.ts"))
            .expect(1)
            .mount(&server)
            .await;

        let source = format!("{}/a/outer.m3u8", server.uri());
        let outer = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nb/inner.m3u8\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let out = PlaylistResolver::new(&fetcher, &inbound, 5)
            .dispatch(&source, outer.to_string(), PlaylistKind::Master, 0)
            .await
            .unwrap();

        let expected_segment = to_proxy_path(&format!("{}/a/b/c/part.ts", server.uri()));
        assert_eq!(out, format!("#EXTM3U\n#EXTINF:2,\n{expected_segment}"));
    }

    #[tokio::test]
    async fn depth_beyond_limit_fails_before_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(playlist("#EXTM3U\nseg.ts\n"))
            .expect(0)
            .mount(&server)
            .await;

        let source = format!("{}/master.m3u8", server.uri());
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let err = PlaylistResolver::new(&fetcher, &inbound, 5)
            .resolve_master(&source, master.to_string(), 6)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProxyError::RecursionLimit {
                depth: 6,
                max_depth: 5
            }
        ));
    }

    #[tokio::test]
    async fn self_referencing_master_hits_recursion_limit() {
        let server = MockServer::start().await;
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nloop.m3u8\n";
        Mock::given(method("GET"))
            .and(path("/loop.m3u8"))
            .respond_with(playlist(master))
            .expect(3)
            .mount(&server)
            .await;

        let source = format!("{}/loop.m3u8", server.uri());
        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let err = PlaylistResolver::new(&fetcher, &inbound, 2)
            .resolve_master(&source, master.to_string(), 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProxyError::RecursionLimit {
                depth: 3,
                max_depth: 2
            }
        ));
    }

    #[tokio::test]
    async fn non_playlist_variant_is_rewritten_anyway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("seg0.ts\nseg1.ts\n", "text/plain"),
            )
            .mount(&server)
            .await;

        let source = format!("{}/master.m3u8", server.uri());
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv/index.m3u8\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let out = PlaylistResolver::new(&fetcher, &inbound, 5)
            .resolve_master(&source, master.to_string(), 0)
            .await
            .unwrap();

        assert_eq!(
            out,
            format!(
                "{}\n{}\n",
                to_proxy_path(&format!("{}/v/seg0.ts", server.uri())),
                to_proxy_path(&format!("{}/v/seg1.ts", server.uri()))
            )
        );
    }

    #[tokio::test]
    async fn variant_fetch_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let source = format!("{}/master.m3u8", server.uri());
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nmissing.m3u8\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let err = PlaylistResolver::new(&fetcher, &inbound, 5)
            .resolve_master(&source, master.to_string(), 0)
            .await
            .unwrap_err();

        match err {
            ProxyError::Fetch(FetchError::Status { url, status, excerpt }) => {
                assert_eq!(url, format!("{}/missing.m3u8", server.uri()));
                assert_eq!(status.as_u16(), 404);
                assert_eq!(excerpt, "gone");
            }
            other => panic!("expected fetch status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn master_without_variants_is_rewritten_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(playlist("#EXTM3U\n"))
            .expect(0)
            .mount(&server)
            .await;

        let source = format!("{}/audio/master.m3u8", server.uri());
        let master = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",URI=\"en.m3u8\"\n";

        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let out = PlaylistResolver::new(&fetcher, &inbound, 5)
            .resolve_master(&source, master.to_string(), 0)
            .await
            .unwrap();

        assert_eq!(out, master);
    }

    #[tokio::test]
    async fn media_dispatch_does_not_fetch() {
        let fetcher = fetcher();
        let inbound = HeaderMap::new();
        let out = PlaylistResolver::new(&fetcher, &inbound, 0)
            .dispatch(
                "https://host/path/live.m3u8",
                "#EXTM3U\nseg0.ts\n".to_string(),
                PlaylistKind::Media,
                7,
            )
            .await
            .unwrap();

        assert_eq!(
            out,
            format!("#EXTM3U\n{}\n", to_proxy_path("https://host/path/seg0.ts"))
        );
    }
}

//! HLS playlist handling: classification, URL rewriting and master
//! playlist resolution.

pub mod classify;
pub mod master;
pub mod media;
pub mod url_resolver;

pub use classify::{PlaylistKind, classify, classify_bytes};
pub use master::{PlaylistResolver, select_variant};
pub use media::rewrite_media;
pub use url_resolver::{compute_base, decode_path, resolve, to_proxy_path};

pub mod config;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod metrics;
pub mod server;

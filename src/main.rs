use hls_proxy::{config::Config, server};
use tracing::{Level, error, info};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // Setup logging, DEBUG=true raises the level
    let level = match &config {
        Ok(c) if c.debug => Level::DEBUG,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting hls-proxy v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Max recursion {}, cache TTL {}s, {} User-Agent(s)",
        config.max_recursion,
        config.cache_ttl_secs,
        config.user_agents.len()
    );

    if let Err(e) = server::start(config).await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
}

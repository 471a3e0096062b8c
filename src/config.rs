use crate::fetch::DEFAULT_USER_AGENT;
use std::env;
use std::str::FromStr;
use tracing::warn;

/// Default `Cache-Control` max-age and pre-flight max-age, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86400;
/// Default number of nested master playlists followed per request.
pub const DEFAULT_MAX_RECURSION: u32 = 5;
/// Default per-fetch upstream timeout, in seconds.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Application configuration loaded from environment variables.
///
/// Built once at start-up and handed to the fetcher and resolver; nothing
/// below the server reads the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Raise the log level from INFO to DEBUG
    pub debug: bool,
    /// Max-age for proxied responses and CORS pre-flight caching
    pub cache_ttl_secs: u64,
    /// Deepest master playlist nesting followed before giving up
    pub max_recursion: u32,
    /// User-Agent pool, one picked at random per upstream request
    pub user_agents: Vec<String>,
    /// Timeout for each upstream request
    pub upstream_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            debug: false,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_recursion: DEFAULT_MAX_RECURSION,
            user_agents: vec![DEFAULT_USER_AGENT.to_string()],
            upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional. Unparseable numbers fall back to their
    /// defaults, except `PORT` which must be valid when set.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| format!("PORT must be a valid port number, got {raw:?}: {e}"))?,
            Err(_) => defaults.port,
        };

        let debug = env::var("DEBUG").map(|v| parse_flag(&v)).unwrap_or(false);

        let cache_ttl_secs = parse_or("CACHE_TTL", defaults.cache_ttl_secs);
        let max_recursion = parse_or("MAX_RECURSION", defaults.max_recursion);
        let upstream_timeout_secs =
            parse_or("UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout_secs);

        let user_agents = parse_user_agents(env::var("USER_AGENTS").ok().as_deref());

        Ok(Config {
            port,
            debug,
            cache_ttl_secs,
            max_recursion,
            user_agents,
            upstream_timeout_secs,
        })
    }
}

/// Parse the `USER_AGENTS` JSON array.
///
/// Missing, malformed or empty input yields the single default User-Agent.
pub fn parse_user_agents(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return vec![DEFAULT_USER_AGENT.to_string()];
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => {
            let agents: Vec<String> = list
                .into_iter()
                .map(|ua| ua.trim().to_string())
                .filter(|ua| !ua.is_empty())
                .collect();
            if agents.is_empty() {
                warn!("USER_AGENTS is empty, using the default User-Agent");
                vec![DEFAULT_USER_AGENT.to_string()]
            } else {
                agents
            }
        }
        Err(e) => {
            warn!("USER_AGENTS is not a JSON array of strings ({}), using the default", e);
            vec![DEFAULT_USER_AGENT.to_string()]
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

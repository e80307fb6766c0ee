use crate::error::{AppError, Result};

pub const FEED_API_URL: &str = "https://v3.football.api-sports.io";

/// Feed status strings (lowercased) that mean the score is final.
/// Anything else is treated as not ready.
pub const VALID_COMPLETE_STATUSES: &[&str] = &["complete", "finished", "ft", "full-time", "ended"];

/// Backoff between feed retries in milliseconds. One retry per entry.
pub const FEED_RETRY_BACKOFF_MS: &[u64] = &[250, 500, 1000];

/// Lifetime of an entry in the per-run result cache (seconds).
/// A run is bounded by max_matches * per_match_timeout, so in practice entries
/// live for the whole run and never leak into the next one.
pub const RESULT_CACHE_TTL_SECS: u64 = 600;

/// Default number of unique matches settled per invocation.
pub const DEFAULT_MAX_MATCHES: usize = 10;

/// Default wall-clock budget for one match lookup (all tolerated dates).
pub const DEFAULT_MATCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Json,
    Sqlite,
}

impl std::str::FromStr for LedgerBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" | "file" => Ok(LedgerBackend::Json),
            "sqlite" | "db" => Ok(LedgerBackend::Sqlite),
            other => Err(AppError::Config(format!(
                "LEDGER_BACKEND must be 'json' or 'sqlite', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub ledger_backend: LedgerBackend,
    /// JSON ledger file (LEDGER_PATH)
    pub ledger_path: String,
    /// SQLite ledger database (DB_PATH)
    pub db_path: String,
    pub feed_api_url: String,
    pub feed_api_key: String,
    pub api_port: u16,
    /// Unique matches settled per invocation (RECONCILE_MAX_MATCHES)
    pub max_matches: usize,
    /// Per-match lookup budget in seconds (RECONCILE_MATCH_TIMEOUT_SECS)
    pub match_timeout_secs: u64,
    /// Simultaneous feed lookups (FEED_CONCURRENCY)
    pub feed_concurrency: usize,
    /// Timeout of a single HTTP call to the feed (FEED_HTTP_TIMEOUT_SECS)
    pub feed_http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            ledger_backend: std::env::var("LEDGER_BACKEND")
                .unwrap_or_else(|_| "json".to_string())
                .parse()?,
            ledger_path: std::env::var("LEDGER_PATH")
                .unwrap_or_else(|_| "predictions.json".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "ledger.db".to_string()),
            feed_api_url: std::env::var("FEED_API_URL")
                .unwrap_or_else(|_| FEED_API_URL.to_string()),
            feed_api_key: std::env::var("FEED_API_KEY").unwrap_or_default(),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            max_matches: std::env::var("RECONCILE_MAX_MATCHES")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_MATCHES),
            match_timeout_secs: std::env::var("RECONCILE_MATCH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_MATCH_TIMEOUT_SECS),
            feed_concurrency: std::env::var("FEED_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(3),
            feed_http_timeout_secs: std::env::var("FEED_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10),
        })
    }
}

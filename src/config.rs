use crate::error::{AppError, Result};

pub const API_BASE_URL: &str = "https://eapi.stalcraft.net";
pub const AUTH_URL: &str = "https://exbo.net/oauth/token";
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_REGION: &str = "ru";

/// Upstream listing calls allowed per rolling window. Kept below the published
/// ceiling of 200/min.
pub const REQUESTS_PER_MIN: usize = 190;

/// Length of the rate-limit window (seconds).
pub const RATE_WINDOW_SECS: u64 = 60;

/// Bearer token lifetime as issued by the auth server (seconds).
pub const TOKEN_LIFETIME_SECS: u64 = 3600;

/// Refresh the token once less than this much lifetime remains (seconds).
pub const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Lot-count hint for the first fetch after a filter is created.
pub const WIDE_LOT_LIMIT: u32 = 200;

/// Lot-count hint for steady-state polling.
pub const NARROW_LOT_LIMIT: u32 = 10;

/// Lots ending further out than this use the buyout price, if any (minutes).
pub const BUYOUT_WINDOW_MINUTES: f64 = 10.0;

/// Sleep when no filter has notifications enabled (seconds).
pub const IDLE_SLEEP_SECS: u64 = 10;

/// Pause between full scheduling passes (seconds).
pub const CYCLE_PAUSE_SECS: u64 = 1;

/// Pause after a failed item fetch before moving on (seconds).
pub const ERROR_PAUSE_SECS: u64 = 2;

/// HTTP timeouts (seconds).
pub const AUTH_TIMEOUT_SECS: u64 = 10;
pub const FETCH_TIMEOUT_SECS: u64 = 20;
pub const DELIVERY_TIMEOUT_SECS: u64 = 15;

/// Dedup records are kept this long after their lot has ended (seconds).
pub const DEDUP_RETENTION_SECS: i64 = 3600;

/// How often the scheduler prunes the dedup ledger (seconds).
pub const PRUNE_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub auth_url: String,
    pub region: String,
    pub client_id: String,
    pub client_secret: String,
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Listing calls per rolling minute (REQUESTS_PER_MIN)
    pub requests_per_min: usize,
    /// Lot-count hint while a filter awaits its first check (WIDE_LOT_LIMIT)
    pub wide_lot_limit: u32,
    /// Lot-count hint during normal polling (NARROW_LOT_LIMIT)
    pub narrow_lot_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_base_url: std::env::var("API_BASE_URL")
                .unwrap_or_else(|_| API_BASE_URL.to_string()),
            auth_url: std::env::var("AUTH_URL").unwrap_or_else(|_| AUTH_URL.to_string()),
            region: std::env::var("REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            telegram_token: required("TELEGRAM_TOKEN")?,
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| TELEGRAM_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH")
                .unwrap_or_else(|_| "auction_watch.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            requests_per_min: std::env::var("REQUESTS_PER_MIN")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(REQUESTS_PER_MIN),
            wide_lot_limit: std::env::var("WIDE_LOT_LIMIT")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(WIDE_LOT_LIMIT),
            narrow_lot_limit: std::env::var("NARROW_LOT_LIMIT")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(NARROW_LOT_LIMIT),
        })
    }
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Config(format!("{name} must be set"))),
    }
}

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// What the decision engine does when a request names a resource that is not
/// in the catalog (or is inactive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownResourcePolicy {
    /// Let the request through; other layers stay responsible.
    #[default]
    Allow,
    /// Refuse the request with `FORBIDDEN`.
    Deny,
}

impl FromStr for UnknownResourcePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" | "open" => Ok(UnknownResourcePolicy::Allow),
            "deny" | "closed" => Ok(UnknownResourcePolicy::Deny),
            other => Err(format!("unknown resource policy '{other}'")),
        }
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database connection URL (e.g. sqlite://bastion.db, postgres://...)
    pub database_url: String,

    /// Server host (default: 127.0.0.1)
    pub server_host: String,

    /// Server port (default: 3000)
    pub server_port: u16,

    /// Environment: development, production, test
    pub environment: String,

    /// TTL of the catalog read-through cache in seconds (default: 300)
    pub catalog_cache_ttl_secs: u64,

    /// Redis URL for caching (optional, e.g. redis://127.0.0.1:6379)
    pub redis_url: Option<String>,

    /// Base URL of the tenant/plan service (optional)
    pub plan_service_url: Option<String>,

    /// Timeout for a single plan-feature lookup in milliseconds (default: 2000)
    pub feature_lookup_timeout_ms: u64,

    /// Behaviour for resources absent from the catalog (default: allow)
    pub unknown_resource_policy: UnknownResourcePolicy,

    /// Fixed UTC offset for time-restricted resources; `None` uses server local time
    pub access_tz_offset_minutes: Option<i32>,

    /// Log output format (default: text)
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://bastion.db?mode=rwc".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            catalog_cache_ttl_secs: 300,
            redis_url: None,
            plan_service_url: None,
            feature_lookup_timeout_ms: 2000,
            unknown_resource_policy: UnknownResourcePolicy::Allow,
            access_tz_offset_minutes: None,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (with .env support).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let unknown_resource_policy = match std::env::var("UNKNOWN_RESOURCE_POLICY") {
            Ok(raw) => raw.parse::<UnknownResourcePolicy>()?,
            Err(_) => defaults.unknown_resource_policy,
        };

        let log_format = match std::env::var("LOG_FORMAT") {
            Ok(raw) => raw.parse::<LogFormat>()?,
            Err(_) => defaults.log_format,
        };

        Ok(Config {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            server_host: std::env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            catalog_cache_ttl_secs: std::env::var("CATALOG_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.catalog_cache_ttl_secs),
            redis_url: std::env::var("REDIS_URL").ok(),
            plan_service_url: std::env::var("PLAN_SERVICE_URL").ok(),
            feature_lookup_timeout_ms: std::env::var("FEATURE_LOOKUP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.feature_lookup_timeout_ms),
            unknown_resource_policy,
            access_tz_offset_minutes: std::env::var("ACCESS_TZ_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok()),
            log_format,
        })
    }

    /// Configuration for tests: in-memory SQLite, random port, no remote collaborators.
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            server_port: 0,
            environment: "test".to_string(),
            ..Config::default()
        }
    }

    /// Check if running in development mode.
    pub fn is_dev(&self) -> bool {
        self.environment == "development"
    }

    /// Get the full server address.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_secs)
    }

    pub fn feature_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.feature_lookup_timeout_ms)
    }
}

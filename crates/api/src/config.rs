//! Application configuration loaded from environment variables.

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL URL; the in-memory store is used when unset
/// - `DB_MAX_CONNECTIONS` — pool size (default: `5`)
/// - `SEED_DEMO_DATA` — load the demo catalog at start-up (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub seed_demo_data: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: env_or("HOST", DEFAULT_HOST),
            port: parsed_env("PORT").unwrap_or(DEFAULT_PORT),
            log_level: env_or("RUST_LOG", DEFAULT_LOG_LEVEL),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            db_max_connections: parsed_env("DB_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            seed_demo_data: std::env::var("SEED_DEMO_DATA")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database_url: None,
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            seed_demo_data: false,
        }
    }
}

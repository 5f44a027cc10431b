use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("FEED_DEFAULT_LIMIT ({default}) must be between 1 and FEED_MAX_LIMIT ({max})")]
    DefaultLimit { default: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cors_origin: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub default_limit: u64,
    pub max_limit: u64,
    /// Zero disables the ranking cache.
    pub cache_ttl: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: 25,
            max_limit: 100,
            cache_ttl: Duration::ZERO,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let feed = FeedConfig {
            default_limit: parse(&lookup, "FEED_DEFAULT_LIMIT", 25)?,
            max_limit: parse(&lookup, "FEED_MAX_LIMIT", 100)?,
            cache_ttl: Duration::from_secs(parse(&lookup, "FEED_CACHE_TTL_SECS", 0)?),
        };
        if feed.default_limit == 0 || feed.default_limit > feed.max_limit {
            return Err(ConfigError::DefaultLimit {
                default: feed.default_limit,
                max: feed.max_limit,
            });
        }

        let log_format = string("LOG_FORMAT", "pretty");
        let json = match log_format.as_str() {
            "json" => true,
            "pretty" | "text" => false,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: log_format,
                })
            }
        };

        Ok(Config {
            database: DatabaseConfig {
                url: string("DATABASE_URL", "tally.db"),
                max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 8)?,
            },
            server: ServerConfig {
                bind_addr: string("BIND_ADDR", "0.0.0.0:8080"),
                cors_origin: string("CORS_ORIGIN", "http://localhost:1313"),
            },
            log: LogConfig {
                level: string("LOG_LEVEL", "info"),
                json,
            },
            feed,
        })
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

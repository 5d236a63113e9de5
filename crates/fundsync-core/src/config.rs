//! Process configuration, read once from the environment into immutable structs.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://cdn.core3-dev.ajbbuild.uk/interview";
pub const DEFAULT_SOURCE_IDS: [&str; 4] = ["BYW8RV9", "BYW8RX1", "BYW8VG2", "BN0S2V9"];
pub const DEFAULT_PRELOAD_CRON: &str = "0 0 6 * * *";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Full connection URL; when set it wins over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl: bool,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Connection target safe to log.
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl", &self.ssl)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub base_url: String,
    pub source_ids: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub preload_cron: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub web: WebConfig,
    pub scheduler: SchedulerConfig,
    pub auto_migrate: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            host: lookup("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_var(&lookup, "DB_PORT", 5432, "a TCP port")?,
            username: lookup("DB_USERNAME").unwrap_or_else(|| "postgres".to_string()),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            database: lookup("DB_NAME").unwrap_or_else(|| "funds".to_string()),
            ssl: parse_flag(&lookup, "DB_SSL", false)?,
            max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", 5, "a positive integer")?
                .max(1),
        };

        let source_ids = match lookup("FUND_SOURCE_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => DEFAULT_SOURCE_IDS.iter().map(|s| s.to_string()).collect(),
        };
        let timeout_secs = match lookup("FUNDSYNC_HTTP_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|_| {
                ConfigError::Invalid {
                    key: "FUNDSYNC_HTTP_TIMEOUT_SECS",
                    value: raw.clone(),
                    expected: "a number of seconds",
                }
            })?),
            _ => None,
        };
        let feed = FeedConfig {
            base_url: lookup("BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            source_ids,
            timeout_secs,
            user_agent: lookup("FUNDSYNC_USER_AGENT")
                .unwrap_or_else(|| format!("fundsync/{}", env!("CARGO_PKG_VERSION"))),
        };

        Ok(Self {
            database,
            feed,
            web: WebConfig {
                port: parse_var(&lookup, "PORT", 3000, "a TCP port")?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_flag(&lookup, "FUNDSYNC_SCHEDULER_ENABLED", false)?,
                preload_cron: lookup("FUNDSYNC_PRELOAD_CRON")
                    .unwrap_or_else(|| DEFAULT_PRELOAD_CRON.to_string()),
            },
            auto_migrate: parse_flag(&lookup, "FUNDSYNC_AUTO_MIGRATE", true)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected,
        }),
        _ => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            expected: "a boolean flag",
        }),
    }
}

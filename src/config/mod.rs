//! Server configuration: compiled-in defaults, an optional `config.json`,
//! `RAMPART__`-prefixed environment overrides, and the named deployment
//! variables (`JWT_SECRET`, `INSTANCE_ID`, `REDIS_*`, `DB_*`), which always
//! win.

pub mod loader;

pub use loader::load;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port the HTTP/WebSocket listener binds.
    pub port: u16,
    /// Stable identifier of this instance; a fresh UUID when unset.
    pub instance_id: Option<String>,
    /// Path to the tile-map artifact; the built-in walled arena when unset.
    pub map_path: Option<String>,
    /// Comma-separated allowed CORS origins, or `*`.
    pub cors_origins: String,
    /// HS256 signing secret shared with the user service.
    pub jwt_secret: String,
    pub server: ServerTuning,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            instance_id: None,
            map_path: None,
            cors_origins: "*".to_string(),
            jwt_secret: String::new(),
            server: ServerTuning::default(),
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTuning {
    /// Gateway keepalive ping period in seconds.
    pub keepalive_secs: u64,
    /// Grace window before a dropped player is reaped, in seconds.
    pub reaper_grace_secs: u64,
}

impl Default for ServerTuning {
    fn default() -> Self {
        Self {
            keepalive_secs: 30,
            reaper_grace_secs: 20,
        }
    }
}

/// Connection block for the shared store deployment adapter. The in-process
/// backend ignores it; it is carried so a Redis-backed build reads the same
/// configuration surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub addr: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
    pub tls: bool,
}

/// Connection block for the external user database, consumed by the user
/// service collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level directive; `RUST_LOG` (or "info") applies when unset.
    pub level: Option<LogLevel>,
    pub format: LogFormat,
    pub enable_file_logging: bool,
    pub dir: String,
    pub filename: String,
    /// "hourly", "daily", or "never".
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            enable_file_logging: false,
            dir: "logs".to_string(),
            filename: "server.log".to_string(),
            rotation: "daily".to_string(),
        }
    }
}

/// Hard requirements that must hold before the server starts.
pub fn validate(config: &Config) -> Result<(), String> {
    if config.jwt_secret.is_empty() {
        return Err("jwt_secret is required (set JWT_SECRET)".to_string());
    }
    if config.server.keepalive_secs == 0 {
        return Err("server.keepalive_secs must be positive".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cors_origins, "*");
        assert_eq!(config.server.keepalive_secs, 30);
        assert_eq!(config.server.reaper_grace_secs, 20);
        assert_eq!(config.logging.rotation, "daily");
        assert!(config.instance_id.is_none());
    }

    #[test]
    fn serialization_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, config.port);
        assert_eq!(back.server.reaper_grace_secs, config.server.reaper_grace_secs);
    }

    #[test]
    fn validation_requires_secret() {
        let mut config = Config::default();
        assert!(validate(&config).is_err());
        config.jwt_secret = "s".into();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_json_fills_from_defaults() {
        let config: Config = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.server.keepalive_secs, 30);
    }
}

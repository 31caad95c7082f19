//! Configuration management for hive-server
//!
//! Defaults are compiled in, `config.toml` overrides them, and the
//! environment overrides the file. The resulting [`Config`] is immutable and
//! shared by `Arc` with every handler.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

pub const MAX_BLOCK_NUM_DIFF: i64 = 10;
pub const MAX_DB_ROW_RESULTS: i64 = 100_000;
pub const DEFAULT_STEEMD_URL: &str = "https://api.steemit.com";
pub const DEFAULT_PORT: u16 = 8081;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub steemd: SteemdConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_block_num_diff")]
    pub max_block_num_diff: i64,
    #[serde(default = "default_max_db_row_results")]
    pub max_db_row_results: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SteemdConfig {
    #[serde(default = "default_steemd_url")]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_block_num_diff: default_max_block_num_diff(),
            max_db_row_results: default_max_db_row_results(),
        }
    }
}

impl Default for SteemdConfig {
    fn default() -> Self {
        Self {
            url: default_steemd_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Row cap for database queries. One more than the largest result set a
    /// method may return, so callers can tell a full page from a truncated one.
    pub fn db_query_limit(&self) -> i64 {
        self.limits.max_db_row_results.saturating_add(1)
    }

    /// Override file values with `DATABASE_URL`, `STEEMD_URL` and `PORT`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = lookup("STEEMD_URL") {
            self.steemd.url = url;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("PORT {:?}: {}", port, e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "DATABASE_URL (or database.url in config.toml) must be set".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.limits.max_block_num_diff < 0 {
            return Err(ConfigError::Invalid(
                "limits.max_block_num_diff must not be negative".to_string(),
            ));
        }
        if !(0..i64::MAX).contains(&self.limits.max_db_row_results) {
            return Err(ConfigError::Invalid(format!(
                "limits.max_db_row_results must be between 0 and {}",
                i64::MAX - 1
            )));
        }
        if self.steemd.url.trim().is_empty() {
            return Err(ConfigError::Invalid("steemd.url must be set".to_string()));
        }
        Ok(())
    }
}

/// Load configuration from `path` (or `./config.toml`), then the process
/// environment, and validate the result.
///
/// A missing default `config.toml` is not an error; a missing explicit path is.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => String::new(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let mut config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        Config::from_toml_str(&config_str)?
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_block_num_diff() -> i64 {
    MAX_BLOCK_NUM_DIFF
}

fn default_max_db_row_results() -> i64 {
    MAX_DB_ROW_RESULTS
}

fn default_steemd_url() -> String {
    DEFAULT_STEEMD_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_hive_constants() {
        let config = Config::default();
        assert_eq!(config.limits.max_block_num_diff, 10);
        assert_eq!(config.limits.max_db_row_results, 100_000);
        assert_eq!(config.db_query_limit(), 100_001);
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.steemd.url, DEFAULT_STEEMD_URL);
        assert!(config.database.url.is_empty());
    }

    #[test]
    fn empty_database_url_is_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_toml_str(
            r#"
            [database]
            url = "postgresql://file/hive"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        config
            .apply_env(env(&[
                ("DATABASE_URL", "postgresql://env/hive"),
                ("PORT", "9100"),
            ]))
            .unwrap();

        assert_eq!(config.database.url, "postgresql://env/hive");
        assert_eq!(config.server.port, 9100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let mut config = Config::default();
        let result = config.apply_env(env(&[("PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [limits]
            max_block_num_diff = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_block_num_diff, 25);
        assert_eq!(config.limits.max_db_row_results, MAX_DB_ROW_RESULTS);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn row_limit_without_headroom_is_rejected() {
        let config = Config::from_toml_str(
            r#"
            [database]
            url = "postgresql://localhost/hive"

            [limits]
            max_db_row_results = 9223372036854775807
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.db_query_limit(), i64::MAX);
    }

    #[test]
    fn explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(missing.as_path())),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn negative_limit_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgresql://localhost/hive\"\n[limits]\nmax_block_num_diff = -1"
        )
        .unwrap();
        let config = Config::from_toml_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert!(config.validate().is_err());
    }
}

//! Runtime configuration loaded from `config.toml`.
//!
//! Precedence, highest first: command-line flags, the config file, built-in
//! defaults. Every section is optional, so an empty or missing file yields
//! the defaults.
//!
//! ```toml
//! max_workers = 10
//! cache_ttl = "15m"
//! scope_timeout = "2m"
//!
//! [aws]
//! profile = "prod"
//!
//! [llm]
//! model = "gpt-4-turbo-preview"
//!
//! [log]
//! level = "info"
//! format = "pretty"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL;
use crate::error::ConfigError;
use crate::platform;
use crate::scan::coordinator::{DEFAULT_MAX_WORKERS, DEFAULT_SCOPE_TIMEOUT};

const MAX_WORKERS_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_workers: usize,
    #[serde(with = "duration_str")]
    pub cache_ttl: Duration,
    #[serde(with = "duration_str")]
    pub scope_timeout: Duration,
    /// Snapshot database; defaults to `skyscan.db` in the data directory.
    pub database: Option<PathBuf>,
    pub aws: AwsConfig,
    pub azure: AzureConfig,
    pub llm: LlmConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_workers: DEFAULT_MAX_WORKERS,
            cache_ttl: DEFAULT_TTL,
            scope_timeout: DEFAULT_SCOPE_TIMEOUT,
            database: None,
            aws: AwsConfig::default(),
            azure: AzureConfig::default(),
            llm: LlmConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Path or name of the `aws` executable.
    pub cli: String,
    pub profile: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        AwsConfig {
            cli: "aws".to_string(),
            profile: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub cli: String,
    /// Falls back to the CLI's default subscription.
    pub subscription: Option<String>,
}

impl Default for AzureConfig {
    fn default() -> Self {
        AzureConfig {
            cli: "az".to_string(),
            subscription: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        platform::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing file at the default location is not an error; a missing
    /// file that was named explicitly is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Config::default()),
            },
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS_LIMIT {
            return Err(invalid(
                "max_workers",
                format!("must be between 1 and {MAX_WORKERS_LIMIT}"),
            ));
        }

        if self.scope_timeout.is_zero() {
            return Err(invalid("scope_timeout", "must be greater than zero"));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", "must be between 0 and 2"));
        }

        if self.llm.max_tokens == 0 {
            return Err(invalid("llm.max_tokens", "must be greater than zero"));
        }

        if self.llm.api_key_env.trim().is_empty() {
            return Err(invalid("llm.api_key_env", "must not be empty"));
        }

        for (field, cli) in [("aws.cli", &self.aws.cli), ("azure.cli", &self.azure.cli)] {
            if cli.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Durations written as `"15m"`, `"90s"`, `"1h 30m"`.
mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.llm.model, "gpt-4-turbo-preview");
    }

    #[test]
    fn durations_parse_from_strings() {
        let config = Config::parse("cache_ttl = \"5m\"\nscope_timeout = \"30s\"\n").unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.scope_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_ttl_is_allowed() {
        let config = Config::parse("cache_ttl = \"0s\"").unwrap();
        assert!(config.cache_ttl.is_zero());
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            "[aws]\nprofile = \"prod\"\n[azure]\nsubscription = \"sub-1\"\n[log]\nformat = \"json\"\n",
        )
        .unwrap();
        assert_eq!(config.aws.profile.as_deref(), Some("prod"));
        assert_eq!(config.aws.cli, "aws");
        assert_eq!(config.azure.subscription.as_deref(), Some("sub-1"));
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Config::parse("max_workers = 0"),
            Err(ConfigError::Invalid { field, .. }) if field == "max_workers"
        ));
        assert!(Config::parse("max_workers = 65").is_err());
        assert!(Config::parse("[llm]\ntemperature = 2.5").is_err());
        assert!(Config::parse("[llm]\nmax_tokens = 0").is_err());
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        assert!(matches!(
            Config::parse("cache_ttl = \"soon\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = 4").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}

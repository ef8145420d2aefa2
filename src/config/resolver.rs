//! Precedence resolution for service settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`TJ_DATA_DIR`, `TJ_LOG`)
//! 3. config.kdl (`--config`, `TJ_CONFIG`, or `~/.config/timejet/config.kdl`)
//! 4. Built-in defaults

use crate::config::TimejetConfig;
use crate::document::RetryPolicy;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "TJ_DATA_DIR";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TJ_CONFIG";

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TJ_LOG";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAIL_FROM: &str = "TimeJet <timejet@localhost>";
pub const DEFAULT_LOG_FILTER: &str = "timejet=info";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config file
    ConfigFile(PathBuf),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile(path) => write!(f, "file:{}", path.display()),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Explicit config file from `--config`
    pub config_path: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_root = Some(path.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Environment values consulted during resolution.
#[derive(Debug, Clone, Default)]
pub struct EnvValues {
    pub data_dir: Option<String>,
    pub config: Option<String>,
    pub log: Option<String>,
}

impl EnvValues {
    /// Read from the process environment. Empty values count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            data_dir: read(DATA_DIR_ENV),
            config: read(CONFIG_ENV),
            log: read(LOG_ENV),
        }
    }
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    /// Config file consulted (it may not exist)
    pub config_path: Option<Resolved<PathBuf>>,
    pub data_root: Resolved<PathBuf>,
    pub host: Resolved<String>,
    pub port: Resolved<u16>,
    pub mail_from: Resolved<String>,
    pub open_attempts: Resolved<u32>,
    pub open_initial_backoff_ms: Resolved<u64>,
    pub open_max_backoff_ms: Resolved<u64>,
    pub log_filter: Resolved<String>,
}

impl ResolvedConfig {
    pub fn data_root(&self) -> &Path {
        &self.data_root.value
    }

    /// Address to bind the HTTP service to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host.value, self.port.value)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.open_attempts.value,
            initial_backoff: Duration::from_millis(self.open_initial_backoff_ms.value),
            max_backoff: Duration::from_millis(self.open_max_backoff_ms.value),
        }
    }

    /// Check the resolved values as a whole.
    pub fn validate(&self) -> std::result::Result<(), String> {
        TimejetConfig {
            data_root: None,
            host: Some(self.host.value.clone()),
            port: Some(self.port.value),
            mail_from: None,
            open_attempts: Some(self.open_attempts.value),
            open_initial_backoff_ms: Some(self.open_initial_backoff_ms.value),
            open_max_backoff_ms: Some(self.open_max_backoff_ms.value),
            log_filter: None,
        }
        .validate()
    }
}

/// Default location of config.kdl.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("timejet").join("config.kdl"))
}

/// Default data root.
pub fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("timejet"))
        .unwrap_or_else(|| PathBuf::from(".timejet"))
}

fn pick<T>(
    cli: Option<T>,
    env: Option<(T, &str)>,
    file: Option<T>,
    file_path: &Path,
    default: T,
) -> Resolved<T> {
    if let Some(value) = cli {
        Resolved::new(value, ValueSource::CliFlag)
    } else if let Some((value, name)) = env {
        Resolved::new(value, ValueSource::EnvVar(name.to_string()))
    } else if let Some(value) = file {
        Resolved::new(value, ValueSource::ConfigFile(file_path.to_path_buf()))
    } else {
        Resolved::new(default, ValueSource::Default)
    }
}

/// Resolve settings from already-loaded inputs.
pub fn resolve_from(
    file: &TimejetConfig,
    file_path: Option<Resolved<PathBuf>>,
    overrides: &ConfigOverrides,
    env: &EnvValues,
) -> Result<ResolvedConfig> {
    let path = file_path
        .as_ref()
        .map(|p| p.value.clone())
        .unwrap_or_default();
    let defaults = RetryPolicy::default();

    let resolved = ResolvedConfig {
        data_root: pick(
            overrides.data_root.clone(),
            env.data_dir.clone().map(|d| (PathBuf::from(d), DATA_DIR_ENV)),
            file.data_root.clone(),
            &path,
            default_data_root(),
        ),
        host: pick(
            overrides.host.clone(),
            None,
            file.host.clone(),
            &path,
            DEFAULT_HOST.to_string(),
        ),
        port: pick(overrides.port, None, file.port, &path, DEFAULT_PORT),
        mail_from: pick(
            None,
            None,
            file.mail_from.clone(),
            &path,
            DEFAULT_MAIL_FROM.to_string(),
        ),
        open_attempts: pick(None, None, file.open_attempts, &path, defaults.max_attempts),
        open_initial_backoff_ms: pick(
            None,
            None,
            file.open_initial_backoff_ms,
            &path,
            defaults.initial_backoff.as_millis() as u64,
        ),
        open_max_backoff_ms: pick(
            None,
            None,
            file.open_max_backoff_ms,
            &path,
            defaults.max_backoff.as_millis() as u64,
        ),
        log_filter: pick(
            None,
            env.log.clone().map(|l| (l, LOG_ENV)),
            file.log_filter.clone(),
            &path,
            DEFAULT_LOG_FILTER.to_string(),
        ),
        config_path: file_path,
    };

    resolved.validate().map_err(Error::InvalidInput)?;
    Ok(resolved)
}

/// Resolve settings with full precedence chain.
///
/// An explicitly named config file must exist; the default location is
/// optional.
pub fn resolve_config(overrides: &ConfigOverrides, env: &EnvValues) -> Result<ResolvedConfig> {
    let file_path = if let Some(ref path) = overrides.config_path {
        Some(Resolved::new(path.clone(), ValueSource::CliFlag))
    } else if let Some(ref path) = env.config {
        Some(Resolved::new(PathBuf::from(path), ValueSource::EnvVar(CONFIG_ENV.to_string())))
    } else {
        default_config_path().map(|path| Resolved::new(path, ValueSource::Default))
    };

    let file = match &file_path {
        Some(path) if path.source != ValueSource::Default && !path.value.exists() => {
            return Err(Error::InvalidInput(format!(
                "config file not found: {}",
                path.value.display()
            )));
        }
        Some(path) => TimejetConfig::load(&path.value)?,
        None => TimejetConfig::new(),
    };
    file.validate().map_err(Error::InvalidInput)?;

    resolve_from(&file, file_path, overrides, env)
}

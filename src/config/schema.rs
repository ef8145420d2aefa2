//! KDL schema for config.kdl.
//!
//! This module provides:
//! - the [`TimejetConfig`] struct mirroring the file
//! - conversion to and from KDL documents
//! - validation and merging

use crate::Result;
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Service settings stored in config.kdl.
///
/// Every value is optional; unset values fall through to the environment
/// or built-in defaults during resolution.
///
/// # KDL Schema
///
/// ```kdl
/// data-root "/srv/timejet"
/// host "127.0.0.1"
/// port 5000
/// mail-from "TimeJet <timejet@example.com>"
/// open-attempts 5
/// open-initial-backoff-ms 100
/// open-max-backoff-ms 2000
/// log-filter "timejet=info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimejetConfig {
    /// Directory holding one subdirectory per tenant
    pub data_root: Option<PathBuf>,

    /// HTTP bind address
    pub host: Option<String>,

    /// HTTP port
    pub port: Option<u16>,

    /// Sender address for report mail
    pub mail_from: Option<String>,

    /// Attempts to open a locked document before giving up
    pub open_attempts: Option<u32>,

    pub open_initial_backoff_ms: Option<u64>,

    pub open_max_backoff_ms: Option<u64>,

    /// tracing-subscriber filter directive
    pub log_filter: Option<String>,
}

fn string_node(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

fn integer_node(doc: &KdlDocument, name: &str) -> Option<i128> {
    doc.get(name)?.entries().first()?.value().as_integer()
}

fn push_string(doc: &mut KdlDocument, name: &str, value: &str) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    doc.nodes_mut().push(node);
}

fn push_integer(doc: &mut KdlDocument, name: &str, value: i128) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::Integer(value)));
    doc.nodes_mut().push(node);
}

impl TimejetConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.port == Some(0) {
            return Err("port must be 1-65535, got 0".to_string());
        }
        if self.open_attempts == Some(0) {
            return Err("open-attempts must be at least 1".to_string());
        }
        if let (Some(initial), Some(max)) = (self.open_initial_backoff_ms, self.open_max_backoff_ms) {
            if initial > max {
                return Err(format!(
                    "open-initial-backoff-ms ({}) must not exceed open-max-backoff-ms ({})",
                    initial, max
                ));
            }
        }
        if let Some(ref host) = self.host {
            if host.trim().is_empty() {
                return Err("host must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Values of the wrong type or out of range are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            data_root: string_node(doc, "data-root").map(PathBuf::from),
            host: string_node(doc, "host"),
            port: integer_node(doc, "port").and_then(|i| u16::try_from(i).ok()),
            mail_from: string_node(doc, "mail-from"),
            open_attempts: integer_node(doc, "open-attempts").and_then(|i| u32::try_from(i).ok()),
            open_initial_backoff_ms: integer_node(doc, "open-initial-backoff-ms")
                .and_then(|i| u64::try_from(i).ok()),
            open_max_backoff_ms: integer_node(doc, "open-max-backoff-ms")
                .and_then(|i| u64::try_from(i).ok()),
            log_filter: string_node(doc, "log-filter"),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref root) = self.data_root {
            push_string(&mut doc, "data-root", &root.to_string_lossy());
        }
        if let Some(ref host) = self.host {
            push_string(&mut doc, "host", host);
        }
        if let Some(port) = self.port {
            push_integer(&mut doc, "port", port as i128);
        }
        if let Some(ref from) = self.mail_from {
            push_string(&mut doc, "mail-from", from);
        }
        if let Some(attempts) = self.open_attempts {
            push_integer(&mut doc, "open-attempts", attempts as i128);
        }
        if let Some(ms) = self.open_initial_backoff_ms {
            push_integer(&mut doc, "open-initial-backoff-ms", ms as i128);
        }
        if let Some(ms) = self.open_max_backoff_ms {
            push_integer(&mut doc, "open-max-backoff-ms", ms as i128);
        }
        if let Some(ref filter) = self.log_filter {
            push_string(&mut doc, "log-filter", filter);
        }

        doc
    }

    /// Load config from a file. A missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse()?;
        Ok(Self::from_kdl(&doc))
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TimejetConfig) {
        if other.data_root.is_some() {
            self.data_root = other.data_root.clone();
        }
        if other.host.is_some() {
            self.host = other.host.clone();
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.mail_from.is_some() {
            self.mail_from = other.mail_from.clone();
        }
        if other.open_attempts.is_some() {
            self.open_attempts = other.open_attempts;
        }
        if other.open_initial_backoff_ms.is_some() {
            self.open_initial_backoff_ms = other.open_initial_backoff_ms;
        }
        if other.open_max_backoff_ms.is_some() {
            self.open_max_backoff_ms = other.open_max_backoff_ms;
        }
        if other.log_filter.is_some() {
            self.log_filter = other.log_filter.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = TimejetConfig::default();
        assert_eq!(config.data_root, None);
        assert_eq!(config.port, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_port_zero() {
        let config = TimejetConfig {
            port: Some(0),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("port"));
    }

    #[test]
    fn test_config_validate_attempts() {
        let config = TimejetConfig {
            open_attempts: Some(0),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("open-attempts"));
    }

    #[test]
    fn test_config_validate_backoff_order() {
        let config = TimejetConfig {
            open_initial_backoff_ms: Some(500),
            open_max_backoff_ms: Some(100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_kdl_empty() {
        let doc = KdlDocument::new();
        assert_eq!(TimejetConfig::from_kdl(&doc), TimejetConfig::default());
    }

    #[test]
    fn test_config_from_kdl_full() {
        let kdl = r#"
            data-root "/srv/timejet"
            host "0.0.0.0"
            port 8080
            mail-from "TimeJet <timejet@example.com>"
            open-attempts 3
            open-initial-backoff-ms 50
            open-max-backoff-ms 400
            log-filter "timejet=debug"
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = TimejetConfig::from_kdl(&doc);

        assert_eq!(config.data_root, Some(PathBuf::from("/srv/timejet")));
        assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.mail_from.as_deref(), Some("TimeJet <timejet@example.com>"));
        assert_eq!(config.open_attempts, Some(3));
        assert_eq!(config.open_initial_backoff_ms, Some(50));
        assert_eq!(config.open_max_backoff_ms, Some(400));
        assert_eq!(config.log_filter.as_deref(), Some("timejet=debug"));
    }

    #[test]
    fn test_config_from_kdl_ignores_bad_values() {
        let kdl = r#"
            port 70000
            open-attempts "many"
            host 12
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = TimejetConfig::from_kdl(&doc);
        assert_eq!(config.port, None);
        assert_eq!(config.open_attempts, None);
        assert_eq!(config.host, None);
    }

    #[test]
    fn test_config_to_kdl_roundtrip() {
        let config = TimejetConfig {
            data_root: Some(PathBuf::from("/var/lib/timejet")),
            host: Some("127.0.0.1".to_string()),
            port: Some(5000),
            mail_from: None,
            open_attempts: Some(7),
            open_initial_backoff_ms: Some(10),
            open_max_backoff_ms: Some(1000),
            log_filter: Some("warn".to_string()),
        };

        let doc = config.to_kdl();
        assert_eq!(TimejetConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_config_merge() {
        let mut base = TimejetConfig {
            host: Some("127.0.0.1".to_string()),
            port: Some(5000),
            ..Default::default()
        };
        let other = TimejetConfig {
            port: Some(6000),
            log_filter: Some("debug".to_string()),
            ..Default::default()
        };

        base.merge(&other);

        assert_eq!(base.host.as_deref(), Some("127.0.0.1")); // Not overridden
        assert_eq!(base.port, Some(6000)); // Overridden
        assert_eq!(base.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_missing_and_present_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.kdl");
        assert_eq!(TimejetConfig::load(&path).unwrap(), TimejetConfig::default());

        fs::write(&path, "port 5050\n").unwrap();
        assert_eq!(TimejetConfig::load(&path).unwrap().port, Some(5050));
    }

    #[test]
    fn test_load_rejects_malformed_kdl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.kdl");
        fs::write(&path, "port {{{\n").unwrap();
        assert!(matches!(TimejetConfig::load(&path), Err(crate::Error::Kdl(_))));
    }
}

//! Audit subsystem configuration.
//!
//! # Responsibility
//! - Hold the knobs the commit pipeline and logging bootstrap read.
//! - Load them from JSON with per-field defaults.
//!
//! # Invariants
//! - A validated config always has a non-blank unresolved-id placeholder.
//! - Audit tables are excluded from auditing regardless of this config.

use crate::model::entity::IDENTIFIER_RE;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Placeholder stored as `entity_id` when an identifier cannot be resolved.
pub const DEFAULT_UNRESOLVED_ENTITY_ID: &str = "N/A";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Logging bootstrap settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; `None` picks the build-mode default.
    pub level: Option<String>,
    /// Absolute directory for rolling log files.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub unresolved_entity_id: String,
    /// Entity names never audited, in addition to the audit tables.
    pub excluded_entities: Vec<String>,
    /// Record field values for `Created` entries.
    pub capture_created_values: bool,
    pub logging: LoggingConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            unresolved_entity_id: DEFAULT_UNRESOLVED_ENTITY_ID.to_string(),
            excluded_entities: Vec::new(),
            capture_created_values: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unresolved_entity_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "unresolved_entity_id cannot be blank".to_string(),
            ));
        }
        if let Some(name) = self
            .excluded_entities
            .iter()
            .find(|name| !IDENTIFIER_RE.is_match(name))
        {
            return Err(ConfigError::Invalid(format!(
                "excluded entity `{name}` is not a valid identifier"
            )));
        }
        if let Some(directory) = &self.logging.directory {
            if !directory.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "logging.directory must be absolute, got `{}`",
                    directory.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditConfig, ConfigError, DEFAULT_UNRESOLVED_ENTITY_ID};
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config = AuditConfig::from_json_str("{}").unwrap();
        assert_eq!(config, AuditConfig::default());
        assert_eq!(config.unresolved_entity_id, DEFAULT_UNRESOLVED_ENTITY_ID);
        assert!(!config.capture_created_values);
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = AuditConfig::from_json_str(
            r#"{"excluded_entities":["sessions"],"capture_created_values":true,
                "logging":{"level":"warn"}}"#,
        )
        .unwrap();
        assert_eq!(config.excluded_entities, ["sessions"]);
        assert!(config.capture_created_values);
        assert_eq!(config.logging.level.as_deref(), Some("warn"));
    }

    #[test]
    fn blank_placeholder_is_rejected() {
        let err = AuditConfig::from_json_str(r#"{"unresolved_entity_id":"  "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_and_bad_identifiers_are_rejected() {
        assert!(matches!(
            AuditConfig::from_json_str(r#"{"nope":1}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            AuditConfig::from_json_str(r#"{"excluded_entities":["drop table"]}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"unresolved_entity_id":"unknown"}"#)
            .unwrap();
        drop(file);

        assert_eq!(
            AuditConfig::load(&path).unwrap().unresolved_entity_id,
            "unknown"
        );
        assert!(matches!(
            AuditConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}

//! Bot configuration.
//!
//! The configuration lives in `etibot-config.yaml`. Each section mirrors a
//! subsystem: `gateway`, `commands`, `permissions` and `logging`. Every
//! field has a default, so an empty file is a valid configuration.

use std::path::Path;

use etibot_commands::{CommandConfig, StaticPermissions};
use etibot_gateway::GatewayConfig;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BotConfig {
    /// Heartbeat timing and queue sizes.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Prefix and rate limits.
    #[serde(default)]
    pub commands: CommandConfig,

    /// Who may run what.
    #[serde(default)]
    pub permissions: StaticPermissions,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BotConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `ETIBOT_COMMAND_PREFIX` overrides `commands.prefix`
    /// - `ETIBOT_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup, normally the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = lookup("ETIBOT_COMMAND_PREFIX") {
            self.commands.prefix = prefix;
        }
        if let Some(level) = lookup("ETIBOT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway
            .validate()
            .and_then(|()| self.commands.validate())
            .map_err(|reason| ConfigError::Invalid { reason })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    /// (trace, debug, info, warn, error, or a full directive list).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use etibot_commands::PermissionLevel;
    use etibot_types::Snowflake;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let mut config: BotConfig = serde_yml::from_str("{}").unwrap();
        config.apply_overrides(|_| None);
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.commands.prefix, ">> ");
        assert_eq!(config.gateway.heartbeat_timeout_ms, 15_000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
gateway:
  heartbeat_timeout_ms: 10000
  heartbeat_poll_ms: 50
commands:
  prefix: "!"
  cooldown_ms: 500
  strict_hierarchy: true
permissions:
  users:
    "123": bot_developer
  roles:
    "456": moderator
logging:
  level: debug
  format: json
"#;
        let mut config: BotConfig = serde_yml::from_str(yaml).unwrap();
        config.apply_overrides(|_| None);
        config.validate().unwrap();
        assert_eq!(config.gateway.heartbeat_timeout_ms, 10_000);
        assert_eq!(config.gateway.outbound_queue, 64);
        assert_eq!(config.commands.prefix, "!");
        assert_eq!(config.commands.throttle_notice_ms, 2000);
        assert!(config.commands.strict_hierarchy);
        assert_eq!(
            config.permissions.users.get(&Snowflake::new(123)),
            Some(&PermissionLevel::BotDeveloper)
        );
        assert_eq!(
            config.permissions.roles.get(&Snowflake::new(456)),
            Some(&PermissionLevel::Moderator)
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn overrides_replace_yaml_values() {
        let mut config = BotConfig::default();
        config.apply_overrides(|key| match key {
            "ETIBOT_COMMAND_PREFIX" => Some("?".to_owned()),
            "ETIBOT_LOG_LEVEL" => Some("etibot=trace".to_owned()),
            _ => None,
        });
        assert_eq!(config.commands.prefix, "?");
        assert_eq!(config.logging.level, "etibot=trace");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = BotConfig::default();
        config.gateway.heartbeat_poll_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        let err = BotConfig::parse("gateway: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}

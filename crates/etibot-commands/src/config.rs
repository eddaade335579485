//! Command marshaller configuration.
//!
//! Mirrors the `commands:` section of the bot's YAML configuration.

use std::time::Duration;

use serde::Deserialize;

/// Prefix and rate-limit settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandConfig {
    /// Text a message must start with to be treated as a command.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Milliseconds a user must wait after a successful command.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Minimum milliseconds between two throttle notices to one user.
    #[serde(default = "default_throttle_notice_ms")]
    pub throttle_notice_ms: u64,

    /// Refuse to start when a sub-command requires less than its parent.
    /// When false such problems are only logged.
    #[serde(default)]
    pub strict_hierarchy: bool,
}

impl CommandConfig {
    /// Cooldown as a [`Duration`].
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Throttle notice interval as a [`Duration`].
    pub const fn throttle_notice_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_notice_ms)
    }

    /// Check the values make sense.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.prefix.trim().is_empty() {
            return Err("commands.prefix must not be blank".to_owned());
        }
        Ok(())
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            cooldown_ms: default_cooldown_ms(),
            throttle_notice_ms: default_throttle_notice_ms(),
            strict_hierarchy: false,
        }
    }
}

fn default_prefix() -> String {
    ">> ".to_owned()
}

const fn default_cooldown_ms() -> u64 {
    1250
}

const fn default_throttle_notice_ms() -> u64 {
    2000
}

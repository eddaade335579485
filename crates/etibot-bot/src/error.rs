//! Error types for the bot binary.
//!
//! [`BotError`] wraps every failure mode during startup and replay so that
//! `main` can propagate with `?`.

use etibot_commands::CommandError;
use etibot_gateway::RegistryError;

use crate::config::ConfigError;

/// Top-level error for the bot binary.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The dispatch event table could not be built.
    #[error("event registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },

    /// The command marshaller refused the command set.
    #[error("command setup error: {source}")]
    Commands {
        /// The underlying command error.
        #[from]
        source: CommandError,
    },

    /// The replay input could not be opened.
    #[error("failed to open replay input: {source}")]
    Input {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

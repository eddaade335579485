//! Gateway client configuration.
//!
//! Mirrors the `gateway:` section of the bot's YAML configuration. Every
//! field has a default so an empty section is valid.

use std::time::Duration;

use serde::Deserialize;

/// Timing and buffering knobs for the gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Milliseconds an unacknowledged heartbeat may stay outstanding
    /// before the connection is considered dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Milliseconds between heartbeat monitor polls.
    #[serde(default = "default_heartbeat_poll_ms")]
    pub heartbeat_poll_ms: u64,

    /// Capacity of the outbound payload queue handed to the transport.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl GatewayConfig {
    /// Heartbeat timeout as a [`Duration`].
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Heartbeat poll interval as a [`Duration`].
    pub const fn heartbeat_poll_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_poll_ms)
    }

    /// Check the values make sense together.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_poll_ms == 0 {
            return Err("gateway.heartbeat_poll_ms must be greater than zero".to_owned());
        }
        if self.heartbeat_timeout_ms < self.heartbeat_poll_ms {
            return Err(
                "gateway.heartbeat_timeout_ms must not be shorter than heartbeat_poll_ms"
                    .to_owned(),
            );
        }
        if self.outbound_queue == 0 {
            return Err("gateway.outbound_queue must be greater than zero".to_owned());
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            heartbeat_poll_ms: default_heartbeat_poll_ms(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

const fn default_heartbeat_timeout_ms() -> u64 {
    15_000
}

const fn default_heartbeat_poll_ms() -> u64 {
    100
}

const fn default_outbound_queue() -> usize {
    64
}

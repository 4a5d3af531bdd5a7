//! Runtime configuration for the engine.
//!
//! One [`RuntimeConfig`] is shared by every download the manager runs. It
//! covers the tunables an embedding application may want to override;
//! protocol constants live in [`crate::download::constants`].

use std::time::Duration;

use crate::download::constants::{DEFAULT_CONNECTIONS, PER_HOST_MAX, STALL_THRESHOLD};

/// Default cap on downloads running concurrently under one manager.
pub const DEFAULT_ACTIVE_DOWNLOAD_CAP: usize = 4;

/// Tunable runtime settings shared across downloads.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Requested worker connections per download. Clamped to
    /// [`PER_HOST_MAX`] and the chunk-plan length at dispatch time.
    pub connections: usize,
    /// Connection-pool cap per host, shared across downloads to that host.
    pub max_connections_per_host: usize,
    /// Maximum downloads in the `active` state at once.
    pub active_download_cap: usize,
    /// Explicit proxy URL. Empty string means "use environment proxies".
    pub proxy_url: String,
    /// User-Agent sent on every request.
    pub user_agent: String,
    /// How long a worker may go without receiving bytes from the socket
    /// before the health monitor aborts it. Measured on network reads, not
    /// disk flushes.
    pub stall_threshold: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connections: DEFAULT_CONNECTIONS,
            max_connections_per_host: PER_HOST_MAX,
            active_download_cap: DEFAULT_ACTIVE_DOWNLOAD_CAP,
            proxy_url: String::new(),
            user_agent: default_user_agent(),
            stall_threshold: STALL_THRESHOLD,
        }
    }
}

impl RuntimeConfig {
    /// Effective per-host connection cap, never zero.
    #[must_use]
    pub fn per_host_limit(&self) -> usize {
        self.max_connections_per_host.clamp(1, PER_HOST_MAX)
    }

    /// Effective worker count requested by configuration, never zero.
    #[must_use]
    pub fn requested_connections(&self) -> usize {
        self.connections.max(1)
    }
}

/// Default User-Agent: crate name and version.
#[must_use]
pub fn default_user_agent() -> String {
    format!("surge/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_within_limits() {
        let config = RuntimeConfig::default();
        assert!(config.requested_connections() >= 1);
        assert!(config.per_host_limit() <= PER_HOST_MAX);
        assert_eq!(config.active_download_cap, DEFAULT_ACTIVE_DOWNLOAD_CAP);
    }

    #[test]
    fn test_zero_connections_clamped_to_one() {
        let config = RuntimeConfig {
            connections: 0,
            max_connections_per_host: 0,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.requested_connections(), 1);
        assert_eq!(config.per_host_limit(), 1);
    }

    #[test]
    fn test_default_user_agent_carries_version() {
        let ua = default_user_agent();
        assert!(ua.starts_with("surge/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }
}

//! Configuration for the routing core.
//!
//! The configuration follows the nested-section pattern: one struct per
//! concern, each with its own `Default`, validated as a whole with
//! [`RoutingConfig::validate`].
//!
//! # Examples
//!
//! ```
//! use ivrflow_routing_core::config::RoutingConfig;
//!
//! let mut config = RoutingConfig::default();
//! config.general.rolling_window_secs = 1800; // reset recent-call counts every 30 min
//! config.database.database_path = Some("/var/lib/ivrflow/agents.db".to_string());
//!
//! config.validate().expect("configuration should be valid");
//! ```

use serde::{Deserialize, Serialize};

/// Top-level routing core configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// General system settings
    pub general: GeneralConfig,

    /// Agent registry persistence settings
    pub database: DatabaseConfig,

    /// Observability settings
    pub monitoring: MonitoringConfig,
}

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Domain label used in logs and diagnostics
    pub domain: String,

    /// Upper bound on concurrently tracked call sessions
    pub max_active_sessions: usize,

    /// Interval, in seconds, at which rolling-window metrics
    /// (`recent_call_count`) are zeroed and partitions rebuilt
    pub rolling_window_secs: u64,
}

/// Agent registry persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file; `None` selects an in-memory
    /// database (useful for tests and demos)
    pub database_path: Option<String>,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// Retry policy for transient registry failures
    pub retry: RetryPolicy,
}

/// Bounded exponential backoff for transient registry failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the operation is reported as
    /// registry-unavailable (1 = no retry)
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each subsequent retry
    pub initial_backoff_ms: u64,
}

/// Observability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Interval, in seconds, between monitor-loop status summaries
    pub monitor_interval_secs: u64,

    /// Capacity of the broadcast channel carrying pool snapshots
    pub snapshot_channel_capacity: usize,

    /// Whether the monitor loop logs per-agent detail (small pools only)
    pub log_agent_detail: bool,
}

impl RoutingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.general.domain.is_empty() {
            return Err("general.domain must not be empty".to_string());
        }
        if self.general.max_active_sessions == 0 {
            return Err("general.max_active_sessions must be at least 1".to_string());
        }
        if self.general.rolling_window_secs == 0 {
            return Err("general.rolling_window_secs must be at least 1".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".to_string());
        }
        if self.database.retry.max_attempts == 0 {
            return Err("database.retry.max_attempts must be at least 1".to_string());
        }
        if self.monitoring.monitor_interval_secs == 0 {
            return Err("monitoring.monitor_interval_secs must be at least 1".to_string());
        }
        if self.monitoring.snapshot_channel_capacity == 0 {
            return Err("monitoring.snapshot_channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            domain: "ivrflow.local".to_string(),
            max_active_sessions: 1000,
            rolling_window_secs: 3600,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 10,
            snapshot_channel_capacity: 64,
            log_agent_detail: true,
        }
    }
}

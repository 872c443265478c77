//! # Routing Server
//!
//! A thin lifecycle wrapper around [`CallRoutingEngine`]: builds the engine,
//! runs the periodic rolling-window reset and a status monitor as background
//! tasks, and tears both down on stop.
//!
//! # Examples
//!
//! ```rust
//! use ivrflow_routing_core::{agent::Language, config::RoutingConfig, server::RoutingServerBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = RoutingServerBuilder::new()
//!     .with_config(RoutingConfig::default())
//!     .with_in_memory_database()
//!     .build()
//!     .await?;
//!
//! server
//!     .seed_agents(vec![
//!         ("agent-en-1", "15550000001", Language::English),
//!         ("agent-es-1", "15550000002", Language::Spanish),
//!     ])
//!     .await?;
//!
//! server.start();
//! // ... route calls through server.engine() ...
//! server.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::agent::Language;
use crate::config::RoutingConfig;
use crate::database::AgentRegistry;
use crate::error::{Result, RoutingError};
use crate::orchestrator::CallRoutingEngine;

/// Owns the engine plus its periodic background tasks.
pub struct RoutingServer {
    engine: Arc<CallRoutingEngine>,
    config: RoutingConfig,
    window_reset_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl RoutingServer {
    /// Build a server over the sqlite registry described by the config.
    pub async fn new(config: RoutingConfig) -> Result<Self> {
        let engine = Arc::new(CallRoutingEngine::new(config.clone()).await?);
        Ok(Self {
            engine,
            config,
            window_reset_handle: None,
            monitor_handle: None,
        })
    }

    /// The engine handle request handlers should clone.
    pub fn engine(&self) -> &Arc<CallRoutingEngine> {
        &self.engine
    }

    /// Provision the given `(id, contact_number, language)` agents and make
    /// them dispatchable.
    pub async fn seed_agents(&self, agents: Vec<(&str, &str, Language)>) -> Result<()> {
        for (agent_id, contact_number, language) in agents {
            self.engine
                .provision_agent(agent_id, contact_number, language)
                .await?;
            info!("created agent {} ({} / {})", agent_id, contact_number, language);
        }
        self.engine.rebuild().await
    }

    /// Start the rolling-window reset loop and the status monitor.
    pub fn start(&mut self) {
        let window = Duration::from_secs(self.config.general.rolling_window_secs);
        let engine = self.engine.clone();
        self.window_reset_handle = Some(tokio::spawn(async move {
            Self::window_reset_loop(engine, window).await;
        }));

        let monitor_every = Duration::from_secs(self.config.monitoring.monitor_interval_secs);
        let log_detail = self.config.monitoring.log_agent_detail;
        let engine = self.engine.clone();
        self.monitor_handle = Some(tokio::spawn(async move {
            Self::monitor_loop(engine, monitor_every, log_detail).await;
        }));

        info!("✅ routing server started for {}", self.config.general.domain);
    }

    /// Stop the background tasks. The engine itself stays usable.
    pub fn stop(&mut self) {
        if let Some(handle) = self.window_reset_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
        info!("🛑 routing server stopped");
    }

    async fn window_reset_loop(engine: Arc<CallRoutingEngine>, window: Duration) {
        let mut ticker = interval(window);
        // The first tick fires immediately; partitions were just built.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match engine.reset_rolling_window().await {
                Ok(()) => info!("rolling window reset complete"),
                Err(err) => error!("rolling window reset failed: {}", err),
            }
        }
    }

    async fn monitor_loop(engine: Arc<CallRoutingEngine>, every: Duration, log_detail: bool) {
        let mut ticker = interval(every);

        loop {
            ticker.tick().await;

            let stats = engine.stats();
            let sessions = engine.session_stats();
            info!(
                "📊 status - active sessions: {}, routed: {}, unserved: {}, completed: {}",
                sessions.active, stats.calls_routed, stats.calls_unserved, stats.calls_completed
            );

            match engine.snapshot().await {
                Ok(snapshot) => {
                    for (language, agents) in &snapshot.languages {
                        let available = agents.iter().filter(|a| a.available).count();
                        info!(
                            "  {} partition: {} agent(s), {} available",
                            language,
                            agents.len(),
                            available
                        );
                        if log_detail && agents.len() <= 5 {
                            for agent in agents {
                                info!(
                                    "    - {}: available={}, recent={}, score={:.2}",
                                    agent.agent_id, agent.available, agent.recent_call_count, agent.score
                                );
                            }
                        }
                    }
                }
                Err(err) => error!("failed to take pool snapshot: {}", err),
            }
        }
    }
}

/// Builder for [`RoutingServer`] with a fluent API.
pub struct RoutingServerBuilder {
    config: Option<RoutingConfig>,
    registry: Option<Arc<dyn AgentRegistry>>,
}

impl RoutingServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: RoutingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a caller-supplied registry implementation instead of the
    /// config-described sqlite one.
    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Point the sqlite registry at a database file.
    pub fn with_database_path(mut self, path: String) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.database.database_path = Some(path);
        self.config = Some(config);
        self
    }

    /// Use an in-memory sqlite registry.
    pub fn with_in_memory_database(mut self) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.database.database_path = None;
        self.config = Some(config);
        self
    }

    pub async fn build(self) -> Result<RoutingServer> {
        let config = self
            .config
            .ok_or_else(|| RoutingError::configuration("configuration not provided"))?;

        let engine = match self.registry {
            Some(registry) => {
                Arc::new(CallRoutingEngine::with_registry(config.clone(), registry).await?)
            }
            None => Arc::new(CallRoutingEngine::new(config.clone()).await?),
        };

        Ok(RoutingServer {
            engine,
            config,
            window_reset_handle: None,
            monitor_handle: None,
        })
    }
}

impl Default for RoutingServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

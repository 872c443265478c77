//! Core engine implementation: wires the dispatcher, the session store and
//! the agent registry together and drives the call lifecycle.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentHandle, AgentId, AgentRecord, Language};
use crate::config::RoutingConfig;
use crate::database::{AgentRegistry, CallRecord, SqliteAgentRegistry};
use crate::dispatcher::{PoolSnapshot, PriorityDispatcher};
use crate::error::{Result, RoutingError};
use crate::session::{CallId, CallSession, SessionStore, SessionStoreStats};

use super::types::{CallOutcome, DialStatus, RoutingStats};

/// The call routing engine.
///
/// An explicitly constructed, explicitly owned component: request handlers
/// receive it by reference (usually inside an `Arc`), and tests instantiate
/// isolated instances against in-memory registries. There is no process-wide
/// instance.
pub struct CallRoutingEngine {
    config: RoutingConfig,
    registry: Arc<dyn AgentRegistry>,
    dispatcher: PriorityDispatcher,
    sessions: SessionStore,
    stats: RwLock<RoutingStats>,
    snapshot_tx: broadcast::Sender<PoolSnapshot>,
}

impl CallRoutingEngine {
    /// Create an engine backed by the sqlite registry described in the
    /// configuration, and populate the dispatch partitions.
    pub async fn new(config: RoutingConfig) -> Result<Self> {
        let registry = Arc::new(SqliteAgentRegistry::from_config(&config.database).await?);
        Self::with_registry(config, registry).await
    }

    /// Create an engine over a caller-supplied registry implementation.
    pub async fn with_registry(
        config: RoutingConfig,
        registry: Arc<dyn AgentRegistry>,
    ) -> Result<Self> {
        config.validate().map_err(RoutingError::Configuration)?;

        let dispatcher = PriorityDispatcher::new(registry.clone(), config.database.retry.clone());
        dispatcher.rebuild().await?;

        let (snapshot_tx, _) = broadcast::channel(config.monitoring.snapshot_channel_capacity);

        info!("✅ call routing engine initialized for {}", config.general.domain);
        Ok(Self {
            config,
            registry,
            dispatcher,
            sessions: SessionStore::new(),
            stats: RwLock::new(RoutingStats::default()),
            snapshot_tx,
        })
    }

    /// Subscribe to pool snapshots, published after every mutating
    /// dispatcher operation.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Track a new call. Duplicate deliveries of the originating telephony
    /// event are ignored; returns whether a session was actually created.
    pub fn begin_session(&self, call_id: CallId, customer_phone: &str) -> Result<bool> {
        let limit = self.config.general.max_active_sessions;
        if self.sessions.active_count() >= limit {
            warn!("rejecting call {}: session capacity {} reached", call_id, limit);
            return Err(RoutingError::CapacityExceeded { limit });
        }
        Ok(self.sessions.create(call_id, customer_phone))
    }

    /// Record the caller's IVR language selection.
    pub fn select_language(&self, call_id: &CallId, language: Language) -> Result<()> {
        self.sessions.set_language(call_id, language)
    }

    /// Reserve the best available agent for the call's language.
    ///
    /// `Ok(None)` means every agent in the partition is busy or offline;
    /// the collaborator plays the "all busy" prompt and hangs up.
    pub async fn connect_to_agent(&self, call_id: &CallId) -> Result<Option<AgentHandle>> {
        let session = self
            .sessions
            .get(call_id)
            .ok_or_else(|| RoutingError::unknown_session(&call_id.0))?;
        let language = session
            .language
            .ok_or_else(|| RoutingError::LanguageNotSelected {
                call_id: call_id.0.clone(),
            })?;

        let Some(handle) = self.dispatcher.select_best(language).await? else {
            info!("all {} agents busy for call {}", language, call_id);
            self.stats.write().calls_unserved += 1;
            return Ok(None);
        };

        self.dispatcher.reserve(&handle.id, call_id).await?;

        if let Err(err) = self.sessions.assign_agent(call_id, handle.id.clone()) {
            // The call vanished while we were reserving; undo the hold.
            warn!(
                "call {} disappeared during agent reservation, releasing {}",
                call_id, handle.id
            );
            self.release_quietly(&handle.id, 0.0).await;
            return Err(err);
        }

        self.stats.write().calls_routed += 1;
        self.publish_snapshot().await;
        Ok(Some(handle))
    }

    /// React to the telephony collaborator's dial outcome.
    ///
    /// A dial that did not complete releases the reserved agent immediately
    /// with duration zero and detaches it from the session, so the eventual
    /// [`complete_call`](Self::complete_call) cannot release it a second
    /// time. No feedback can legitimately be collected for a call that
    /// never connected.
    pub async fn handle_dial_status(&self, call_id: &CallId, status: DialStatus) -> Result<()> {
        if status.is_completed() {
            return Ok(());
        }

        let Some(agent_id) = self.sessions.clear_agent(call_id)? else {
            return Ok(());
        };

        warn!(
            "dial for call {} ended with status {}, releasing agent {} unused",
            call_id, status, agent_id
        );
        self.release_quietly(&agent_id, 0.0).await;
        self.publish_snapshot().await;
        Ok(())
    }

    /// End the call: compute its duration, fold feedback into the serving
    /// agent, release the agent, and persist the call record.
    ///
    /// Exactly-once: a second completion for the same call observes a
    /// missing session and returns
    /// [`UnknownSession`](RoutingError::UnknownSession) with no side
    /// effects. An invalid or absent feedback digit is ignored - release
    /// still proceeds with the measured duration. Agent-release failure is
    /// logged and does not fail the completion; the customer-facing
    /// interaction is already over and the agent is reconciled by the next
    /// rebuild.
    pub async fn complete_call(
        &self,
        call_id: &CallId,
        feedback_digit: Option<&str>,
    ) -> Result<CallOutcome> {
        let (session, duration_seconds) = self.sessions.end(call_id)?;

        let mut applied_rating = None;
        if let Some(agent_id) = session.agent_id.clone() {
            match feedback_digit.and_then(parse_rating) {
                Some(rating) => match self.dispatcher.apply_feedback(&agent_id, rating).await {
                    Ok(()) => applied_rating = Some(rating),
                    Err(err) => warn!(
                        "could not record rating {} for agent {}: {}",
                        rating, agent_id, err
                    ),
                },
                None => {
                    if let Some(digit) = feedback_digit {
                        debug!("ignoring invalid feedback digit {:?} for call {}", digit, call_id);
                    }
                }
            }

            if let Err(err) = self.dispatcher.release(&agent_id, duration_seconds).await {
                error!(
                    "failed to release agent {} after call {}: {} (reconciled on next rebuild)",
                    agent_id, call_id, err
                );
            }
        }

        let record = CallRecord {
            call_id: session.call_id.0.clone(),
            customer_phone: session.customer_phone.clone(),
            agent_id: session.agent_id.clone(),
            language: session.language,
            started_at: session.created_at,
            duration_seconds,
            disposition: DialStatus::Completed.to_string(),
            feedback_rating: applied_rating,
        };
        if let Err(err) = self.registry.record_call(&record).await {
            warn!("could not persist call record for {}: {}", call_id, err);
        }

        {
            let mut stats = self.stats.write();
            stats.calls_completed += 1;
            if applied_rating.is_some() {
                stats.feedback_received += 1;
            }
        }

        info!(
            "📞 call {} completed after {:.1}s (agent: {}, rating: {})",
            call_id,
            duration_seconds,
            session
                .agent_id
                .as_ref()
                .map(|a| a.0.as_str())
                .unwrap_or("none"),
            applied_rating.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
        );

        self.publish_snapshot().await;
        Ok(CallOutcome {
            session,
            duration_seconds,
            rating: applied_rating,
        })
    }

    /// Provision an agent (or refresh its contact details). Call
    /// [`rebuild`](Self::rebuild) afterwards to make it dispatchable.
    pub async fn provision_agent(
        &self,
        agent_id: impl Into<AgentId>,
        contact_number: impl Into<String>,
        language: Language,
    ) -> Result<()> {
        self.registry
            .upsert_agent(&AgentRecord::new(agent_id, contact_number, language))
            .await
    }

    /// Reconstruct the dispatch partitions from the registry.
    pub async fn rebuild(&self) -> Result<()> {
        self.dispatcher.rebuild().await?;
        self.publish_snapshot().await;
        Ok(())
    }

    /// Zero rolling-window call counts and rebuild the partitions.
    pub async fn reset_rolling_window(&self) -> Result<()> {
        self.dispatcher.reset_rolling_window().await?;
        self.publish_snapshot().await;
        Ok(())
    }

    /// Current agent-pool view.
    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        self.dispatcher.snapshot().await
    }

    /// Aggregate routing counters.
    pub fn stats(&self) -> RoutingStats {
        *self.stats.read()
    }

    /// Session-store counters.
    pub fn session_stats(&self) -> SessionStoreStats {
        self.sessions.stats()
    }

    /// In-flight session lookup (diagnostics).
    pub fn session(&self, call_id: &CallId) -> Option<CallSession> {
        self.sessions.get(call_id)
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Release where failure must not propagate; the error is logged and
    /// the agent left for rebuild reconciliation.
    async fn release_quietly(&self, agent_id: &AgentId, duration_seconds: f64) {
        if let Err(err) = self.dispatcher.release(agent_id, duration_seconds).await {
            error!(
                "failed to release agent {}: {} (reconciled on next rebuild)",
                agent_id, err
            );
        }
    }

    async fn publish_snapshot(&self) {
        match self.dispatcher.snapshot().await {
            Ok(snapshot) => {
                // No receivers is fine; observers come and go.
                let _ = self.snapshot_tx.send(snapshot);
            }
            Err(err) => debug!("skipping snapshot publication: {}", err),
        }
    }
}

fn parse_rating(digit: &str) -> Option<u8> {
    digit
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|r| (1..=4).contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parse_accepts_scale_digits_only() {
        assert_eq!(parse_rating("1"), Some(1));
        assert_eq!(parse_rating("4"), Some(4));
        assert_eq!(parse_rating(" 3 "), Some(3));
        assert_eq!(parse_rating("0"), None);
        assert_eq!(parse_rating("5"), None);
        assert_eq!(parse_rating("9"), None);
        assert_eq!(parse_rating("*"), None);
        assert_eq!(parse_rating(""), None);
    }
}

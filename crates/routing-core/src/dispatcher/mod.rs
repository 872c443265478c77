//! # Priority Dispatcher
//!
//! Selects, for a requested language, the single best currently-available
//! agent, reserves it atomically, and later returns it to eligibility with a
//! freshly computed priority.
//!
//! ## Structure
//!
//! One min-priority queue per language partition. Queue entries are
//! `(score, agent_id)` snapshots taken at insertion time; the structure does
//! **not** support in-place priority updates, so entries can go stale when an
//! agent's metrics change after insertion. Staleness is handled with the
//! classic lazy-deletion discipline:
//!
//! ```text
//!  select_best(language)
//!        │
//!        ▼
//!  ┌───────────────┐  pop min   ┌──────────────────────────┐
//!  │ partition heap│───────────▶│ re-read agent from the   │
//!  │ (score, id)   │            │ registry: available and  │
//!  └───────────────┘            │ not in the busy set?     │
//!        ▲                      └───────────┬──────────────┘
//!        │ reinsert on release         yes  │  no: discard entry,
//!        │ (fresh score)                    │      pop again
//!        │                                  ▼
//!        │                      persist available=false,
//!        └───────────────────── hand out the agent handle
//! ```
//!
//! Every consumed entry either becomes a genuine reservation or is provably
//! invalid and safely dropped; [`release`](PriorityDispatcher::release) is
//! the only path that reintroduces an agent into a partition.
//!
//! ## Concurrency
//!
//! The partitions and the busy set are one shared resource behind a single
//! async mutex, held for the full duration of every operation including the
//! bounded registry round trips. Call volume is low and the heaps are small;
//! the single lock keeps `select_best`/`release` pairs strictly ordered,
//! which finer-grained locking could not guarantee.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{AgentHandle, AgentId, AgentRecord, Language};
use crate::config::RetryPolicy;
use crate::database::{with_retry, AgentRegistry};
use crate::error::{Result, RoutingError};
use crate::session::CallId;

/// Score/identity snapshot stored in a partition heap.
///
/// Tuple-style ordering gives the tie-break for free: equal scores resolve
/// to the lowest agent id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    score: OrderedFloat<f64>,
    agent_id: AgentId,
}

/// Partitions plus busy set; one lock guards both.
#[derive(Default)]
struct DispatcherState {
    partitions: HashMap<Language, BinaryHeap<Reverse<QueueEntry>>>,
    busy: HashMap<AgentId, CallId>,
}

impl DispatcherState {
    fn insert(&mut self, agent: &AgentRecord) {
        let entry = QueueEntry {
            score: OrderedFloat(agent.priority_score()),
            agent_id: agent.id.clone(),
        };
        self.partitions
            .entry(agent.language)
            .or_default()
            .push(Reverse(entry));
    }

    fn rebuild_from(&mut self, agents: &[AgentRecord]) -> usize {
        self.partitions.clear();
        self.busy.clear();
        let mut inserted = 0;
        for agent in agents {
            if agent.available {
                self.insert(agent);
                inserted += 1;
            }
        }
        inserted
    }
}

/// Per-agent view exposed for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub contact_number: String,
    pub language: Language,
    pub available: bool,
    /// Call the agent is currently engaged in, if any
    pub busy_with: Option<String>,
    pub total_calls: u32,
    pub recent_call_count: u32,
    pub avg_call_duration_seconds: f64,
    pub avg_rating: f64,
    pub score: f64,
}

/// Full agent-pool view, partitioned by language. Read-only; taking a
/// snapshot never mutates dispatcher state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub taken_at: DateTime<Utc>,
    pub languages: BTreeMap<Language, Vec<AgentSnapshot>>,
}

/// Priority-based agent dispatcher over per-language partitions.
pub struct PriorityDispatcher {
    registry: Arc<dyn AgentRegistry>,
    retry: RetryPolicy,
    state: Mutex<DispatcherState>,
}

impl PriorityDispatcher {
    /// Create an empty dispatcher. Call [`rebuild`](Self::rebuild) to
    /// populate the partitions from the registry.
    pub fn new(registry: Arc<dyn AgentRegistry>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            retry,
            state: Mutex::new(DispatcherState::default()),
        }
    }

    /// Pick and reserve the best available agent for `language`.
    ///
    /// Pops entries until one passes revalidation against the registry and
    /// the busy set; stale entries are discarded, never reinserted. Returns
    /// `Ok(None)` when the partition runs out of valid candidates - a
    /// normal outcome, not an error.
    ///
    /// The availability flip is persisted *before* the handle is returned;
    /// if persistence keeps failing the popped entry is restored, so the
    /// queue never points at a phantom reservation.
    pub async fn select_best(&self, language: Language) -> Result<Option<AgentHandle>> {
        let mut state = self.state.lock().await;

        loop {
            let entry = match state.partitions.get_mut(&language).and_then(|h| h.pop()) {
                Some(Reverse(entry)) => entry,
                None => {
                    debug!("no available {} agent", language);
                    return Ok(None);
                }
            };

            // Entries are snapshots; re-read the agent's current state.
            let agent = match self.load_agent(&entry.agent_id).await {
                Ok(agent) => agent,
                Err(err) => {
                    state.partitions.entry(language).or_default().push(Reverse(entry));
                    return Err(err);
                }
            };

            let Some(agent) = agent else {
                warn!("dropping queue entry for unprovisioned agent {}", entry.agent_id);
                continue;
            };

            if !agent.available || state.busy.contains_key(&agent.id) {
                debug!("discarding stale queue entry for agent {}", agent.id);
                continue;
            }

            if let Err(err) = self.persist_availability(&agent.id, false).await {
                state.partitions.entry(language).or_default().push(Reverse(entry));
                return Err(err);
            }

            info!(
                "selected agent {} for {} caller (score {:.2})",
                agent.id, language, entry.score.0
            );
            return Ok(Some(agent.handle()));
        }
    }

    /// Record `agent_id` as busy with `call_id` and persist it unavailable.
    ///
    /// Idempotent for the same agent/call pair; re-reserving a busy agent
    /// for a different call is logged and overwrites the association.
    pub async fn reserve(&self, agent_id: &AgentId, call_id: &CallId) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.busy.get(agent_id) {
            if existing == call_id {
                debug!("agent {} already reserved for call {}", agent_id, call_id);
                return Ok(());
            }
            warn!(
                "agent {} re-reserved for call {} while busy with {}",
                agent_id, call_id, existing
            );
        }

        self.persist_availability(agent_id, false).await?;
        state.busy.insert(agent_id.clone(), call_id.clone());
        Ok(())
    }

    /// Return `agent_id` to eligibility after a call of `duration_seconds`.
    ///
    /// Folds the duration into the running metrics, persists the record,
    /// and reinserts a freshly scored entry into the agent's language
    /// partition. An agent with no registry record is a logged no-op. If
    /// the commit keeps failing the agent stays out of the queue and
    /// unavailable - recoverable by the next [`rebuild`](Self::rebuild),
    /// never silently dropped.
    pub async fn release(&self, agent_id: &AgentId, duration_seconds: f64) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.busy.remove(agent_id).is_none() {
            debug!("release for agent {} with no busy entry", agent_id);
        }

        let Some(mut agent) = self.load_agent(agent_id).await? else {
            warn!("release for agent {} with no registry record, ignoring", agent_id);
            return Ok(());
        };

        agent.apply_call(duration_seconds);
        agent.available = true;

        if let Err(err) = self.commit_agent(&agent).await {
            warn!(
                "agent {} left unavailable after failed release commit: {}",
                agent_id, err
            );
            return Err(err);
        }

        let score = agent.priority_score();
        state.insert(&agent);
        info!(
            "released agent {} after {:.1}s call, rescored to {:.2}",
            agent_id, duration_seconds, score
        );
        Ok(())
    }

    /// Fold a caller rating (1-4) into the agent's feedback accumulators.
    ///
    /// Does not reinsert the agent; the `release` that follows for the same
    /// call picks the new mean up when it rescores.
    pub async fn apply_feedback(&self, agent_id: &AgentId, rating: u8) -> Result<()> {
        if !(1..=4).contains(&rating) {
            return Err(RoutingError::InvalidRating { rating });
        }

        let _state = self.state.lock().await;

        let Some(mut agent) = self.load_agent(agent_id).await? else {
            return Err(RoutingError::agent_not_found(&agent_id.0));
        };

        agent.apply_feedback(rating);
        self.commit_agent(&agent).await?;
        debug!(
            "agent {} rated {}, mean now {:.2}",
            agent_id,
            rating,
            agent.mean_rating().unwrap_or(0.0)
        );
        Ok(())
    }

    /// Discard all partitions and busy state and reconstruct from the
    /// registry's currently available agents, scored fresh.
    ///
    /// The only correct repair after a bulk external metric mutation: the
    /// queues cannot be selectively fixed. A registry failure leaves the
    /// prior partitions intact.
    pub async fn rebuild(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let agents = self.load_agents().await?;
        let inserted = state.rebuild_from(&agents);
        info!("rebuilt dispatcher partitions with {} available agent(s)", inserted);
        Ok(())
    }

    /// Zero every agent's rolling-window call count, then rebuild.
    pub async fn reset_rolling_window(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        with_retry(&self.retry, "reset_recent_call_counts", || {
            let registry = Arc::clone(&self.registry);
            async move { registry.reset_recent_call_counts().await }
        })
        .await?;

        let agents = self.load_agents().await?;
        let inserted = state.rebuild_from(&agents);
        info!(
            "rolling window reset, partitions rebuilt with {} available agent(s)",
            inserted
        );
        Ok(())
    }

    /// Current pool view for observability. Never mutates dispatcher state.
    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        let state = self.state.lock().await;
        let agents = self.load_agents().await?;

        let mut languages: BTreeMap<Language, Vec<AgentSnapshot>> = BTreeMap::new();
        for language in Language::ALL {
            languages.insert(language, Vec::new());
        }

        for agent in agents {
            let snapshot = AgentSnapshot {
                agent_id: agent.id.0.clone(),
                contact_number: agent.contact_number.clone(),
                language: agent.language,
                available: agent.available,
                busy_with: state.busy.get(&agent.id).map(|c| c.0.clone()),
                total_calls: agent.total_calls,
                recent_call_count: agent.recent_call_count,
                avg_call_duration_seconds: round2(agent.avg_call_duration_seconds),
                avg_rating: round2(agent.mean_rating().unwrap_or(0.0)),
                score: round2(agent.priority_score()),
            };
            languages.entry(agent.language).or_default().push(snapshot);
        }

        Ok(PoolSnapshot {
            taken_at: Utc::now(),
            languages,
        })
    }

    /// Number of agents currently engaged in a call.
    pub async fn busy_count(&self) -> usize {
        self.state.lock().await.busy.len()
    }

    /// Number of queued entries for a language partition (includes stale
    /// entries that have not been popped yet).
    pub async fn queued_count(&self, language: Language) -> usize {
        self.state
            .lock()
            .await
            .partitions
            .get(&language)
            .map_or(0, |h| h.len())
    }

    async fn load_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        with_retry(&self.retry, "load_agent", || {
            let registry = Arc::clone(&self.registry);
            let agent_id = agent_id.clone();
            async move { registry.load_agent(&agent_id).await }
        })
        .await
    }

    async fn load_agents(&self) -> Result<Vec<AgentRecord>> {
        with_retry(&self.retry, "load_agents", || {
            let registry = Arc::clone(&self.registry);
            async move { registry.load_agents().await }
        })
        .await
    }

    async fn commit_agent(&self, agent: &AgentRecord) -> Result<()> {
        with_retry(&self.retry, "commit_agent", || {
            let registry = Arc::clone(&self.registry);
            let agent = agent.clone();
            async move { registry.commit_agent(&agent).await }
        })
        .await
    }

    async fn persist_availability(&self, agent_id: &AgentId, available: bool) -> Result<()> {
        let updated = with_retry(&self.retry, "set_availability", || {
            let registry = Arc::clone(&self.registry);
            let agent_id = agent_id.clone();
            async move { registry.set_availability(&agent_id, available).await }
        })
        .await?;

        if !updated {
            return Err(RoutingError::agent_not_found(&agent_id.0));
        }
        Ok(())
    }
}

fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteAgentRegistry;

    async fn dispatcher_with_agents(
        agents: &[(&str, &str, Language)],
    ) -> (PriorityDispatcher, Arc<SqliteAgentRegistry>) {
        let registry = Arc::new(SqliteAgentRegistry::in_memory().await.unwrap());
        for (id, phone, language) in agents {
            registry
                .upsert_agent(&AgentRecord::new(*id, *phone, *language))
                .await
                .unwrap();
        }
        let dispatcher = PriorityDispatcher::new(registry.clone(), RetryPolicy::default());
        dispatcher.rebuild().await.unwrap();
        (dispatcher, registry)
    }

    async fn set_recent_calls(registry: &SqliteAgentRegistry, agent_id: &str, count: u32) {
        let mut agent = registry
            .load_agent(&AgentId::from(agent_id))
            .await
            .unwrap()
            .unwrap();
        agent.recent_call_count = count;
        registry.commit_agent(&agent).await.unwrap();
    }

    #[tokio::test]
    async fn ties_break_on_lowest_agent_id() {
        let (dispatcher, registry) = dispatcher_with_agents(&[
            ("agent-a", "15550000001", Language::English),
            ("agent-b", "15550000002", Language::English),
            ("agent-c", "15550000003", Language::English),
        ])
        .await;

        set_recent_calls(&registry, "agent-b", 5).await;
        dispatcher.rebuild().await.unwrap();

        let handle = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        assert_eq!(handle.id, AgentId::from("agent-a"));
    }

    #[tokio::test]
    async fn empty_partition_returns_none_without_touching_busy_set() {
        let (dispatcher, _registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;

        let picked = dispatcher.select_best(Language::Spanish).await.unwrap();
        assert!(picked.is_none());
        assert_eq!(dispatcher.busy_count().await, 0);
        assert_eq!(dispatcher.queued_count(Language::English).await, 1);
    }

    #[tokio::test]
    async fn never_selects_unavailable_or_busy_agents() {
        let (dispatcher, registry) = dispatcher_with_agents(&[
            ("agent-a", "15550000001", Language::English),
            ("agent-b", "15550000002", Language::English),
            ("agent-c", "15550000003", Language::English),
        ])
        .await;

        // Stale entry: agent-a flips unavailable after its entry was queued.
        registry
            .set_availability(&AgentId::from("agent-a"), false)
            .await
            .unwrap();

        let first = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        assert_eq!(first.id, AgentId::from("agent-b"));
        dispatcher.reserve(&first.id, &CallId::from("call-1")).await.unwrap();

        let second = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        assert_eq!(second.id, AgentId::from("agent-c"));

        // Partition is exhausted: agent-a's entry was discarded, not reinserted.
        assert!(dispatcher.select_best(Language::English).await.unwrap().is_none());
        assert_eq!(dispatcher.queued_count(Language::English).await, 0);
    }

    #[tokio::test]
    async fn release_reinserts_into_exactly_one_partition_with_updated_metrics() {
        let (dispatcher, _registry) = dispatcher_with_agents(&[
            ("agent-a", "15550000001", Language::English),
            ("agent-s", "15550000009", Language::Spanish),
        ])
        .await;

        let handle = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        dispatcher.reserve(&handle.id, &CallId::from("call-1")).await.unwrap();
        assert_eq!(dispatcher.busy_count().await, 1);

        dispatcher.release(&handle.id, 90.0).await.unwrap();
        assert_eq!(dispatcher.busy_count().await, 0);
        assert_eq!(dispatcher.queued_count(Language::English).await, 1);
        assert_eq!(dispatcher.queued_count(Language::Spanish).await, 1);

        let snapshot = dispatcher.snapshot().await.unwrap();
        let english = &snapshot.languages[&Language::English];
        let agent = english.iter().find(|a| a.agent_id == "agent-a").unwrap();
        assert!(agent.available);
        assert_eq!(agent.total_calls, 1);
        assert_eq!(agent.recent_call_count, 1);
        assert_eq!(agent.avg_call_duration_seconds, 90.0);

        // And it is selectable again.
        let again = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        assert_eq!(again.id, handle.id);
    }

    #[tokio::test]
    async fn feedback_lowers_reinserted_score() {
        let (dispatcher, _registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;

        let handle = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        dispatcher.reserve(&handle.id, &CallId::from("call-1")).await.unwrap();

        dispatcher.apply_feedback(&handle.id, 4).await.unwrap();
        dispatcher.apply_feedback(&handle.id, 2).await.unwrap();
        dispatcher.release(&handle.id, 0.0).await.unwrap();

        // One rolling-window call (+10), mean rating 3.0 (-15)
        let snapshot = dispatcher.snapshot().await.unwrap();
        let agent = &snapshot.languages[&Language::English][0];
        assert_eq!(agent.avg_rating, 3.0);
        assert_eq!(agent.score, -5.0);
    }

    #[tokio::test]
    async fn rejects_out_of_scale_ratings() {
        let (dispatcher, _registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;

        let err = dispatcher
            .apply_feedback(&AgentId::from("agent-a"), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidRating { rating: 5 }));

        let err = dispatcher
            .apply_feedback(&AgentId::from("agent-a"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidRating { rating: 0 }));
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let (dispatcher, registry) = dispatcher_with_agents(&[
            ("agent-a", "15550000001", Language::English),
            ("agent-b", "15550000002", Language::Spanish),
        ])
        .await;
        set_recent_calls(&registry, "agent-a", 2).await;

        dispatcher.rebuild().await.unwrap();
        let first = dispatcher.snapshot().await.unwrap();

        dispatcher.rebuild().await.unwrap();
        let second = dispatcher.snapshot().await.unwrap();

        assert_eq!(first.languages, second.languages);
        assert_eq!(dispatcher.queued_count(Language::English).await, 1);
        assert_eq!(dispatcher.queued_count(Language::Spanish).await, 1);
    }

    #[tokio::test]
    async fn rolling_window_reset_zeroes_recent_counts() {
        let (dispatcher, registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;
        set_recent_calls(&registry, "agent-a", 7).await;
        dispatcher.rebuild().await.unwrap();

        dispatcher.reset_rolling_window().await.unwrap();

        let snapshot = dispatcher.snapshot().await.unwrap();
        let agent = &snapshot.languages[&Language::English][0];
        assert_eq!(agent.recent_call_count, 0);
        assert_eq!(agent.score, 0.0);
    }

    #[tokio::test]
    async fn release_of_unknown_agent_is_a_noop() {
        let (dispatcher, _registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;

        dispatcher
            .release(&AgentId::from("ghost"), 30.0)
            .await
            .unwrap();
        assert_eq!(dispatcher.queued_count(Language::English).await, 1);
    }

    #[tokio::test]
    async fn reserve_is_idempotent_for_the_same_call() {
        let (dispatcher, _registry) =
            dispatcher_with_agents(&[("agent-a", "15550000001", Language::English)]).await;

        let handle = dispatcher.select_best(Language::English).await.unwrap().unwrap();
        let call = CallId::from("call-1");
        dispatcher.reserve(&handle.id, &call).await.unwrap();
        dispatcher.reserve(&handle.id, &call).await.unwrap();
        assert_eq!(dispatcher.busy_count().await, 1);
    }
}

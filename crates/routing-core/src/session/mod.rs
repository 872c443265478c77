//! # Call Session Store
//!
//! Tracks in-flight call state across the several round trips of an IVR
//! interaction, keyed by the opaque call identifier the telephony layer
//! attaches to every callback.
//!
//! A session is created when the call first reaches the core, mutated in
//! place as the caller selects a language and an agent is reserved, and
//! removed exactly once at call end, which also yields the elapsed duration.
//! Telephony callbacks are delivered at-least-once, so duplicate `create`
//! calls are no-ops and a second `end` for the same call is an
//! [`UnknownSession`](crate::RoutingError::UnknownSession) error rather than
//! a second round of duration accounting.
//!
//! The store is a sharded concurrent map: callbacks for different calls never
//! block each other, while racing callbacks for the *same* call resolve
//! through per-key atomicity (one `remove` wins, the loser observes a missing
//! session).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::agent::{AgentId, Language};
use crate::error::{Result, RoutingError};

/// Opaque per-call identifier assigned by the telephony layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh identifier (tests and demos; production ids arrive
    /// from the telephony collaborator).
    pub fn new() -> Self {
        CallId(Uuid::new_v4().to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session is in the IVR interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CallSessionState {
    /// Session exists; no language chosen yet
    Created,
    /// Caller picked a language
    LanguageSelected,
    /// An agent has been reserved for the call
    AgentAssigned,
}

/// In-flight state for one call.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Correlation key
    pub call_id: CallId,
    /// Caller identifier
    pub customer_phone: String,
    /// Selected language, once the caller chooses one
    pub language: Option<Language>,
    /// Reserved agent, once dispatch succeeds
    pub agent_id: Option<AgentId>,
    /// Lifecycle state
    pub state: CallSessionState,
    /// Wall-clock creation time (for call records)
    pub created_at: DateTime<Utc>,
    /// Monotonic creation instant (for duration math)
    started_at: Instant,
}

impl CallSession {
    fn new(call_id: CallId, customer_phone: String) -> Self {
        Self {
            call_id,
            customer_phone,
            language: None,
            agent_id: None,
            state: CallSessionState::Created,
            created_at: Utc::now(),
            started_at: Instant::now(),
        }
    }

    /// Seconds elapsed since the session was created.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

/// Aggregate counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStoreStats {
    pub active: usize,
    pub total_created: u64,
    pub total_ended: u64,
}

/// Concurrency-safe store of in-flight call sessions.
pub struct SessionStore {
    sessions: DashMap<CallId, CallSession>,
    total_created: AtomicU64,
    total_ended: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            total_created: AtomicU64::new(0),
            total_ended: AtomicU64::new(0),
        }
    }

    /// Insert a new session if the call is not already tracked.
    ///
    /// Returns `true` when a session was created, `false` for a duplicate
    /// delivery of the originating telephony event.
    pub fn create(&self, call_id: CallId, customer_phone: &str) -> bool {
        match self.sessions.entry(call_id.clone()) {
            Entry::Occupied(_) => {
                debug!("duplicate create for call {}, ignoring", call_id);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(CallSession::new(call_id, customer_phone.to_string()));
                self.total_created.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Record the caller's language selection.
    pub fn set_language(&self, call_id: &CallId, language: Language) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| RoutingError::unknown_session(&call_id.0))?;
        session.language = Some(language);
        if session.state == CallSessionState::Created {
            session.state = CallSessionState::LanguageSelected;
        }
        Ok(())
    }

    /// Record the agent reserved for this call.
    pub fn assign_agent(&self, call_id: &CallId, agent_id: AgentId) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| RoutingError::unknown_session(&call_id.0))?;
        session.agent_id = Some(agent_id);
        session.state = CallSessionState::AgentAssigned;
        Ok(())
    }

    /// Remove the agent assignment, returning the agent that was assigned.
    ///
    /// Used after a failed dial, so that the eventual `end` cannot release
    /// the same agent a second time.
    pub fn clear_agent(&self, call_id: &CallId) -> Result<Option<AgentId>> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| RoutingError::unknown_session(&call_id.0))?;
        let agent = session.agent_id.take();
        if agent.is_some() {
            session.state = CallSessionState::LanguageSelected;
        }
        Ok(agent)
    }

    /// Fetch a copy of the session, if it is still in flight.
    pub fn get(&self, call_id: &CallId) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    /// Atomically remove the session and compute the call duration.
    ///
    /// Exactly-once: a second `end` for the same call observes a missing
    /// session and must not re-trigger duration accounting or agent release.
    pub fn end(&self, call_id: &CallId) -> Result<(CallSession, f64)> {
        match self.sessions.remove(call_id) {
            Some((_, session)) => {
                let duration = session.elapsed_seconds();
                self.total_ended.fetch_add(1, Ordering::Relaxed);
                Ok((session, duration))
            }
            None => Err(RoutingError::unknown_session(&call_id.0)),
        }
    }

    /// Number of in-flight sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> SessionStoreStats {
        SessionStoreStats {
            active: self.sessions.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_ended: self.total_ended.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

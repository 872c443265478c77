//! Error types for the routing core.

use thiserror::Error;

/// Result type for routing-core operations.
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors that can occur while routing calls and managing sessions.
///
/// "No agent available" is deliberately absent: an empty partition is a
/// normal outcome and is modeled as `Ok(None)` on the selection path.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// No in-flight session exists for the given call identifier. This
    /// indicates a correlation bug upstream (a callback for a call the core
    /// never saw, or one that already ended).
    #[error("unknown call session: {call_id}")]
    UnknownSession { call_id: String },

    /// The session exists but the caller has not selected a language yet,
    /// so there is no partition to dispatch against.
    #[error("no language selected for call session: {call_id}")]
    LanguageNotSelected { call_id: String },

    /// The agent registry has no record for the given agent.
    #[error("agent not found in registry: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// A registry operation kept failing after bounded retries. Fatal to
    /// the single request that hit it, never to the process.
    #[error("agent registry unavailable during {operation} after {attempts} attempt(s): {message}")]
    RegistryUnavailable {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Feedback rating outside the accepted 1..=4 scale.
    #[error("invalid feedback rating: {rating} (expected 1-4)")]
    InvalidRating { rating: u8 },

    /// The session store is at its configured capacity.
    #[error("active session capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RoutingError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an unknown-session error
    pub fn unknown_session(call_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            call_id: call_id.into(),
        }
    }

    /// Create an agent-not-found error
    pub fn agent_not_found(agent_id: impl Into<String>) -> Self {
        Self::AgentNotFound {
            agent_id: agent_id.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is a transient persistence failure worth retrying.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            RoutingError::Database(_) | RoutingError::RegistryUnavailable { .. }
        )
    }
}

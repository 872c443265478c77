//! Shared types for the orchestration layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::CallSession;

/// Outcome of the dial step, as reported by the telephony collaborator.
///
/// Anything other than [`Completed`](DialStatus::Completed) means the
/// agent-to-caller connection never happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialStatus {
    Completed,
    Busy,
    NoAnswer,
    Failed,
    Timeout,
}

impl DialStatus {
    /// Whether the dial reached the agent.
    pub fn is_completed(&self) -> bool {
        matches!(self, DialStatus::Completed)
    }
}

impl FromStr for DialStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" | "Completed" | "COMPLETED" => Ok(DialStatus::Completed),
            "busy" | "Busy" | "BUSY" => Ok(DialStatus::Busy),
            "no-answer" | "no_answer" | "NoAnswer" | "NO-ANSWER" => Ok(DialStatus::NoAnswer),
            "failed" | "Failed" | "FAILED" => Ok(DialStatus::Failed),
            "timeout" | "Timeout" | "TIMEOUT" => Ok(DialStatus::Timeout),
            _ => Err(format!("unknown dial status: {}", s)),
        }
    }
}

impl fmt::Display for DialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialStatus::Completed => write!(f, "completed"),
            DialStatus::Busy => write!(f, "busy"),
            DialStatus::NoAnswer => write!(f, "no-answer"),
            DialStatus::Failed => write!(f, "failed"),
            DialStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// What `complete_call` hands back to the callback collaborator.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Final session snapshot (removed from the store)
    pub session: CallSession,
    /// Measured call duration
    pub duration_seconds: f64,
    /// Rating that was actually folded into the agent's feedback, if any
    pub rating: Option<u8>,
}

/// Aggregate routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoutingStats {
    /// Calls that got an agent reserved
    pub calls_routed: u64,
    /// Agent requests that found every agent busy
    pub calls_unserved: u64,
    /// Sessions ended
    pub calls_completed: u64,
    /// Valid feedback ratings folded into agent records
    pub feedback_received: u64,
}

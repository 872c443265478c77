//! # Agent Model and Performance Metrics
//!
//! Core agent types for the routing system: strongly-typed identifiers, the
//! language partition key, the registry-backed agent record with its rolling
//! performance metrics, and the priority-score math that drives dispatch
//! ordering.
//!
//! ## Priority Score
//!
//! Lower score = more desirable. The score is computed from an agent's
//! *current* metrics, never cached:
//!
//! - unavailable agents score infinity (hard gate, never selectable)
//! - each call completed inside the current rolling window adds a heavy
//!   penalty, spreading volume across the pool
//! - longer average handling time adds a mild penalty
//! - a good mean feedback rating (1-4 scale) subtracts from the score,
//!   pulling well-rated agents toward the front

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent identifier type for strongly-typed agent references
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId(s.to_string())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Supported caller languages. Each language owns one dispatch partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
}

impl Language {
    /// All languages, in partition order.
    pub const ALL: [Language; 2] = [Language::English, Language::Spanish];
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "english" | "English" | "ENGLISH" => Ok(Language::English),
            "spanish" | "Spanish" | "SPANISH" => Ok(Language::Spanish),
            _ => Err(format!("unknown language: {}", s)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::English => write!(f, "english"),
            Language::Spanish => write!(f, "spanish"),
        }
    }
}

/// Registry-backed agent record with availability and rolling metrics.
///
/// The agent registry is the source of truth for these fields; the record is
/// loaded fresh for every scoring decision and written back exclusively
/// through the dispatcher's reservation/release operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent identifier
    pub id: AgentId,

    /// Number the telephony collaborator dials to reach the agent
    pub contact_number: String,

    /// Language partition; immutable after provisioning
    pub language: Language,

    /// Whether the agent is eligible for a new assignment
    pub available: bool,

    /// Lifetime completed-call count; weight for the running mean
    pub total_calls: u32,

    /// Running mean of completed-call durations, in seconds
    pub avg_call_duration_seconds: f64,

    /// Calls completed within the current rolling window
    pub recent_call_count: u32,

    /// When the agent last finished a call
    pub last_call_time: Option<DateTime<Utc>>,

    /// Accumulated feedback score (ratings are 1-4)
    pub total_feedback_score: f64,

    /// Number of feedback ratings received
    pub feedback_count: u32,
}

impl AgentRecord {
    /// Create a fresh record for a newly provisioned agent.
    pub fn new(id: impl Into<AgentId>, contact_number: impl Into<String>, language: Language) -> Self {
        Self {
            id: id.into(),
            contact_number: contact_number.into(),
            language,
            available: true,
            total_calls: 0,
            avg_call_duration_seconds: 0.0,
            recent_call_count: 0,
            last_call_time: None,
            total_feedback_score: 0.0,
            feedback_count: 0,
        }
    }

    /// Priority score for heap-based routing. Lower score = higher priority.
    pub fn priority_score(&self) -> f64 {
        // Availability is a hard gate
        if !self.available {
            return f64::INFINITY;
        }

        // Recent call count penalty (avoid overloading)
        let mut score = self.recent_call_count as f64 * 10.0;

        // Average call duration in minutes (prefer faster agents)
        score += self.avg_call_duration_seconds / 60.0;

        // Feedback bonus (better ratings = lower score)
        if self.feedback_count > 0 {
            score -= self.mean_rating().unwrap_or(0.0) * 5.0;
        }

        score
    }

    /// Fold a completed call into the running metrics.
    pub fn apply_call(&mut self, duration_seconds: f64) {
        let total_duration = self.avg_call_duration_seconds * self.total_calls as f64;
        self.total_calls += 1;
        self.avg_call_duration_seconds = (total_duration + duration_seconds) / self.total_calls as f64;

        self.recent_call_count += 1;
        self.last_call_time = Some(Utc::now());
    }

    /// Fold a caller rating into the feedback accumulators.
    pub fn apply_feedback(&mut self, rating: u8) {
        self.total_feedback_score += rating as f64;
        self.feedback_count += 1;
    }

    /// Mean feedback rating, if any ratings were received.
    pub fn mean_rating(&self) -> Option<f64> {
        if self.feedback_count > 0 {
            Some(self.total_feedback_score / self.feedback_count as f64)
        } else {
            None
        }
    }

    /// The handle handed to the telephony collaborator on reservation.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            id: self.id.clone(),
            contact_number: self.contact_number.clone(),
            language: self.language,
        }
    }
}

/// What a successful selection returns: enough for the external telephony
/// collaborator to perform the opaque "connect" step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHandle {
    /// Identifier of the reserved agent
    pub id: AgentId,
    /// Number to dial
    pub contact_number: String,
    /// Partition the agent was selected from
    pub language: Language,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(recent: u32, avg_secs: f64) -> AgentRecord {
        let mut a = AgentRecord::new("agent-001", "15550000001", Language::English);
        a.recent_call_count = recent;
        a.avg_call_duration_seconds = avg_secs;
        a
    }

    #[test]
    fn unavailable_agent_scores_infinity() {
        let mut a = record(0, 0.0);
        a.available = false;
        assert_eq!(a.priority_score(), f64::INFINITY);
    }

    #[test]
    fn score_penalizes_recent_calls_and_duration() {
        let a = record(3, 120.0);
        // 3 * 10 + 120 / 60 = 32
        assert_eq!(a.priority_score(), 32.0);
    }

    #[test]
    fn feedback_mean_lowers_score_by_five_per_point() {
        let mut a = record(0, 0.0);
        let before = a.priority_score();
        a.apply_feedback(4);
        a.apply_feedback(2);
        assert_eq!(a.mean_rating(), Some(3.0));
        assert_eq!(a.priority_score(), before - 15.0);
    }

    #[test]
    fn apply_call_updates_running_mean() {
        let mut a = record(0, 0.0);
        a.apply_call(60.0);
        a.apply_call(120.0);
        assert_eq!(a.total_calls, 2);
        assert_eq!(a.recent_call_count, 2);
        assert_eq!(a.avg_call_duration_seconds, 90.0);
        assert!(a.last_call_time.is_some());
    }

    #[test]
    fn language_round_trips_through_strings() {
        for lang in Language::ALL {
            assert_eq!(lang.to_string().parse::<Language>(), Ok(lang));
        }
        assert!("klingon".parse::<Language>().is_err());
    }
}

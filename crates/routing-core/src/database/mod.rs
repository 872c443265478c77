//! # Agent Registry Persistence
//!
//! The agent registry is the durable source of truth for agent identity,
//! language, availability and rolling performance metrics. The routing core
//! is agnostic to the storage technology behind it: everything it needs is
//! the narrow [`AgentRegistry`] contract (load all agents, load one agent,
//! commit field changes, plus provisioning and window-reset helpers).
//!
//! [`SqliteAgentRegistry`] is the bundled implementation, an async sqlx
//! pool over sqlite. All registry calls issued on the dispatch path are
//! wrapped in [`with_retry`], a bounded exponential backoff: transient
//! persistence failures are retried a configured number of times and then
//! surfaced as [`RegistryUnavailable`](crate::RoutingError::RegistryUnavailable),
//! fatal to that single request only.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::agent::{AgentId, AgentRecord, Language};
use crate::config::{DatabaseConfig, RetryPolicy};
use crate::error::{Result, RoutingError};

/// A finished call, as persisted for historical reporting.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call_id: String,
    pub customer_phone: String,
    pub agent_id: Option<AgentId>,
    pub language: Option<Language>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub disposition: String,
    pub feedback_rating: Option<u8>,
}

/// Storage contract for agent state.
///
/// Implementations must be safe for concurrent use; every method is a
/// bounded, synchronous-in-spirit round trip (no streaming, no long polls).
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Load every agent record.
    async fn load_agents(&self) -> Result<Vec<AgentRecord>>;

    /// Load a single agent by id.
    async fn load_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>>;

    /// Write back a full agent record. Errors with
    /// [`AgentNotFound`](crate::RoutingError::AgentNotFound) if the agent
    /// was never provisioned.
    async fn commit_agent(&self, agent: &AgentRecord) -> Result<()>;

    /// Flip just the availability flag. Returns `false` when no such agent
    /// exists.
    async fn set_availability(&self, agent_id: &AgentId, available: bool) -> Result<bool>;

    /// Provision an agent, or refresh its contact/language if it exists.
    /// Performance metrics of an existing agent are preserved.
    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()>;

    /// Zero every agent's rolling-window call count.
    async fn reset_recent_call_counts(&self) -> Result<()>;

    /// Persist a finished-call record for historical reporting.
    async fn record_call(&self, record: &CallRecord) -> Result<()>;
}

/// Async sqlite-backed agent registry.
#[derive(Clone)]
pub struct SqliteAgentRegistry {
    pool: SqlitePool,
}

impl SqliteAgentRegistry {
    /// Open (or create) the registry described by the database config.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        match &config.database_path {
            Some(path) => Self::connect(path, config.max_connections).await,
            None => Self::in_memory().await,
        }
    }

    /// Connect to a sqlite database file, creating it if missing.
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(RoutingError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        debug!("agent registry opened at {}", path);
        Ok(Self { pool })
    }

    /// In-memory registry for tests and demos.
    ///
    /// Pinned to a single pooled connection: every sqlite `:memory:`
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(RoutingError::Database)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                contact_number TEXT NOT NULL,
                language TEXT NOT NULL,
                available INTEGER NOT NULL DEFAULT 1,
                total_calls INTEGER NOT NULL DEFAULT 0,
                avg_call_duration REAL NOT NULL DEFAULT 0.0,
                recent_call_count INTEGER NOT NULL DEFAULT 0,
                last_call_time TEXT,
                total_feedback_score REAL NOT NULL DEFAULT 0.0,
                feedback_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS call_records (
                call_id TEXT PRIMARY KEY,
                customer_phone TEXT NOT NULL,
                agent_id TEXT,
                language TEXT,
                started_at TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                disposition TEXT NOT NULL,
                feedback_rating INTEGER
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn row_to_agent(row: &SqliteRow) -> Result<AgentRecord> {
        let language_text: String = row.try_get("language")?;
        let language = Language::from_str(&language_text)
            .map_err(|e| RoutingError::internal(format!("corrupt agent row: {}", e)))?;

        Ok(AgentRecord {
            id: AgentId(row.try_get("agent_id")?),
            contact_number: row.try_get("contact_number")?,
            language,
            available: row.try_get("available")?,
            total_calls: row.try_get::<i64, _>("total_calls")? as u32,
            avg_call_duration_seconds: row.try_get("avg_call_duration")?,
            recent_call_count: row.try_get::<i64, _>("recent_call_count")? as u32,
            last_call_time: row.try_get("last_call_time")?,
            total_feedback_score: row.try_get("total_feedback_score")?,
            feedback_count: row.try_get::<i64, _>("feedback_count")? as u32,
        })
    }
}

#[async_trait]
impl AgentRegistry for SqliteAgentRegistry {
    async fn load_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn load_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1")
            .bind(&agent_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn commit_agent(&self, agent: &AgentRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                contact_number = $1,
                language = $2,
                available = $3,
                total_calls = $4,
                avg_call_duration = $5,
                recent_call_count = $6,
                last_call_time = $7,
                total_feedback_score = $8,
                feedback_count = $9
            WHERE agent_id = $10
            "#,
        )
        .bind(&agent.contact_number)
        .bind(agent.language.to_string())
        .bind(agent.available)
        .bind(agent.total_calls)
        .bind(agent.avg_call_duration_seconds)
        .bind(agent.recent_call_count)
        .bind(agent.last_call_time)
        .bind(agent.total_feedback_score)
        .bind(agent.feedback_count)
        .bind(&agent.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RoutingError::agent_not_found(&agent.id.0));
        }
        Ok(())
    }

    async fn set_availability(&self, agent_id: &AgentId, available: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE agents SET available = $1 WHERE agent_id = $2")
            .bind(available)
            .bind(&agent_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_agent(&self, agent: &AgentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                agent_id, contact_number, language, available,
                total_calls, avg_call_duration, recent_call_count,
                last_call_time, total_feedback_score, feedback_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(agent_id) DO UPDATE SET
                contact_number = excluded.contact_number,
                language = excluded.language
            "#,
        )
        .bind(&agent.id.0)
        .bind(&agent.contact_number)
        .bind(agent.language.to_string())
        .bind(agent.available)
        .bind(agent.total_calls)
        .bind(agent.avg_call_duration_seconds)
        .bind(agent.recent_call_count)
        .bind(agent.last_call_time)
        .bind(agent.total_feedback_score)
        .bind(agent.feedback_count)
        .execute(&self.pool)
        .await?;

        debug!("provisioned agent {} ({})", agent.id, agent.language);
        Ok(())
    }

    async fn reset_recent_call_counts(&self) -> Result<()> {
        sqlx::query("UPDATE agents SET recent_call_count = 0")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_call(&self, record: &CallRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_records (
                call_id, customer_phone, agent_id, language,
                started_at, duration_seconds, disposition, feedback_rating
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(call_id) DO NOTHING
            "#,
        )
        .bind(&record.call_id)
        .bind(&record.customer_phone)
        .bind(record.agent_id.as_ref().map(|a| a.0.clone()))
        .bind(record.language.map(|l| l.to_string()))
        .bind(record.started_at)
        .bind(record.duration_seconds)
        .bind(&record.disposition)
        .bind(record.feedback_rating.map(|r| r as i32))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Run a registry operation under the bounded-backoff retry policy.
///
/// Only transient persistence failures are retried; domain errors (unknown
/// agent, invalid rating) pass straight through.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = Duration::from_millis(policy.initial_backoff_ms);
    let mut last_message = String::new();

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                last_message = err.to_string();
                if attempt < policy.max_attempts {
                    warn!(
                        "registry {} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, policy.max_attempts, backoff, last_message
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(RoutingError::RegistryUnavailable {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
        message: last_message,
    })
}

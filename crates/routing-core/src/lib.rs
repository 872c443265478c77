//! # ivrflow-routing-core
//!
//! Agent routing and call session management for the ivrflow IVR stack.
//!
//! An incoming interactive-voice-response call is tracked as a session
//! across the several round trips of the IVR interaction; when the caller
//! asks for a human, a priority dispatcher picks the best available agent
//! from the caller's language partition, reserves it, and releases it back
//! into the pool - rescored from live performance and feedback metrics -
//! once the call ends.
//!
//! ## Components
//!
//! - [`agent`]: agent model, language partitions and the priority-score math
//! - [`dispatcher`]: per-language min-heaps with lazy deletion, busy set,
//!   reserve/release lifecycle
//! - [`session`]: concurrency-safe in-flight call session store
//! - [`orchestrator`]: the [`CallRoutingEngine`] tying the pieces together
//!   and driving the call lifecycle
//! - [`database`]: the agent registry persistence contract and its sqlx
//!   sqlite implementation
//! - [`server`]: engine lifecycle wrapper with the rolling-window reset and
//!   monitor background tasks
//!
//! ## Quick Start
//!
//! ```rust
//! use ivrflow_routing_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let engine = CallRoutingEngine::new(RoutingConfig::default()).await?;
//! engine.provision_agent("agent-001", "15550000001", Language::English).await?;
//! engine.rebuild().await?;
//!
//! // One IVR interaction, as driven by the telephony callback handler:
//! let call = CallId::from("call-abc123");
//! engine.begin_session(call.clone(), "15551234567")?;
//! engine.select_language(&call, Language::English)?;
//!
//! if let Some(agent) = engine.connect_to_agent(&call).await? {
//!     println!("dial {} to reach agent {}", agent.contact_number, agent.id);
//!     engine.handle_dial_status(&call, DialStatus::Completed).await?;
//! }
//!
//! let outcome = engine.complete_call(&call, Some("4")).await?;
//! println!("call lasted {:.1}s", outcome.duration_seconds);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod prelude;
pub mod server;
pub mod session;

pub use config::RoutingConfig;
pub use error::{Result, RoutingError};
pub use orchestrator::CallRoutingEngine;
pub use server::{RoutingServer, RoutingServerBuilder};

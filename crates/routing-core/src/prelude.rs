//! Common imports for working with the routing core.
//!
//! ```rust
//! use ivrflow_routing_core::prelude::*;
//! ```

pub use crate::agent::{AgentHandle, AgentId, AgentRecord, Language};
pub use crate::config::RoutingConfig;
pub use crate::database::{AgentRegistry, CallRecord, SqliteAgentRegistry};
pub use crate::dispatcher::{AgentSnapshot, PoolSnapshot, PriorityDispatcher};
pub use crate::error::{Result, RoutingError};
pub use crate::orchestrator::{CallOutcome, CallRoutingEngine, DialStatus, RoutingStats};
pub use crate::server::{RoutingServer, RoutingServerBuilder};
pub use crate::session::{CallId, CallSession, CallSessionState, SessionStore};

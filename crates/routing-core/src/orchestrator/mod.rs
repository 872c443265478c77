//! # Call Orchestration
//!
//! The coordination layer between the IVR callback collaborator, the
//! priority dispatcher, the session store and the agent registry. It owns
//! the session lifecycle: every telephony callback maps onto exactly one
//! engine operation.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │            IVR callback collaborator (out of scope)      │
//! └──────┬───────────┬──────────────┬───────────┬────────────┘
//!        │ begin     │ select_      │ connect_  │ complete_call /
//!        │ _session  │ language     │ to_agent  │ handle_dial_status
//! ┌──────▼───────────▼──────────────▼───────────▼────────────┐
//! │                   CallRoutingEngine                      │
//! ├──────────────┬──────────────────────┬────────────────────┤
//! │ SessionStore │  PriorityDispatcher  │  snapshot channel  │
//! ├──────────────┴──────────┬───────────┴────────────────────┤
//! │                  AgentRegistry (sqlx)                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! On call end the engine sequences: remove the session and measure the
//! duration, fold a valid feedback rating into the serving agent, release
//! the agent back into its partition, persist the call record, and push the
//! fresh pool snapshot to observers. A dial that never connected releases
//! the agent immediately with duration zero instead - no feedback exists
//! for a conversation that never happened.

pub mod core;
pub mod types;

pub use core::CallRoutingEngine;
pub use types::{CallOutcome, DialStatus, RoutingStats};

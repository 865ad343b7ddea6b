//! Agent presence tracking and capability-based task routing.
//!
//! The registry ingests heartbeat signals and maintains one
//! [`AgentPresence`] per agent id — last write wins, stale entries are
//! prunable. Routing filters agents by heartbeat freshness and required
//! capabilities, then ranks the survivors by availability and load.
//!
//! # Main types
//!
//! - [`AgentRegistry`] — Heartbeat ingestion, presence queries, pruning.
//! - [`RouteOutcome`] — Result of routing a task, including the full ranking.
//! - [`RankedAgent`] — Per-agent eligibility and score for one task.

/// Presence bookkeeping and the registry itself.
pub mod presence;
/// Task-to-agent ranking and selection.
pub mod router;

pub use presence::{AgentPresence, AgentRegistry, HealthSummary};
pub use router::{rank_agents, IneligibilityReason, RankedAgent, RouteContext, RouteOutcome};

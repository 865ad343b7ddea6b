//! The task lifecycle state machine at the heart of the swarm.
//!
//! A task request flows policy → approval gate → transport; receipts and
//! results flow back in; a caller-driven maintenance sweep retries or
//! times out whatever went quiet. Every transition appends to the
//! record's history, lands in the journal (crash recovery), and emits a
//! signed audit entry.
//!
//! # Main types
//!
//! - [`TaskOrchestrator`] — Dispatch, ingest, review, maintenance.
//! - [`TaskRecord`] / [`TaskStatus`] / [`TaskEvent`] — Persisted state.
//! - [`DispatchOutcome`] — Structured result of a dispatch call.
//! - [`OrchestratorConfig`] — Timeout and retry knobs (TOML-loadable).

/// Timing and retry configuration.
pub mod config;
/// The orchestrator itself.
pub mod engine;
/// Approval-queue ordering.
pub mod queue;
/// Records, events, outcomes, filters.
pub mod types;

pub use config::OrchestratorConfig;
pub use engine::TaskOrchestrator;
pub use queue::rank_pending_approvals;
pub use types::{
    ApprovalReviewStatus, ApprovalState, DispatchOutcome, DispatchRequest, HistoryEntry,
    MaintenanceSummary, OrchestratorMetrics, ReviewDecision, SendReason, TaskEvent, TaskFilter,
    TaskRecord, TaskStatus,
};

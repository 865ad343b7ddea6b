//! Core types and error definitions for the Apiary swarm framework.
//!
//! This crate provides the foundational pieces shared across all Apiary
//! crates: the unified error type, the validated wire-message contracts,
//! the clock abstraction used to keep time-dependent logic deterministic,
//! and the transport seam the orchestrator dispatches through.
//!
//! # Main types
//!
//! - [`ApiaryError`] — Unified error enum for all Apiary subsystems.
//! - [`ApiaryResult`] — Convenience alias for `Result<T, ApiaryError>`.
//! - [`TaskRequest`] / [`TaskReceipt`] / [`TaskResult`] — The task protocol.
//! - [`HeartbeatSignal`] — Agent liveness and load reporting.
//! - [`Clock`] — Injectable time source (epoch milliseconds).
//! - [`Transport`] — Abstract message delivery to a worker agent.

/// Injectable clock abstraction.
pub mod clock;
/// Validated wire-message contracts for the swarm protocol.
pub mod message;
/// Abstract transport seam used to deliver task requests.
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use message::{
    AgentStatus, Artifact, Envelope, HandshakeRequest, HandshakeResponse, HeartbeatSignal,
    ResultStatus, TaskPriority, TaskReceipt, TaskRequest, TaskResult,
};
pub use transport::Transport;

/// Top-level error type for the Apiary framework.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiaryError {
    /// A wire message failed structural validation at a trust boundary.
    #[error("Contract error: {0}")]
    Contract(String),

    /// An error from the agent registry or task router.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error raised while evaluating a policy.
    #[error("Policy error: {0}")]
    Policy(String),

    /// An error from the recommendation planner (invalid or cyclic DAG).
    #[error("Planner error: {0}")]
    Planner(String),

    /// An error from the task orchestrator state machine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error from the signed audit log.
    #[error("Audit error: {0}")]
    Audit(String),

    /// An error from a persistence store (journal or audit file).
    #[error("Store error: {0}")]
    Store(String),

    /// A transport-level delivery failure. Recoverable: drives retry logic.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ApiaryError`].
pub type ApiaryResult<T> = Result<T, ApiaryError>;

/// Normalizes a list of free-form labels (capabilities, risk tags):
/// trims whitespace, drops empties, and deduplicates preserving first
/// occurrence order.
pub fn normalize_labels<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_owned()) {
            out.push(trimmed.to_owned());
        }
    }
    out
}

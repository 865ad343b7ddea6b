//! Turns a set of interdependent recommendations into a dispatchable batch.
//!
//! The compiler wires each recommendation's `dependsOn` list into a
//! validated, cycle-free task DAG with a computed depth per node; the
//! packager then renders DAG nodes into swarm task requests, routing
//! approval-pending work into a `blocked` list instead of silently
//! dropping (or silently dispatching) it.
//!
//! A dependency cycle is fatal to the whole compilation — the error names
//! the recommendation ids on the cycle, and no partial DAG is returned.
//!
//! # Main types
//!
//! - [`Recommendation`] — Validated input shape.
//! - [`TaskDag`] / [`DagTask`] — The compiled DAG.
//! - [`PackagedDag`] — Task requests plus blocked tasks.

/// The compiler and DAG validation.
pub mod dag;
/// Rendering a DAG into task requests.
pub mod packager;
/// Input types accepted from upstream planners.
pub mod recommendation;

pub use dag::{
    assert_valid_dag, compile_recommendation_dag, validate_dag, ApprovalStatus, DagEdge,
    DagSummary, DagTask, DagValidation, PolicyGate, TaskDag,
};
pub use packager::{package_dag, BlockedTask, PackageOptions, PackageStats, PackagedDag};
pub use recommendation::{PlanPriority, Recommendation, RollbackPlan, VerificationPlan};

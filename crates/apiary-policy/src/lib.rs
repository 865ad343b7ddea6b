//! Policy gates applied before a task reaches the transport.
//!
//! Three pure decision surfaces:
//!
//! - the dispatch policy blocks or sanitizes a task request before send,
//! - the approval policy decides whether a human must sign off and at
//!   what authority level,
//! - the fail-closed risk validator treats incomplete risk metadata as
//!   maximum caution, never as a pass.
//!
//! Denials are structured decisions, not errors; redaction happens
//! whether or not the task is allowed.
//!
//! # Main types
//!
//! - [`DispatchPolicyConfig`] / [`DispatchDecision`] — Block/redact/allow.
//! - [`ApprovalPolicyConfig`] / [`ApprovalDecision`] — Task-level gating.
//! - [`ApprovalLevel`] / [`ApprovalGateResult`] — Authority-level gating.
//! - [`RiskTier`] — Shared risk classification.

/// Human-approval gating.
pub mod approval;
/// Dispatch blocking and sensitive-data redaction.
pub mod dispatch;
/// Risk tiers and fail-closed metadata validation.
pub mod risk;

pub use approval::{
    determine_approval_requirement, evaluate_approval_policy, is_approval_satisfied,
    ApprovalDecision, ApprovalGateResult, ApprovalLevel, ApprovalPolicyConfig,
};
pub use dispatch::{
    evaluate_dispatch_policy, BlockedPattern, DenyReason, DispatchDecision, DispatchPolicyConfig,
    RedactionHit, RedactionPattern,
};
pub use risk::{assert_risk_metadata, validate_risk_metadata, RiskMetadata, RiskTier, RiskValidation};

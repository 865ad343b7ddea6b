use crate::risk::RiskTier;
use apiary_core::{normalize_labels, ApiaryResult, TaskPriority, TaskRequest};
use serde::{Deserialize, Serialize};

/// Authority level of a human approver.
///
/// Ordered: `none < team-lead < security < executive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalLevel {
    /// No human sign-off needed.
    #[serde(rename = "none")]
    None,
    /// The requesting team's lead.
    #[serde(rename = "team-lead")]
    TeamLead,
    /// The security review group.
    #[serde(rename = "security")]
    Security,
    /// Executive sign-off.
    #[serde(rename = "executive")]
    Executive,
}

impl ApprovalLevel {
    fn order(self) -> u8 {
        match self {
            ApprovalLevel::None => 0,
            ApprovalLevel::TeamLead => 1,
            ApprovalLevel::Security => 2,
            ApprovalLevel::Executive => 3,
        }
    }
}

/// Whether a recommendation needs human approval, and from whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGateResult {
    /// Whether approval is required at all.
    pub required: bool,
    /// Minimum authority level that satisfies the gate.
    pub level: ApprovalLevel,
    /// Human-readable rationale.
    pub reason: String,
}

/// Table-driven gate over risk tier, confidence, and rollback readiness.
///
/// An unknown tier is treated like `critical`: incomplete classification
/// is never a reason to skip review.
pub fn determine_approval_requirement(
    risk_tier: RiskTier,
    confidence: f64,
    has_rollback_plan: bool,
) -> ApprovalGateResult {
    match risk_tier {
        RiskTier::Critical | RiskTier::Unknown => ApprovalGateResult {
            required: true,
            level: ApprovalLevel::Executive,
            reason: "Critical-risk recommendations require executive approval.".to_owned(),
        },
        RiskTier::High => ApprovalGateResult {
            required: true,
            level: ApprovalLevel::Security,
            reason: "High-risk recommendations require security approval.".to_owned(),
        },
        RiskTier::Medium if confidence < 0.6 || !has_rollback_plan => ApprovalGateResult {
            required: true,
            level: ApprovalLevel::TeamLead,
            reason:
                "Medium-risk recommendations require team-lead approval when confidence is low or rollback is missing."
                    .to_owned(),
        },
        _ => ApprovalGateResult {
            required: false,
            level: ApprovalLevel::None,
            reason: "No approval gate required for this recommendation.".to_owned(),
        },
    }
}

/// Whether the granted approvals satisfy `required_level`.
///
/// Satisfied iff the maximum granted level is at or above the required one.
pub fn is_approval_satisfied(required_level: ApprovalLevel, granted: &[ApprovalLevel]) -> bool {
    let max_granted = granted
        .iter()
        .map(|level| level.order())
        .max()
        .unwrap_or(0);
    max_granted >= required_level.order()
}

/// Configuration for the task-level approval policy.
#[derive(Debug, Clone)]
pub struct ApprovalPolicyConfig {
    /// Whether `critical`-priority tasks always require approval.
    pub critical_requires_approval: bool,
    /// Whether `high`-priority tasks require approval.
    pub high_priority_requires_approval: bool,
    /// Risk tags that trigger approval.
    pub high_risk_tags: Vec<String>,
    /// Required capabilities that trigger approval.
    pub sensitive_capabilities: Vec<String>,
    /// Reviewer group routed to when approval is required.
    pub reviewer_group: String,
}

impl Default for ApprovalPolicyConfig {
    fn default() -> Self {
        Self {
            critical_requires_approval: true,
            high_priority_requires_approval: false,
            high_risk_tags: vec![
                "external_write".to_owned(),
                "legal".to_owned(),
                "finance".to_owned(),
                "security".to_owned(),
            ],
            sensitive_capabilities: vec![
                "legal".to_owned(),
                "finance".to_owned(),
                "security".to_owned(),
                "production-deploy".to_owned(),
            ],
            reviewer_group: "human-review".to_owned(),
        }
    }
}

/// The approval policy's verdict on one task request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Whether a human must approve before dispatch.
    pub required: bool,
    /// Reviewer group to route the request to, when required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_group: Option<String>,
    /// Names of every matched rule.
    pub matched_rules: Vec<String>,
    /// Compact reason string, when required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decides whether a task request needs human approval before dispatch.
/// Pure function of the request and the config.
pub fn evaluate_approval_policy(
    request: &TaskRequest,
    config: &ApprovalPolicyConfig,
) -> ApiaryResult<ApprovalDecision> {
    request.validate()?;

    let mut matched = Vec::new();
    let risk_tags = normalize_labels(request.risk_tags());
    let capabilities = normalize_labels(request.required_capabilities());

    if config.critical_requires_approval && request.priority == TaskPriority::Critical {
        matched.push("critical_priority".to_owned());
    }
    if config.high_priority_requires_approval && request.priority == TaskPriority::High {
        matched.push("high_priority".to_owned());
    }
    if risk_tags.iter().any(|tag| config.high_risk_tags.contains(tag)) {
        matched.push("high_risk_tag".to_owned());
    }
    if capabilities
        .iter()
        .any(|capability| config.sensitive_capabilities.contains(capability))
    {
        matched.push("sensitive_capability".to_owned());
    }
    if request.requires_human_approval() {
        matched.push("manual_override".to_owned());
    }

    let required = !matched.is_empty();
    Ok(ApprovalDecision {
        required,
        reviewer_group: required.then(|| config.reviewer_group.clone()),
        reason: required.then(|| format!("approval_required:{}", matched.join(","))),
        matched_rules: matched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> TaskRequest {
        TaskRequest::new("agent:main", "agent:worker", "Adjust retry budget", 1_000)
    }

    #[test]
    fn test_critical_priority_always_requires_approval() {
        let task = request().with_priority(TaskPriority::Critical);
        let decision = evaluate_approval_policy(&task, &Default::default()).unwrap();
        assert!(decision.required);
        assert!(decision.matched_rules.contains(&"critical_priority".to_owned()));
        assert_eq!(decision.reviewer_group.as_deref(), Some("human-review"));
    }

    #[test]
    fn test_normal_task_passes_without_approval() {
        let decision = evaluate_approval_policy(&request(), &Default::default()).unwrap();
        assert!(!decision.required);
        assert!(decision.matched_rules.is_empty());
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_high_risk_tag_matches() {
        let task = request().with_context_value("riskTags", json!(["external_write"]));
        let decision = evaluate_approval_policy(&task, &Default::default()).unwrap();
        assert!(decision.required);
        assert_eq!(decision.matched_rules, vec!["high_risk_tag".to_owned()]);
        assert_eq!(
            decision.reason.as_deref(),
            Some("approval_required:high_risk_tag")
        );
    }

    #[test]
    fn test_sensitive_capability_and_manual_override_stack() {
        let task = request()
            .with_context_value("requiredCapabilities", json!(["production-deploy"]))
            .with_context_value("requiresHumanApproval", json!(true));
        let decision = evaluate_approval_policy(&task, &Default::default()).unwrap();
        assert_eq!(
            decision.matched_rules,
            vec!["sensitive_capability".to_owned(), "manual_override".to_owned()]
        );
    }

    #[test]
    fn test_gate_critical_needs_executive() {
        let gate = determine_approval_requirement(RiskTier::Critical, 0.99, true);
        assert!(gate.required);
        assert_eq!(gate.level, ApprovalLevel::Executive);
    }

    #[test]
    fn test_gate_high_needs_security() {
        let gate = determine_approval_requirement(RiskTier::High, 0.99, true);
        assert_eq!(gate.level, ApprovalLevel::Security);
    }

    #[test]
    fn test_gate_medium_depends_on_confidence_and_rollback() {
        let gate = determine_approval_requirement(RiskTier::Medium, 0.5, true);
        assert_eq!(gate.level, ApprovalLevel::TeamLead);
        let gate = determine_approval_requirement(RiskTier::Medium, 0.9, false);
        assert_eq!(gate.level, ApprovalLevel::TeamLead);
        let gate = determine_approval_requirement(RiskTier::Medium, 0.9, true);
        assert!(!gate.required);
        assert_eq!(gate.level, ApprovalLevel::None);
    }

    #[test]
    fn test_gate_unknown_tier_escalates_to_executive() {
        let gate = determine_approval_requirement(RiskTier::Unknown, 1.0, true);
        assert!(gate.required);
        assert_eq!(gate.level, ApprovalLevel::Executive);
    }

    #[test]
    fn test_satisfaction_uses_max_granted() {
        assert!(is_approval_satisfied(ApprovalLevel::None, &[]));
        assert!(!is_approval_satisfied(ApprovalLevel::Security, &[]));
        assert!(!is_approval_satisfied(
            ApprovalLevel::Security,
            &[ApprovalLevel::TeamLead]
        ));
        assert!(is_approval_satisfied(
            ApprovalLevel::Security,
            &[ApprovalLevel::TeamLead, ApprovalLevel::Executive]
        ));
        assert!(is_approval_satisfied(
            ApprovalLevel::TeamLead,
            &[ApprovalLevel::TeamLead]
        ));
    }
}

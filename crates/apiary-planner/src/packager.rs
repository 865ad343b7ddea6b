use crate::dag::{assert_valid_dag, DagTask, PolicyGate, TaskDag};
use apiary_core::{ApiaryResult, TaskRequest};
use apiary_policy::RiskTier;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

/// Constraint attached to every approval-gated request.
pub const HUMAN_APPROVAL_CONSTRAINT: &str = "human-approval-required";

/// Options controlling how DAG nodes become task requests.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Sender id stamped on every request.
    pub from_agent_id: String,
    /// Target when neither owner nor risk routing matches.
    pub default_target: String,
    /// Target override per risk tier.
    pub target_by_risk: HashMap<RiskTier, String>,
    /// Target override per owner.
    pub target_by_owner: HashMap<String, String>,
    /// Package approval-pending nodes into `requests` (still flagged)
    /// instead of routing them to `blocked`.
    pub include_approval_pending: bool,
    /// Base for the per-request `created_at`; request `n` gets `base + n`,
    /// preserving the DAG's depth order.
    pub created_at_base: i64,
    /// Constraints prepended to every request.
    pub constraints: Vec<String>,
}

impl PackageOptions {
    /// Creates options with the given `created_at` base.
    pub fn new(created_at_base: i64) -> Self {
        Self {
            from_agent_id: "agent:planner".to_owned(),
            default_target: "agent:ops".to_owned(),
            target_by_risk: HashMap::new(),
            target_by_owner: HashMap::new(),
            include_approval_pending: false,
            created_at_base,
            constraints: Vec::new(),
        }
    }

    /// Includes approval-pending nodes in `requests`, still flagged.
    pub fn include_approval_pending(mut self) -> Self {
        self.include_approval_pending = true;
        self
    }

    /// Adds a per-owner target override.
    pub fn route_owner(mut self, owner: impl Into<String>, target: impl Into<String>) -> Self {
        self.target_by_owner.insert(owner.into(), target.into());
        self
    }

    /// Adds a per-risk-tier target override.
    pub fn route_risk(mut self, tier: RiskTier, target: impl Into<String>) -> Self {
        self.target_by_risk.insert(tier, target.into());
        self
    }
}

/// A node withheld from dispatch pending human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedTask {
    /// The withheld task id.
    pub task_id: String,
    /// Its recommendation id.
    pub recommendation_id: String,
    /// Why the node is blocked.
    pub reason: String,
    /// The gate that blocked it, echoed so no approval metadata is lost.
    pub policy_gate: PolicyGate,
    /// Task ids the node depends on.
    pub dependencies: Vec<String>,
    /// The request to dispatch once the gate opens.
    pub release_request: TaskRequest,
}

/// Counts over one packaging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStats {
    /// Nodes considered.
    pub total_tasks: usize,
    /// Requests produced.
    pub packaged_tasks: usize,
    /// Nodes withheld.
    pub blocked_tasks: usize,
    /// Nodes requiring human approval (packaged or not).
    pub approval_required_count: usize,
}

/// The packager's output: dispatchable requests plus withheld nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagedDag {
    /// Requests ready for the orchestrator, DAG depth order.
    pub requests: Vec<TaskRequest>,
    /// Nodes awaiting human approval.
    pub blocked: Vec<BlockedTask>,
    /// Aggregate counts.
    pub stats: PackageStats,
}

/// Renders a compiled DAG into task requests.
///
/// By default, nodes whose approval gate has not passed go to `blocked`
/// with their gate echoed; `include_approval_pending` packages them
/// anyway, still carrying the gate and the approval constraint. Approval
/// metadata is routed, never dropped.
pub fn package_dag(dag: &TaskDag, options: &PackageOptions) -> ApiaryResult<PackagedDag> {
    assert_valid_dag(dag)?;

    let mut requests = Vec::new();
    let mut blocked = Vec::new();

    for (index, task) in dag.tasks.iter().enumerate() {
        let request = build_request(task, options, options.created_at_base + index as i64);

        let withhold = task.policy_gate.requires_human_approval
            && !task.policy_gate.gate_passed
            && !options.include_approval_pending;

        if withhold {
            debug!(
                recommendation_id = %task.recommendation_id,
                "withholding approval-pending task from dispatch batch"
            );
            blocked.push(BlockedTask {
                task_id: task.task_id.clone(),
                recommendation_id: task.recommendation_id.clone(),
                reason: "awaiting_human_approval".to_owned(),
                policy_gate: task.policy_gate.clone(),
                dependencies: task.dependencies.clone(),
                release_request: request,
            });
        } else {
            requests.push(request);
        }
    }

    let stats = PackageStats {
        total_tasks: dag.tasks.len(),
        packaged_tasks: requests.len(),
        blocked_tasks: blocked.len(),
        approval_required_count: dag
            .tasks
            .iter()
            .filter(|task| task.policy_gate.requires_human_approval)
            .count(),
    };

    Ok(PackagedDag {
        requests,
        blocked,
        stats,
    })
}

fn build_request(task: &DagTask, options: &PackageOptions, created_at: i64) -> TaskRequest {
    let target = resolve_target(task, options);
    let primary_action = task
        .actions
        .first()
        .cloned()
        .unwrap_or_else(|| format!("Execute {}", task.title));
    let text = format!("[{}] {}. {}", task.priority, task.title, primary_action);

    let mut constraints = options.constraints.clone();
    if task.policy_gate.requires_human_approval {
        constraints.push(HUMAN_APPROVAL_CONSTRAINT.to_owned());
    }

    let mut request = TaskRequest {
        id: task.task_id.clone(),
        from: options.from_agent_id.clone(),
        target,
        priority: task.priority.to_task_priority(),
        task: text,
        context: HashMap::new(),
        constraints,
        created_at,
    };
    request.context.insert("planner".to_owned(), json!("apiary-planner"));
    request
        .context
        .insert("recommendationId".to_owned(), json!(task.recommendation_id));
    request
        .context
        .insert("dependencies".to_owned(), json!(task.dependencies));
    request.context.insert(
        "dependencyRecommendationIds".to_owned(),
        json!(task.dependency_recommendation_ids),
    );
    request.context.insert("actions".to_owned(), json!(task.actions));
    request
        .context
        .insert("successCriteria".to_owned(), json!(task.success_criteria));
    request
        .context
        .insert("rollbackPlan".to_owned(), json!(task.rollback_plan));
    request
        .context
        .insert("policyGate".to_owned(), json!(task.policy_gate));
    request
}

fn resolve_target(task: &DagTask, options: &PackageOptions) -> String {
    if let Some(owner) = &task.owner {
        if let Some(target) = options.target_by_owner.get(owner) {
            return target.clone();
        }
    }
    if let Some(target) = options.target_by_risk.get(&task.risk_tier) {
        return target.clone();
    }
    match task.risk_tier {
        RiskTier::High => "agent:ops:high-risk".to_owned(),
        RiskTier::Critical => "agent:ops:critical".to_owned(),
        _ => options.default_target.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{compile_recommendation_dag, ApprovalStatus};
    use crate::recommendation::Recommendation;

    fn pending_high_risk() -> Recommendation {
        Recommendation::new("rec-risky")
            .with_risk_tier("high")
            .with_approval_status("pending")
    }

    #[test]
    fn test_pending_approval_goes_to_blocked_by_default() {
        let dag = compile_recommendation_dag(&[pending_high_risk()]).unwrap();
        let packaged = package_dag(&dag, &PackageOptions::new(1_000)).unwrap();

        assert!(packaged.requests.is_empty());
        assert_eq!(packaged.blocked.len(), 1);
        let blocked = &packaged.blocked[0];
        assert_eq!(blocked.recommendation_id, "rec-risky");
        assert_eq!(blocked.reason, "awaiting_human_approval");
        assert_eq!(
            blocked.policy_gate.approval_status,
            Some(ApprovalStatus::Pending)
        );
        assert_eq!(packaged.stats.blocked_tasks, 1);
        assert_eq!(packaged.stats.approval_required_count, 1);
    }

    #[test]
    fn test_include_approval_pending_packages_flagged() {
        let dag = compile_recommendation_dag(&[pending_high_risk()]).unwrap();
        let packaged = package_dag(
            &dag,
            &PackageOptions::new(1_000).include_approval_pending(),
        )
        .unwrap();

        assert!(packaged.blocked.is_empty());
        assert_eq!(packaged.requests.len(), 1);
        let request = &packaged.requests[0];
        assert!(request
            .constraints
            .contains(&HUMAN_APPROVAL_CONSTRAINT.to_owned()));
        assert_eq!(request.context["policyGate"]["gatePassed"], false);
    }

    #[test]
    fn test_approved_gate_dispatches_with_constraint() {
        let rec = Recommendation::new("rec-ok")
            .with_risk_tier("high")
            .with_approval_status("approved");
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        let packaged = package_dag(&dag, &PackageOptions::new(1_000)).unwrap();

        assert_eq!(packaged.requests.len(), 1);
        // Still flagged as approval-required work.
        assert!(packaged.requests[0]
            .constraints
            .contains(&HUMAN_APPROVAL_CONSTRAINT.to_owned()));
    }

    #[test]
    fn test_created_at_increments_in_depth_order() {
        let recs = vec![
            Recommendation::new("rec-b").depends_on("rec-a"),
            Recommendation::new("rec-a"),
            Recommendation::new("rec-c").depends_on("rec-b"),
        ];
        let dag = compile_recommendation_dag(&recs).unwrap();
        let mut options = PackageOptions::new(5_000);
        options.from_agent_id = "agent:main".to_owned();
        let packaged = package_dag(&dag, &options).unwrap();

        let by_rec: Vec<(&str, i64)> = packaged
            .requests
            .iter()
            .map(|r| {
                (
                    r.context["recommendationId"].as_str().unwrap_or_default(),
                    r.created_at,
                )
            })
            .collect();
        // Roots first; created_at strictly increasing in listed order.
        assert_eq!(by_rec[0], ("rec-a", 5_000));
        assert_eq!(by_rec[1], ("rec-b", 5_001));
        assert_eq!(by_rec[2], ("rec-c", 5_002));
    }

    #[test]
    fn test_target_resolution_owner_then_risk_then_default() {
        let mut owned = Recommendation::new("rec-owner").with_risk_tier("low");
        owned.owner = Some("data-team".to_owned());
        let risky = Recommendation::new("rec-high")
            .with_risk_tier("high")
            .with_approval_status("approved");
        let plain = Recommendation::new("rec-plain").with_risk_tier("low");

        let dag = compile_recommendation_dag(&[owned, risky, plain]).unwrap();
        let options = PackageOptions::new(0).route_owner("data-team", "agent:data");
        let packaged = package_dag(&dag, &options).unwrap();

        let target_of = |rec: &str| {
            packaged
                .requests
                .iter()
                .find(|r| r.context["recommendationId"] == rec)
                .map(|r| r.target.clone())
                .unwrap_or_default()
        };
        assert_eq!(target_of("rec-owner"), "agent:data");
        assert_eq!(target_of("rec-high"), "agent:ops:high-risk");
        assert_eq!(target_of("rec-plain"), "agent:ops");
    }

    #[test]
    fn test_packaged_requests_validate() {
        let rec = Recommendation::new("rec-001").with_risk_tier("low");
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        let packaged = package_dag(&dag, &PackageOptions::new(1_000)).unwrap();
        for request in &packaged.requests {
            request.validate().unwrap();
        }
    }

    #[test]
    fn test_blocked_release_request_is_ready() {
        let dag = compile_recommendation_dag(&[pending_high_risk()]).unwrap();
        let packaged = package_dag(&dag, &PackageOptions::new(1_000)).unwrap();
        let release = &packaged.blocked[0].release_request;
        release.validate().unwrap();
        assert!(release
            .constraints
            .contains(&HUMAN_APPROVAL_CONSTRAINT.to_owned()));
    }
}

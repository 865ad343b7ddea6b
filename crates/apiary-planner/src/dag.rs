use crate::recommendation::{PlanPriority, Recommendation, RollbackPlan};
use apiary_core::{normalize_labels, ApiaryError, ApiaryResult};
use apiary_policy::RiskTier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Normalized approval state carried on a DAG node's policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// A human granted the approval.
    Approved,
    /// Approval requested but not yet decided.
    Pending,
    /// A human denied the approval.
    Denied,
    /// The gate explicitly does not apply.
    NotRequired,
}

impl ApprovalStatus {
    /// Lenient parse of upstream approval markers. Unrecognized markers
    /// are treated as pending: an unreadable status never opens the gate.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" => None,
            "approved" | "granted" | "accepted" => Some(ApprovalStatus::Approved),
            "denied" | "rejected" => Some(ApprovalStatus::Denied),
            "not_required" | "none" | "n/a" => Some(ApprovalStatus::NotRequired),
            _ => Some(ApprovalStatus::Pending),
        }
    }
}

/// The approval gate attached to one DAG node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGate {
    /// Risk tier of the underlying recommendation.
    pub risk_tier: RiskTier,
    /// Whether a human must approve before dispatch.
    pub requires_human_approval: bool,
    /// Current approval state, when the producer supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    /// Whether the gate currently allows dispatch.
    pub gate_passed: bool,
    /// Opaque policy metadata from the producer, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<Value>,
}

/// One node of the compiled task DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagTask {
    /// Deterministic task id derived from the recommendation id.
    pub task_id: String,
    /// The recommendation this node was compiled from.
    pub recommendation_id: String,
    /// Human-readable title.
    pub title: String,
    /// Priority band.
    pub priority: PlanPriority,
    /// Risk tier.
    pub risk_tier: RiskTier,
    /// Suggested owner, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Task ids this node depends on.
    pub dependencies: Vec<String>,
    /// Recommendation ids this node depends on.
    pub dependency_recommendation_ids: Vec<String>,
    /// Concrete actions to execute.
    pub actions: Vec<String>,
    /// How success is judged.
    pub success_criteria: Vec<String>,
    /// Resolved rollback plan (always populated).
    pub rollback_plan: RollbackPlan,
    /// The approval gate.
    pub policy_gate: PolicyGate,
    /// Distance from the roots: 0 for a root, else 1 + max over deps.
    pub depth: u32,
}

/// One dependency edge: `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagEdge {
    /// The prerequisite task id.
    pub from: String,
    /// The dependent task id.
    pub to: String,
}

/// Aggregate counts over a compiled DAG.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagSummary {
    /// Number of nodes.
    pub task_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Nodes with no dependencies.
    pub root_task_count: usize,
    /// Nodes whose gate requires human approval.
    pub approval_required_count: usize,
    /// Nodes whose approval is pending.
    pub approval_pending_count: usize,
    /// Nodes whose gate currently blocks dispatch.
    pub gate_blocked_count: usize,
    /// Maximum depth across all nodes.
    pub max_depth: u32,
}

/// A validated, cycle-free task DAG. Tasks are ordered by
/// `(depth, priority, recommendation id)`, which makes downstream
/// packaging deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDag {
    /// The nodes, depth order.
    pub tasks: Vec<DagTask>,
    /// The dependency edges.
    pub edges: Vec<DagEdge>,
    /// Aggregate counts.
    pub summary: DagSummary,
}

impl TaskDag {
    /// Looks up a node by recommendation id.
    pub fn task_for_recommendation(&self, recommendation_id: &str) -> Option<&DagTask> {
        self.tasks
            .iter()
            .find(|task| task.recommendation_id == recommendation_id)
    }
}

/// Result of structural DAG validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagValidation {
    /// Whether the DAG is well-formed.
    pub valid: bool,
    /// Every problem found.
    pub errors: Vec<String>,
}

fn deterministic_task_id(recommendation_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("apiary-task:{recommendation_id}").as_bytes(),
    )
    .to_string()
}

/// Compiles recommendations into a validated task DAG.
///
/// Errors on duplicate recommendation ids, self or unknown dependencies,
/// and dependency cycles — a cycle names the recommendation ids involved
/// and no partial DAG is ever returned.
pub fn compile_recommendation_dag(recommendations: &[Recommendation]) -> ApiaryResult<TaskDag> {
    // Assign ids and reject duplicates up front.
    let mut ids: Vec<String> = Vec::with_capacity(recommendations.len());
    let mut seen: HashSet<String> = HashSet::new();
    for (index, recommendation) in recommendations.iter().enumerate() {
        let id = recommendation.recommendation_id.trim();
        let id = if id.is_empty() {
            format!("rec-{}", index + 1)
        } else {
            id.to_owned()
        };
        if !seen.insert(id.clone()) {
            return Err(ApiaryError::Planner(format!(
                "duplicate recommendationId: {id}"
            )));
        }
        ids.push(id);
    }

    // Wire dependencies, rejecting self and unknown references.
    let mut dependency_errors: Vec<String> = Vec::new();
    let mut deps_by_id: HashMap<String, Vec<String>> = HashMap::new();
    for (index, recommendation) in recommendations.iter().enumerate() {
        let id = &ids[index];
        let mut deps = normalize_labels(&recommendation.depends_on);
        deps.sort();
        for dep in &deps {
            if dep == id {
                dependency_errors.push(format!("self dependency detected for {id}"));
            } else if !seen.contains(dep) {
                dependency_errors.push(format!("unknown dependency \"{dep}\" referenced by {id}"));
            }
        }
        deps.retain(|dep| dep != id && seen.contains(dep));
        deps_by_id.insert(id.clone(), deps);
    }
    if !dependency_errors.is_empty() {
        return Err(ApiaryError::Planner(format!(
            "invalid dependencies: {}",
            dependency_errors.join("; ")
        )));
    }

    if let Some(cycle) = find_cycle(&ids, &deps_by_id) {
        return Err(ApiaryError::Planner(format!(
            "dependency cycle detected: {}",
            cycle.join(" -> ")
        )));
    }

    let depths = compute_depths(&ids, &deps_by_id);

    let mut tasks: Vec<DagTask> = recommendations
        .iter()
        .enumerate()
        .map(|(index, recommendation)| {
            let id = &ids[index];
            let title = recommendation
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(id)
                .to_owned();

            let risk_tier = recommendation
                .risk_tier
                .as_deref()
                .map_or(RiskTier::Unknown, RiskTier::parse);
            let approval_status = recommendation
                .approval_status
                .as_deref()
                .and_then(ApprovalStatus::parse);
            let requires_human_approval = recommendation
                .requires_human_approval
                .unwrap_or_else(|| risk_tier.defaults_to_approval());
            let gate_passed = !requires_human_approval
                || matches!(
                    approval_status,
                    Some(ApprovalStatus::Approved | ApprovalStatus::NotRequired)
                );

            let dependency_recommendation_ids = deps_by_id.get(id).cloned().unwrap_or_default();
            let mut dependencies: Vec<String> = dependency_recommendation_ids
                .iter()
                .map(|dep| deterministic_task_id(dep))
                .collect();
            dependencies.sort();

            let actions = {
                let actions = normalize_labels(&recommendation.actions);
                if actions.is_empty() {
                    vec![format!("Execute recommendation: {title}")]
                } else {
                    actions
                }
            };

            let success_criteria = resolve_success_criteria(recommendation, id);
            let rollback_plan = resolve_rollback_plan(recommendation);

            DagTask {
                task_id: deterministic_task_id(id),
                recommendation_id: id.clone(),
                title,
                priority: PlanPriority::parse(&recommendation.priority),
                risk_tier,
                owner: recommendation
                    .owner
                    .as_deref()
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_owned),
                dependencies,
                dependency_recommendation_ids,
                actions,
                success_criteria,
                rollback_plan,
                policy_gate: PolicyGate {
                    risk_tier,
                    requires_human_approval,
                    approval_status,
                    gate_passed,
                    passthrough: recommendation.policy_gate.clone(),
                },
                depth: depths.get(id).copied().unwrap_or(0),
            }
        })
        .collect();

    tasks.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.priority.rank().cmp(&b.priority.rank()))
            .then_with(|| a.recommendation_id.cmp(&b.recommendation_id))
    });

    let mut edges: Vec<DagEdge> = tasks
        .iter()
        .flat_map(|task| {
            task.dependencies.iter().map(|dep| DagEdge {
                from: dep.clone(),
                to: task.task_id.clone(),
            })
        })
        .collect();
    edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));

    let summary = DagSummary {
        task_count: tasks.len(),
        edge_count: edges.len(),
        root_task_count: tasks.iter().filter(|t| t.dependencies.is_empty()).count(),
        approval_required_count: tasks
            .iter()
            .filter(|t| t.policy_gate.requires_human_approval)
            .count(),
        approval_pending_count: tasks
            .iter()
            .filter(|t| t.policy_gate.approval_status == Some(ApprovalStatus::Pending))
            .count(),
        gate_blocked_count: tasks.iter().filter(|t| !t.policy_gate.gate_passed).count(),
        max_depth: tasks.iter().map(|t| t.depth).max().unwrap_or(0),
    };

    let dag = TaskDag {
        tasks,
        edges,
        summary,
    };
    assert_valid_dag(&dag)?;
    Ok(dag)
}

fn resolve_success_criteria(recommendation: &Recommendation, id: &str) -> Vec<String> {
    if let Some(plan) = &recommendation.verification_plan {
        let checks = plan.all_checks();
        if !checks.is_empty() {
            return checks;
        }
    }
    let own = normalize_labels(&recommendation.success_criteria);
    if !own.is_empty() {
        return own;
    }
    vec![format!("Verify {id} meets expected outcome")]
}

fn resolve_rollback_plan(recommendation: &Recommendation) -> RollbackPlan {
    let source = recommendation.rollback_plan.clone().unwrap_or_default();
    let steps = {
        let steps = normalize_labels(&source.steps);
        if steps.is_empty() {
            vec![
                "Disable or revert the change".to_owned(),
                "Restore the last known good state".to_owned(),
                "Re-run verification checks".to_owned(),
            ]
        } else {
            steps
        }
    };
    RollbackPlan {
        trigger: source
            .trigger
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some("Regression, policy breach, or failed verification".to_owned())),
        owner: source.owner.or_else(|| recommendation.owner.clone()),
        steps,
        data_recovery: source.data_recovery,
    }
}

/// DFS cycle search with in-progress/visited marking. Returns the cycle
/// path (ids, first repeated id at both ends) when one exists.
fn find_cycle(ids: &[String], deps: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn dfs(
        node: &str,
        deps: &HashMap<String, Vec<String>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].to_vec();
                path.push(node.to_owned());
                return Some(path);
            }
            Some(Mark::Done) => return None,
            None => {}
        }

        marks.insert(node.to_owned(), Mark::InProgress);
        stack.push(node.to_owned());
        if let Some(children) = deps.get(node) {
            for child in children {
                if let Some(path) = dfs(child, deps, marks, stack) {
                    return Some(path);
                }
            }
        }
        stack.pop();
        marks.insert(node.to_owned(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for id in ids {
        if let Some(path) = dfs(id, deps, &mut marks, &mut stack) {
            return Some(path);
        }
    }
    None
}

fn compute_depths(ids: &[String], deps: &HashMap<String, Vec<String>>) -> HashMap<String, u32> {
    fn depth_of(
        node: &str,
        deps: &HashMap<String, Vec<String>>,
        memo: &mut HashMap<String, u32>,
    ) -> u32 {
        if let Some(depth) = memo.get(node) {
            return *depth;
        }
        let depth = deps
            .get(node)
            .map(|children| {
                children
                    .iter()
                    .map(|child| depth_of(child, deps, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(node.to_owned(), depth);
        depth
    }

    let mut memo = HashMap::new();
    for id in ids {
        depth_of(id, deps, &mut memo);
    }
    memo
}

/// Re-checks referential integrity and acyclicity of a compiled DAG.
pub fn validate_dag(dag: &TaskDag) -> DagValidation {
    let mut errors = Vec::new();

    let mut task_ids = HashSet::new();
    for task in &dag.tasks {
        if task.task_id.trim().is_empty() {
            errors.push("task is missing taskId".to_owned());
            continue;
        }
        if !task_ids.insert(task.task_id.clone()) {
            errors.push(format!("duplicate taskId: {}", task.task_id));
        }
    }

    for task in &dag.tasks {
        for dependency in &task.dependencies {
            if dependency == &task.task_id {
                errors.push(format!("task {} cannot depend on itself", task.task_id));
            } else if !task_ids.contains(dependency) {
                errors.push(format!(
                    "task {} has unknown dependency {dependency}",
                    task.task_id
                ));
            }
        }
    }
    for edge in &dag.edges {
        if !task_ids.contains(&edge.from) || !task_ids.contains(&edge.to) {
            errors.push(format!(
                "edge {} -> {} refers to a missing task",
                edge.from, edge.to
            ));
        }
    }

    if errors.is_empty() {
        let ids: Vec<String> = dag.tasks.iter().map(|t| t.task_id.clone()).collect();
        let deps: HashMap<String, Vec<String>> = dag
            .tasks
            .iter()
            .map(|t| (t.task_id.clone(), t.dependencies.clone()))
            .collect();
        if let Some(cycle) = find_cycle(&ids, &deps) {
            errors.push(format!("cycle detected: {}", cycle.join(" -> ")));
        }
    }

    DagValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// Throwing form of [`validate_dag`].
pub fn assert_valid_dag(dag: &TaskDag) -> ApiaryResult<()> {
    let validation = validate_dag(dag);
    if !validation.valid {
        return Err(ApiaryError::Planner(format!(
            "DAG validation failed: {}",
            validation.errors.join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_recommendation_chain() {
        let recs = vec![
            Recommendation::new("rec-001"),
            Recommendation::new("rec-002").depends_on("rec-001"),
        ];
        let dag = compile_recommendation_dag(&recs).unwrap();

        assert_eq!(dag.summary.task_count, 2);
        assert_eq!(dag.summary.edge_count, 1);
        assert_eq!(dag.summary.max_depth, 1);

        let root = dag.task_for_recommendation("rec-001").unwrap();
        assert!(root.dependencies.is_empty());
        assert_eq!(root.depth, 0);

        let child = dag.task_for_recommendation("rec-002").unwrap();
        assert_eq!(child.dependencies, vec![root.task_id.clone()]);
        assert_eq!(child.dependency_recommendation_ids, vec!["rec-001".to_owned()]);
        assert_eq!(child.depth, 1);
    }

    #[test]
    fn test_cycle_is_fatal_and_names_ids() {
        let recs = vec![
            Recommendation::new("rec-a").depends_on("rec-b"),
            Recommendation::new("rec-b").depends_on("rec-a"),
        ];
        let err = compile_recommendation_dag(&recs).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cycle"));
        assert!(message.contains("rec-a"));
        assert!(message.contains("rec-b"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let recs = vec![Recommendation::new("rec-a").depends_on("rec-a")];
        let err = compile_recommendation_dag(&recs).unwrap_err();
        assert!(err.to_string().contains("self dependency"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let recs = vec![Recommendation::new("rec-a").depends_on("rec-missing")];
        let err = compile_recommendation_dag(&recs).unwrap_err();
        assert!(err.to_string().contains("rec-missing"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let recs = vec![Recommendation::new("rec-a"), Recommendation::new("rec-a")];
        assert!(compile_recommendation_dag(&recs).is_err());
    }

    #[test]
    fn test_depth_is_longest_path() {
        // d depends on both a (depth 0) and c (depth 2): depth must be 3.
        let recs = vec![
            Recommendation::new("a"),
            Recommendation::new("b").depends_on("a"),
            Recommendation::new("c").depends_on("b"),
            Recommendation::new("d").depends_on("a").depends_on("c"),
        ];
        let dag = compile_recommendation_dag(&recs).unwrap();
        assert_eq!(dag.task_for_recommendation("d").unwrap().depth, 3);
        assert_eq!(dag.summary.max_depth, 3);
        assert_eq!(dag.summary.root_task_count, 1);
    }

    #[test]
    fn test_tasks_ordered_by_depth() {
        let recs = vec![
            Recommendation::new("z-child").depends_on("a-root"),
            Recommendation::new("a-root"),
        ];
        let dag = compile_recommendation_dag(&recs).unwrap();
        assert_eq!(dag.tasks[0].recommendation_id, "a-root");
        assert_eq!(dag.tasks[1].recommendation_id, "z-child");
    }

    #[test]
    fn test_task_ids_are_deterministic() {
        let dag_a = compile_recommendation_dag(&[Recommendation::new("rec-001")]).unwrap();
        let dag_b = compile_recommendation_dag(&[Recommendation::new("rec-001")]).unwrap();
        assert_eq!(dag_a.tasks[0].task_id, dag_b.tasks[0].task_id);
    }

    #[test]
    fn test_success_criteria_prefer_verification_plan() {
        let mut rec = Recommendation::new("rec-001")
            .with_success_criterion("own criterion");
        rec.verification_plan = Some(crate::recommendation::VerificationPlan {
            checks: vec!["plan check".to_owned()],
            criteria: Vec::new(),
        });
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        assert_eq!(dag.tasks[0].success_criteria, vec!["plan check".to_owned()]);
    }

    #[test]
    fn test_success_criteria_fall_back_to_own_then_placeholder() {
        let rec = Recommendation::new("rec-001").with_success_criterion("own criterion");
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        assert_eq!(dag.tasks[0].success_criteria, vec!["own criterion".to_owned()]);

        let dag = compile_recommendation_dag(&[Recommendation::new("rec-002")]).unwrap();
        assert_eq!(
            dag.tasks[0].success_criteria,
            vec!["Verify rec-002 meets expected outcome".to_owned()]
        );
    }

    #[test]
    fn test_high_risk_defaults_to_approval_gate() {
        let rec = Recommendation::new("rec-001").with_risk_tier("high");
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        let gate = &dag.tasks[0].policy_gate;
        assert!(gate.requires_human_approval);
        assert!(!gate.gate_passed);
        assert_eq!(dag.summary.gate_blocked_count, 1);
    }

    #[test]
    fn test_approved_status_opens_gate() {
        let rec = Recommendation::new("rec-001")
            .with_risk_tier("high")
            .with_approval_status("granted");
        let dag = compile_recommendation_dag(&[rec]).unwrap();
        let gate = &dag.tasks[0].policy_gate;
        assert_eq!(gate.approval_status, Some(ApprovalStatus::Approved));
        assert!(gate.gate_passed);
    }

    #[test]
    fn test_missing_risk_tier_fails_closed() {
        let dag = compile_recommendation_dag(&[Recommendation::new("rec-001")]).unwrap();
        let gate = &dag.tasks[0].policy_gate;
        assert_eq!(gate.risk_tier, RiskTier::Unknown);
        assert!(gate.requires_human_approval);
    }

    #[test]
    fn test_validate_dag_catches_broken_reference() {
        let mut dag = compile_recommendation_dag(&[
            Recommendation::new("rec-001"),
            Recommendation::new("rec-002").depends_on("rec-001"),
        ])
        .unwrap();
        dag.tasks[1].dependencies = vec!["missing-task".to_owned()];

        let validation = validate_dag(&dag);
        assert!(!validation.valid);
        assert!(validation.errors[0].contains("unknown dependency"));
        assert!(assert_valid_dag(&dag).is_err());
    }

    #[test]
    fn test_rollback_plan_defaults_populated() {
        let dag = compile_recommendation_dag(&[Recommendation::new("rec-001")]).unwrap();
        let plan = &dag.tasks[0].rollback_plan;
        assert!(plan.trigger.is_some());
        assert_eq!(plan.steps.len(), 3);
    }
}

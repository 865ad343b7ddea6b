use apiary_core::TaskPriority;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Planner-side priority band, `P0` (most urgent) through `P3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanPriority {
    /// Drop-everything.
    P0,
    /// Urgent.
    P1,
    /// Default.
    #[default]
    P2,
    /// Backlog.
    P3,
}

impl PlanPriority {
    /// Rank for ordering; lower is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            PlanPriority::P0 => 0,
            PlanPriority::P1 => 1,
            PlanPriority::P2 => 2,
            PlanPriority::P3 => 3,
        }
    }

    /// Lenient parse from upstream priority markers. Accepts `P0..P3`,
    /// the dispatch priority names, and numeric bands; anything else
    /// lands on the default.
    pub fn parse(value: &Value) -> Self {
        if let Some(number) = value.as_f64() {
            return if number <= 0.0 {
                PlanPriority::P0
            } else if number <= 1.0 {
                PlanPriority::P1
            } else if number <= 2.0 {
                PlanPriority::P2
            } else {
                PlanPriority::P3
            };
        }

        match value.as_str().map(|s| s.trim().to_lowercase()).as_deref() {
            Some("p0" | "critical") => PlanPriority::P0,
            Some("p1" | "high") => PlanPriority::P1,
            Some("p2" | "medium" | "normal") => PlanPriority::P2,
            Some("p3" | "low") => PlanPriority::P3,
            _ => PlanPriority::P2,
        }
    }

    /// Stable marker string (`P0`..`P3`).
    pub fn as_str(self) -> &'static str {
        match self {
            PlanPriority::P0 => "P0",
            PlanPriority::P1 => "P1",
            PlanPriority::P2 => "P2",
            PlanPriority::P3 => "P3",
        }
    }

    /// Maps the band onto the dispatch priority scale.
    pub fn to_task_priority(self) -> TaskPriority {
        match self {
            PlanPriority::P0 => TaskPriority::Critical,
            PlanPriority::P1 => TaskPriority::High,
            PlanPriority::P2 => TaskPriority::Normal,
            PlanPriority::P3 => TaskPriority::Low,
        }
    }
}

impl std::fmt::Display for PlanPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a recommendation's outcome should be verified.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationPlan {
    /// Concrete checks to run after execution.
    pub checks: Vec<String>,
    /// Alternative spelling some producers use.
    pub criteria: Vec<String>,
}

impl VerificationPlan {
    /// All checks, whichever field the producer used.
    pub fn all_checks(&self) -> Vec<String> {
        let mut merged = self.checks.clone();
        merged.extend(self.criteria.iter().cloned());
        apiary_core::normalize_labels(merged)
    }
}

/// How to undo a recommendation once applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollbackPlan {
    /// What observation triggers the rollback.
    pub trigger: Option<String>,
    /// Who executes the rollback.
    pub owner: Option<String>,
    /// Ordered rollback steps.
    pub steps: Vec<String>,
    /// How to recover data, when applicable.
    pub data_recovery: Option<String>,
}

/// One recommendation produced by an upstream scorer, as accepted at the
/// planner's trust boundary. Unknown producers send loose JSON; the serde
/// defaults here turn that into a well-defined shape before any logic
/// runs on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recommendation {
    /// Stable identifier; DAG nodes are keyed by it.
    pub recommendation_id: String,
    /// Short human-readable summary.
    pub title: Option<String>,
    /// Recommendation ids this one depends on.
    pub depends_on: Vec<String>,
    /// Priority marker in any accepted spelling.
    pub priority: Value,
    /// Risk tier marker.
    pub risk_tier: Option<String>,
    /// Explicit approval flag; inferred from the risk tier when absent.
    pub requires_human_approval: Option<bool>,
    /// Current approval state marker.
    pub approval_status: Option<String>,
    /// Suggested owner/route.
    pub owner: Option<String>,
    /// Concrete actions to execute.
    pub actions: Vec<String>,
    /// Success criteria, used when no verification plan is present.
    pub success_criteria: Vec<String>,
    /// Verification plan; its checks win over `success_criteria`.
    pub verification_plan: Option<VerificationPlan>,
    /// Rollback plan.
    pub rollback_plan: Option<RollbackPlan>,
    /// Opaque policy metadata passed through to the packager.
    pub policy_gate: Option<Value>,
}

impl Recommendation {
    /// Creates a minimal recommendation.
    pub fn new(recommendation_id: impl Into<String>) -> Self {
        Self {
            recommendation_id: recommendation_id.into(),
            ..Self::default()
        }
    }

    /// Adds a dependency on another recommendation.
    pub fn depends_on(mut self, recommendation_id: impl Into<String>) -> Self {
        self.depends_on.push(recommendation_id.into());
        self
    }

    /// Sets the risk tier marker.
    pub fn with_risk_tier(mut self, risk_tier: impl Into<String>) -> Self {
        self.risk_tier = Some(risk_tier.into());
        self
    }

    /// Sets the approval-status marker.
    pub fn with_approval_status(mut self, status: impl Into<String>) -> Self {
        self.approval_status = Some(status.into());
        self
    }

    /// Sets the priority marker.
    pub fn with_priority(mut self, priority: impl Into<Value>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Appends a success criterion.
    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }
}

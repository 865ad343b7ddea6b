use crate::presence::AgentPresence;
use apiary_core::{TaskPriority, TaskRequest};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Why an agent was excluded from routing for a given task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibilityReason {
    /// Last heartbeat is older than the staleness threshold.
    StaleHeartbeat,
    /// The agent does not advertise every required capability.
    MissingCapability,
    /// The agent reported an `error` or `offline` status.
    Unavailable,
}

/// One agent's evaluation against a task, in ranked order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedAgent {
    /// The evaluated agent.
    pub agent_id: String,
    /// Whether the agent may receive this task.
    pub eligible: bool,
    /// Composite routing score; higher is better. Meaningless when ineligible.
    pub score: f64,
    /// Reported load at evaluation time.
    pub load: f64,
    /// Why the agent was excluded, when ineligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibilityReason>,
    /// Required capabilities the agent lacks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_capabilities: Vec<String>,
    /// Age of the last heartbeat relative to routing time.
    pub heartbeat_age_ms: i64,
}

/// Result of routing one task against the current agent population.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    /// Whether any agent qualified.
    pub routed: bool,
    /// The winning agent, when routed.
    pub selected_agent_id: Option<String>,
    /// Every evaluated agent, best first.
    pub ranked: Vec<RankedAgent>,
}

/// Inputs the ranking pass needs beyond the task itself.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext {
    /// Routing time, epoch milliseconds.
    pub now_ms: i64,
    /// Maximum tolerated heartbeat age.
    pub max_staleness_ms: i64,
}

/// Scores every agent against the task and sorts the result, eligible
/// agents first, best score on top.
pub fn rank_agents(
    request: &TaskRequest,
    agents: &[AgentPresence],
    context: &RouteContext,
) -> Vec<RankedAgent> {
    let required = request.required_capabilities();
    let mut ranked: Vec<RankedAgent> = agents
        .iter()
        .map(|agent| evaluate_agent(request, agent, &required, context))
        .collect();

    ranked.sort_by(|a, b| {
        b.eligible
            .cmp(&a.eligible)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.load.partial_cmp(&b.load).unwrap_or(Ordering::Equal))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    ranked
}

/// Picks the best eligible agent for the task, reporting the full ranking
/// either way. Finding no eligible agent yields `routed: false`.
pub fn route_task(
    request: &TaskRequest,
    agents: &[AgentPresence],
    context: &RouteContext,
) -> RouteOutcome {
    let ranked = rank_agents(request, agents, context);
    let selected_agent_id = ranked
        .iter()
        .find(|candidate| candidate.eligible)
        .map(|candidate| candidate.agent_id.clone());

    RouteOutcome {
        routed: selected_agent_id.is_some(),
        selected_agent_id,
        ranked,
    }
}

fn evaluate_agent(
    request: &TaskRequest,
    agent: &AgentPresence,
    required: &[String],
    context: &RouteContext,
) -> RankedAgent {
    let heartbeat_age_ms = context.now_ms - agent.last_heartbeat_at;

    let ineligible = |reason, missing: Vec<String>| RankedAgent {
        agent_id: agent.id.clone(),
        eligible: false,
        score: f64::NEG_INFINITY,
        load: agent.load,
        reason: Some(reason),
        missing_capabilities: missing,
        heartbeat_age_ms,
    };

    if !agent.status.is_available() {
        return ineligible(IneligibilityReason::Unavailable, Vec::new());
    }
    if heartbeat_age_ms > context.max_staleness_ms {
        return ineligible(IneligibilityReason::StaleHeartbeat, Vec::new());
    }
    let missing: Vec<String> = required
        .iter()
        .filter(|capability| !agent.capabilities.contains(capability))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return ineligible(IneligibilityReason::MissingCapability, missing);
    }

    RankedAgent {
        agent_id: agent.id.clone(),
        eligible: true,
        score: score_agent(request, agent, required.len()),
        load: agent.load,
        reason: None,
        missing_capabilities: Vec::new(),
        heartbeat_age_ms,
    }
}

fn score_agent(request: &TaskRequest, agent: &AgentPresence, matching_capabilities: usize) -> f64 {
    let mut score = 100.0;
    score -= agent.load * 60.0;

    if agent.status == apiary_core::AgentStatus::Idle {
        score += 15.0;
    } else {
        score -= 5.0;
    }

    score += matching_capabilities as f64 * 20.0;

    match request.priority {
        TaskPriority::Critical => {
            score += 20.0;
            // A heavily loaded worker is a poor home for critical work.
            if agent.load > 0.85 {
                score -= 25.0;
            }
        }
        TaskPriority::High => score += 10.0,
        TaskPriority::Low => score -= 5.0,
        TaskPriority::Normal => {}
    }

    score
}

use crate::router::{self, RouteContext, RouteOutcome};
use apiary_core::{normalize_labels, AgentStatus, ApiaryResult, HeartbeatSignal, TaskRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_MAX_STALENESS_MS: i64 = 60_000;

/// The registry's view of one agent, derived from its most recent heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPresence {
    /// Opaque agent id (e.g. `agent:main:sub-1`).
    pub id: String,
    /// Availability reported by the last heartbeat.
    pub status: AgentStatus,
    /// Estimated load in `[0, 1]`.
    pub load: f64,
    /// Capabilities the agent currently advertises.
    pub capabilities: Vec<String>,
    /// Timestamp of the last heartbeat, epoch milliseconds.
    pub last_heartbeat_at: i64,
}

/// Counts of total/healthy/stale agents, for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    /// Number of tracked agents.
    pub total: usize,
    /// Agents with a fresh heartbeat and an available status.
    pub healthy: usize,
    /// Agents whose last heartbeat is older than the staleness threshold.
    pub stale: usize,
    /// Agent count per reported status.
    pub by_status: HashMap<String, usize>,
}

/// Tracks per-agent presence from heartbeats and routes tasks to the
/// best eligible worker.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentPresence>,
    max_staleness_ms: i64,
}

impl AgentRegistry {
    /// Creates a registry with the default staleness threshold (60s).
    pub fn new() -> Self {
        Self::with_max_staleness(DEFAULT_MAX_STALENESS_MS)
    }

    /// Creates a registry evicting agents unheard from for `max_staleness_ms`.
    pub fn with_max_staleness(max_staleness_ms: i64) -> Self {
        Self {
            agents: HashMap::new(),
            max_staleness_ms: max_staleness_ms.max(1),
        }
    }

    /// The staleness threshold used when one is not passed explicitly.
    pub fn max_staleness_ms(&self) -> i64 {
        self.max_staleness_ms
    }

    /// Upserts the presence entry for the heartbeat's sender.
    ///
    /// Last write wins on status, load, and timestamp. When `capabilities`
    /// is given it replaces the advertised set (not additive) so the entry
    /// reflects the worker's current configuration; otherwise the previous
    /// set is retained.
    pub fn ingest_heartbeat(
        &mut self,
        signal: &HeartbeatSignal,
        capabilities: Option<&[String]>,
    ) -> ApiaryResult<AgentPresence> {
        signal.validate()?;

        let retained = self
            .agents
            .get(&signal.from)
            .map(|existing| existing.capabilities.clone())
            .unwrap_or_default();
        let capabilities = match capabilities {
            Some(values) => normalize_labels(values.iter()),
            None => retained,
        };

        let presence = AgentPresence {
            id: signal.from.clone(),
            status: signal.status,
            load: signal.load.unwrap_or(0.0).clamp(0.0, 1.0),
            capabilities,
            last_heartbeat_at: signal.timestamp,
        };

        debug!(
            agent_id = %presence.id,
            status = ?presence.status,
            load = presence.load,
            "heartbeat ingested"
        );
        self.agents.insert(presence.id.clone(), presence.clone());
        Ok(presence)
    }

    /// Replaces the advertised capability set for `agent_id`.
    ///
    /// An unknown agent gets a placeholder offline entry so capability
    /// announcements arriving before the first heartbeat are not lost.
    pub fn update_capabilities(
        &mut self,
        agent_id: &str,
        capabilities: &[String],
        now_ms: i64,
    ) -> AgentPresence {
        let entry = self
            .agents
            .entry(agent_id.to_owned())
            .or_insert_with(|| AgentPresence {
                id: agent_id.to_owned(),
                status: AgentStatus::Offline,
                load: 1.0,
                capabilities: Vec::new(),
                last_heartbeat_at: now_ms,
            });
        entry.capabilities = normalize_labels(capabilities.iter());
        entry.clone()
    }

    /// Looks up one agent's presence.
    pub fn get_agent(&self, agent_id: &str) -> Option<&AgentPresence> {
        self.agents.get(agent_id)
    }

    /// Lists all tracked presences, ordered by agent id.
    pub fn list_agents(&self) -> Vec<AgentPresence> {
        let mut agents: Vec<AgentPresence> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Number of tracked agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry tracks no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Evicts agents whose last heartbeat is older than `max_staleness_ms`
    /// relative to `now_ms`. Returns the number of evicted entries.
    pub fn prune_stale(&mut self, now_ms: i64, max_staleness_ms: i64) -> usize {
        let before = self.agents.len();
        self.agents
            .retain(|_, presence| now_ms - presence.last_heartbeat_at <= max_staleness_ms);
        let removed = before - self.agents.len();
        if removed > 0 {
            debug!(removed, "pruned stale agents");
        }
        removed
    }

    /// Counts total/healthy/stale agents as of `now_ms`.
    pub fn health_summary(&self, now_ms: i64) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for presence in self.agents.values() {
            summary.total += 1;
            let status_key = match presence.status {
                AgentStatus::Idle => "idle",
                AgentStatus::Busy => "busy",
                AgentStatus::Error => "error",
                AgentStatus::Offline => "offline",
            };
            *summary.by_status.entry(status_key.to_owned()).or_default() += 1;

            if now_ms - presence.last_heartbeat_at > self.max_staleness_ms {
                summary.stale += 1;
            } else if presence.status.is_available() {
                summary.healthy += 1;
            }
        }
        summary
    }

    /// Routes a task to the best eligible agent.
    ///
    /// Finding no eligible agent is a normal, reportable outcome
    /// (`routed: false`), not an error.
    pub fn route_task(
        &self,
        request: &TaskRequest,
        now_ms: i64,
        max_staleness_ms: Option<i64>,
    ) -> ApiaryResult<RouteOutcome> {
        request.validate()?;
        let context = RouteContext {
            now_ms,
            max_staleness_ms: max_staleness_ms.unwrap_or(self.max_staleness_ms),
        };
        Ok(router::route_task(request, &self.list_agents(), &context))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(from: &str, status: AgentStatus, load: f64, at: i64) -> HeartbeatSignal {
        HeartbeatSignal::new(from, status, at).with_load(load)
    }

    #[test]
    fn test_ingest_upserts_last_write_wins() {
        let mut registry = AgentRegistry::new();
        registry
            .ingest_heartbeat(&heartbeat("agent:a", AgentStatus::Idle, 0.2, 1_000), None)
            .unwrap();
        registry
            .ingest_heartbeat(&heartbeat("agent:a", AgentStatus::Busy, 0.8, 2_000), None)
            .unwrap();

        assert_eq!(registry.len(), 1);
        let presence = registry.get_agent("agent:a").unwrap();
        assert_eq!(presence.status, AgentStatus::Busy);
        assert_eq!(presence.last_heartbeat_at, 2_000);
    }

    #[test]
    fn test_capabilities_replace_on_heartbeat() {
        let mut registry = AgentRegistry::new();
        registry
            .ingest_heartbeat(
                &heartbeat("agent:a", AgentStatus::Idle, 0.1, 1_000),
                Some(&["deploy".to_owned(), "review".to_owned()]),
            )
            .unwrap();
        // No capabilities supplied: previous set is retained.
        registry
            .ingest_heartbeat(&heartbeat("agent:a", AgentStatus::Idle, 0.1, 2_000), None)
            .unwrap();
        assert_eq!(
            registry.get_agent("agent:a").unwrap().capabilities,
            vec!["deploy".to_owned(), "review".to_owned()]
        );
        // Supplied set replaces, never merges.
        registry
            .ingest_heartbeat(
                &heartbeat("agent:a", AgentStatus::Idle, 0.1, 3_000),
                Some(&["triage".to_owned()]),
            )
            .unwrap();
        assert_eq!(
            registry.get_agent("agent:a").unwrap().capabilities,
            vec!["triage".to_owned()]
        );
    }

    #[test]
    fn test_invalid_heartbeat_rejected() {
        let mut registry = AgentRegistry::new();
        let bad = HeartbeatSignal::new("agent:a", AgentStatus::Idle, 1_000).with_load(7.0);
        assert!(registry.ingest_heartbeat(&bad, None).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_prune_stale_drops_old_agents() {
        let mut registry = AgentRegistry::new();
        registry
            .ingest_heartbeat(&heartbeat("agent:old", AgentStatus::Idle, 0.1, 15_000), None)
            .unwrap();
        registry
            .ingest_heartbeat(&heartbeat("agent:new", AgentStatus::Idle, 0.1, 19_800), None)
            .unwrap();

        let removed = registry.prune_stale(20_000, 1_000);
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_agent("agent:old").is_none());
        assert!(registry.get_agent("agent:new").is_some());
    }

    #[test]
    fn test_update_capabilities_for_unknown_agent() {
        let mut registry = AgentRegistry::new();
        let presence =
            registry.update_capabilities("agent:ghost", &["reporting".to_owned()], 5_000);
        assert_eq!(presence.status, AgentStatus::Offline);
        assert_eq!(presence.capabilities, vec!["reporting".to_owned()]);
    }

    #[test]
    fn test_health_summary_counts() {
        let mut registry = AgentRegistry::with_max_staleness(1_000);
        registry
            .ingest_heartbeat(&heartbeat("agent:fresh", AgentStatus::Idle, 0.1, 9_800), None)
            .unwrap();
        registry
            .ingest_heartbeat(&heartbeat("agent:stale", AgentStatus::Busy, 0.5, 1_000), None)
            .unwrap();
        registry
            .ingest_heartbeat(&heartbeat("agent:down", AgentStatus::Offline, 1.0, 9_900), None)
            .unwrap();

        let summary = registry.health_summary(10_000);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.stale, 1);
        assert_eq!(summary.by_status.get("idle"), Some(&1));
        assert_eq!(summary.by_status.get("offline"), Some(&1));
    }
}

use crate::{normalize_labels, ApiaryError, ApiaryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Priority of a task request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work, preempted by everything else.
    Low,
    /// The default priority.
    #[default]
    Normal,
    /// Time-sensitive work.
    High,
    /// Drop-everything work; typically approval-gated.
    Critical,
}

impl TaskPriority {
    /// Rank used for queue ordering: `critical < high < normal < low`.
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Liveness state reported by an agent heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready for work.
    Idle,
    /// Working but reachable.
    Busy,
    /// Reachable but failing; excluded from routing.
    Error,
    /// Announced shutdown; excluded from routing.
    Offline,
}

impl AgentStatus {
    /// Whether an agent in this state may receive new tasks.
    pub fn is_available(self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Busy)
    }
}

/// Terminal outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// The worker completed the task.
    Success,
    /// The worker gave up on the task.
    Failure,
}

/// A file produced or modified by a worker while executing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Human-readable artifact name.
    pub name: String,
    /// Path where the artifact was written.
    pub path: String,
    /// Optional artifact type hint (e.g. "report", "patch").
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

// ---------------------------------------------------------------------------
// TaskRequest
// ---------------------------------------------------------------------------

/// A unit of work addressed to a worker agent. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Unique task identifier (UUID-shaped string).
    pub id: String,
    /// Agent id of the sender.
    pub from: String,
    /// Agent id of the addressed worker. May be empty before routing has
    /// resolved one; a request is never sent without a target.
    #[serde(default)]
    pub target: String,
    /// Priority of the request.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Natural-language description of the objective.
    pub task: String,
    /// Structured context data needed for the task.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Negative constraints the worker must honor.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl TaskRequest {
    /// Creates a request with a fresh UUID and the given creation time.
    pub fn new(
        from: impl Into<String>,
        target: impl Into<String>,
        task: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            target: target.into(),
            priority: TaskPriority::Normal,
            task: task.into(),
            context: HashMap::new(),
            constraints: Vec::new(),
            created_at,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Inserts a single context value.
    pub fn with_context_value(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Appends a constraint.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Capabilities the worker must advertise, read from
    /// `context.requiredCapabilities`. Absent or malformed entries yield an
    /// empty list.
    pub fn required_capabilities(&self) -> Vec<String> {
        self.context_string_list("requiredCapabilities")
    }

    /// Risk tags attached by the producer, read from `context.riskTags`.
    pub fn risk_tags(&self) -> Vec<String> {
        self.context_string_list("riskTags")
    }

    /// Whether the producer explicitly flagged this task for human approval
    /// (`context.requiresHumanApproval`).
    pub fn requires_human_approval(&self) -> bool {
        self.context
            .get("requiresHumanApproval")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn context_string_list(&self, key: &str) -> Vec<String> {
        match self.context.get(key) {
            Some(serde_json::Value::Array(items)) => {
                normalize_labels(items.iter().filter_map(|item| item.as_str()))
            }
            _ => Vec::new(),
        }
    }

    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_uuid("id", &self.id)?;
        require_non_empty("from", &self.from)?;
        require_non_empty("task", &self.task)?;
        require_non_negative("createdAt", self.created_at)?;
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("task_request", value, Self::validate)
    }
}

// ---------------------------------------------------------------------------
// TaskReceipt
// ---------------------------------------------------------------------------

/// A worker's acknowledgement that it accepted (or rejected) a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReceipt {
    /// Id of the request being acknowledged.
    pub task_id: String,
    /// Agent id of the worker.
    pub from: String,
    /// Whether the worker accepted the task.
    pub accepted: bool,
    /// Optional rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Worker's completion estimate in milliseconds, when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<i64>,
    /// When the worker produced the receipt, epoch milliseconds.
    pub timestamp: i64,
}

impl TaskReceipt {
    /// Creates an acceptance receipt.
    pub fn accepted(task_id: impl Into<String>, from: impl Into<String>, timestamp: i64) -> Self {
        Self {
            task_id: task_id.into(),
            from: from.into(),
            accepted: true,
            reason: None,
            eta_ms: None,
            timestamp,
        }
    }

    /// Creates a rejection receipt.
    pub fn rejected(
        task_id: impl Into<String>,
        from: impl Into<String>,
        reason: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            from: from.into(),
            accepted: false,
            reason: Some(reason.into()),
            eta_ms: None,
            timestamp,
        }
    }

    /// Attaches a completion estimate.
    pub fn with_eta_ms(mut self, eta_ms: i64) -> Self {
        self.eta_ms = Some(eta_ms);
        self
    }

    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_uuid("taskId", &self.task_id)?;
        require_non_empty("from", &self.from)?;
        require_non_negative("timestamp", self.timestamp)?;
        if let Some(eta_ms) = self.eta_ms {
            require_non_negative("etaMs", eta_ms)?;
        }
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("task_receipt", value, Self::validate)
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// A worker's terminal outcome report for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Id of the request this result answers.
    pub task_id: String,
    /// Agent id of the worker.
    pub from: String,
    /// Whether the work succeeded.
    pub status: ResultStatus,
    /// Summary of the work done.
    pub output: String,
    /// Files created or modified.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// When the worker finished, epoch milliseconds.
    pub completed_at: i64,
}

impl TaskResult {
    /// Creates a success result.
    pub fn success(
        task_id: impl Into<String>,
        from: impl Into<String>,
        output: impl Into<String>,
        completed_at: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            from: from.into(),
            status: ResultStatus::Success,
            output: output.into(),
            artifacts: Vec::new(),
            completed_at,
        }
    }

    /// Creates a failure result.
    pub fn failure(
        task_id: impl Into<String>,
        from: impl Into<String>,
        output: impl Into<String>,
        completed_at: i64,
    ) -> Self {
        Self {
            status: ResultStatus::Failure,
            ..Self::success(task_id, from, output, completed_at)
        }
    }

    /// Appends an artifact.
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_uuid("taskId", &self.task_id)?;
        require_non_empty("from", &self.from)?;
        require_non_negative("completedAt", self.completed_at)?;
        for (index, artifact) in self.artifacts.iter().enumerate() {
            if artifact.name.trim().is_empty() {
                return Err(ApiaryError::Contract(format!(
                    "artifacts[{index}].name must be non-empty"
                )));
            }
        }
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("task_result", value, Self::validate)
    }
}

// ---------------------------------------------------------------------------
// HeartbeatSignal
// ---------------------------------------------------------------------------

/// Periodic liveness signal emitted by every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSignal {
    /// Agent id of the sender.
    pub from: String,
    /// Reported availability.
    pub status: AgentStatus,
    /// Estimated load in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<f64>,
    /// When the heartbeat was emitted, epoch milliseconds.
    pub timestamp: i64,
}

impl HeartbeatSignal {
    /// Creates a heartbeat.
    pub fn new(from: impl Into<String>, status: AgentStatus, timestamp: i64) -> Self {
        Self {
            from: from.into(),
            status,
            load: None,
            timestamp,
        }
    }

    /// Attaches a load estimate.
    pub fn with_load(mut self, load: f64) -> Self {
        self.load = Some(load);
        self
    }

    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_non_empty("from", &self.from)?;
        require_non_negative("timestamp", self.timestamp)?;
        if let Some(load) = self.load {
            if !load.is_finite() || !(0.0..=1.0).contains(&load) {
                return Err(ApiaryError::Contract(format!(
                    "load must be within [0, 1], got {load}"
                )));
            }
        }
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("signal_heartbeat", value, Self::validate)
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Opening message of the peer handshake: protocol and capability offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Unique handshake identifier (UUID-shaped string).
    pub id: String,
    /// Agent id of the initiator.
    pub from: String,
    /// Protocol versions the initiator speaks (e.g. `swarm/1.0`).
    pub supported_protocols: Vec<String>,
    /// Capabilities/skills the initiator advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// When the handshake was initiated, epoch milliseconds.
    pub timestamp: i64,
}

impl HandshakeRequest {
    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_uuid("id", &self.id)?;
        require_non_empty("from", &self.from)?;
        if self.supported_protocols.is_empty() {
            return Err(ApiaryError::Contract(
                "supportedProtocols must list at least one protocol".to_owned(),
            ));
        }
        require_non_negative("timestamp", self.timestamp)?;
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("handshake_request", value, Self::validate)
    }
}

/// Reply to a [`HandshakeRequest`], selecting a protocol or declining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Id of the handshake request being answered.
    pub request_id: String,
    /// Agent id of the responder.
    pub from: String,
    /// Whether the responder accepted the handshake.
    pub accepted: bool,
    /// Selected protocol version, when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// When the response was produced, epoch milliseconds.
    pub timestamp: i64,
}

impl HandshakeResponse {
    /// Structural validation, invoked at every trust boundary.
    pub fn validate(&self) -> ApiaryResult<()> {
        require_uuid("requestId", &self.request_id)?;
        require_non_empty("from", &self.from)?;
        require_non_negative("timestamp", self.timestamp)?;
        if self.accepted && self.protocol.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(ApiaryError::Contract(
                "protocol must be set on an accepted handshake".to_owned(),
            ));
        }
        Ok(())
    }

    /// Parses and validates an untrusted JSON payload.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        parse_message::<Self>("handshake_response", value, Self::validate)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Any swarm-protocol message, discriminated by its `kind` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// A task dispatch.
    TaskRequest(TaskRequest),
    /// A task acknowledgement.
    TaskReceipt(TaskReceipt),
    /// A terminal task outcome.
    TaskResult(TaskResult),
    /// An agent liveness signal.
    SignalHeartbeat(HeartbeatSignal),
    /// A handshake offer.
    HandshakeRequest(HandshakeRequest),
    /// A handshake reply.
    HandshakeResponse(HandshakeResponse),
}

impl Envelope {
    /// Validates the wrapped message.
    pub fn validate(&self) -> ApiaryResult<()> {
        match self {
            Envelope::TaskRequest(message) => message.validate(),
            Envelope::TaskReceipt(message) => message.validate(),
            Envelope::TaskResult(message) => message.validate(),
            Envelope::SignalHeartbeat(message) => message.validate(),
            Envelope::HandshakeRequest(message) => message.validate(),
            Envelope::HandshakeResponse(message) => message.validate(),
        }
    }

    /// Parses and validates an untrusted JSON payload of any message kind.
    pub fn from_value(value: serde_json::Value) -> ApiaryResult<Self> {
        let envelope: Self = serde_json::from_value(value)
            .map_err(|e| ApiaryError::Contract(format!("invalid message: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn parse_message<T: serde::de::DeserializeOwned>(
    kind: &str,
    value: serde_json::Value,
    validate: impl Fn(&T) -> ApiaryResult<()>,
) -> ApiaryResult<T> {
    // Reject payloads claiming to be a different message kind; a missing
    // `kind` is tolerated for bare payloads.
    if let Some(claimed) = value.get("kind").and_then(serde_json::Value::as_str) {
        if claimed != kind {
            return Err(ApiaryError::Contract(format!(
                "kind must be \"{kind}\", got \"{claimed}\""
            )));
        }
    }
    let message: T = serde_json::from_value(value)
        .map_err(|e| ApiaryError::Contract(format!("invalid {kind}: {e}")))?;
    validate(&message)?;
    Ok(message)
}

fn require_non_empty(field: &str, value: &str) -> ApiaryResult<()> {
    if value.trim().is_empty() {
        return Err(ApiaryError::Contract(format!("{field} must be non-empty")));
    }
    Ok(())
}

fn require_uuid(field: &str, value: &str) -> ApiaryResult<()> {
    Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ApiaryError::Contract(format!("{field} must be a UUID, got \"{value}\"")))
}

fn require_non_negative(field: &str, value: i64) -> ApiaryResult<()> {
    if value < 0 {
        return Err(ApiaryError::Contract(format!(
            "{field} must be non-negative, got {value}"
        )));
    }
    Ok(())
}

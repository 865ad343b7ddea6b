use apiary_core::{ResultStatus, TaskPriority, TaskReceipt, TaskRequest, TaskResult};
use apiary_policy::{DenyReason, RedactionHit};
use apiary_registry::RouteOutcome;
use apiary_store::JournalRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of a tracked task.
///
/// `dispatched → {retry_scheduled ⇄ dispatched} → {completed | failed | timed_out}`,
/// with `awaiting_approval` as the alternate initial state for gated tasks.
/// Terminal states never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Sent to the worker; waiting for receipt or result.
    Dispatched,
    /// A resend is scheduled for `next_retry_at`.
    RetryScheduled,
    /// Withheld from the transport until a human decides.
    AwaitingApproval,
    /// Retries exhausted with no response. Terminal.
    TimedOut,
    /// The worker reported success. Terminal.
    Completed,
    /// The worker failed, a reviewer denied, or the transport gave out. Terminal.
    Failed,
}

impl TaskStatus {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::TimedOut | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    /// Whether the task still needs attention from the maintenance sweep.
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// Stable string form, matching the journal encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Dispatched => "dispatched",
            TaskStatus::RetryScheduled => "retry_scheduled",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Why the transport was (re)invoked for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendReason {
    /// First send after creation.
    InitialDispatch,
    /// Send after a human approved a gated task.
    ApprovalRelease,
    /// Resend driven by the maintenance sweep.
    TimeoutRetry,
}

/// One lifecycle event in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Record created.
    Created,
    /// The dispatch policy redacted sensitive data.
    PolicyRedacted {
        /// Number of redactions applied.
        redaction_count: usize,
    },
    /// The approval policy gated the task.
    ApprovalRequested {
        /// Compact policy reason.
        reason: Option<String>,
    },
    /// A reviewer approved the task.
    ApprovalGranted {
        /// Who approved.
        reviewer: Option<String>,
    },
    /// A reviewer denied the task.
    ApprovalDenied {
        /// Who denied.
        reviewer: Option<String>,
        /// Why.
        reason: Option<String>,
    },
    /// The transport was invoked.
    SendAttempt {
        /// Dispatch attempt number, first send included.
        attempt: u32,
        /// Why the send happened.
        reason: SendReason,
    },
    /// The transport accepted the message.
    SendSuccess {
        /// Dispatch attempt number.
        attempt: u32,
    },
    /// The transport raised an error.
    SendFailed {
        /// Dispatch attempt number.
        attempt: u32,
        /// The transport error.
        error: String,
    },
    /// The worker acknowledged the task.
    Acknowledged {
        /// Worker's completion estimate.
        eta_ms: Option<i64>,
    },
    /// The worker rejected the task.
    ReceiptRejected {
        /// Worker-supplied reason.
        reason: Option<String>,
    },
    /// A terminal outcome arrived from the worker.
    ResultReceived {
        /// Reported status.
        status: ResultStatus,
    },
    /// A resend was scheduled.
    RetryScheduled {
        /// When the resend becomes due.
        next_retry_at: i64,
    },
    /// Retries exhausted with no response.
    TimedOut,
    /// The task reached terminal failure.
    Failed {
        /// Why.
        reason: String,
    },
    /// A receipt arrived after the task was already terminal. Informational.
    LateReceipt {
        /// Sender of the late receipt.
        from: String,
        /// Whether it claimed acceptance.
        accepted: bool,
    },
    /// A result arrived after the task was already terminal. Informational.
    LateResult {
        /// Sender of the late result.
        from: String,
        /// Reported status.
        status: ResultStatus,
    },
}

/// A timestamped history entry. History is append-only and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the event happened, epoch milliseconds.
    pub at: i64,
    /// What happened.
    #[serde(flatten)]
    pub event: TaskEvent,
}

/// Review state of an approval-gated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalReviewStatus {
    /// Waiting for a human.
    Pending,
    /// Approved and released.
    Approved,
    /// Denied; the task is terminally failed.
    Denied,
}

/// Approval bookkeeping attached to a gated task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalState {
    /// Current review state.
    pub status: ApprovalReviewStatus,
    /// Reviewer group the request was routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_group: Option<String>,
    /// Why the gate fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Names of the matched policy rules.
    #[serde(default)]
    pub matched_rules: Vec<String>,
    /// When the gate fired, epoch milliseconds.
    pub requested_at: i64,
    /// When a human decided, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<i64>,
    /// Who decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    /// The reviewer's stated reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
}

/// The orchestrator's persisted view of one task. Exactly one record per
/// task id; `attempts` only increases; `history` is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// The tracked task id.
    pub task_id: String,
    /// Worker the task is addressed to.
    pub target: String,
    /// The (sanitized) request that was or will be sent.
    pub request: TaskRequest,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Dispatch attempts so far, first send included.
    pub attempts: u32,
    /// Retry budget the record was created with.
    pub max_retries: u32,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last mutation time, epoch milliseconds.
    pub updated_at: i64,
    /// When the current attempt times out, epoch milliseconds.
    pub deadline_at: i64,
    /// When the scheduled resend becomes due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    /// When the task reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    /// Most recent transport error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Approval bookkeeping, present on gated tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalState>,
    /// Every receipt ingested for the task.
    #[serde(default)]
    pub receipts: Vec<TaskReceipt>,
    /// The terminal result, once one arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Append-only ordered event log.
    pub history: Vec<HistoryEntry>,
}

impl TaskRecord {
    /// Appends a history entry. The only sanctioned way to touch `history`.
    pub fn push_history(&mut self, at: i64, event: TaskEvent) {
        self.history.push(HistoryEntry { at, event });
    }

    /// Priority of the underlying request.
    pub fn priority(&self) -> TaskPriority {
        self.request.priority
    }
}

impl JournalRecord for TaskRecord {
    fn journal_key(&self) -> &str {
        &self.task_id
    }
}

/// Input to [`dispatch_task`](crate::TaskOrchestrator::dispatch_task).
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Explicit worker target; routed via the registry when absent.
    pub target: Option<String>,
    /// Natural-language description of the objective.
    pub task: String,
    /// Priority of the request.
    pub priority: TaskPriority,
    /// Structured context data.
    pub context: HashMap<String, Value>,
    /// Negative constraints.
    pub constraints: Vec<String>,
    /// Explicit task id; a fresh UUID when absent.
    pub id: Option<String>,
}

impl DispatchRequest {
    /// Creates a dispatch request for the given task description.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// Addresses a specific worker, bypassing the router.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Inserts a single context value.
    pub fn with_context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Appends a constraint.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Pins the task id (e.g. from a packaged DAG).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Structured outcome of a dispatch call. Policy denials and routing
/// misses are decisions, not errors; only infrastructure failures
/// (persistence, invalid input) surface as `Err`.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The task is tracked and the send path ran. Inspect the record's
    /// status: a transport error may already have scheduled a retry or,
    /// with a zero retry budget, failed the task.
    Dispatched(TaskRecord),
    /// The task is tracked but withheld pending human approval.
    AwaitingApproval(TaskRecord),
    /// The dispatch policy said no. The request is already redacted.
    Denied {
        /// Every deny reason.
        reasons: Vec<DenyReason>,
        /// Redactions applied before recording.
        redactions: Vec<RedactionHit>,
        /// The sanitized request.
        request: TaskRequest,
    },
    /// No target was given and no eligible agent exists.
    Unroutable {
        /// The full routing evaluation.
        route: RouteOutcome,
        /// The request that could not be routed.
        request: TaskRequest,
    },
}

impl DispatchOutcome {
    /// The tracked record, when one was created.
    pub fn record(&self) -> Option<&TaskRecord> {
        match self {
            DispatchOutcome::Dispatched(record) | DispatchOutcome::AwaitingApproval(record) => {
                Some(record)
            }
            _ => None,
        }
    }
}

/// A human's verdict on an approval-gated task.
#[derive(Debug, Clone, Default)]
pub struct ReviewDecision {
    /// Whether the task may proceed.
    pub approved: bool,
    /// Who decided.
    pub reviewer: Option<String>,
    /// The stated reason.
    pub reason: Option<String>,
}

impl ReviewDecision {
    /// An approval by the named reviewer.
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            approved: true,
            reviewer: Some(reviewer.into()),
            reason: None,
        }
    }

    /// A denial by the named reviewer.
    pub fn deny(reviewer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reviewer: Some(reviewer.into()),
            reason: Some(reason.into()),
        }
    }
}

/// Filter for [`list_tasks`](crate::TaskOrchestrator::list_tasks).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only records in this state.
    pub status: Option<TaskStatus>,
    /// Only records addressed to this worker.
    pub target: Option<String>,
    /// Only non-terminal records.
    pub open_only: bool,
}

impl TaskFilter {
    /// Matches only open (non-terminal) records.
    pub fn open_only() -> Self {
        Self {
            open_only: true,
            ..Self::default()
        }
    }

    /// Matches only records in `status`.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// What one maintenance sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceSummary {
    /// Open tasks examined.
    pub checked: usize,
    /// Retries newly scheduled for expired deadlines.
    pub scheduled_retries: usize,
    /// Due retries actually resent.
    pub retried: usize,
    /// Tasks transitioned to `timed_out`.
    pub timed_out: usize,
    /// Resends that hit a transport error.
    pub transport_failures: usize,
}

/// Aggregate counters over the tracked task population.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMetrics {
    /// Tracked records.
    pub total: usize,
    /// Non-terminal records.
    pub open: usize,
    /// Terminal records.
    pub terminal: usize,
    /// Record count per status.
    pub by_status: HashMap<String, usize>,
    /// Mean dispatch attempts across all records.
    pub avg_attempts: f64,
}

use crate::config::OrchestratorConfig;
use crate::queue::rank_pending_approvals;
use crate::types::{
    ApprovalReviewStatus, ApprovalState, DispatchOutcome, DispatchRequest, MaintenanceSummary,
    OrchestratorMetrics, ReviewDecision, SendReason, TaskEvent, TaskFilter, TaskRecord, TaskStatus,
};
use apiary_audit::{AuditDraft, SignedAuditLog};
use apiary_core::{
    ApiaryError, ApiaryResult, Clock, ResultStatus, SystemClock, TaskReceipt, TaskRequest,
    TaskResult, Transport,
};
use apiary_policy::{
    evaluate_approval_policy, evaluate_dispatch_policy, ApprovalPolicyConfig, DispatchPolicyConfig,
};
use apiary_registry::AgentRegistry;
use apiary_store::TaskStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The task lifecycle state machine.
///
/// Dispatches tasks through an injected [`Transport`], ingests receipts
/// and results from workers, and detects timeouts in a caller-driven
/// [`run_maintenance`](Self::run_maintenance) sweep — there is no timer
/// per task, and absent ticks timeouts simply do not fire.
///
/// All state mutation happens synchronously within one call at a time;
/// callers must not interleave calls on the same instance. Late receipts
/// and results for already-terminal tasks are recorded in history as
/// informational and otherwise ignored.
pub struct TaskOrchestrator {
    local_agent_id: String,
    transport: Arc<dyn Transport>,
    registry: AgentRegistry,
    dispatch_policy: Option<DispatchPolicyConfig>,
    approval_policy: Option<ApprovalPolicyConfig>,
    audit: Option<SignedAuditLog>,
    store: Option<Box<dyn TaskStore<TaskRecord>>>,
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    tasks: HashMap<String, TaskRecord>,
}

impl TaskOrchestrator {
    /// Creates an orchestrator acting as `local_agent_id` over `transport`.
    pub fn new(local_agent_id: impl Into<String>, transport: Arc<dyn Transport>) -> ApiaryResult<Self> {
        let local_agent_id = local_agent_id.into();
        if local_agent_id.trim().is_empty() {
            return Err(ApiaryError::Orchestrator(
                "local agent id must be non-empty".to_owned(),
            ));
        }
        Ok(Self {
            local_agent_id,
            transport,
            registry: AgentRegistry::new(),
            dispatch_policy: None,
            approval_policy: None,
            audit: None,
            store: None,
            config: OrchestratorConfig::default(),
            clock: Arc::new(SystemClock),
            tasks: HashMap::new(),
        })
    }

    /// Sets timing and retry configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables the dispatch policy gate.
    pub fn with_dispatch_policy(mut self, policy: DispatchPolicyConfig) -> Self {
        self.dispatch_policy = Some(policy);
        self
    }

    /// Enables the human-approval gate.
    pub fn with_approval_policy(mut self, policy: ApprovalPolicyConfig) -> Self {
        self.approval_policy = Some(policy);
        self
    }

    /// Attaches a signed audit log; one entry per lifecycle transition.
    pub fn with_audit(mut self, audit: SignedAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attaches a task journal for crash-recoverable state.
    pub fn with_store(mut self, store: Box<dyn TaskStore<TaskRecord>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Injects a clock (tests, simulations).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the agent registry (e.g. one pre-loaded with heartbeats).
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The registry routing un-targeted dispatches. Feed heartbeats here.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Mutable access to the registry.
    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    /// The attached audit log, when any.
    pub fn audit_log(&self) -> Option<&SignedAuditLog> {
        self.audit.as_ref()
    }

    /// The id this orchestrator acts as.
    pub fn local_agent_id(&self) -> &str {
        &self.local_agent_id
    }

    /// Replaces in-memory state with the journal's contents. Crash
    /// recovery path; call once before accepting traffic.
    pub async fn hydrate(&mut self) -> ApiaryResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = store.load_records().await?;
        self.tasks = records
            .into_iter()
            .map(|record| (record.task_id.clone(), record))
            .collect();
        info!(count = self.tasks.len(), "orchestrator hydrated from journal");
        Ok(self.tasks.len())
    }

    /// Validates, routes, gates, and (when allowed) sends a task.
    ///
    /// Policy denials and routing misses come back as structured
    /// [`DispatchOutcome`] variants, not errors. A transport failure on
    /// the first send schedules a retry — inspect the returned record's
    /// status. Only invalid input and persistence failures are `Err`.
    pub async fn dispatch_task(&mut self, dispatch: DispatchRequest) -> ApiaryResult<DispatchOutcome> {
        let now = self.clock.now_ms();
        let mut request = TaskRequest {
            id: dispatch
                .id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            from: self.local_agent_id.clone(),
            target: dispatch.target.unwrap_or_default(),
            priority: dispatch.priority,
            task: dispatch.task,
            context: dispatch.context,
            constraints: dispatch.constraints,
            created_at: now,
        };
        request.validate()?;
        if self.tasks.contains_key(&request.id) {
            return Err(ApiaryError::Orchestrator(format!(
                "task {} is already tracked",
                request.id
            )));
        }

        if request.target.trim().is_empty() {
            let route = self.registry.route_task(&request, now, None)?;
            match route.selected_agent_id.clone() {
                Some(agent_id) => request.target = agent_id,
                None => {
                    warn!(task_id = %request.id, "no eligible agent for task");
                    self.audit_event(
                        "task_unroutable",
                        json!({"taskId": request.id, "ranked": route.ranked.len()}),
                        now,
                    )
                    .await;
                    return Ok(DispatchOutcome::Unroutable { route, request });
                }
            }
        }

        let policy_decision = match &self.dispatch_policy {
            Some(policy) => Some(evaluate_dispatch_policy(&request, policy)?),
            None => None,
        };
        let mut redactions = Vec::new();
        if let Some(decision) = policy_decision {
            redactions = decision.redactions;
            request = decision.request;
            if !decision.allowed {
                self.audit_event(
                    "task_policy_denied",
                    json!({
                        "taskId": request.id,
                        "target": request.target,
                        "reasons": decision.reasons,
                        "redactions": redactions.len(),
                    }),
                    now,
                )
                .await;
                return Ok(DispatchOutcome::Denied {
                    reasons: decision.reasons,
                    redactions,
                    request,
                });
            }
        }

        let mut record = TaskRecord {
            task_id: request.id.clone(),
            target: request.target.clone(),
            request: request.clone(),
            status: TaskStatus::Dispatched,
            attempts: 0,
            max_retries: self.config.max_retries,
            created_at: now,
            updated_at: now,
            deadline_at: now + self.config.default_timeout_ms,
            next_retry_at: None,
            closed_at: None,
            last_error: None,
            approval: None,
            receipts: Vec::new(),
            result: None,
            history: Vec::new(),
        };
        record.push_history(now, TaskEvent::Created);
        if !redactions.is_empty() {
            record.push_history(
                now,
                TaskEvent::PolicyRedacted {
                    redaction_count: redactions.len(),
                },
            );
        }

        let approval_decision = match &self.approval_policy {
            Some(policy) => Some(evaluate_approval_policy(&record.request, policy)?),
            None => None,
        };

        if let Some(decision) = approval_decision.filter(|decision| decision.required) {
            record.status = TaskStatus::AwaitingApproval;
            record.approval = Some(ApprovalState {
                status: ApprovalReviewStatus::Pending,
                reviewer_group: decision.reviewer_group.clone(),
                reason: decision.reason.clone(),
                matched_rules: decision.matched_rules.clone(),
                requested_at: now,
                reviewed_at: None,
                reviewer: None,
                review_reason: None,
            });
            record.push_history(
                now,
                TaskEvent::ApprovalRequested {
                    reason: decision.reason.clone(),
                },
            );
            self.audit_created(&record, redactions.len()).await;
            self.audit_event(
                "task_awaiting_approval",
                json!({
                    "taskId": record.task_id,
                    "reviewerGroup": decision.reviewer_group,
                    "reason": decision.reason,
                }),
                now,
            )
            .await;
            let snapshot = record.clone();
            self.tasks.insert(record.task_id.clone(), record);
            self.persist(&snapshot).await?;
            return Ok(DispatchOutcome::AwaitingApproval(snapshot));
        }

        self.audit_created(&record, redactions.len()).await;
        self.send_task(&mut record, SendReason::InitialDispatch).await;

        let snapshot = record.clone();
        self.tasks.insert(record.task_id.clone(), record);
        self.persist(&snapshot).await?;
        Ok(DispatchOutcome::Dispatched(snapshot))
    }

    /// Applies a human decision to an `awaiting_approval` task. Approval
    /// releases it through the normal send path; denial is terminal.
    pub async fn review_task(
        &mut self,
        task_id: &str,
        decision: ReviewDecision,
    ) -> ApiaryResult<Option<TaskRecord>> {
        let Some(mut record) = self.tasks.remove(task_id) else {
            warn!(task_id, "review for unknown task ignored");
            return Ok(None);
        };
        if record.status != TaskStatus::AwaitingApproval {
            let status = record.status;
            self.tasks.insert(task_id.to_owned(), record);
            return Err(ApiaryError::Orchestrator(format!(
                "task {task_id} is not awaiting approval (status: {})",
                status.as_str()
            )));
        }

        let now = self.clock.now_ms();
        record.updated_at = now;
        if let Some(approval) = &mut record.approval {
            approval.status = if decision.approved {
                ApprovalReviewStatus::Approved
            } else {
                ApprovalReviewStatus::Denied
            };
            approval.reviewed_at = Some(now);
            approval.reviewer = decision.reviewer.clone();
            approval.review_reason = decision.reason.clone();
        }

        if decision.approved {
            record.push_history(
                now,
                TaskEvent::ApprovalGranted {
                    reviewer: decision.reviewer.clone(),
                },
            );
            self.audit_event(
                "task_approval_granted",
                json!({"taskId": record.task_id, "reviewer": decision.reviewer}),
                now,
            )
            .await;
            self.send_task(&mut record, SendReason::ApprovalRelease).await;
        } else {
            record.status = TaskStatus::Failed;
            record.closed_at = Some(now);
            record.push_history(
                now,
                TaskEvent::ApprovalDenied {
                    reviewer: decision.reviewer.clone(),
                    reason: decision.reason.clone(),
                },
            );
            self.audit_event(
                "task_approval_denied",
                json!({
                    "taskId": record.task_id,
                    "reviewer": decision.reviewer,
                    "reason": decision.reason,
                }),
                now,
            )
            .await;
        }

        let snapshot = record.clone();
        self.tasks.insert(snapshot.task_id.clone(), record);
        self.persist(&snapshot).await?;
        Ok(Some(snapshot))
    }

    /// Ingests a worker receipt.
    ///
    /// Malformed or unknown-task receipts are dropped with a warning —
    /// a receipt for an already-expired task is expected under races. A
    /// rejection immediately schedules a retry (or fails the task once
    /// attempts are exhausted). Returns whether the receipt changed
    /// live state.
    pub async fn ingest_receipt(&mut self, receipt: TaskReceipt) -> ApiaryResult<bool> {
        if let Err(error) = receipt.validate() {
            warn!(%error, "dropping malformed receipt");
            return Ok(false);
        }
        let Some(mut record) = self.tasks.remove(&receipt.task_id) else {
            warn!(task_id = %receipt.task_id, "receipt for unknown task ignored");
            return Ok(false);
        };

        if record.status.is_terminal() {
            record.push_history(
                receipt.timestamp,
                TaskEvent::LateReceipt {
                    from: receipt.from.clone(),
                    accepted: receipt.accepted,
                },
            );
            self.audit_event(
                "task_late_receipt",
                json!({"taskId": record.task_id, "from": receipt.from, "accepted": receipt.accepted}),
                receipt.timestamp,
            )
            .await;
            let snapshot = record.clone();
            self.tasks.insert(snapshot.task_id.clone(), record);
            self.persist(&snapshot).await?;
            return Ok(false);
        }
        if record.status == TaskStatus::AwaitingApproval {
            warn!(task_id = %record.task_id, "receipt for undispatched task ignored");
            self.tasks.insert(record.task_id.clone(), record);
            return Ok(false);
        }

        record.receipts.push(receipt.clone());
        record.updated_at = receipt.timestamp;

        if receipt.accepted {
            record.push_history(
                receipt.timestamp,
                TaskEvent::Acknowledged {
                    eta_ms: receipt.eta_ms,
                },
            );
            // The worker has the task in hand: cancel any scheduled
            // resend and honor its estimate as the new deadline.
            record.status = TaskStatus::Dispatched;
            record.next_retry_at = None;
            if let Some(eta_ms) = receipt.eta_ms {
                record.deadline_at = receipt.timestamp + eta_ms;
            }
            self.audit_event(
                "task_acknowledged",
                json!({"taskId": record.task_id, "from": receipt.from, "etaMs": receipt.eta_ms}),
                receipt.timestamp,
            )
            .await;
        } else {
            record.push_history(
                receipt.timestamp,
                TaskEvent::ReceiptRejected {
                    reason: receipt.reason.clone(),
                },
            );
            self.audit_event(
                "task_receipt_rejected",
                json!({"taskId": record.task_id, "from": receipt.from, "reason": receipt.reason}),
                receipt.timestamp,
            )
            .await;
            let now = self.clock.now_ms();
            self.schedule_retry_or_fail(&mut record, now, "rejected_by_worker")
                .await;
        }

        let snapshot = record.clone();
        self.tasks.insert(snapshot.task_id.clone(), record);
        self.persist(&snapshot).await?;
        Ok(true)
    }

    /// Ingests a worker result. Success completes the task; failure
    /// retries it up to the budget, then fails terminally. Unknown and
    /// late results are absorbed the same way receipts are.
    pub async fn ingest_result(&mut self, result: TaskResult) -> ApiaryResult<bool> {
        if let Err(error) = result.validate() {
            warn!(%error, "dropping malformed result");
            return Ok(false);
        }
        let Some(mut record) = self.tasks.remove(&result.task_id) else {
            warn!(task_id = %result.task_id, "result for unknown task ignored");
            return Ok(false);
        };

        if record.status.is_terminal() {
            record.push_history(
                result.completed_at,
                TaskEvent::LateResult {
                    from: result.from.clone(),
                    status: result.status,
                },
            );
            self.audit_event(
                "task_late_result",
                json!({"taskId": record.task_id, "from": result.from, "status": result.status}),
                result.completed_at,
            )
            .await;
            let snapshot = record.clone();
            self.tasks.insert(snapshot.task_id.clone(), record);
            self.persist(&snapshot).await?;
            return Ok(false);
        }
        if record.status == TaskStatus::AwaitingApproval {
            warn!(task_id = %record.task_id, "result for undispatched task ignored");
            self.tasks.insert(record.task_id.clone(), record);
            return Ok(false);
        }

        record.updated_at = result.completed_at;
        record.push_history(
            result.completed_at,
            TaskEvent::ResultReceived {
                status: result.status,
            },
        );
        self.audit_event(
            "task_result",
            json!({"taskId": record.task_id, "from": result.from, "status": result.status}),
            result.completed_at,
        )
        .await;

        match result.status {
            ResultStatus::Success => {
                record.status = TaskStatus::Completed;
                record.closed_at = Some(result.completed_at);
                record.result = Some(result);
            }
            ResultStatus::Failure => {
                record.result = Some(result);
                let now = self.clock.now_ms();
                self.schedule_retry_or_fail(&mut record, now, "worker_failure")
                    .await;
            }
        }

        let snapshot = record.clone();
        self.tasks.insert(snapshot.task_id.clone(), record);
        self.persist(&snapshot).await?;
        Ok(true)
    }

    /// The single timeout sweep. For `dispatched` records past their
    /// deadline: schedule a retry, or time out once attempts exceed the
    /// budget. For `retry_scheduled` records that are due: resend.
    ///
    /// Timeouts are detected nowhere else; the caller is responsible for
    /// ticking this periodically.
    pub async fn run_maintenance(&mut self, now_ms: i64) -> ApiaryResult<MaintenanceSummary> {
        let mut summary = MaintenanceSummary::default();
        let open_ids: Vec<String> = self
            .tasks
            .values()
            .filter(|record| {
                matches!(
                    record.status,
                    TaskStatus::Dispatched | TaskStatus::RetryScheduled
                )
            })
            .map(|record| record.task_id.clone())
            .collect();

        for task_id in open_ids {
            let Some(mut record) = self.tasks.remove(&task_id) else {
                continue;
            };
            summary.checked += 1;
            let mut changed = false;

            match record.status {
                TaskStatus::Dispatched if now_ms > record.deadline_at => {
                    if record.attempts > record.max_retries {
                        self.time_out_task(&mut record, now_ms).await;
                        summary.timed_out += 1;
                    } else {
                        self.schedule_retry(&mut record, now_ms).await;
                        summary.scheduled_retries += 1;
                    }
                    changed = true;
                }
                TaskStatus::RetryScheduled
                    if record.next_retry_at.map_or(true, |due| now_ms >= due) =>
                {
                    if self.send_task(&mut record, SendReason::TimeoutRetry).await {
                        summary.retried += 1;
                    } else {
                        summary.transport_failures += 1;
                    }
                    changed = true;
                }
                _ => {}
            }

            if changed {
                let snapshot = record.clone();
                self.tasks.insert(task_id, record);
                self.persist(&snapshot).await?;
            } else {
                self.tasks.insert(task_id, record);
            }
        }

        Ok(summary)
    }

    /// Removes a task from tracking and tombstones it in the journal.
    /// The explicit operator path — records are never deleted automatically.
    pub async fn delete_task(&mut self, task_id: &str) -> ApiaryResult<bool> {
        let Some(record) = self.tasks.remove(task_id) else {
            return Ok(false);
        };
        if let Some(store) = &self.store {
            store.delete_record(task_id).await?;
        }
        self.audit_event(
            "task_deleted",
            json!({"taskId": task_id, "status": record.status.as_str()}),
            self.clock.now_ms(),
        )
        .await;
        Ok(true)
    }

    /// Rewrites the journal to one entry per live record, discarding
    /// prior history. The only way to bound journal growth.
    pub async fn compact_journal(&self) -> ApiaryResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = self.list_tasks(&TaskFilter::default());
        store.compact(&records).await?;
        Ok(records.len())
    }

    /// A clone of one record.
    pub fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).cloned()
    }

    /// Clones of all matching records, creation order.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .tasks
            .values()
            .filter(|record| {
                if let Some(status) = filter.status {
                    if record.status != status {
                        return false;
                    }
                }
                if let Some(target) = &filter.target {
                    if &record.target != target {
                        return false;
                    }
                }
                if filter.open_only && record.status.is_terminal() {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
        records
    }

    /// Approval-pending records in reviewer order (priority, then oldest).
    pub fn list_pending_approvals(&self) -> Vec<TaskRecord> {
        rank_pending_approvals(self.tasks.values().cloned().collect())
    }

    /// Aggregate counters across all tracked records.
    pub fn metrics(&self) -> OrchestratorMetrics {
        let mut metrics = OrchestratorMetrics {
            total: self.tasks.len(),
            ..OrchestratorMetrics::default()
        };
        let mut attempts_total: u64 = 0;
        for record in self.tasks.values() {
            attempts_total += u64::from(record.attempts);
            *metrics
                .by_status
                .entry(record.status.as_str().to_owned())
                .or_default() += 1;
            if record.status.is_terminal() {
                metrics.terminal += 1;
            } else {
                metrics.open += 1;
            }
        }
        if !self.tasks.is_empty() {
            metrics.avg_attempts = attempts_total as f64 / self.tasks.len() as f64;
        }
        metrics
    }

    // -----------------------------------------------------------------
    // Internal transitions
    // -----------------------------------------------------------------

    /// Invokes the transport for a record. Returns whether the send
    /// succeeded; on failure the record is already rescheduled or failed.
    async fn send_task(&mut self, record: &mut TaskRecord, reason: SendReason) -> bool {
        let send_at = self.clock.now_ms();
        record.attempts += 1;
        record.updated_at = send_at;
        record.push_history(
            send_at,
            TaskEvent::SendAttempt {
                attempt: record.attempts,
                reason,
            },
        );
        self.audit_event(
            "task_send_attempt",
            json!({
                "taskId": record.task_id,
                "target": record.target,
                "attempt": record.attempts,
                "reason": reason,
            }),
            send_at,
        )
        .await;

        match self.transport.send(&record.target, &record.request).await {
            Ok(()) => {
                record.status = TaskStatus::Dispatched;
                record.deadline_at = send_at + self.config.default_timeout_ms;
                record.next_retry_at = None;
                record.last_error = None;
                record.push_history(
                    self.clock.now_ms(),
                    TaskEvent::SendSuccess {
                        attempt: record.attempts,
                    },
                );
                self.audit_event(
                    "task_send_success",
                    json!({"taskId": record.task_id, "target": record.target, "attempt": record.attempts}),
                    record.updated_at,
                )
                .await;
                true
            }
            Err(error) => {
                let message = error.to_string();
                warn!(task_id = %record.task_id, error = %message, "transport send failed");
                record.last_error = Some(message.clone());
                record.updated_at = self.clock.now_ms();
                record.push_history(
                    record.updated_at,
                    TaskEvent::SendFailed {
                        attempt: record.attempts,
                        error: message,
                    },
                );
                self.audit_event(
                    "task_send_failed",
                    json!({"taskId": record.task_id, "target": record.target, "attempt": record.attempts}),
                    record.updated_at,
                )
                .await;
                let now = self.clock.now_ms();
                self.schedule_retry_or_fail(record, now, "transport_error").await;
                false
            }
        }
    }

    async fn schedule_retry_or_fail(&mut self, record: &mut TaskRecord, now_ms: i64, reason: &str) {
        if record.attempts > record.max_retries {
            self.fail_task(record, now_ms, reason).await;
        } else {
            self.schedule_retry(record, now_ms).await;
        }
    }

    async fn schedule_retry(&mut self, record: &mut TaskRecord, now_ms: i64) {
        let next_retry_at = now_ms + self.config.retry_delay_ms;
        record.status = TaskStatus::RetryScheduled;
        record.next_retry_at = Some(next_retry_at);
        record.updated_at = now_ms;
        record.push_history(now_ms, TaskEvent::RetryScheduled { next_retry_at });
        self.audit_event(
            "task_retry_scheduled",
            json!({"taskId": record.task_id, "target": record.target, "nextRetryAt": next_retry_at}),
            now_ms,
        )
        .await;
    }

    async fn fail_task(&mut self, record: &mut TaskRecord, now_ms: i64, reason: &str) {
        record.status = TaskStatus::Failed;
        record.closed_at = Some(now_ms);
        record.updated_at = now_ms;
        record.push_history(
            now_ms,
            TaskEvent::Failed {
                reason: reason.to_owned(),
            },
        );
        self.audit_event(
            "task_failed",
            json!({"taskId": record.task_id, "target": record.target, "attempts": record.attempts, "reason": reason}),
            now_ms,
        )
        .await;
    }

    async fn time_out_task(&mut self, record: &mut TaskRecord, now_ms: i64) {
        record.status = TaskStatus::TimedOut;
        record.closed_at = Some(now_ms);
        record.updated_at = now_ms;
        record.push_history(now_ms, TaskEvent::TimedOut);
        self.audit_event(
            "task_timed_out",
            json!({"taskId": record.task_id, "target": record.target, "attempts": record.attempts}),
            now_ms,
        )
        .await;
    }

    async fn audit_created(&mut self, record: &TaskRecord, redaction_count: usize) {
        self.audit_event(
            "task_created",
            json!({
                "taskId": record.task_id,
                "target": record.target,
                "status": record.status.as_str(),
                "priority": record.request.priority,
                "policyRedactions": redaction_count,
            }),
            record.created_at,
        )
        .await;
    }

    /// Appends an audit entry; failures are logged, never fatal to the
    /// lifecycle transition that triggered them.
    async fn audit_event(&mut self, event_type: &str, payload: Value, at: i64) {
        let Some(audit) = &mut self.audit else {
            return;
        };
        let draft = AuditDraft::new(event_type, self.local_agent_id.clone())
            .with_payload(payload)
            .at(at);
        if let Err(error) = audit.append(draft).await {
            warn!(%error, event_type, "audit append failed");
        }
    }

    /// Writes a record to the journal. Persistence failures propagate to
    /// the caller of the mutating operation.
    async fn persist(&self, record: &TaskRecord) -> ApiaryResult<()> {
        if let Some(store) = &self.store {
            store.save_record(record).await?;
        }
        Ok(())
    }
}

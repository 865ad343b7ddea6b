use crate::types::{TaskRecord, TaskStatus};

/// Orders approval-pending records the way reviewers should see them:
/// by priority (`critical < high < normal < low`), then oldest first.
///
/// This is the core-side query behind the approval-queue export; rendering
/// (JSON/Markdown) is a consumer's job.
pub fn rank_pending_approvals(mut records: Vec<TaskRecord>) -> Vec<TaskRecord> {
    records.retain(|record| record.status == TaskStatus::AwaitingApproval);
    records.sort_by(|a, b| {
        a.priority()
            .rank()
            .cmp(&b.priority().rank())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    records
}

//! Append-only persistence for the orchestrator.
//!
//! Both durable files in the system — the task journal and the audit log —
//! are the same shape: a JSONL file that is only ever appended to, replayed
//! in order on load, and tolerant of individually corrupted lines. That
//! shape lives here once as [`JsonlLedger`]; the task journal folds ledger
//! entries by task id on top of it.
//!
//! # Main types
//!
//! - [`JsonlLedger`] — Append/load/rewrite for one JSONL file.
//! - [`TaskStore`] — Persistence seam the orchestrator writes through.
//! - [`FileTaskStore`] — Journal with upsert/tombstone entries + compaction.

/// The shared append-only JSONL ledger.
pub mod ledger;
/// The task journal built on the ledger.
pub mod journal;

pub use journal::{FileTaskStore, JournalEntry, JournalEntryKind, JournalRecord, TaskStore};
pub use ledger::JsonlLedger;

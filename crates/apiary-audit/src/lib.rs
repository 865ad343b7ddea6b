//! Tamper-evident audit logging.
//!
//! Every lifecycle event becomes an [`AuditEntry`] whose hash incorporates
//! the previous entry's hash, and whose hash is signed with an HMAC over a
//! pre-shared secret. Mutating any stored entry changes its recomputed
//! hash and breaks the chain for every later entry, so
//! [`SignedAuditLog::verify_chain`] can pin the first tampered index.
//!
//! Key management is out of scope: the log accepts a pre-shared signing
//! secret and does nothing else with it.
//!
//! # Main types
//!
//! - [`SignedAuditLog`] — Appends hash-linked, signed entries.
//! - [`AuditEntry`] / [`AuditDraft`] — The stored and the to-be-signed forms.
//! - [`ChainVerification`] — Outcome of verifying a chain, fail-closed.
//! - [`FileAuditLogStore`] — JSONL persistence, tolerant of bad lines.

/// Entry canonicalization, hashing, and signing.
pub mod entry;
/// The in-memory chain and its file store.
pub mod log;

pub use entry::{
    canonicalize, sign_entry, verify_entry, AuditDraft, AuditEntry, EntryVerification,
    GENESIS_HASH,
};
pub use log::{verify_chain, ChainVerification, FileAuditLogStore, SignedAuditLog};

//! Audit Pipeline (C8)
//!
//! Structured event capture → redaction → async persistence →
//! response-update join on `requestId`. Grounded on the teacher's
//! `audit.rs` (`AuditLogger`/`AuthEvent`/redaction), expanded from its
//! privacy-log shape into the full allow/deny/error event with HTTP
//! context, response-capture join, and query surface spec.md requires.

mod event;
mod pipeline;
mod redact;
mod store;

pub use event::{AuditEvent, AuditOptions, AuditResult, AuditSeverity};
pub use pipeline::{AuditPage, AuditPipeline, AuditQueryFilters, AuditSummary, Pagination};
pub use store::{AuditStore, InMemoryAuditStore};

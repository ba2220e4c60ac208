//! Audit event shape (§3 `AuditEvent`)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of the decision an audit event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Allow,
    Deny,
    Error,
}

/// Severity tier, used for triage of the persisted event stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for AuditSeverity {
    fn default() -> Self {
        Self::Medium
    }
}

/// A fully assembled, persisted audit record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub request_id: String,
    pub at: chrono::DateTime<chrono::Utc>,
    pub actor_kid: String,
    pub actor_sub: Option<String>,
    pub action: String,
    pub module: Option<String>,
    pub result: AuditResult,
    pub reason: Option<String>,
    pub resource_type: String,
    pub resource_ref: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub query: Option<Value>,
    pub headers: Option<Value>,
    pub payload: Option<Value>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<i64>,
    pub response: Option<Value>,
    pub changes_before: Option<Value>,
    pub changes_after: Option<Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub severity: AuditSeverity,
    pub tags: Vec<String>,
}

/// The caller-supplied extras accepted by `logAllow`/`logDeny`/`logError`,
/// beyond the context-derived fields (§4.8's "Caller-supplied" list).
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    pub severity: Option<AuditSeverity>,
    pub module: Option<String>,
    pub actor_kid: Option<String>,
    pub actor_sub: Option<String>,
    pub method: Option<String>,
    pub endpoint: Option<String>,
    pub query: Option<Value>,
    pub headers: Option<Value>,
    pub payload: Option<Value>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<i64>,
    pub changes_before: Option<Value>,
    pub changes_after: Option<Value>,
    pub tags: Vec<String>,
}

//! Async dispatcher, response-capture join, and query surface (§4.8)

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::{Result, TrustError};
use crate::event_bus::{topics, EventBus};
use crate::metrics;

use super::event::{AuditEvent, AuditOptions, AuditResult, AuditSeverity};
use super::redact::redact_opt;
use super::store::{AuditStore, InMemoryAuditStore};

const DISPATCH_QUEUE_CAPACITY: usize = 4096;
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_JOIN_WAIT: Duration = Duration::from_millis(50);
const RESPONSE_JOIN_LOOKBACK_SECS: i64 = 5;
const RESPONSE_JOIN_MAX_EVENTS: usize = 5;

/// A raw audit record assembled at emission time, before redaction.
struct PartialEvent(AuditEvent);

/// Structured Audit Logging (C8): non-blocking emission, a single
/// cooperative dispatcher draining a bounded queue, and the
/// response-capture join described in §4.8.
pub struct AuditPipeline {
    sender: mpsc::Sender<PartialEvent>,
    store: Arc<dyn AuditStore>,
    dropped: Arc<AtomicU64>,
    _dispatcher: tokio::task::JoinHandle<()>,
}

impl AuditPipeline {
    /// Construct a pipeline backed by an in-memory store, with its own
    /// background dispatcher task.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self::with_store(bus, Arc::new(InMemoryAuditStore::new()))
    }

    /// Construct a pipeline backed by a caller-supplied [`AuditStore`].
    pub fn with_store(bus: Arc<dyn EventBus>, store: Arc<dyn AuditStore>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<PartialEvent>(DISPATCH_QUEUE_CAPACITY);
        let dispatcher_store = Arc::clone(&store);
        let dispatcher_bus = Arc::clone(&bus);

        let dispatcher = tokio::spawn(async move {
            while let Some(PartialEvent(mut event)) = receiver.recv().await {
                event.payload = redact_opt(&event.payload);
                event.response = redact_opt(&event.response);
                event.changes_before = redact_opt(&event.changes_before);
                event.changes_after = redact_opt(&event.changes_after);
                if let Some(headers) = &event.headers {
                    event.headers = Some(super::redact::redact(headers));
                }

                let id = event.id.clone();
                let write = dispatcher_store.put(event);
                match tokio::time::timeout(PERSIST_TIMEOUT, write).await {
                    Ok(Ok(())) => {
                        let _ = dispatcher_bus
                            .emit(topics::AUDIT_EVENT_CREATED, serde_json::json!({ "id": id }))
                            .await;
                    }
                    Ok(Err(e)) => {
                        metrics::record_audit_dropped();
                        warn!(error = %e, id, "audit event write failed, dropping");
                    }
                    Err(_) => {
                        metrics::record_audit_dropped();
                        warn!(id, "audit event persistence timed out, dropping");
                    }
                }
            }
        });

        Self {
            sender,
            store,
            dropped: Arc::new(AtomicU64::new(0)),
            _dispatcher: dispatcher,
        }
    }

    fn base_event(
        &self,
        action: &str,
        resource_type: &str,
        resource_ref: Option<String>,
        result: AuditResult,
        reason: Option<String>,
        opts: AuditOptions,
    ) -> AuditEvent {
        let (request_id, actor, http) = if RequestContext::is_set() {
            (
                RequestContext::request_id(),
                RequestContext::actor(),
                Some(RequestContext::http_metadata()),
            )
        } else {
            (uuid::Uuid::new_v4().to_string(), None, None)
        };

        let actor_kid = opts
            .actor_kid
            .or_else(|| actor.as_ref().map(|a| a.id().to_string()))
            .unwrap_or_else(|| "anonymous".to_string());
        let actor_sub = opts
            .actor_sub
            .or_else(|| actor.as_ref().and_then(|a| a.sub().map(str::to_string)));

        AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            request_id,
            at: Utc::now(),
            actor_kid,
            actor_sub,
            action: action.to_string(),
            module: opts.module,
            result,
            reason,
            resource_type: resource_type.to_string(),
            resource_ref,
            method: opts.method.or_else(|| http.as_ref().and_then(|h| h.method.clone())),
            endpoint: opts
                .endpoint
                .or_else(|| http.as_ref().and_then(|h| h.endpoint.clone())),
            query: opts.query,
            headers: opts.headers,
            payload: opts.payload,
            status_code: opts.status_code,
            latency_ms: opts.latency_ms,
            response: None,
            changes_before: opts.changes_before,
            changes_after: opts.changes_after,
            error_code: None,
            error_message: None,
            severity: opts.severity.unwrap_or_default(),
            tags: opts.tags,
        }
    }

    fn dispatch(&self, event: AuditEvent) {
        match self.sender.try_send(PartialEvent(event)) {
            Ok(()) => {}
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_audit_dropped();
                warn!("audit dispatcher queue full, event dropped");
            }
        }
    }

    /// Non-blocking allow record.
    pub async fn log_allow(
        &self,
        action: &str,
        resource_type: &str,
        resource_ref: Option<String>,
        opts: AuditOptions,
    ) {
        let event = self.base_event(action, resource_type, resource_ref, AuditResult::Allow, None, opts);
        self.dispatch(event);
    }

    /// Non-blocking deny record.
    pub async fn log_deny(
        &self,
        action: &str,
        resource_type: &str,
        resource_ref: Option<String>,
        reason: &str,
        opts: AuditOptions,
    ) {
        let event = self.base_event(
            action,
            resource_type,
            resource_ref,
            AuditResult::Deny,
            Some(reason.to_string()),
            opts,
        );
        self.dispatch(event);
    }

    /// Non-blocking error record.
    pub async fn log_error(
        &self,
        action: &str,
        resource_type: &str,
        resource_ref: Option<String>,
        err: &TrustError,
        opts: AuditOptions,
    ) {
        let mut event = self.base_event(
            action,
            resource_type,
            resource_ref,
            AuditResult::Error,
            None,
            opts,
        );
        event.error_code = Some(err.code().to_string());
        event.error_message = Some(err.to_string());
        self.dispatch(event);
    }

    /// Total events dropped due to a full dispatch queue or a persistence
    /// timeout/error, for metrics.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Response-capture join (§4.8): waits a short bounded interval, then
    /// updates up to the most recent 5 events for `request_id` created
    /// within the last 5 seconds whose `status_code` is unset.
    pub async fn response_captured(
        self: &Arc<Self>,
        request_id: String,
        status_code: u16,
        response: Value,
    ) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RESPONSE_JOIN_WAIT).await;
            let cutoff = Utc::now() - ChronoDuration::seconds(RESPONSE_JOIN_LOOKBACK_SECS);
            let events = match pipeline.store.all().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "response-capture join read failed");
                    return;
                }
            };
            let sanitized = super::redact::redact(&response);
            let targets: Vec<AuditEvent> = events
                .into_iter()
                .filter(|e| e.request_id == request_id && e.at >= cutoff && e.status_code.is_none())
                .take(RESPONSE_JOIN_MAX_EVENTS)
                .collect();
            for mut event in targets {
                event.status_code = Some(status_code);
                event.response = Some(sanitized.clone());
                if let Err(e) = pipeline.store.put(event).await {
                    warn!(error = %e, "response-capture join write failed");
                }
            }
        });
    }

    /// Fetch a single event.
    pub async fn get(&self, id: &str) -> Result<Option<AuditEvent>> {
        self.store.get(id).await
    }

    /// §4.8's filtered, paginated query surface.
    pub async fn query(&self, filters: &AuditQueryFilters, pagination: Pagination) -> Result<AuditPage> {
        let mut events = self.store.all().await?;
        events.retain(|e| filters.matches(e));

        match pagination.sort_order {
            SortOrder::Desc => events.sort_by(|a, b| b.at.cmp(&a.at)),
            SortOrder::Asc => events.sort_by(|a, b| a.at.cmp(&b.at)),
        }

        let total = events.len();
        let limit = pagination.limit.max(1);
        let total_pages = total.div_ceil(limit).max(1);
        let page = pagination.page.max(1);
        let start = (page - 1) * limit;
        let items: Vec<AuditEvent> = events.into_iter().skip(start).take(limit).collect();

        Ok(AuditPage {
            items,
            page,
            limit,
            total,
            total_pages,
            next_page: if page < total_pages { Some(page + 1) } else { None },
            prev_page: if page > 1 { Some(page - 1) } else { None },
            has_more: page < total_pages,
        })
    }

    /// §4.8's `summarize`: totals, counts by result/severity, earliest/latest `at`.
    pub async fn summarize(
        &self,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<AuditSummary> {
        let events = self.store.all().await?;
        let in_range: Vec<&AuditEvent> = events
            .iter()
            .filter(|e| e.at >= range.0 && e.at <= range.1)
            .collect();

        let mut by_result = std::collections::HashMap::new();
        let mut by_severity = std::collections::HashMap::new();
        for e in &in_range {
            *by_result.entry(format!("{:?}", e.result)).or_insert(0usize) += 1;
            *by_severity.entry(format!("{:?}", e.severity)).or_insert(0usize) += 1;
        }

        Ok(AuditSummary {
            total: in_range.len(),
            by_result,
            by_severity,
            earliest: in_range.iter().map(|e| e.at).min(),
            latest: in_range.iter().map(|e| e.at).max(),
        })
    }

    /// §4.8's `archive`: drop every event older than `before`, returning the count removed.
    pub async fn archive(&self, before: DateTime<Utc>) -> Result<usize> {
        self.store.delete_before(before).await
    }
}

/// Equality/`$in`-style filters accepted by [`AuditPipeline::query`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQueryFilters {
    pub action: Option<Vec<String>>,
    pub actor_kid: Option<Vec<String>>,
    pub actor_sub: Option<Vec<String>>,
    pub resource_type: Option<Vec<String>>,
    pub result: Option<Vec<AuditResult>>,
    pub severity: Option<Vec<AuditSeverity>>,
    pub method: Option<Vec<String>>,
    pub status_code: Option<Vec<u16>>,
    pub at_from: Option<DateTime<Utc>>,
    pub at_to: Option<DateTime<Utc>>,
    pub text: Option<String>,
}

impl AuditQueryFilters {
    fn matches(&self, event: &AuditEvent) -> bool {
        fn in_set<T: PartialEq + Clone>(set: &Option<Vec<T>>, value: &T) -> bool {
            set.as_ref().map_or(true, |s| s.contains(value))
        }

        in_set(&self.action, &event.action)
            && in_set(&self.actor_kid, &event.actor_kid)
            && self
                .actor_sub
                .as_ref()
                .map_or(true, |s| event.actor_sub.as_ref().is_some_and(|a| s.contains(a)))
            && in_set(&self.resource_type, &event.resource_type)
            && in_set(&self.result, &event.result)
            && in_set(&self.severity, &event.severity)
            && self
                .method
                .as_ref()
                .map_or(true, |s| event.method.as_ref().is_some_and(|m| s.contains(m)))
            && self
                .status_code
                .as_ref()
                .map_or(true, |s| event.status_code.is_some_and(|c| s.contains(&c)))
            && self.at_from.map_or(true, |from| event.at >= from)
            && self.at_to.map_or(true, |to| event.at <= to)
            && self.text.as_ref().map_or(true, |text| text_matches(event, text))
    }
}

fn text_matches(event: &AuditEvent, text: &str) -> bool {
    let needle = text.to_lowercase();
    [
        Some(event.action.clone()),
        event.reason.clone(),
        Some(event.resource_type.clone()),
        event.resource_ref.clone(),
        event.endpoint.clone(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&needle))
}

/// Sort direction for [`Pagination`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

/// Pagination parameters (§6 `meta.pagination`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 25,
            sort_order: SortOrder::Desc,
        }
    }
}

/// A page of query results, matching §6's `meta.pagination` envelope shape.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditEvent>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub next_page: Option<usize>,
    pub prev_page: Option<usize>,
    pub has_more: bool,
}

/// `summarize` output (§4.8).
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub by_result: std::collections::HashMap<String, usize>,
    pub by_severity: std::collections::HashMap<String, usize>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TracingEventBus;

    fn pipeline() -> Arc<AuditPipeline> {
        Arc::new(AuditPipeline::new(Arc::new(TracingEventBus::new())))
    }

    #[tokio::test]
    async fn log_allow_redacts_sensitive_changes() {
        let pipeline = pipeline();
        pipeline
            .log_allow(
                "LOGIN",
                "user",
                Some("u1".to_string()),
                AuditOptions {
                    changes_after: Some(serde_json::json!({ "token": "abc", "password": "p" })),
                    ..Default::default()
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = pipeline.query(&AuditQueryFilters::default(), Pagination::default()).await.unwrap();
        assert_eq!(events.items.len(), 1);
        let after = events.items[0].changes_after.as_ref().unwrap();
        assert_eq!(after["token"], serde_json::json!("***REDACTED***"));
        assert_eq!(after["password"], serde_json::json!("***REDACTED***"));
    }

    #[tokio::test]
    async fn response_captured_joins_recent_event() {
        let pipeline = pipeline();
        pipeline
            .log_allow("READ", "card", Some("c1".to_string()), AuditOptions::default())
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = pipeline
            .query(&AuditQueryFilters::default(), Pagination::default())
            .await
            .unwrap();
        let request_id = before.items[0].request_id.clone();

        pipeline
            .response_captured(request_id.clone(), 200, serde_json::json!({ "ok": true }))
            .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        let event = pipeline.get(&before.items[0].id).await.unwrap().unwrap();
        assert_eq!(event.status_code, Some(200));
    }

    #[tokio::test]
    async fn query_paginates_results() {
        let pipeline = pipeline();
        for i in 0..7 {
            pipeline
                .log_allow("READ", "card", Some(format!("c{i}")), AuditOptions::default())
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let page = pipeline
            .query(
                &AuditQueryFilters::default(),
                Pagination { page: 1, limit: 3, sort_order: SortOrder::Desc },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn archive_drops_old_events() {
        let pipeline = pipeline();
        pipeline
            .log_allow("READ", "card", Some("c1".to_string()), AuditOptions::default())
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = pipeline.archive(Utc::now() + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
    }
}

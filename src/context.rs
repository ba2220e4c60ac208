//! Request context propagation (C4)
//!
//! `requestId`, the resolved `Actor`, and captured HTTP metadata travel
//! across async boundaries via [`tokio::task_local!`], the same mechanism
//! the teacher crate uses for per-task auth state. Never used to carry
//! business inputs — only cross-cutting identity/audit data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static CONTEXT: RequestContextValues;
}

/// An authenticated principal: a human user or a service account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// A logged-in human user.
    User {
        /// The invariable actor id (e.g. the user's `kid`/internal id).
        id: String,
        /// The subject claim from the token that authenticated this actor.
        sub: Option<String>,
        /// Space-separated scopes collapsed to a list.
        scopes: Vec<String>,
        /// Client IP, if known.
        ip_address: Option<String>,
    },
    /// A machine-to-machine service account.
    Service {
        /// The invariable actor id.
        id: String,
        /// The subject claim from the token that authenticated this actor.
        sub: Option<String>,
        /// Space-separated scopes collapsed to a list.
        scopes: Vec<String>,
        /// Client IP, if known.
        ip_address: Option<String>,
        /// The role keys assigned directly to this service account.
        role_keys: Vec<String>,
    },
}

impl Actor {
    /// The invariable actor id, independent of kind.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User { id, .. } | Self::Service { id, .. } => id,
        }
    }

    /// `"user"` or `"service"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Service { .. } => "service",
        }
    }

    /// The subject claim, if any.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        match self {
            Self::User { sub, .. } | Self::Service { sub, .. } => sub.as_deref(),
        }
    }
}

/// HTTP metadata captured at the edge of a request, for the audit pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpMetadata {
    /// HTTP method, e.g. `"POST"`.
    pub method: Option<String>,
    /// Request path.
    pub endpoint: Option<String>,
    /// Parsed query parameters.
    pub query: HashMap<String, String>,
    /// Request headers (redacted later by the audit pipeline, not here).
    pub headers: HashMap<String, String>,
}

/// The values established for the lifetime of a request's task tree.
#[derive(Debug, Clone)]
pub struct RequestContextValues {
    request_id: String,
    actor: Option<Actor>,
    http: HttpMetadata,
}

impl RequestContextValues {
    /// Construct the values to install for a new request.
    #[must_use]
    pub fn new(request_id: String, actor: Option<Actor>, http: HttpMetadata) -> Self {
        Self {
            request_id,
            actor,
            http,
        }
    }
}

/// Establishes a [`RequestContextValues`] scope and runs `fut` inside it.
///
/// Any task spawned from within `fut` must explicitly re-enter the scope
/// (task-local values do not cross `tokio::spawn` automatically); capture
/// [`RequestContext::current`] before spawning and call [`run`] again in the
/// spawned task if the context must follow it.
pub async fn run<F, T>(values: RequestContextValues, fut: F) -> T
where
    F: Future<Output = T>,
{
    CONTEXT.scope(values, fut).await
}

/// Accessors for the task-local request context. Zero-sized; all methods
/// read from the ambient [`tokio::task_local!`] cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext;

impl RequestContext {
    /// The current request's id. Panics if called outside [`run`] — the
    /// same "must be inside scope" contract the teacher's context carries.
    #[must_use]
    pub fn request_id() -> String {
        CONTEXT.with(|v| v.request_id.clone())
    }

    /// The current request's resolved actor, if authentication succeeded.
    #[must_use]
    pub fn actor() -> Option<Actor> {
        CONTEXT.with(|v| v.actor.clone())
    }

    /// The current actor's id, if any.
    #[must_use]
    pub fn actor_id() -> Option<String> {
        CONTEXT.with(|v| v.actor.as_ref().map(|a| a.id().to_string()))
    }

    /// The captured HTTP metadata for the current request.
    #[must_use]
    pub fn http_metadata() -> HttpMetadata {
        CONTEXT.with(|v| v.http.clone())
    }

    /// True if a context has been established on the current task.
    #[must_use]
    pub fn is_set() -> bool {
        CONTEXT.try_with(|_| ()).is_ok()
    }

    /// Snapshot of the current values, for re-establishing the scope on a
    /// spawned task (`tokio::spawn(context::run(snapshot, async move { .. }))`).
    #[must_use]
    pub fn snapshot() -> Option<RequestContextValues> {
        CONTEXT.try_with(Clone::clone).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_actor() -> Actor {
        Actor::User {
            id: "u-1".to_string(),
            sub: Some("admin@example.com".to_string()),
            scopes: vec!["read".to_string()],
            ip_address: Some("127.0.0.1".to_string()),
        }
    }

    #[tokio::test]
    async fn values_are_visible_inside_scope() {
        let values = RequestContextValues::new(
            "req-1".to_string(),
            Some(sample_actor()),
            HttpMetadata::default(),
        );
        run(values, async {
            assert_eq!(RequestContext::request_id(), "req-1");
            assert_eq!(RequestContext::actor_id().as_deref(), Some("u-1"));
        })
        .await;
    }

    #[tokio::test]
    async fn propagates_across_await_points() {
        let values = RequestContextValues::new("req-2".to_string(), None, HttpMetadata::default());
        run(values, async {
            tokio::task::yield_now().await;
            assert_eq!(RequestContext::request_id(), "req-2");
            assert!(RequestContext::actor().is_none());
        })
        .await;
    }

    #[test]
    fn is_set_false_outside_scope() {
        assert!(!RequestContext::is_set());
    }
}

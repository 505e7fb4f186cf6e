use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use serde_json::Value;

use crate::error::RouteError;
use crate::traits::Resolve;
use crate::types::TypeHandle;

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-call context handed unchanged to every filter of one Send call.
#[derive(Clone)]
pub struct RequestContext {
    path: String,
    parameter_type: TypeHandle,
    result_type: Option<TypeHandle>,
    provider: Arc<dyn Resolve>,
}

impl RequestContext {
    /// # Errors
    ///
    /// Returns `RouteError::InvalidArgument` if `path` is empty or whitespace.
    pub fn new(
        path: impl Into<String>,
        parameter_type: TypeHandle,
        provider: Arc<dyn Resolve>,
        result_type: Option<TypeHandle>,
    ) -> Result<Self, RouteError> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(RouteError::InvalidArgument {
                name: "path",
                reason: "must not be empty or whitespace",
            });
        }
        Ok(Self {
            path,
            parameter_type,
            result_type,
            provider,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The parameter type declared by the routed service.
    #[must_use]
    pub fn parameter_type(&self) -> &TypeHandle {
        &self.parameter_type
    }

    /// The result type the caller asked for, if any.
    #[must_use]
    pub fn result_type(&self) -> Option<&TypeHandle> {
        self.result_type.as_ref()
    }

    #[must_use]
    pub fn needs_caller_result(&self) -> bool {
        self.result_type.is_some()
    }

    /// Resolver active for this call.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Resolve> {
        &self.provider
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.path)
            .field("parameter_type", &self.parameter_type)
            .field("result_type", &self.result_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PublishContext
// ---------------------------------------------------------------------------

/// Context shared read-only by every listener of one publish call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishContext {
    key: String,
    headers: HashMap<String, Value>,
    id: String,
    timestamp_ms: u64,
}

impl PublishContext {
    /// Creates a context with a fresh id and the current time.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::InvalidArgument` if `key` is empty or whitespace.
    pub fn new(
        key: impl Into<String>,
        headers: HashMap<String, Value>,
    ) -> Result<Self, RouteError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RouteError::InvalidArgument {
                name: "key",
                reason: "must not be empty or whitespace",
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Ok(Self {
            key,
            headers,
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp_ms,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, Value> {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Unique id of the publish call (32 lowercase hex digits).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unix time in milliseconds at which the publish call started.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

// ---------------------------------------------------------------------------
// PublishContextAccessor
// ---------------------------------------------------------------------------

/// Ambient slot through which code running inside a listener scope reads the
/// current `PublishContext`.
///
/// A slot belongs to exactly one logical task. Work spawned from that task
/// receives its own slot via [`fork`](Self::fork), seeded with the value current
/// at fork time; later `set`/`clear` calls on either slot stay local to it.
#[derive(Debug, Default)]
pub struct PublishContextAccessor {
    current: ArcSwapOption<PublishContext>,
}

impl PublishContextAccessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<PublishContext>> {
        self.current.load_full()
    }

    pub fn set(&self, context: Arc<PublishContext>) {
        self.current.store(Some(context));
    }

    pub fn clear(&self) {
        self.current.store(None);
    }

    /// A new slot for a child task, holding the value current right now.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            current: ArcSwapOption::new(self.current.load_full()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::traits::{Capability, Instance};

    struct EmptyResolver;

    impl Resolve for EmptyResolver {
        fn resolve_all(&self, _capability: Capability) -> Vec<Instance> {
            Vec::new()
        }
    }

    #[test]
    fn request_context_rejects_blank_path() {
        for path in ["", "  "] {
            let err = RequestContext::new(
                path,
                TypeHandle::of::<String>(),
                Arc::new(EmptyResolver),
                None,
            )
            .unwrap_err();
            assert!(matches!(err, RouteError::InvalidArgument { name: "path", .. }));
        }
    }

    #[test]
    fn request_context_reports_caller_result_need() {
        let without = RequestContext::new(
            "/ping",
            TypeHandle::of::<String>(),
            Arc::new(EmptyResolver),
            None,
        )
        .unwrap();
        assert!(!without.needs_caller_result());
        assert_eq!(without.path(), "/ping");

        let with = RequestContext::new(
            "/ping",
            TypeHandle::of::<String>(),
            Arc::new(EmptyResolver),
            Some(TypeHandle::of::<u32>()),
        )
        .unwrap();
        assert!(with.needs_caller_result());
        assert!(with.result_type().unwrap().is::<u32>());
    }

    #[test]
    fn publish_context_rejects_blank_key() {
        for key in ["", " \t"] {
            assert!(PublishContext::new(key, HashMap::new()).is_err());
        }
    }

    #[test]
    fn publish_context_carries_headers_id_and_time() {
        let mut headers = HashMap::new();
        headers.insert("key1".to_string(), Value::from("123"));
        headers.insert("key2".to_string(), Value::from(456));

        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let ctx = PublishContext::new("orders.created", headers).unwrap();

        assert_eq!(ctx.key(), "orders.created");
        assert_eq!(ctx.headers().len(), 2);
        assert_eq!(ctx.header("key2"), Some(&Value::from(456)));
        assert_eq!(ctx.id().len(), 32);
        assert!(uuid::Uuid::try_parse(ctx.id()).is_ok());
        assert!(u128::from(ctx.timestamp_ms()) + 30_000 >= before);
    }

    #[test]
    fn publish_context_ids_are_unique() {
        let a = PublishContext::new("k", HashMap::new()).unwrap();
        let b = PublishContext::new("k", HashMap::new()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn accessor_starts_empty_and_holds_set_value() {
        let accessor = PublishContextAccessor::new();
        assert!(accessor.get().is_none());

        let ctx = Arc::new(PublishContext::new("foo", HashMap::new()).unwrap());
        accessor.set(ctx.clone());
        assert!(Arc::ptr_eq(&accessor.get().unwrap(), &ctx));

        accessor.clear();
        assert!(accessor.get().is_none());
    }

    #[tokio::test]
    async fn forked_slot_is_unaffected_by_parent_clear() {
        let parent = PublishContextAccessor::new();
        let ctx = Arc::new(PublishContext::new("foo", HashMap::new()).unwrap());
        parent.set(ctx.clone());

        let child = parent.fork();
        let (captured_tx, captured_rx) = oneshot::channel::<()>();
        let (cleared_tx, cleared_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let seen = child.get();
            let _ = captured_tx.send(());
            let _ = cleared_rx.await;
            (seen, child.get())
        });

        captured_rx.await.unwrap();
        parent.clear();
        let _ = cleared_tx.send(());

        let (seen, after) = task.await.unwrap();
        assert!(Arc::ptr_eq(&seen.unwrap(), &ctx));
        assert!(Arc::ptr_eq(&after.unwrap(), &ctx));
        assert!(parent.get().is_none());
    }

    #[tokio::test]
    async fn child_replacement_does_not_leak_to_parent_or_siblings() {
        let parent = PublishContextAccessor::new();
        let ctx = Arc::new(PublishContext::new("foo", HashMap::new()).unwrap());
        parent.set(ctx.clone());

        let sibling = parent.fork();
        let child = parent.fork();

        tokio::spawn(async move {
            child.set(Arc::new(PublishContext::new("bar", HashMap::new()).unwrap()));
            assert_eq!(child.get().unwrap().key(), "bar");
            child.clear();
            assert!(child.get().is_none());
        })
        .await
        .unwrap();

        assert!(Arc::ptr_eq(&parent.get().unwrap(), &ctx));
        assert!(Arc::ptr_eq(&sibling.get().unwrap(), &ctx));
    }
}

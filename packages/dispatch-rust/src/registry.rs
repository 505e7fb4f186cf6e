use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use waypost_core::{
    is_listener_candidate, is_service_candidate, listener_descriptors, service_descriptors,
    validate_filters, FilterType, ListenerDescriptor, RouteError, Routable, ServiceDescriptor,
    TypeInfo,
};

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Maps service paths to their descriptors.
///
/// Populated at startup, read concurrently afterwards. Paths are unique unless
/// a registration explicitly tolerates duplicates, in which case the first
/// registration for a path is kept.
pub struct ServiceRegistry {
    by_path: DashMap<String, ServiceDescriptor>,
    /// Registration order, for deterministic `paths()` output.
    order: RwLock<Vec<String>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_path: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers every service annotation of `info`.
    ///
    /// `extra_filters` run after the filters declared on the type. Descriptors
    /// are validated as a whole before any of them is inserted.
    ///
    /// # Errors
    ///
    /// - `RouteError::InvalidRoutingType` if discovery rejects the type
    /// - `RouteError::FilterConstructionInvalid` if a filter cannot be built
    /// - `RouteError::DuplicateAddress` if a path is taken and `allow_duplicate` is unset
    pub fn add(
        &self,
        info: &TypeInfo,
        extra_filters: &[FilterType],
        allow_duplicate: bool,
    ) -> Result<(), RouteError> {
        let descriptors: Vec<ServiceDescriptor> = service_descriptors(info)?
            .into_iter()
            .map(|descriptor| descriptor.with_extra_filters(extra_filters))
            .collect();
        for descriptor in &descriptors {
            validate_filters(descriptor.filters())?;
        }
        if !allow_duplicate {
            let mut incoming = HashSet::with_capacity(descriptors.len());
            for descriptor in &descriptors {
                let path = descriptor.path();
                if !incoming.insert(path) || self.by_path.contains_key(path) {
                    return Err(RouteError::DuplicateAddress {
                        path: path.to_string(),
                    });
                }
            }
        }

        let mut order = self.order.write();
        for descriptor in descriptors {
            let path = descriptor.path().to_string();
            match self.by_path.entry(path.clone()) {
                Entry::Occupied(_) if allow_duplicate => {
                    tracing::debug!(path = %path, "duplicate service path ignored");
                }
                Entry::Occupied(_) => return Err(RouteError::DuplicateAddress { path }),
                Entry::Vacant(slot) => {
                    tracing::trace!(
                        path = %path,
                        service = descriptor.parameter_type().name(),
                        "service registered"
                    );
                    slot.insert(descriptor);
                    order.push(path);
                }
            }
        }
        Ok(())
    }

    /// Registers a type that carries its own routing metadata.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::add`].
    pub fn add_type<T: Routable>(&self, extra_filters: &[FilterType]) -> Result<(), RouteError> {
        self.add(&T::type_info(), extra_filters, false)
    }

    /// Registers every candidate that is a routable service and skips the
    /// rest. Returns the number of descriptors added.
    ///
    /// # Errors
    ///
    /// Fails on filter or duplicate-path errors for an otherwise valid candidate.
    pub fn scan<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a TypeInfo>,
        extra_filters: &[FilterType],
        allow_duplicate: bool,
    ) -> Result<usize, RouteError> {
        let before = self.len();
        for info in candidates {
            if is_service_candidate(info) {
                self.add(info, extra_filters, allow_duplicate)?;
            }
        }
        Ok(self.len() - before)
    }

    /// Looks up the descriptor for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<ServiceDescriptor> {
        self.by_path.get(path).map(|entry| entry.value().clone())
    }

    /// Registered paths, in registration order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ListenerRegistry
// ---------------------------------------------------------------------------

/// Maps event keys to the listeners registered under them.
///
/// Any number of listener types may share a key; they are kept in
/// registration order, and a type is listed at most once per key.
pub struct ListenerRegistry {
    by_key: DashMap<String, Vec<ListenerDescriptor>>,
    order: RwLock<Vec<String>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers every listener annotation of `info`.
    ///
    /// # Errors
    ///
    /// Returns `RouteError::InvalidRoutingType` if discovery rejects the type.
    pub fn add(&self, info: &TypeInfo) -> Result<(), RouteError> {
        let descriptors = listener_descriptors(info)?;
        let mut order = self.order.write();
        for descriptor in descriptors {
            let key = descriptor.key().to_string();
            let mut listeners = self.by_key.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                Vec::new()
            });
            if listeners.iter().any(|existing| existing == &descriptor) {
                continue;
            }
            tracing::trace!(
                key = %key,
                listener = descriptor.listener_type().name(),
                "listener registered"
            );
            listeners.push(descriptor);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// See [`ListenerRegistry::add`].
    pub fn add_type<T: Routable>(&self) -> Result<(), RouteError> {
        self.add(&T::type_info())
    }

    /// Registers every candidate that is a routable listener and skips the
    /// rest. Returns the number of candidates registered.
    pub fn scan<'a>(&self, candidates: impl IntoIterator<Item = &'a TypeInfo>) -> usize {
        candidates
            .into_iter()
            .filter(|info| is_listener_candidate(info))
            .filter(|info| self.add(info).is_ok())
            .count()
    }

    /// Listeners for `key` in registration order; empty for unknown keys.
    #[must_use]
    pub fn listeners(&self, key: &str) -> Vec<ListenerDescriptor> {
        self.by_key
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Registered keys, in registration order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.order.read().clone()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use waypost_core::{
        MediateKind, Next, Notification, Payload, Request, RequestContext, ServiceFilter,
        TypeHandle,
    };

    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct ServicePing {
        value: String,
    }

    impl Request for ServicePing {
        type Response = ();
    }

    impl Routable for ServicePing {
        fn type_info() -> TypeInfo {
            TypeInfo::request::<Self>().as_service("/ping")
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ServicePing2 {
        value: String,
    }

    impl Request for ServicePing2 {
        type Response = ();
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pang {}

    impl Notification for Pang {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Pang2 {}

    impl Notification for Pang2 {}

    macro_rules! pass_filter {
        ($name:ident) => {
            #[derive(Default)]
            struct $name;

            #[async_trait]
            impl ServiceFilter for $name {
                async fn handle(
                    &self,
                    _ctx: &RequestContext,
                    parameter: Payload,
                    next: Next<'_>,
                ) -> Result<Payload, RouteError> {
                    next.run(parameter).await
                }
            }
        };
    }

    pass_filter!(Filter1);
    pass_filter!(Filter2);
    pass_filter!(Filter3);
    pass_filter!(Filter4);

    fn ping2_info() -> TypeInfo {
        TypeInfo::request::<ServicePing2>().as_service("/ping")
    }

    #[test]
    fn add_registers_annotated_service() {
        let registry = ServiceRegistry::new();
        registry.add_type::<ServicePing>(&[]).unwrap();

        let descriptor = registry.get("/ping").unwrap();
        assert!(descriptor.parameter_type().is::<ServicePing>());
        assert!(descriptor.filters().is_empty());
        assert_eq!(registry.paths(), vec!["/ping"]);
    }

    #[test]
    fn add_expands_multiple_annotations() {
        let registry = ServiceRegistry::new();
        let info = TypeInfo::request::<ServicePing>()
            .as_service("/ping/1")
            .as_service("/ping/2");
        registry.add(&info, &[], false).unwrap();

        assert!(registry.get("/ping/1").is_some());
        assert!(registry.get("/ping/2").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_path_fails_without_tolerance() {
        let registry = ServiceRegistry::new();
        registry.add_type::<ServicePing>(&[]).unwrap();

        let err = registry.add(&ping2_info(), &[], false).unwrap_err();
        assert!(matches!(err, RouteError::DuplicateAddress { path } if path == "/ping"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_path_keeps_first_with_tolerance() {
        let registry = ServiceRegistry::new();
        registry.add_type::<ServicePing>(&[]).unwrap();
        registry.add(&ping2_info(), &[], true).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("/ping").unwrap().parameter_type().is::<ServicePing>());
    }

    #[test]
    fn failed_registration_inserts_nothing() {
        let registry = ServiceRegistry::new();
        registry.add_type::<ServicePing>(&[]).unwrap();
        let info = TypeInfo::request::<ServicePing2>()
            .as_service("/fresh")
            .as_service("/ping");

        assert!(registry.add(&info, &[], false).is_err());
        assert!(registry.get("/fresh").is_none());
    }

    #[test]
    fn repeated_path_within_one_type_inserts_nothing() {
        let registry = ServiceRegistry::new();
        let info = TypeInfo::request::<ServicePing>()
            .as_service("/a")
            .as_service("/a");

        let err = registry.add(&info, &[], false).unwrap_err();
        assert!(matches!(err, RouteError::DuplicateAddress { ref path } if path == "/a"));
        assert!(registry.is_empty());
        assert!(registry.paths().is_empty());

        registry.add(&info, &[], true).unwrap();
        assert_eq!(registry.paths(), vec!["/a"]);
    }

    #[test]
    fn extra_filters_are_set_in_order() {
        let registry = ServiceRegistry::new();
        registry
            .add_type::<ServicePing>(&[FilterType::of::<Filter1>(), FilterType::of::<Filter2>()])
            .unwrap();

        let filters = registry.get("/ping").unwrap().filters().to_vec();
        assert_eq!(filters.len(), 2);
        assert!(filters[0].is::<Filter1>());
        assert!(filters[1].is::<Filter2>());
    }

    #[test]
    fn extra_filters_follow_declared_filters() {
        let registry = ServiceRegistry::new();
        let info = TypeInfo::request::<ServicePing>().as_service_with(
            "/ping",
            vec![FilterType::of::<Filter1>(), FilterType::of::<Filter4>()],
        );
        registry
            .add(
                &info,
                &[FilterType::of::<Filter2>(), FilterType::of::<Filter3>()],
                false,
            )
            .unwrap();

        let filters = registry.get("/ping").unwrap().filters().to_vec();
        assert_eq!(filters.len(), 4);
        assert!(filters[0].is::<Filter1>());
        assert!(filters[1].is::<Filter4>());
        assert!(filters[2].is::<Filter2>());
        assert!(filters[3].is::<Filter3>());
    }

    #[test]
    fn invalid_filter_is_rejected_at_registration() {
        let registry = ServiceRegistry::new();
        let err = registry
            .add_type::<ServicePing>(&[FilterType::declared::<String>()])
            .unwrap_err();
        assert!(matches!(err, RouteError::FilterConstructionInvalid { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_path_is_absent() {
        let registry = ServiceRegistry::new();
        assert!(registry.get("/unknown/path").is_none());
    }

    #[test]
    fn scan_skips_non_service_candidates() {
        let registry = ServiceRegistry::new();
        let candidates = vec![
            ServicePing::type_info(),
            TypeInfo::request::<ServicePing2>(),
            TypeInfo::notification::<Pang>().as_event_listener("pang"),
            TypeInfo::plain(TypeHandle::of::<String>()).as_service("/string"),
        ];
        let added = registry.scan(&candidates, &[], false).unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.paths(), vec!["/ping"]);
    }

    #[test]
    fn listeners_registered_under_key() {
        let registry = ListenerRegistry::new();
        registry
            .add(&TypeInfo::notification::<Pang>().as_event_listener("pang"))
            .unwrap();

        let listeners = registry.listeners("pang");
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].mediate_kind(), MediateKind::Notification);
        assert_eq!(registry.keys(), vec!["pang"]);
    }

    #[test]
    fn listener_annotations_expand_to_keys() {
        let registry = ListenerRegistry::new();
        registry
            .add(
                &TypeInfo::notification::<Pang>()
                    .as_event_listener("pang.1")
                    .as_event_listener("pang.2"),
            )
            .unwrap();
        assert_eq!(registry.keys(), vec!["pang.1", "pang.2"]);
    }

    #[test]
    fn shared_key_keeps_every_listener_in_order() {
        let registry = ListenerRegistry::new();
        registry
            .add(&TypeInfo::notification::<Pang>().as_event_listener("pang"))
            .unwrap();
        registry
            .add(&TypeInfo::notification::<Pang2>().as_event_listener("pang"))
            .unwrap();
        registry
            .add(&TypeInfo::notification::<Pang>().as_event_listener("pang"))
            .unwrap();

        let listeners = registry.listeners("pang");
        assert_eq!(registry.keys().len(), 1);
        assert_eq!(listeners.len(), 2);
        assert!(listeners[0].listener_type().is::<Pang>());
        assert!(listeners[1].listener_type().is::<Pang2>());
    }

    #[test]
    fn unknown_key_yields_no_listeners() {
        let registry = ListenerRegistry::new();
        assert!(registry.listeners("unknown.event").is_empty());
    }

    #[test]
    fn listener_scan_counts_registered_candidates() {
        let registry = ListenerRegistry::new();
        let candidates = vec![
            TypeInfo::notification::<Pang>().as_event_listener("pang"),
            TypeInfo::request::<ServicePing>().as_event_listener("ping.event"),
            ServicePing::type_info(),
        ];
        assert_eq!(registry.scan(&candidates), 2);
        assert_eq!(
            registry.listeners("ping.event")[0].mediate_kind(),
            MediateKind::Request
        );
    }

    fn listener_info(key: &str, first: bool) -> TypeInfo {
        if first {
            TypeInfo::notification::<Pang>().as_event_listener(key)
        } else {
            TypeInfo::notification::<Pang2>().as_event_listener(key)
        }
    }

    proptest! {
        #[test]
        fn tolerant_service_paths_keep_first_registration_order(
            picks in proptest::collection::vec(0_u8..5, 1..24),
        ) {
            let registry = ServiceRegistry::new();
            let mut expected: Vec<String> = Vec::new();
            for pick in &picks {
                let path = format!("/svc/{pick}");
                registry
                    .add(&TypeInfo::request::<ServicePing>().as_service(path.clone()), &[], true)
                    .unwrap();
                if !expected.contains(&path) {
                    expected.push(path);
                }
            }

            prop_assert_eq!(registry.len(), expected.len());
            prop_assert_eq!(registry.paths(), expected);
        }

        #[test]
        fn listener_keys_and_lists_follow_registration_order(
            registrations in proptest::collection::vec((0_u8..4, any::<bool>()), 1..24),
        ) {
            let registry = ListenerRegistry::new();
            let mut expected: Vec<(String, Vec<bool>)> = Vec::new();
            for (pick, first) in &registrations {
                let key = format!("key.{pick}");
                registry.add(&listener_info(&key, *first)).unwrap();

                match expected.iter_mut().find(|(known, _)| *known == key) {
                    Some((_, kinds)) if !kinds.contains(first) => kinds.push(*first),
                    Some(_) => {}
                    None => expected.push((key, vec![*first])),
                }
            }

            let keys: Vec<String> = expected.iter().map(|(key, _)| key.clone()).collect();
            prop_assert_eq!(registry.keys(), keys);
            for (key, kinds) in &expected {
                let listeners = registry.listeners(key);
                prop_assert_eq!(listeners.len(), kinds.len());
                for (listener, first) in listeners.iter().zip(kinds) {
                    prop_assert_eq!(listener.listener_type().is::<Pang>(), *first);
                }
            }
        }
    }
}

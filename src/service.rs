//! Service definition: the methods and eventgroups a service instance offers.
//!
//! A [`Service`] is a passive description: service id, interface version, a
//! method_id -> handler map, and an eventgroup_id -> event_ids map. It knows
//! nothing about transports, subscribers, or discovery; [`crate::ServerServiceInstance`]
//! and [`crate::ClientServiceInstance`] attach one to the network.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::header::{MethodId, ServiceId};
use crate::sd::EventgroupId;
use crate::types::ReturnCode;

/// Outcome of a method handler invocation.
#[derive(Debug, Clone)]
pub enum MethodOutcome {
    /// Reply with message_type=RESPONSE, return_code=E_OK, and this payload.
    Success(Bytes),
    /// Reply with message_type=ERROR, the given return code, and this payload.
    Error(Bytes, ReturnCode),
}

impl MethodOutcome {
    /// Convenience constructor for a successful outcome.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self::Success(payload.into())
    }

    /// Convenience constructor for a failed outcome.
    pub fn error(payload: impl Into<Bytes>, return_code: ReturnCode) -> Self {
        Self::Error(payload.into(), return_code)
    }
}

/// A synchronous method handler invoked on the service instance's own task.
///
/// Handlers must not block; spawn a task and reply asynchronously if the
/// work requires it (not supported directly by this signature).
pub type MethodHandler = Arc<dyn Fn(Bytes) -> MethodOutcome + Send + Sync>;

/// A named bundle of event ids published together as one subscribable unit.
#[derive(Debug, Clone, Default)]
pub struct EventGroup {
    pub id: EventgroupId,
    pub event_ids: Vec<MethodId>,
}

impl EventGroup {
    fn with_events(id: EventgroupId, event_ids: impl IntoIterator<Item = MethodId>) -> Self {
        Self {
            id,
            event_ids: event_ids.into_iter().collect(),
        }
    }
}

/// A service's method and eventgroup surface, shared between a server
/// instance that hosts it and a client instance that calls/subscribes to it.
#[derive(Clone)]
pub struct Service {
    pub service_id: ServiceId,
    pub major_version: u8,
    pub minor_version: u32,
    methods: HashMap<MethodId, MethodHandler>,
    eventgroups: HashMap<EventgroupId, EventGroup>,
}

impl Service {
    /// Start building a service with default version 1.0.
    pub fn builder(service_id: ServiceId) -> ServiceBuilder {
        ServiceBuilder::new(service_id)
    }

    /// Look up the handler registered for `method_id`, if any.
    pub fn method_handler(&self, method_id: MethodId) -> Option<&MethodHandler> {
        self.methods.get(&method_id)
    }

    /// Whether `eventgroup_id` is part of this service's definition.
    pub fn has_eventgroup(&self, eventgroup_id: EventgroupId) -> bool {
        self.eventgroups.contains_key(&eventgroup_id)
    }

    /// The eventgroup definition for `eventgroup_id`, if any.
    pub fn eventgroup(&self, eventgroup_id: EventgroupId) -> Option<&EventGroup> {
        self.eventgroups.get(&eventgroup_id)
    }

    /// Every eventgroup this service defines.
    pub fn eventgroups(&self) -> impl Iterator<Item = &EventGroup> {
        self.eventgroups.values()
    }
}

/// Builder for [`Service`]. Registering the same method id or eventgroup id
/// twice keeps the first registration and silently drops the second.
pub struct ServiceBuilder {
    service_id: ServiceId,
    major_version: u8,
    minor_version: u32,
    methods: HashMap<MethodId, MethodHandler>,
    eventgroups: HashMap<EventgroupId, EventGroup>,
}

impl ServiceBuilder {
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            major_version: 1,
            minor_version: 0,
            methods: HashMap::new(),
            eventgroups: HashMap::new(),
        }
    }

    pub fn major_version(mut self, major_version: u8) -> Self {
        self.major_version = major_version;
        self
    }

    pub fn minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = minor_version;
        self
    }

    /// Register a handler for `method_id`.
    pub fn method<F>(mut self, method_id: MethodId, handler: F) -> Self
    where
        F: Fn(Bytes) -> MethodOutcome + Send + Sync + 'static,
    {
        self.methods
            .entry(method_id)
            .or_insert_with(|| Arc::new(handler) as MethodHandler);
        self
    }

    /// Register an eventgroup bundling the given event ids.
    pub fn eventgroup(mut self, eventgroup_id: EventgroupId, event_ids: impl IntoIterator<Item = MethodId>) -> Self {
        self.eventgroups
            .entry(eventgroup_id)
            .or_insert_with(|| EventGroup::with_events(eventgroup_id, event_ids));
        self
    }

    pub fn build(self) -> Service {
        Service {
            service_id: self.service_id,
            major_version: self.major_version,
            minor_version: self.minor_version,
            methods: self.methods,
            eventgroups: self.eventgroups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_handler_dispatches() {
        let service = Service::builder(ServiceId(0x1234))
            .method(MethodId(0x0001), |payload| MethodOutcome::ok(payload))
            .build();

        let handler = service.method_handler(MethodId(0x0001)).unwrap();
        match handler(Bytes::from_static(b"ping")) {
            MethodOutcome::Success(payload) => assert_eq!(payload.as_ref(), b"ping"),
            MethodOutcome::Error(..) => panic!("expected success"),
        }
        assert!(service.method_handler(MethodId(0x0002)).is_none());
    }

    #[test]
    fn duplicate_method_registration_keeps_first() {
        let service = Service::builder(ServiceId(0x1234))
            .method(MethodId(0x0001), |_| MethodOutcome::ok(b"first".as_slice()))
            .method(MethodId(0x0001), |_| MethodOutcome::ok(b"second".as_slice()))
            .build();

        let handler = service.method_handler(MethodId(0x0001)).unwrap();
        match handler(Bytes::new()) {
            MethodOutcome::Success(payload) => assert_eq!(payload.as_ref(), b"first"),
            MethodOutcome::Error(..) => panic!("expected success"),
        }
    }

    #[test]
    fn eventgroup_lookup() {
        let service = Service::builder(ServiceId(0x1234))
            .eventgroup(EventgroupId(0x0010), [MethodId(0x8001), MethodId(0x8002)])
            .build();

        assert!(service.has_eventgroup(EventgroupId(0x0010)));
        assert!(!service.has_eventgroup(EventgroupId(0x0011)));
        let eg = service.eventgroup(EventgroupId(0x0010)).unwrap();
        assert_eq!(eg.event_ids, vec![MethodId(0x8001), MethodId(0x8002)]);
    }
}

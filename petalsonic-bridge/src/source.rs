//! Acoustic sources: one native simulation source, optionally tied to a
//! middleware event.

use crate::backend::{HandleKind, OwnedHandle, RawHandle, SimulationFlags};
use crate::engine::LiveEngine;
use crate::error::Result;
use crate::lock;
use crate::math::Transform;
use crate::middleware::{AudioMiddleware, EffectHandle, EventId, SpatializerParam};
use crate::registry::MarkerId;
use std::fmt;
use std::sync::{Arc, Mutex};

/// The middleware side of a source: who registered it and under which
/// handle.
struct MiddlewareLink {
    middleware: Arc<dyn AudioMiddleware>,
    handle: i32,
}

/// One native simulation source.
///
/// A source either follows a middleware event (an emitter) or has no event at
/// all, in which case it is the reverb listener and follows the listener.
/// Dropping a source removes it from its simulator, unregisters it from the
/// middleware and then releases the native handle.
pub struct AcousticSource {
    handle: OwnedHandle,
    simulator: Arc<OwnedHandle>,
    middleware: Option<MiddlewareLink>,
    event: Option<EventId>,
    effect: Option<EffectHandle>,
    guid: String,
    transform: Mutex<Transform>,
    static_marker: Mutex<Option<MarkerId>>,
}

impl AcousticSource {
    /// Creates the native source for a middleware event.
    ///
    /// Adds the source to the simulator, registers it with the middleware,
    /// commits the simulator and writes the middleware handle into the
    /// spatializer's simulation outputs parameter so the DSP can read this
    /// source's results. The caller holds the simulation lock.
    ///
    /// # Errors
    ///
    /// Returns an error when the native source cannot be created or the
    /// middleware refuses the registration. Nothing is left registered.
    pub fn for_event(
        engine: &LiveEngine,
        middleware: &Arc<dyn AudioMiddleware>,
        event: EventId,
        effect: EffectHandle,
        guid: String,
    ) -> Result<Self> {
        let mut source = Self::create(
            engine,
            SimulationFlags::DIRECT | SimulationFlags::REFLECTIONS | SimulationFlags::PATHING,
        )?;
        source.event = Some(event);
        source.effect = Some(effect);
        source.guid = guid;

        let handle = middleware.register_source(source.raw())?;
        source.middleware = Some(MiddlewareLink {
            middleware: Arc::clone(middleware),
            handle,
        });

        engine.backend().commit_simulator(engine.simulator().raw());

        middleware.set_effect_int(effect, SpatializerParam::SimulationOutputsHandle, handle)?;

        log::debug!(
            "Created source {} for {} ({})",
            source.raw(),
            event,
            source.guid
        );
        Ok(source)
    }

    /// Creates the reverb listener source: reflections only, no event.
    ///
    /// When `middleware` is given the source is designated as the reverb
    /// source there. The caller holds the simulation lock.
    pub fn reverb_listener(
        engine: &LiveEngine,
        middleware: Option<&Arc<dyn AudioMiddleware>>,
    ) -> Result<Self> {
        let source = Self::create(engine, SimulationFlags::REFLECTIONS)?;
        engine.backend().commit_simulator(engine.simulator().raw());

        if let Some(middleware) = middleware {
            middleware.set_reverb_source(source.raw())?;
        }

        log::debug!("Created reverb listener source {}", source.raw());
        Ok(source)
    }

    fn create(engine: &LiveEngine, flags: SimulationFlags) -> Result<Self> {
        let backend = engine.backend();
        let simulator = Arc::clone(engine.simulator());

        let handle = OwnedHandle::adopt(
            backend,
            HandleKind::Source,
            "create_source",
            backend.create_source(simulator.raw(), flags),
        )?
        .with_parent(Arc::clone(&simulator));
        backend.add_source(simulator.raw(), handle.raw());

        Ok(Self {
            handle,
            simulator,
            middleware: None,
            event: None,
            effect: None,
            guid: String::new(),
            transform: Mutex::new(Transform::IDENTITY),
            static_marker: Mutex::new(None),
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }

    pub fn is_valid(&self) -> bool {
        !self.handle.raw().is_null()
    }

    pub fn event(&self) -> Option<EventId> {
        self.event
    }

    /// The spatializer found on the event when the source was created.
    pub fn effect(&self) -> Option<EffectHandle> {
        self.effect
    }

    /// GUID of the event description; empty for the reverb listener.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn is_reverb_listener(&self) -> bool {
        self.event.is_none()
    }

    pub fn middleware_handle(&self) -> Option<i32> {
        self.middleware.as_ref().map(|link| link.handle)
    }

    pub fn transform(&self) -> Transform {
        *lock(&self.transform)
    }

    pub fn set_transform(&self, transform: Transform) {
        *lock(&self.transform) = transform;
    }

    pub fn static_marker(&self) -> Option<MarkerId> {
        *lock(&self.static_marker)
    }

    /// Associates the source with a static source marker, or clears the
    /// association.
    pub fn bind_static_marker(&self, marker: Option<MarkerId>) {
        *lock(&self.static_marker) = marker;
    }
}

impl Drop for AcousticSource {
    fn drop(&mut self) {
        self.handle
            .backend()
            .remove_source(self.simulator.raw(), self.handle.raw());
        if let Some(link) = self.middleware.take() {
            link.middleware.unregister_source(link.handle);
        }
        log::debug!("Destroyed source {}", self.handle.raw());
    }
}

impl fmt::Debug for AcousticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcousticSource")
            .field("raw", &self.raw())
            .field("event", &self.event)
            .field("guid", &self.guid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AcousticBackend, BackendCall, InMemoryBackend};
    use crate::engine::EngineRequest;
    use crate::middleware::{EventAttributes, Guid, InMemoryMiddleware};

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        middleware: Arc<InMemoryMiddleware>,
        engine: LiveEngine,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let dynamic: Arc<dyn AcousticBackend> = backend.clone();
        let engine = LiveEngine::initialize(&dynamic, &EngineRequest::runtime(&Default::default()))
            .unwrap();
        Fixture {
            backend,
            middleware: Arc::new(InMemoryMiddleware::new()),
            engine,
        }
    }

    #[test]
    fn test_event_source_handshake() {
        let f = fixture();
        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), true);
        let effect = f.middleware.spatializer_of(event).unwrap();
        let middleware: Arc<dyn AudioMiddleware> = f.middleware.clone();
        f.backend.clear_journal();

        let source =
            AcousticSource::for_event(&f.engine, &middleware, event, effect, "{guid}".into())
                .unwrap();

        assert_eq!(f.middleware.registered_sources(), vec![source.raw()]);
        assert_eq!(
            f.middleware
                .int_param(effect, SpatializerParam::SimulationOutputsHandle),
            source.middleware_handle()
        );
        assert_eq!(
            f.backend.journal(),
            vec![
                BackendCall::AddSource(source.raw()),
                BackendCall::CommitSimulator(f.engine.simulator().raw()),
            ]
        );
        assert!(!source.is_reverb_listener());
    }

    #[test]
    fn test_drop_unregisters_then_releases() {
        let f = fixture();
        let middleware: Arc<dyn AudioMiddleware> = f.middleware.clone();
        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), true);
        let effect = f.middleware.spatializer_of(event).unwrap();
        let source =
            AcousticSource::for_event(&f.engine, &middleware, event, effect, String::new())
                .unwrap();
        let raw = source.raw();

        drop(source);

        assert!(f.middleware.registered_sources().is_empty());
        assert!(!f.backend.is_live(raw));
        assert_eq!(f.backend.release_count(raw), 1);
        assert!(f.backend.simulator_sources(f.engine.simulator().raw()).is_empty());
    }

    #[test]
    fn test_reverb_listener_is_designated() {
        let f = fixture();
        let middleware: Arc<dyn AudioMiddleware> = f.middleware.clone();
        let listener = AcousticSource::reverb_listener(&f.engine, Some(&middleware)).unwrap();

        assert!(listener.is_reverb_listener());
        assert_eq!(f.middleware.reverb_source(), Some(listener.raw()));
        assert!(listener.guid().is_empty());
    }
}

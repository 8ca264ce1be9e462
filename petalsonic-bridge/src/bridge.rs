use crate::backend::AcousticBackend;
use crate::bake::{BakeResults, LoadedBakeData};
use crate::commit::SceneCommitCoordinator;
use crate::config::PetalSonicBridgeDesc;
use crate::engine::{EngineRequest, EngineSlot, LiveEngine};
use crate::error::{PetalSonicError, Result};
use crate::events::{BridgeCommand, BridgeEvent, EVENT_QUEUE_CAPACITY, EventQueue};
use crate::math::{Transform, Vec3};
use crate::middleware::{AudioMiddleware, EventId, log_middleware_error};
use crate::occlusion::{OcclusionProcessor, OcclusionRegistry};
use crate::registry::{MarkerId, SharedSourceRegistry, StaticSourceMarker};
use crate::scene::{MeshSurface, RayTracer, StaticGeometry, StaticMeshData};
use crate::simulation::{SimulationOrchestrator, SimulationState};
use crate::source::AcousticSource;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::path::Path;
use std::sync::Arc;

/// The runtime session: one live engine, its sources and the simulation
/// thread that drives them.
///
/// The host owns the bridge and feeds it from two places:
///
/// - the middleware adapter sends [`BridgeCommand`]s through
///   [`command_sender`](Self::command_sender) whenever an event is created or
///   torn down, from any thread;
/// - the physics thread calls [`physics_process`](Self::physics_process) once
///   per frame, which applies those commands and everything else that must
///   happen at a frame boundary.
///
/// Dropping the bridge stops the simulation thread and releases every native
/// handle.
pub struct PetalSonicBridge {
    desc: PetalSonicBridgeDesc,
    engine: Arc<EngineSlot>,
    registry: Arc<SharedSourceRegistry>,
    middleware: Arc<dyn AudioMiddleware>,
    state: Arc<SimulationState>,
    orchestrator: SimulationOrchestrator,
    commits: Arc<SceneCommitCoordinator>,
    occlusion: OcclusionRegistry,
    command_sender: Sender<BridgeCommand>,
    command_receiver: Receiver<BridgeCommand>,
    events: EventQueue<BridgeEvent>,
    shut_down: bool,
}

impl PetalSonicBridge {
    /// Creates the runtime engine and the reverb listener source.
    ///
    /// The simulation thread is not started; call
    /// [`start_simulation`](Self::start_simulation) once the host is ready.
    ///
    /// # Arguments
    ///
    /// * `desc` - Engine and simulation settings
    /// * `backend` - The acoustic engine
    /// * `middleware` - The audio middleware the sources' outputs are routed to
    ///
    /// # Errors
    ///
    /// Returns an error when `desc` is invalid, when the engine cannot be
    /// initialized, or when the middleware rejects the reverb source.
    pub fn new(
        desc: PetalSonicBridgeDesc,
        backend: Arc<dyn AcousticBackend>,
        middleware: Arc<dyn AudioMiddleware>,
    ) -> Result<Self> {
        desc.validate()?;

        let engine = Arc::new(EngineSlot::new());
        let registry = Arc::new(SharedSourceRegistry::new());
        {
            let _guard = engine.lock_simulation();
            let live = Arc::new(LiveEngine::initialize(
                &backend,
                &EngineRequest::runtime(&desc),
            )?);
            let listener = AcousticSource::reverb_listener(&live, Some(&middleware))?;
            registry.set_reverb_listener(Some(listener));

            log::info!(
                "PetalSonic bridge initialized on {} ({:?} scene, {:?} reflections)",
                backend.name(),
                live.scene_backend(),
                live.reflection_effect()
            );
            engine.install(live);
        }

        let state = Arc::new(SimulationState::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            Arc::clone(&middleware),
            desc.shared_inputs,
            desc.simulate_pathing,
            desc.static_matching,
        ));
        let orchestrator = SimulationOrchestrator::new(Arc::clone(&state), desc.simulation_interval);
        let commits = Arc::new(SceneCommitCoordinator::new(
            desc.commit_mode,
            Arc::clone(&engine),
        ));
        let (command_sender, command_receiver) = unbounded();

        Ok(Self {
            desc,
            engine,
            registry,
            middleware,
            state,
            orchestrator,
            commits,
            occlusion: OcclusionRegistry::new(),
            command_sender,
            command_receiver,
            events: EventQueue::new(EVENT_QUEUE_CAPACITY),
            shut_down: false,
        })
    }

    /// Starts the simulation thread. Does nothing when it already runs.
    pub fn start_simulation(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(PetalSonicError::Engine("bridge is shut down".into()));
        }
        if self.orchestrator.is_running() {
            return Ok(());
        }
        self.orchestrator.start()?;
        log::info!(
            "Simulation thread started ({:?} interval)",
            self.desc.simulation_interval
        );
        self.emit(BridgeEvent::SimulationStarted);
        Ok(())
    }

    /// Stops the simulation thread after its current cycle.
    pub fn stop_simulation(&mut self) {
        if !self.orchestrator.is_running() {
            return;
        }
        self.orchestrator.stop();
        log::info!("Simulation thread stopped");
        self.emit(BridgeEvent::SimulationStopped);
    }

    pub fn is_simulation_running(&self) -> bool {
        self.orchestrator.is_running()
    }

    /// Runs one simulation cycle on the calling thread, for hosts that drive
    /// simulation themselves. Refused while the simulation thread runs.
    pub fn step_simulation(&mut self) -> bool {
        self.orchestrator.step()
    }

    pub fn simulation_cycles(&self) -> u64 {
        self.orchestrator.cycles()
    }

    /// A sender for middleware lifecycle callbacks. Commands are applied on
    /// the next [`physics_process`](Self::physics_process).
    pub fn command_sender(&self) -> Sender<BridgeCommand> {
        self.command_sender.clone()
    }

    /// A receiver for bridge events. The queue holds at most
    /// [`EVENT_QUEUE_CAPACITY`] events; older ones are dropped when nobody
    /// drains it.
    pub fn events(&self) -> Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Per physics frame work.
    ///
    /// In order: applies pending commands, moves the reverb listener to
    /// `listener`, flushes a pending scene commit, publishes the listener to
    /// the simulation thread and runs occlusion processors against `world`.
    pub fn physics_process(&self, listener: &Transform, world: &dyn RayTracer) {
        if self.shut_down {
            return;
        }

        while let Ok(command) = self.command_receiver.try_recv() {
            match command {
                BridgeCommand::EventCreated(event) => self.on_event_created(event),
                BridgeCommand::EventRemoved(event) => self.on_event_removed(event),
            }
        }

        self.registry
            .with_reverb_listener(|source| source.set_transform(*listener));

        if self.commits.process_pending() {
            self.emit(BridgeEvent::SceneCommitted);
        }

        self.state.publish_listener(listener.to_coordinate_space());
        self.occlusion
            .process(&self.registry, self.middleware.as_ref(), world, listener);
    }

    fn on_event_created(&self, event: EventId) {
        if self.registry.contains_event(event) {
            log::debug!("{} already has a source", event);
            return;
        }

        let effect = match self.middleware.find_spatializer(event) {
            Ok(Some(effect)) => effect,
            Ok(None) => {
                log::trace!("{} has no spatializer effect, ignoring", event);
                self.emit(BridgeEvent::EventIgnored { event });
                return;
            }
            Err(e) => {
                log_middleware_error("Looking up spatializer", &e);
                self.emit(BridgeEvent::SourceError {
                    event,
                    error: e.to_string(),
                });
                return;
            }
        };

        let guid = match self.middleware.event_guid(event) {
            Ok(guid) => guid.to_string(),
            Err(e) => {
                log_middleware_error("Reading event GUID", &e);
                String::new()
            }
        };

        let created = {
            let _guard = self.engine.lock_simulation();
            match self.engine.current() {
                Some(engine) => {
                    AcousticSource::for_event(&engine, &self.middleware, event, effect, guid.clone())
                }
                None => Err(PetalSonicError::Engine("no engine installed".into())),
            }
        };

        match created {
            Ok(source) => {
                let middleware_handle = source.middleware_handle();
                if self.registry.add(source) {
                    self.emit(BridgeEvent::SourceCreated {
                        event,
                        guid,
                        middleware_handle,
                    });
                }
            }
            Err(e) => {
                log::warn!("Failed to create source for {}: {}", event, e);
                self.emit(BridgeEvent::SourceError {
                    event,
                    error: e.to_string(),
                });
            }
        }
    }

    fn on_event_removed(&self, event: EventId) {
        if self.registry.remove(event) {
            self.emit(BridgeEvent::SourceRemoved { event });
        } else {
            log::trace!("{} had no source", event);
        }
    }

    /// Registers `processor` for every event whose GUID renders as `guid`.
    pub fn register_occlusion_processor(
        &mut self,
        guid: impl Into<String>,
        processor: Arc<dyn OcclusionProcessor>,
    ) {
        self.occlusion.register(guid, processor);
    }

    pub fn unregister_occlusion_processor(&mut self, guid: &str) -> bool {
        self.occlusion.unregister(guid)
    }

    pub fn add_static_marker(&self, transform: Transform) -> MarkerId {
        self.registry.add_static_marker(transform)
    }

    pub fn update_static_marker(&self, id: MarkerId, transform: Transform) -> bool {
        self.registry.update_static_marker(id, transform)
    }

    pub fn remove_static_marker(&self, id: MarkerId) -> bool {
        self.registry.remove_static_marker(id)
    }

    pub fn static_markers(&self) -> Vec<StaticSourceMarker> {
        self.registry.static_markers()
    }

    /// Marker positions, in registration order. Feed these to
    /// [`BakeDesc::with_static_sources`](crate::BakeDesc::with_static_sources).
    pub fn static_marker_positions(&self) -> Vec<Vec3> {
        self.registry.static_marker_positions()
    }

    /// Ties the source of `event` to a static marker, or unties it with
    /// `None`. Returns `false` when the event has no source.
    pub fn bind_static_marker(&self, event: EventId, marker: Option<MarkerId>) -> bool {
        self.registry
            .with_event_source(event, |source| source.bind_static_marker(marker))
            .is_some()
    }

    /// Adds host geometry to the live scene.
    ///
    /// The geometry stays in the scene until the returned value is dropped.
    /// Both adding and removing request a scene commit.
    ///
    /// # Errors
    ///
    /// Fails when the surfaces are malformed, the engine rejects a mesh, or
    /// the bridge is shut down.
    pub fn add_static_geometry(
        &self,
        transform: &Transform,
        surfaces: &[MeshSurface],
    ) -> Result<StaticGeometry> {
        let mesh = StaticMeshData::from_surfaces(transform, surfaces)?;
        let engine = self.live_engine()?;
        StaticGeometry::new(engine.scene(), &[mesh], Some(Arc::clone(&self.commits)))
    }

    /// Requests a scene commit through the coordinator.
    pub fn request_scene_commit(&self) {
        self.commits.request_commit();
    }

    /// Loads bake results and attaches them to the live simulator, replacing
    /// earlier baked data. Returns the number of layers loaded.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or a layer cannot be
    /// loaded. Earlier baked data stays in place on failure.
    pub fn load_baked_data(&self, path: impl AsRef<Path>) -> Result<usize> {
        let results = BakeResults::load(path.as_ref())?;

        let _guard = self.engine.lock_simulation();
        let engine = self.live_engine()?;
        let loaded = LoadedBakeData::attach(&engine, &results)?;
        let layers = loaded.len();
        self.state.baked.store(Some(Arc::new(loaded)));

        log::info!(
            "Loaded {} baked layers from {}",
            layers,
            path.as_ref().display()
        );
        self.emit(BridgeEvent::BakedDataLoaded { layers });
        Ok(layers)
    }

    /// Detaches loaded baked data. Sources fall back to real-time reflections.
    pub fn unload_baked_data(&self) {
        let _guard = self.engine.lock_simulation();
        if self.state.baked.swap(None).is_some() {
            log::info!("Unloaded baked data");
        }
    }

    pub fn has_baked_data(&self) -> bool {
        self.state.baked.load().is_some()
    }

    /// Turns the pathing stage on or off for later cycles.
    pub fn set_simulate_pathing(&self, enable: bool) {
        let _guard = self.engine.lock_simulation();
        if enable && !self.desc.simulate_pathing {
            log::warn!("Enabling pathing on a simulator created without it");
        }
        self.orchestrator.set_simulate_pathing(enable);
    }

    pub fn registry(&self) -> &Arc<SharedSourceRegistry> {
        &self.registry
    }

    pub fn commit_coordinator(&self) -> &Arc<SceneCommitCoordinator> {
        &self.commits
    }

    /// The live engine, if the bridge is not shut down.
    pub fn engine(&self) -> Option<Arc<LiveEngine>> {
        self.engine.current()
    }

    pub fn desc(&self) -> &PetalSonicBridgeDesc {
        &self.desc
    }

    /// Stops the simulation thread, destroys every source, detaches baked
    /// data and releases the engine. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.stop_simulation();
        self.registry.clear();

        let _guard = self.engine.lock_simulation();
        self.state.baked.store(None);
        self.engine.take();
        log::info!("PetalSonic bridge shut down");
    }

    fn live_engine(&self) -> Result<Arc<LiveEngine>> {
        self.engine
            .current()
            .ok_or_else(|| PetalSonicError::Engine("bridge is shut down".into()))
    }

    fn emit(&self, event: BridgeEvent) {
        self.events.push(event);
    }
}

impl Drop for PetalSonicBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PetalSonicBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PetalSonicBridge")
            .field("sources", &self.registry.len())
            .field("simulation_running", &self.orchestrator.is_running())
            .field("cycles", &self.orchestrator.cycles())
            .field("baked_data", &self.has_baked_data())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, HandleKind, InMemoryBackend, SimulationFlags};
    use crate::middleware::{EventAttributes, Guid, InMemoryMiddleware, SpatializerParam};
    use crate::occlusion::RaycastOcclusion;
    use crate::scene::EmptyWorld;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        middleware: Arc<InMemoryMiddleware>,
        bridge: PetalSonicBridge,
    }

    fn fixture(desc: PetalSonicBridgeDesc) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(InMemoryBackend::new());
        let middleware = Arc::new(InMemoryMiddleware::new());
        let bridge = PetalSonicBridge::new(desc, backend.clone(), middleware.clone()).unwrap();
        Fixture {
            backend,
            middleware,
            bridge,
        }
    }

    fn tick(bridge: &PetalSonicBridge) {
        bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
    }

    fn floor() -> MeshSurface {
        MeshSurface {
            vertices: vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            indices: vec![0, 1, 2],
            material: None,
        }
    }

    #[test]
    fn test_new_designates_reverb_listener() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let listener = f.bridge.registry().with_reverb_listener(|s| s.raw());
        assert!(listener.is_some());
        assert_eq!(f.middleware.reverb_source(), listener);
        assert!(f.bridge.registry().is_empty());
    }

    #[test]
    fn test_event_created_registers_source_once() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let events = f.bridge.events();
        let guid = Guid {
            data1: 0xabc,
            ..Guid::default()
        };
        let event = f
            .middleware
            .spawn_event(guid, EventAttributes::at(Vec3::X), true);
        let effect = f.middleware.spatializer_of(event).unwrap();

        let sender = f.bridge.command_sender();
        sender.send(BridgeCommand::EventCreated(event)).unwrap();
        sender.send(BridgeCommand::EventCreated(event)).unwrap();
        tick(&f.bridge);

        assert_eq!(f.bridge.registry().len(), 1);
        assert_eq!(f.middleware.spatializer_lookups(), 1);
        let handle = f
            .bridge
            .registry()
            .with_event_source(event, |s| s.middleware_handle())
            .flatten();
        assert_eq!(
            f.middleware
                .int_param(effect, SpatializerParam::SimulationOutputsHandle),
            handle
        );
        assert_eq!(
            events.try_recv(),
            Ok(BridgeEvent::SourceCreated {
                event,
                guid: guid.to_string(),
                middleware_handle: handle,
            })
        );
    }

    #[test]
    fn test_event_without_spatializer_is_ignored() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let events = f.bridge.events();
        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), false);

        f.bridge
            .command_sender()
            .send(BridgeCommand::EventCreated(event))
            .unwrap();
        tick(&f.bridge);

        assert!(f.bridge.registry().is_empty());
        assert_eq!(events.try_recv(), Ok(BridgeEvent::EventIgnored { event }));
    }

    #[test]
    fn test_event_removed_releases_source() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), true);
        let sender = f.bridge.command_sender();
        sender.send(BridgeCommand::EventCreated(event)).unwrap();
        tick(&f.bridge);
        let raw = f
            .bridge
            .registry()
            .with_event_source(event, |s| s.raw())
            .unwrap();

        sender.send(BridgeCommand::EventRemoved(event)).unwrap();
        sender.send(BridgeCommand::EventRemoved(event)).unwrap();
        tick(&f.bridge);

        assert!(f.bridge.registry().is_empty());
        assert!(!f.backend.is_live(raw));
        assert_eq!(f.backend.release_count(raw), 1);
    }

    #[test]
    fn test_undrained_events_stay_bounded() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let events = f.bridge.events();
        for _ in 0..EVENT_QUEUE_CAPACITY * 4 {
            f.bridge.request_scene_commit();
            tick(&f.bridge);
        }

        assert_eq!(events.len(), EVENT_QUEUE_CAPACITY);
        assert!(events.try_iter().all(|e| e == BridgeEvent::SceneCommitted));
    }

    #[test]
    fn test_geometry_commits_once_per_frame() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let first = f
            .bridge
            .add_static_geometry(&Transform::IDENTITY, &[floor()])
            .unwrap();
        let second = f
            .bridge
            .add_static_geometry(&Transform::IDENTITY, &[floor()])
            .unwrap();
        assert_eq!(f.backend.live_handles(HandleKind::StaticMesh).len(), 2);
        f.backend.clear_journal();

        tick(&f.bridge);
        tick(&f.bridge);

        let scene = f.bridge.engine().unwrap().scene().raw();
        let commits: Vec<_> = f
            .backend
            .journal()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::CommitScene(s) if *s == scene))
            .collect();
        assert_eq!(commits.len(), 1);

        drop(first);
        drop(second);
        assert!(f.bridge.commit_coordinator().is_pending());
        assert!(f.backend.live_handles(HandleKind::StaticMesh).is_empty());
    }

    #[test]
    fn test_listener_follows_physics_tick() {
        let mut f = fixture(PetalSonicBridgeDesc::default());
        let listener = Transform::from_origin(Vec3::new(2.0, 1.0, 0.0));
        f.bridge.physics_process(&listener, &EmptyWorld);

        let moved = f
            .bridge
            .registry()
            .with_reverb_listener(|s| s.transform())
            .unwrap();
        assert_eq!(moved.origin, listener.origin);

        f.backend.clear_journal();
        assert!(f.bridge.step_simulation());
        let pushed = f.backend.journal().into_iter().any(|c| {
            matches!(
                c,
                BackendCall::SetSourceInputs { flags, baked: false, .. }
                    if flags == SimulationFlags::REFLECTIONS
            )
        });
        assert!(pushed);
    }

    #[test]
    fn test_occlusion_runs_on_physics_tick() {
        let mut f = fixture(PetalSonicBridgeDesc::default());
        let guid = Guid {
            data1: 9,
            ..Guid::default()
        };
        let event = f
            .middleware
            .spawn_event(guid, EventAttributes::at(Vec3::Z), true);
        let effect = f.middleware.spatializer_of(event).unwrap();
        f.bridge
            .register_occlusion_processor(guid.to_string(), Arc::new(RaycastOcclusion::default()));
        f.bridge
            .command_sender()
            .send(BridgeCommand::EventCreated(event))
            .unwrap();

        tick(&f.bridge);
        tick(&f.bridge);

        assert_eq!(
            f.middleware.float_param(effect, SpatializerParam::Occlusion),
            Some(1.0)
        );
    }

    #[test]
    fn test_bind_static_marker_needs_a_source() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let marker = f.bridge.add_static_marker(Transform::from_origin(Vec3::X));
        assert!(!f.bridge.bind_static_marker(EventId(1), Some(marker)));

        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), true);
        f.bridge
            .command_sender()
            .send(BridgeCommand::EventCreated(event))
            .unwrap();
        tick(&f.bridge);

        assert!(f.bridge.bind_static_marker(event, Some(marker)));
        assert_eq!(
            f.bridge
                .registry()
                .with_event_source(event, |s| s.static_marker())
                .flatten(),
            Some(marker)
        );
        assert_eq!(f.bridge.static_marker_positions(), vec![Vec3::X]);
    }

    #[test]
    fn test_missing_baked_file_keeps_previous_state() {
        let f = fixture(PetalSonicBridgeDesc::default());
        let result = f
            .bridge
            .load_baked_data(std::env::temp_dir().join("petalsonic-missing-bake.json"));
        assert!(matches!(result, Err(PetalSonicError::Io(_))));
        assert!(!f.bridge.has_baked_data());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut f = fixture(PetalSonicBridgeDesc::default());
        let event = f
            .middleware
            .spawn_event(Guid::default(), EventAttributes::default(), true);
        f.bridge
            .command_sender()
            .send(BridgeCommand::EventCreated(event))
            .unwrap();
        tick(&f.bridge);
        f.bridge.start_simulation().unwrap();

        f.bridge.shutdown();
        f.bridge.shutdown();

        assert!(!f.bridge.is_simulation_running());
        assert!(f.bridge.engine().is_none());
        for kind in [
            HandleKind::Source,
            HandleKind::Simulator,
            HandleKind::Scene,
            HandleKind::Context,
        ] {
            assert!(f.backend.live_handles(kind).is_empty(), "{} leaked", kind);
        }
        assert_eq!(f.middleware.registered_sources(), Vec::new());
        assert!(f.bridge.start_simulation().is_err());
    }
}

//! The simulation loop.
//!
//! Every cycle runs up to three stages in a fixed order: direct, reflections,
//! then pathing when enabled. Each stage pushes the shared listener inputs,
//! pushes per-source inputs with the collections lock held, releases it, and
//! runs the native stage under the simulation lock.

pub mod inputs;
mod worker;

pub use worker::Worker;

use crate::backend::{RawHandle, SharedInputs, SimulationFlags};
use crate::bake::LoadedBakeData;
use crate::config::StaticMatching;
use crate::engine::{EngineSlot, LiveEngine};
use crate::error::Result;
use crate::math::CoordinateSpace;
use crate::middleware::{AudioMiddleware, log_middleware_error};
use crate::registry::SharedSourceRegistry;
use crate::source::AcousticSource;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// State shared between the physics thread and the simulation thread.
pub struct SimulationState {
    pub(crate) engine: Arc<EngineSlot>,
    pub(crate) registry: Arc<SharedSourceRegistry>,
    pub(crate) middleware: Arc<dyn AudioMiddleware>,
    /// Written once per physics frame, read once per stage. A cycle may see
    /// the previous frame's listener.
    pub(crate) shared_inputs: ArcSwap<SharedInputs>,
    pub(crate) baked: ArcSwapOption<LoadedBakeData>,
    pub(crate) simulate_pathing: AtomicBool,
    pub(crate) static_matching: StaticMatching,
    cycles: AtomicU64,
}

impl SimulationState {
    pub(crate) fn new(
        engine: Arc<EngineSlot>,
        registry: Arc<SharedSourceRegistry>,
        middleware: Arc<dyn AudioMiddleware>,
        shared_inputs: SharedInputs,
        simulate_pathing: bool,
        static_matching: StaticMatching,
    ) -> Self {
        Self {
            engine,
            registry,
            middleware,
            shared_inputs: ArcSwap::from_pointee(shared_inputs),
            baked: ArcSwapOption::empty(),
            simulate_pathing: AtomicBool::new(simulate_pathing),
            static_matching,
            cycles: AtomicU64::new(0),
        }
    }

    /// Publishes a new listener snapshot, keeping the other shared values.
    pub(crate) fn publish_listener(&self, listener: CoordinateSpace) {
        let mut next = **self.shared_inputs.load();
        next.listener = listener;
        self.shared_inputs.store(Arc::new(next));
    }

    /// Completed cycles since the bridge was created.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// Runs simulation cycles. Owned by the simulation thread, or driven by hand
/// in tests.
pub(crate) struct SimulationCore {
    state: Arc<SimulationState>,
    pathing_warned: HashSet<RawHandle>,
}

impl SimulationCore {
    pub(crate) fn new(state: Arc<SimulationState>) -> Self {
        Self {
            state,
            pathing_warned: HashSet::new(),
        }
    }

    /// Runs one cycle. Returns `false` when no engine is installed and the
    /// cycle was skipped.
    pub(crate) fn run_cycle(&mut self) -> bool {
        let Some(engine) = self.state.engine.current() else {
            log::trace!("No engine, skipping simulation cycle");
            return false;
        };
        let shared = **self.state.shared_inputs.load();
        let baked = self.state.baked.load_full();

        self.direct_stage(&engine, &shared);
        self.reflections_stage(&engine, &shared, baked.as_deref());
        if self.state.simulate_pathing.load(Ordering::Relaxed) {
            self.pathing_stage(&engine, &shared, baked.as_deref());
        }

        self.state.cycles.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn direct_stage(&mut self, engine: &LiveEngine, shared: &SharedInputs) {
        let backend = engine.backend();
        let simulator = engine.simulator().raw();
        backend.set_shared_inputs(simulator, SimulationFlags::DIRECT, shared);

        let middleware = &self.state.middleware;
        self.state.registry.for_each(|source| {
            if let Some(space) = emitter_space(middleware.as_ref(), source) {
                backend.set_source_inputs(
                    source.raw(),
                    SimulationFlags::DIRECT,
                    &inputs::direct(space),
                );
            }
        });

        let _guard = self.state.engine.lock_simulation();
        backend.run_direct(simulator);
    }

    fn reflections_stage(
        &mut self,
        engine: &LiveEngine,
        shared: &SharedInputs,
        baked: Option<&LoadedBakeData>,
    ) {
        let backend = engine.backend();
        let simulator = engine.simulator().raw();
        backend.set_shared_inputs(simulator, SimulationFlags::REFLECTIONS, shared);

        let middleware = &self.state.middleware;
        let matching = self.state.static_matching;
        self.state.registry.visit(|view| {
            for source in view.sources {
                let Some(space) = emitter_space(middleware.as_ref(), source) else {
                    continue;
                };
                let static_layer = inputs::static_marker(source, view, matching)
                    .and_then(|marker| baked?.static_source_layer(marker.transform.origin));
                backend.set_source_inputs(
                    source.raw(),
                    SimulationFlags::REFLECTIONS,
                    &inputs::reflections(space, static_layer, baked),
                );
            }

            if let Some(listener) = view.reverb_listener.filter(|l| l.is_valid()) {
                backend.set_source_inputs(
                    listener.raw(),
                    SimulationFlags::REFLECTIONS,
                    &inputs::reverb_listener(listener.transform().to_coordinate_space()),
                );
            }
        });

        let _guard = self.state.engine.lock_simulation();
        backend.run_reflections(simulator);
    }

    fn pathing_stage(
        &mut self,
        engine: &LiveEngine,
        shared: &SharedInputs,
        baked: Option<&LoadedBakeData>,
    ) {
        let backend = engine.backend();
        let simulator = engine.simulator().raw();
        backend.set_shared_inputs(simulator, SimulationFlags::PATHING, shared);

        let middleware = &self.state.middleware;
        let warned = &mut self.pathing_warned;
        let mut visited = HashSet::new();
        self.state.registry.for_each(|source| {
            visited.insert(source.raw());
            let Some(space) = emitter_space(middleware.as_ref(), source) else {
                return;
            };
            match inputs::pathing(space, baked) {
                Some(pathing) => {
                    backend.set_source_inputs(source.raw(), SimulationFlags::PATHING, &pathing);
                }
                None if warned.insert(source.raw()) => {
                    log::warn!(
                        "No baked pathing data loaded, skipping pathing for source {}",
                        source.raw()
                    );
                }
                None => log::trace!("Skipping pathing for source {}", source.raw()),
            }
        });
        // Forget sources that left the registry.
        warned.retain(|raw| visited.contains(raw));

        let _guard = self.state.engine.lock_simulation();
        backend.run_pathing(simulator);
    }
}

/// Reads an emitter's attributes from its event and stores the derived
/// transform on the source. `None` when the event is gone.
fn emitter_space(middleware: &dyn AudioMiddleware, source: &AcousticSource) -> Option<CoordinateSpace> {
    let event = source.event()?;
    match middleware.event_attributes(event) {
        Ok(attributes) => {
            let space = attributes.to_coordinate_space();
            source.set_transform(space.to_transform());
            Some(space)
        }
        Err(e) => {
            log_middleware_error("Reading event attributes", &e);
            None
        }
    }
}

/// Owns the simulation thread.
///
/// The thread runs [`SimulationCore::run_cycle`] once per tick of a monotonic
/// ticker until [`stop`](Self::stop) or drop.
pub struct SimulationOrchestrator {
    state: Arc<SimulationState>,
    interval: Duration,
    worker: Option<Worker>,
    manual: Option<SimulationCore>,
}

impl SimulationOrchestrator {
    pub(crate) fn new(state: Arc<SimulationState>, interval: Duration) -> Self {
        Self {
            state,
            interval,
            worker: None,
            manual: None,
        }
    }

    /// Starts the simulation thread. Does nothing when it already runs.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let mut core = SimulationCore::new(Arc::clone(&self.state));
        self.worker = Some(Worker::spawn("petalsonic-simulation", self.interval, move || {
            core.run_cycle();
        })?);
        Ok(())
    }

    /// Signals the thread and joins it. The cycle in flight completes first.
    pub fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Runs one cycle on the calling thread. Refused while the simulation
    /// thread runs. Returns whether a cycle ran.
    pub fn step(&mut self) -> bool {
        if self.is_running() {
            log::warn!("Simulation thread is running, ignoring manual step");
            return false;
        }
        self.manual
            .get_or_insert_with(|| SimulationCore::new(Arc::clone(&self.state)))
            .run_cycle()
    }

    pub fn cycles(&self) -> u64 {
        self.state.cycles()
    }

    pub fn set_simulate_pathing(&self, enable: bool) {
        self.state.simulate_pathing.store(enable, Ordering::Relaxed);
    }
}

impl Drop for SimulationOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AcousticBackend, BackendCall, BakedDataIdentifier, BakedDataVariation, InMemoryBackend,
        ReflectionsBakeFlags,
    };
    use crate::bake::BakeResults;
    use crate::engine::EngineRequest;
    use crate::math::{Sphere, Transform, Vec3};
    use crate::middleware::{EventAttributes, EventId, Guid, InMemoryMiddleware};

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        middleware: Arc<InMemoryMiddleware>,
        state: Arc<SimulationState>,
        engine: Arc<LiveEngine>,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(InMemoryBackend::new());
            let dynamic: Arc<dyn AcousticBackend> = backend.clone();
            let engine = Arc::new(
                LiveEngine::initialize(&dynamic, &EngineRequest::runtime(&Default::default()))
                    .unwrap(),
            );
            let slot = Arc::new(EngineSlot::new());
            slot.install(Arc::clone(&engine));

            let middleware = Arc::new(InMemoryMiddleware::new());
            let state = Arc::new(SimulationState::new(
                slot,
                Arc::new(SharedSourceRegistry::new()),
                middleware.clone(),
                SharedInputs::default(),
                false,
                StaticMatching::ExplicitThenTransform,
            ));
            Self {
                backend,
                middleware,
                state,
                engine,
            }
        }

        fn add_emitter(&self, position: Vec3) -> (EventId, RawHandle) {
            let event = self
                .middleware
                .spawn_event(Guid::default(), EventAttributes::at(position), true);
            let effect = self.middleware.spatializer_of(event).unwrap();
            let middleware: Arc<dyn AudioMiddleware> = self.middleware.clone();
            let source =
                AcousticSource::for_event(&self.engine, &middleware, event, effect, String::new())
                    .unwrap();
            let raw = source.raw();
            self.state.registry.add(source);
            (event, raw)
        }

        fn load(&self, results: &BakeResults) {
            let data = LoadedBakeData::attach(&self.engine, results).unwrap();
            self.state.baked.store(Some(Arc::new(data)));
        }
    }

    fn stage_runs(journal: &[BackendCall]) -> Vec<BackendCall> {
        journal
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    BackendCall::RunDirect | BackendCall::RunReflections | BackendCall::RunPathing
                )
            })
            .cloned()
            .collect()
    }

    fn source_pushes(journal: &[BackendCall], source: RawHandle) -> Vec<BackendCall> {
        journal
            .iter()
            .filter(|c| matches!(c, BackendCall::SetSourceInputs { source: s, .. } if *s == source))
            .cloned()
            .collect()
    }

    /// Reverb, one static source at (5, 0, 0) and pathing, each holding an
    /// empty probe batch.
    fn baked_layers() -> BakeResults {
        let scratch = InMemoryBackend::new();
        let ctx = scratch.create_context(&Default::default()).unwrap();
        let batch = scratch.create_probe_batch(ctx).unwrap();
        let bytes = scratch.save_probe_batch(ctx, batch).unwrap();

        let mut results = BakeResults::new(ReflectionsBakeFlags::BAKE_CONVOLUTION);
        results.insert(BakedDataIdentifier::reverb(), bytes.clone());
        results.insert(
            BakedDataIdentifier::static_source(Sphere::new(Vec3::new(5.0, 0.0, 0.0), 60.0)),
            bytes.clone(),
        );
        results.insert(BakedDataIdentifier::pathing(), bytes);
        results
    }

    #[test]
    fn test_stages_run_in_order() {
        let f = Fixture::new();
        f.add_emitter(Vec3::X);
        f.state.simulate_pathing.store(true, Ordering::Relaxed);
        f.backend.clear_journal();

        let mut core = SimulationCore::new(Arc::clone(&f.state));
        core.run_cycle();
        core.run_cycle();

        assert_eq!(
            stage_runs(&f.backend.journal()),
            vec![
                BackendCall::RunDirect,
                BackendCall::RunReflections,
                BackendCall::RunPathing,
                BackendCall::RunDirect,
                BackendCall::RunReflections,
                BackendCall::RunPathing,
            ]
        );
    }

    #[test]
    fn test_shared_inputs_precede_source_inputs_and_runs() {
        let f = Fixture::new();
        let (_, raw) = f.add_emitter(Vec3::X);
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let journal = f.backend.journal();
        let position = |call: &BackendCall| journal.iter().position(|c| c == call).unwrap();
        let shared_direct = position(&BackendCall::SetSharedInputs {
            flags: SimulationFlags::DIRECT,
        });
        let run_direct = position(&BackendCall::RunDirect);
        let source_direct = journal
            .iter()
            .position(|c| {
                matches!(c, BackendCall::SetSourceInputs { source, flags, .. }
                    if *source == raw && *flags == SimulationFlags::DIRECT)
            })
            .unwrap();

        assert!(shared_direct < source_direct);
        assert!(source_direct < run_direct);
    }

    #[test]
    fn test_pathing_is_skipped_when_disabled() {
        let f = Fixture::new();
        f.add_emitter(Vec3::X);
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        assert!(!f.backend.journal().contains(&BackendCall::RunPathing));
    }

    #[test]
    fn test_missing_pathing_batch_skips_only_pathing_push() {
        let f = Fixture::new();
        let (_, raw) = f.add_emitter(Vec3::X);
        f.state.simulate_pathing.store(true, Ordering::Relaxed);
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let journal = f.backend.journal();
        let flags: Vec<SimulationFlags> = source_pushes(&journal, raw)
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::SetSourceInputs { flags, .. } => Some(flags),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![SimulationFlags::DIRECT, SimulationFlags::REFLECTIONS]);
        assert_eq!(
            stage_runs(&journal),
            vec![
                BackendCall::RunDirect,
                BackendCall::RunReflections,
                BackendCall::RunPathing,
            ]
        );
    }

    #[test]
    fn test_pathing_warnings_forget_removed_sources() {
        let f = Fixture::new();
        let (gone, gone_raw) = f.add_emitter(Vec3::X);
        let (_, kept_raw) = f.add_emitter(Vec3::Z);
        f.state.simulate_pathing.store(true, Ordering::Relaxed);
        let mut core = SimulationCore::new(Arc::clone(&f.state));

        core.run_cycle();
        assert_eq!(core.pathing_warned.len(), 2);

        f.state.registry.remove(gone);
        core.run_cycle();
        assert!(!core.pathing_warned.contains(&gone_raw));
        assert!(core.pathing_warned.contains(&kept_raw));
    }

    #[test]
    fn test_missing_engine_skips_cycle() {
        let f = Fixture::new();
        let _engine = f.state.engine.take();
        f.backend.clear_journal();

        assert!(!SimulationCore::new(Arc::clone(&f.state)).run_cycle());
        assert!(f.backend.journal().is_empty());
        assert_eq!(f.state.cycles(), 0);
    }

    #[test]
    fn test_emitter_transform_follows_event() {
        let f = Fixture::new();
        let (event, _) = f.add_emitter(Vec3::X);
        f.middleware
            .move_event(event, EventAttributes::at(Vec3::new(0.0, 0.0, 7.0)));

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let origin = f
            .state
            .registry
            .with_event_source(event, |s| s.transform().origin)
            .unwrap();
        assert_eq!(origin, Vec3::new(0.0, 0.0, 7.0));
    }

    #[test]
    fn test_released_event_is_skipped() {
        let f = Fixture::new();
        let (event, raw) = f.add_emitter(Vec3::X);
        f.middleware.release_event(event);
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        assert!(source_pushes(&f.backend.journal(), raw).is_empty());
    }

    #[test]
    fn test_reflections_fall_back_to_reverb_layer() {
        let f = Fixture::new();
        let (_, raw) = f.add_emitter(Vec3::X);
        f.load(&baked_layers());
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let pushes = source_pushes(&f.backend.journal(), raw);
        assert!(pushes.contains(&BackendCall::SetSourceInputs {
            source: raw,
            flags: SimulationFlags::REFLECTIONS,
            baked: true,
            variation: BakedDataVariation::Reverb,
        }));
    }

    #[test]
    fn test_bound_marker_selects_static_layer() {
        let f = Fixture::new();
        let (event, raw) = f.add_emitter(Vec3::X);
        let marker = f
            .state
            .registry
            .add_static_marker(Transform::from_origin(Vec3::new(5.0, 0.0, 0.0)));
        f.state
            .registry
            .with_event_source(event, |s| s.bind_static_marker(Some(marker)));
        f.load(&baked_layers());
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let pushes = source_pushes(&f.backend.journal(), raw);
        assert!(pushes.contains(&BackendCall::SetSourceInputs {
            source: raw,
            flags: SimulationFlags::REFLECTIONS,
            baked: true,
            variation: BakedDataVariation::StaticSource,
        }));
    }

    #[test]
    fn test_transform_match_selects_static_layer() {
        let f = Fixture::new();
        let (_, raw) = f.add_emitter(Vec3::new(5.0, 0.0, 0.0));
        f.state
            .registry
            .add_static_marker(Transform::from_origin(Vec3::new(5.0, 0.0, 0.0)));
        f.load(&baked_layers());
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let pushes = source_pushes(&f.backend.journal(), raw);
        assert!(pushes.iter().any(|c| matches!(
            c,
            BackendCall::SetSourceInputs {
                variation: BakedDataVariation::StaticSource,
                ..
            }
        )));
    }

    #[test]
    fn test_pathing_uses_loaded_batch() {
        let f = Fixture::new();
        let (_, raw) = f.add_emitter(Vec3::X);
        f.state.simulate_pathing.store(true, Ordering::Relaxed);
        f.load(&baked_layers());
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        let pushes = source_pushes(&f.backend.journal(), raw);
        assert!(pushes.contains(&BackendCall::SetSourceInputs {
            source: raw,
            flags: SimulationFlags::PATHING,
            baked: true,
            variation: BakedDataVariation::Dynamic,
        }));
    }

    #[test]
    fn test_reverb_listener_gets_reflections_only() {
        let f = Fixture::new();
        let listener = AcousticSource::reverb_listener(&f.engine, None).unwrap();
        let raw = listener.raw();
        f.state.registry.set_reverb_listener(Some(listener));
        f.backend.clear_journal();

        SimulationCore::new(Arc::clone(&f.state)).run_cycle();

        assert_eq!(
            source_pushes(&f.backend.journal(), raw),
            vec![BackendCall::SetSourceInputs {
                source: raw,
                flags: SimulationFlags::REFLECTIONS,
                baked: false,
                variation: BakedDataVariation::Reverb,
            }]
        );
    }

    #[test]
    fn test_orchestrator_runs_cycles_on_its_thread() {
        let f = Fixture::new();
        let mut orchestrator =
            SimulationOrchestrator::new(Arc::clone(&f.state), Duration::from_millis(1));
        orchestrator.start().unwrap();

        while orchestrator.cycles() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        orchestrator.stop();
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_manual_step_is_refused_while_thread_runs() {
        let f = Fixture::new();
        let mut orchestrator =
            SimulationOrchestrator::new(Arc::clone(&f.state), Duration::from_millis(1));

        assert!(orchestrator.step());
        assert_eq!(orchestrator.cycles(), 1);

        orchestrator.start().unwrap();
        assert!(!orchestrator.step());
        orchestrator.stop();
        assert!(orchestrator.step());
    }
}

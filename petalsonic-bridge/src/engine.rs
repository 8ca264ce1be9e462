//! Native engine instances.
//!
//! A [`LiveEngine`] is one context with its devices, scene and simulator. The
//! runtime bridge publishes its engine through an [`EngineSlot`]; bakes and
//! probe generation build a private one and drop it when done.

use crate::backend::{
    AcousticBackend, ContextSettings, DeviceKind, HandleKind, OwnedHandle, RawHandle,
    ReflectionEffectKind, SceneBackend, SceneSettings, SimulationFlags, SimulatorSettings,
};
use crate::config::PetalSonicBridgeDesc;
use crate::error::{PetalSonicError, Result};
use crate::lock;
use arc_swap::ArcSwapOption;
use std::sync::{Arc, Mutex, MutexGuard};

/// What an engine instance is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePurpose {
    /// Drives the live simulation and feeds the middleware.
    Runtime,
    /// Private to a bake or probe generation run.
    Baking,
}

/// Everything needed to bring up an engine instance.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest {
    pub purpose: EnginePurpose,
    pub scene_backend: SceneBackend,
    pub true_audio_next: bool,
    pub enable_validation: bool,
    /// Device fields are ignored; they are filled from the devices actually
    /// acquired.
    pub simulator: SimulatorSettings,
}

impl EngineRequest {
    pub fn runtime(desc: &PetalSonicBridgeDesc) -> Self {
        let mut flags = SimulationFlags::DIRECT | SimulationFlags::REFLECTIONS;
        if desc.simulate_pathing {
            flags |= SimulationFlags::PATHING;
        }

        Self {
            purpose: EnginePurpose::Runtime,
            scene_backend: desc.scene_backend,
            true_audio_next: desc.true_audio_next,
            enable_validation: desc.enable_validation,
            simulator: SimulatorSettings {
                flags,
                scene_backend: desc.scene_backend,
                reflection_effect: desc.reflection_effect,
                max_occlusion_samples: desc.max_occlusion_samples,
                max_rays: desc.max_rays,
                diffuse_samples: desc.diffuse_samples,
                max_duration: desc.max_duration,
                max_order: desc.max_order,
                max_sources: desc.max_sources,
                num_threads: desc.num_threads,
                ray_batch_size: desc.ray_batch_size,
                visibility_samples: desc.visibility_samples,
                sampling_rate: desc.sampling_rate,
                frame_size: desc.frame_size,
                opencl_device: None,
                radeon_rays_device: None,
                true_audio_next_device: None,
            },
        }
    }

    /// A minimal engine for baking: reflections and pathing only, no
    /// TrueAudio Next.
    pub fn baking(scene_backend: SceneBackend) -> Self {
        let mut request = Self::runtime(&PetalSonicBridgeDesc::default());
        request.purpose = EnginePurpose::Baking;
        request.scene_backend = scene_backend;
        request.simulator.scene_backend = scene_backend;
        request.simulator.flags = SimulationFlags::REFLECTIONS | SimulationFlags::PATHING;
        request
    }
}

/// Accelerator devices actually acquired for an engine.
#[derive(Debug, Default)]
pub struct Devices {
    pub embree: Option<Arc<OwnedHandle>>,
    pub opencl: Option<Arc<OwnedHandle>>,
    pub radeon_rays: Option<Arc<OwnedHandle>>,
    pub true_audio_next: Option<Arc<OwnedHandle>>,
}

impl Devices {
    fn raw(device: &Option<Arc<OwnedHandle>>) -> Option<RawHandle> {
        device.as_ref().map(|d| d.raw())
    }
}

/// One initialized engine instance.
///
/// Fields drop in declaration order, so the simulator goes before the scene,
/// which goes before the devices and the context. Handles that children still
/// pin stay alive until those children are gone.
pub struct LiveEngine {
    purpose: EnginePurpose,
    simulator: Arc<OwnedHandle>,
    scene: Arc<OwnedHandle>,
    devices: Devices,
    context: Arc<OwnedHandle>,
    scene_backend: SceneBackend,
    reflection_effect: ReflectionEffectKind,
    backend: Arc<dyn AcousticBackend>,
}

impl LiveEngine {
    /// Creates the context, devices, scene and simulator, and commits the
    /// simulator once with the scene attached.
    ///
    /// GPU devices are optional: when OpenCL or Radeon Rays cannot be created
    /// the scene falls back to Embree, and when Embree cannot be created it
    /// falls back to the built-in ray tracer.
    ///
    /// # Errors
    ///
    /// Returns [`PetalSonicError::Initialization`] when the context, scene or
    /// simulator cannot be created. Nothing created so far is leaked.
    pub fn initialize(backend: &Arc<dyn AcousticBackend>, request: &EngineRequest) -> Result<Self> {
        let context = OwnedHandle::adopt(
            backend,
            HandleKind::Context,
            "create_context",
            backend.create_context(&ContextSettings {
                enable_validation: request.enable_validation,
            }),
        )
        .map_err(|e| init_error("context", e))?;
        let context = Arc::new(context);

        let (scene_backend, reflection_effect, devices) =
            Self::acquire_devices(backend, &context, request);

        let scene = OwnedHandle::adopt(
            backend,
            HandleKind::Scene,
            "create_scene",
            backend.create_scene(
                context.raw(),
                &SceneSettings {
                    backend: scene_backend,
                    embree_device: Devices::raw(&devices.embree),
                    radeon_rays_device: Devices::raw(&devices.radeon_rays),
                },
            ),
        )
        .map_err(|e| init_error("scene", e))?
        .with_parent(Arc::clone(&context));
        let scene = Arc::new(scene);

        let mut settings = request.simulator;
        settings.scene_backend = scene_backend;
        settings.reflection_effect = reflection_effect;
        settings.opencl_device = Devices::raw(&devices.opencl);
        settings.radeon_rays_device = Devices::raw(&devices.radeon_rays);
        settings.true_audio_next_device = Devices::raw(&devices.true_audio_next);

        let simulator = OwnedHandle::adopt(
            backend,
            HandleKind::Simulator,
            "create_simulator",
            backend.create_simulator(context.raw(), &settings),
        )
        .map_err(|e| init_error("simulator", e))?
        .with_parent(Arc::clone(&scene));
        let simulator = Arc::new(simulator);

        backend.set_simulator_scene(simulator.raw(), scene.raw());
        backend.commit_simulator(simulator.raw());

        log::info!(
            "{} engine initialized on {} ({:?} scene, {:?} reflections)",
            match request.purpose {
                EnginePurpose::Runtime => "Runtime",
                EnginePurpose::Baking => "Baking",
            },
            backend.name(),
            scene_backend,
            reflection_effect
        );

        Ok(Self {
            purpose: request.purpose,
            simulator,
            scene,
            devices,
            context,
            scene_backend,
            reflection_effect,
            backend: Arc::clone(backend),
        })
    }

    fn acquire_devices(
        backend: &Arc<dyn AcousticBackend>,
        context: &Arc<OwnedHandle>,
        request: &EngineRequest,
    ) -> (SceneBackend, ReflectionEffectKind, Devices) {
        let mut devices = Devices::default();
        let mut scene_backend = request.scene_backend;
        let mut reflection_effect = request.simulator.reflection_effect;

        let wants_true_audio_next =
            request.true_audio_next || reflection_effect == ReflectionEffectKind::TrueAudioNext;

        if scene_backend == SceneBackend::RadeonRays || wants_true_audio_next {
            match Self::create_device(backend, context, DeviceKind::OpenCl, None) {
                Ok(opencl) => {
                    if scene_backend == SceneBackend::RadeonRays {
                        match Self::create_device(
                            backend,
                            context,
                            DeviceKind::RadeonRays,
                            Some(&opencl),
                        ) {
                            Ok(device) => devices.radeon_rays = Some(device),
                            Err(e) => {
                                log::warn!("Radeon Rays unavailable ({}), falling back to Embree", e);
                                scene_backend = SceneBackend::Embree;
                            }
                        }
                    }
                    if wants_true_audio_next {
                        match Self::create_device(
                            backend,
                            context,
                            DeviceKind::TrueAudioNext,
                            Some(&opencl),
                        ) {
                            Ok(device) => devices.true_audio_next = Some(device),
                            Err(e) => log::warn!("TrueAudio Next unavailable: {}", e),
                        }
                    }
                    if devices.radeon_rays.is_some() || devices.true_audio_next.is_some() {
                        devices.opencl = Some(opencl);
                    }
                }
                Err(e) => {
                    log::warn!("OpenCL device unavailable: {}", e);
                    if scene_backend == SceneBackend::RadeonRays {
                        scene_backend = SceneBackend::Embree;
                    }
                }
            }
        }

        if reflection_effect == ReflectionEffectKind::TrueAudioNext
            && devices.true_audio_next.is_none()
        {
            log::warn!("Falling back to convolution reflections");
            reflection_effect = ReflectionEffectKind::Convolution;
        }

        if scene_backend == SceneBackend::Embree {
            match Self::create_device(backend, context, DeviceKind::Embree, None) {
                Ok(device) => devices.embree = Some(device),
                Err(e) => {
                    log::warn!("Embree unavailable ({}), using the default ray tracer", e);
                    scene_backend = SceneBackend::Default;
                }
            }
        }

        (scene_backend, reflection_effect, devices)
    }

    fn create_device(
        backend: &Arc<dyn AcousticBackend>,
        context: &Arc<OwnedHandle>,
        kind: DeviceKind,
        dependency: Option<&Arc<OwnedHandle>>,
    ) -> Result<Arc<OwnedHandle>> {
        let created = backend.create_device(context.raw(), kind, dependency.map(|d| d.raw()));
        let device = OwnedHandle::adopt(backend, HandleKind::Device, "create_device", created)?;
        let parent = dependency.unwrap_or(context);
        Ok(Arc::new(device.with_parent(Arc::clone(parent))))
    }

    pub fn purpose(&self) -> EnginePurpose {
        self.purpose
    }

    pub fn backend(&self) -> &Arc<dyn AcousticBackend> {
        &self.backend
    }

    pub fn context(&self) -> &Arc<OwnedHandle> {
        &self.context
    }

    pub fn scene(&self) -> &Arc<OwnedHandle> {
        &self.scene
    }

    pub fn simulator(&self) -> &Arc<OwnedHandle> {
        &self.simulator
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    /// The scene backend in effect after device fallback.
    pub fn scene_backend(&self) -> SceneBackend {
        self.scene_backend
    }

    pub fn reflection_effect(&self) -> ReflectionEffectKind {
        self.reflection_effect
    }

    /// Commits the scene and then the simulator. Callers hold the simulation
    /// lock.
    pub(crate) fn commit_all(&self) {
        self.backend.commit_scene(self.scene.raw());
        self.backend.commit_simulator(self.simulator.raw());
    }
}

impl std::fmt::Debug for LiveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEngine")
            .field("purpose", &self.purpose)
            .field("backend", &self.backend.name())
            .field("context", &self.context.raw())
            .field("scene", &self.scene.raw())
            .field("simulator", &self.simulator.raw())
            .field("scene_backend", &self.scene_backend)
            .finish()
    }
}

fn init_error(what: &str, error: crate::backend::BackendError) -> PetalSonicError {
    log::error!("Failed to create {}: {}", what, error);
    PetalSonicError::Initialization(format!("failed to create {}: {}", what, error))
}

/// The runtime engine as seen by every thread, plus the lock that serializes
/// native run, commit and initialization calls against it.
#[derive(Debug, Default)]
pub struct EngineSlot {
    live: ArcSwapOption<LiveEngine>,
    simulation_lock: Mutex<()>,
}

impl EngineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current engine, if one is installed.
    pub fn current(&self) -> Option<Arc<LiveEngine>> {
        self.live.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.live.load().is_some()
    }

    /// Acquires the simulation lock.
    pub fn lock_simulation(&self) -> MutexGuard<'_, ()> {
        lock(&self.simulation_lock)
    }

    /// Publishes `engine`. The caller holds the simulation lock.
    pub(crate) fn install(&self, engine: Arc<LiveEngine>) {
        self.live.store(Some(engine));
    }

    /// Unpublishes the engine. The caller holds the simulation lock.
    pub(crate) fn take(&self) -> Option<Arc<LiveEngine>> {
        self.live.swap(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    fn backend() -> (Arc<InMemoryBackend>, Arc<dyn AcousticBackend>) {
        let memory = Arc::new(InMemoryBackend::new());
        let dynamic: Arc<dyn AcousticBackend> = memory.clone();
        (memory, dynamic)
    }

    #[test]
    fn test_initialize_attaches_scene_to_simulator() {
        let (memory, backend) = backend();
        let engine =
            LiveEngine::initialize(&backend, &EngineRequest::runtime(&Default::default())).unwrap();

        assert_eq!(
            memory.simulator_scene(engine.simulator().raw()),
            Some(engine.scene().raw())
        );
        assert_eq!(engine.scene_backend(), SceneBackend::Default);
    }

    #[test]
    fn test_radeon_rays_falls_back_to_embree() {
        let (memory, backend) = backend();
        memory.fail_device(DeviceKind::OpenCl);

        let desc = PetalSonicBridgeDesc::default().with_scene_backend(SceneBackend::RadeonRays);
        let engine = LiveEngine::initialize(&backend, &EngineRequest::runtime(&desc)).unwrap();

        assert_eq!(engine.scene_backend(), SceneBackend::Embree);
        assert!(engine.devices().embree.is_some());
        assert!(engine.devices().opencl.is_none());
    }

    #[test]
    fn test_embree_failure_falls_back_to_default() {
        let (memory, backend) = backend();
        memory.fail_device(DeviceKind::RadeonRays);
        memory.fail_device(DeviceKind::Embree);

        let desc = PetalSonicBridgeDesc::default().with_scene_backend(SceneBackend::RadeonRays);
        let engine = LiveEngine::initialize(&backend, &EngineRequest::runtime(&desc)).unwrap();

        assert_eq!(engine.scene_backend(), SceneBackend::Default);
        assert!(engine.devices().opencl.is_none());
    }

    #[test]
    fn test_missing_true_audio_next_downgrades_reflections() {
        let (memory, backend) = backend();
        memory.fail_device(DeviceKind::TrueAudioNext);

        let desc = PetalSonicBridgeDesc::default()
            .with_reflection_effect(ReflectionEffectKind::TrueAudioNext);
        let engine = LiveEngine::initialize(&backend, &EngineRequest::runtime(&desc)).unwrap();

        assert_eq!(engine.reflection_effect(), ReflectionEffectKind::Convolution);
    }

    #[test]
    fn test_dropping_engine_releases_everything() {
        let (memory, backend) = backend();
        let engine =
            LiveEngine::initialize(&backend, &EngineRequest::baking(SceneBackend::Default))
                .unwrap();
        let context = engine.context().raw();
        let simulator = engine.simulator().raw();

        drop(engine);
        assert!(!memory.is_live(context));
        assert!(!memory.is_live(simulator));

        let order = memory.released_handles();
        assert_eq!(order.first().map(|(k, _)| *k), Some(HandleKind::Simulator));
        assert_eq!(order.last().map(|(k, _)| *k), Some(HandleKind::Context));
    }
}

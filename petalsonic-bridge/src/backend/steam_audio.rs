//! [`AcousticBackend`] on top of Steam Audio through `audionimbus`.
//!
//! Covers contexts, scenes, a direct-path simulator and its sources.
//! Accelerator devices, static meshes, probe batches, reflections, pathing and
//! baking report [`BackendError::Unsupported`], so the bridge falls back to the
//! built-in ray tracer and runs direct simulation only.

use super::{
    AcousticBackend, BackendError, BackendResult, ContextSettings, DeviceKind,
    DirectSimulationFlags, HandleKind, PathBakeParams, ProbeGenerationParams, RawHandle,
    ReflectionsBakeParams, SceneSettings, SharedInputs, SimulationFlags, SimulatorSettings,
    SourceInputs, SourceOutputs,
};
use crate::lock;
use crate::math::{CoordinateSpace, Sphere, Vec3};
use crate::scene::StaticMeshData;
use audionimbus::{
    AirAbsorptionModel, Context, Direct, DirectSimulationParameters, DirectSimulationSettings,
    DistanceAttenuationModel, Point, Scene, SceneParams, SimulationInputs, SimulationSharedInputs,
    Simulator, Source, SourceSettings, Vector3, geometry,
};
use std::collections::HashMap;
use std::sync::Mutex;

enum NativeObject {
    Context(Context),
    Scene(Scene),
    Simulator(Simulator<Direct>),
    Source(Source),
}

impl NativeObject {
    fn kind(&self) -> HandleKind {
        match self {
            Self::Context(_) => HandleKind::Context,
            Self::Scene(_) => HandleKind::Scene,
            Self::Simulator(_) => HandleKind::Simulator,
            Self::Source(_) => HandleKind::Source,
        }
    }
}

#[derive(Default)]
struct NativeState {
    next_handle: u64,
    objects: HashMap<RawHandle, NativeObject>,
}

// SAFETY: Steam Audio objects are reference-counted native handles that may
// be used from any thread; every access goes through the surrounding mutex.
unsafe impl Send for NativeState {}

impl NativeState {
    fn insert(&mut self, object: NativeObject) -> RawHandle {
        self.next_handle += 1;
        let handle = RawHandle(self.next_handle);
        self.objects.insert(handle, object);
        handle
    }

    fn context(&self, handle: RawHandle) -> BackendResult<&Context> {
        match self.objects.get(&handle) {
            Some(NativeObject::Context(context)) => Ok(context),
            _ => Err(unknown(HandleKind::Context, handle)),
        }
    }

    fn scene_mut(&mut self, handle: RawHandle) -> BackendResult<&mut Scene> {
        match self.objects.get_mut(&handle) {
            Some(NativeObject::Scene(scene)) => Ok(scene),
            _ => Err(unknown(HandleKind::Scene, handle)),
        }
    }

    fn simulator_mut(&mut self, handle: RawHandle) -> BackendResult<&mut Simulator<Direct>> {
        match self.objects.get_mut(&handle) {
            Some(NativeObject::Simulator(simulator)) => Ok(simulator),
            _ => Err(unknown(HandleKind::Simulator, handle)),
        }
    }

    fn source_mut(&mut self, handle: RawHandle) -> BackendResult<&mut Source> {
        match self.objects.get_mut(&handle) {
            Some(NativeObject::Source(source)) => Ok(source),
            _ => Err(unknown(HandleKind::Source, handle)),
        }
    }

    /// Runs `f` with a simulator and one other object borrowed at once.
    fn with_simulator_and<R>(
        &mut self,
        simulator: RawHandle,
        other: RawHandle,
        f: impl FnOnce(&mut Simulator<Direct>, &NativeObject) -> R,
    ) -> BackendResult<R> {
        let mut sim = self
            .objects
            .remove(&simulator)
            .ok_or(unknown(HandleKind::Simulator, simulator))?;
        let result = match (&mut sim, self.objects.get(&other)) {
            (NativeObject::Simulator(s), Some(o)) => Ok(f(s, o)),
            (NativeObject::Simulator(_), None) => Err(BackendError::UnknownHandle {
                kind: HandleKind::Source,
                handle: other,
            }),
            _ => Err(unknown(HandleKind::Simulator, simulator)),
        };
        self.objects.insert(simulator, sim);
        result
    }
}

fn unknown(kind: HandleKind, handle: RawHandle) -> BackendError {
    BackendError::UnknownHandle { kind, handle }
}

fn failed(operation: &'static str, error: impl std::fmt::Display) -> BackendError {
    BackendError::Failed {
        operation,
        reason: error.to_string(),
    }
}

fn point(v: Vec3) -> Point {
    Point::new(v.x, v.y, v.z)
}

fn vector(v: Vec3) -> Vector3 {
    Vector3::new(v.x, v.y, v.z)
}

fn coordinate_system(space: &CoordinateSpace) -> geometry::CoordinateSystem {
    geometry::CoordinateSystem {
        origin: point(space.origin),
        right: vector(space.right),
        up: vector(space.up),
        ahead: vector(space.ahead),
    }
}

/// Steam Audio, direct path only.
pub struct SteamAudioBackend {
    state: Mutex<NativeState>,
}

impl SteamAudioBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NativeState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NativeState> {
        lock(&self.state)
    }
}

impl Default for SteamAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SteamAudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteamAudioBackend")
            .field("objects", &self.state().objects.len())
            .finish()
    }
}

impl AcousticBackend for SteamAudioBackend {
    fn name(&self) -> &str {
        "steam-audio"
    }

    fn create_context(&self, _settings: &ContextSettings) -> BackendResult<RawHandle> {
        let context = Context::try_new(&audionimbus::ContextSettings::default())
            .map_err(|e| failed("create_context", e))?;
        Ok(self.state().insert(NativeObject::Context(context)))
    }

    fn create_device(
        &self,
        _context: RawHandle,
        _kind: DeviceKind,
        _dependency: Option<RawHandle>,
    ) -> BackendResult<RawHandle> {
        Err(BackendError::Unsupported("accelerator devices"))
    }

    fn create_scene(
        &self,
        context: RawHandle,
        _settings: &SceneSettings,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        let scene = Scene::try_new(state.context(context)?, &audionimbus::SceneSettings::default())
            .map_err(|e| failed("create_scene", e))?;
        Ok(state.insert(NativeObject::Scene(scene)))
    }

    fn commit_scene(&self, scene: RawHandle) {
        match self.state().scene_mut(scene) {
            Ok(scene) => scene.commit(),
            Err(e) => log::warn!("commit_scene: {}", e),
        }
    }

    fn create_static_mesh(
        &self,
        _scene: RawHandle,
        _mesh: &StaticMeshData,
    ) -> BackendResult<RawHandle> {
        Err(BackendError::Unsupported("static meshes"))
    }

    fn add_static_mesh(&self, _scene: RawHandle, _mesh: RawHandle) {}

    fn remove_static_mesh(&self, _scene: RawHandle, _mesh: RawHandle) {}

    fn create_simulator(
        &self,
        context: RawHandle,
        settings: &SimulatorSettings,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        let simulator =
            Simulator::builder(SceneParams::Default, settings.sampling_rate, settings.frame_size)
                .with_direct(DirectSimulationSettings {
                    max_num_occlusion_samples: settings.max_occlusion_samples,
                })
                .try_build(state.context(context)?)
                .map_err(|e| failed("create_simulator", e))?;
        Ok(state.insert(NativeObject::Simulator(simulator)))
    }

    fn set_simulator_scene(&self, simulator: RawHandle, scene: RawHandle) {
        let result = self.state().with_simulator_and(simulator, scene, |sim, other| {
            if let NativeObject::Scene(scene) = other {
                sim.set_scene(scene);
            }
        });
        if let Err(e) = result {
            log::warn!("set_simulator_scene: {}", e);
        }
    }

    fn commit_simulator(&self, simulator: RawHandle) {
        match self.state().simulator_mut(simulator) {
            Ok(simulator) => simulator.commit(),
            Err(e) => log::warn!("commit_simulator: {}", e),
        }
    }

    fn create_source(
        &self,
        simulator: RawHandle,
        _flags: SimulationFlags,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        let source = Source::try_new(
            state.simulator_mut(simulator)?,
            &SourceSettings {
                flags: audionimbus::SimulationFlags::DIRECT,
            },
        )
        .map_err(|e| failed("create_source", e))?;
        Ok(state.insert(NativeObject::Source(source)))
    }

    fn add_source(&self, simulator: RawHandle, source: RawHandle) {
        let result = self.state().with_simulator_and(simulator, source, |sim, other| {
            if let NativeObject::Source(source) = other {
                sim.add_source(source);
            }
        });
        if let Err(e) = result {
            log::warn!("add_source: {}", e);
        }
    }

    fn remove_source(&self, simulator: RawHandle, source: RawHandle) {
        let result = self.state().with_simulator_and(simulator, source, |sim, other| {
            if let NativeObject::Source(source) = other {
                sim.remove_source(source);
            }
        });
        if let Err(e) = result {
            log::debug!("remove_source: {}", e);
        }
    }

    fn set_shared_inputs(&self, simulator: RawHandle, flags: SimulationFlags, inputs: &SharedInputs) {
        if !flags.contains(SimulationFlags::DIRECT) {
            return;
        }
        let shared = SimulationSharedInputs {
            listener: coordinate_system(&inputs.listener),
            num_rays: inputs.num_rays,
            num_bounces: inputs.num_bounces,
            duration: inputs.duration,
            order: inputs.order,
            irradiance_min_distance: inputs.irradiance_min_distance,
            pathing_visualization_callback: None,
        };
        match self.state().simulator_mut(simulator) {
            Ok(simulator) => simulator.set_shared_inputs(audionimbus::SimulationFlags::DIRECT, &shared),
            Err(e) => log::warn!("set_shared_inputs: {}", e),
        }
    }

    fn set_source_inputs(&self, source: RawHandle, flags: SimulationFlags, inputs: &SourceInputs) {
        if !flags.contains(SimulationFlags::DIRECT) {
            return;
        }
        let direct = inputs.direct_flags;
        let native = SimulationInputs {
            source: coordinate_system(&inputs.source),
            direct_simulation: Some(DirectSimulationParameters {
                distance_attenuation: direct
                    .contains(DirectSimulationFlags::DISTANCE_ATTENUATION)
                    .then_some(DistanceAttenuationModel::Default),
                air_absorption: direct
                    .contains(DirectSimulationFlags::AIR_ABSORPTION)
                    .then_some(AirAbsorptionModel::Default),
                directivity: None,
                occlusion: None,
            }),
            reflections_simulation: None,
            pathing_simulation: None,
        };
        match self.state().source_mut(source) {
            Ok(source) => source.set_inputs(audionimbus::SimulationFlags::DIRECT, native),
            Err(e) => log::warn!("set_source_inputs: {}", e),
        }
    }

    fn source_outputs(&self, source: RawHandle, flags: SimulationFlags) -> SourceOutputs {
        let mut outputs = SourceOutputs::default();
        if !flags.contains(SimulationFlags::DIRECT) {
            return outputs;
        }

        let mut state = self.state();
        let Ok(source) = state.source_mut(source) else {
            return outputs;
        };
        let native = source.get_outputs(audionimbus::SimulationFlags::DIRECT);
        let direct = native.direct();
        if let Some(attenuation) = direct.distance_attenuation {
            outputs.distance_attenuation = attenuation;
        }
        if let Some(eq) = direct.air_absorption.as_ref() {
            outputs.air_absorption = [eq[0], eq[1], eq[2]];
        }
        outputs
    }

    fn run_direct(&self, simulator: RawHandle) {
        match self.state().simulator_mut(simulator) {
            Ok(simulator) => simulator.run_direct(),
            Err(e) => log::warn!("run_direct: {}", e),
        }
    }

    fn run_reflections(&self, _simulator: RawHandle) {
        log::trace!("Reflections are not simulated by the Steam Audio backend");
    }

    fn run_pathing(&self, _simulator: RawHandle) {
        log::trace!("Pathing is not simulated by the Steam Audio backend");
    }

    fn create_probe_batch(&self, _context: RawHandle) -> BackendResult<RawHandle> {
        Err(BackendError::Unsupported("probe batches"))
    }

    fn add_probe(&self, _batch: RawHandle, _probe: Sphere) {}

    fn commit_probe_batch(&self, _batch: RawHandle) {}

    fn save_probe_batch(&self, _context: RawHandle, _batch: RawHandle) -> BackendResult<Vec<u8>> {
        Err(BackendError::Unsupported("probe batches"))
    }

    fn load_probe_batch(&self, _context: RawHandle, _data: &[u8]) -> BackendResult<RawHandle> {
        Err(BackendError::Unsupported("probe batches"))
    }

    fn add_probe_batch(&self, _simulator: RawHandle, _batch: RawHandle) {}

    fn remove_probe_batch(&self, _simulator: RawHandle, _batch: RawHandle) {}

    fn generate_probes(
        &self,
        _context: RawHandle,
        _scene: RawHandle,
        _params: &ProbeGenerationParams,
    ) -> BackendResult<Vec<Sphere>> {
        Err(BackendError::Unsupported("probe generation"))
    }

    fn bake_reflections(
        &self,
        _context: RawHandle,
        _params: &ReflectionsBakeParams,
        _progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()> {
        Err(BackendError::Unsupported("reflections baking"))
    }

    fn cancel_reflections_bake(&self, _context: RawHandle) {}

    fn bake_pathing(
        &self,
        _context: RawHandle,
        _params: &PathBakeParams,
        _progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()> {
        Err(BackendError::Unsupported("pathing baking"))
    }

    fn cancel_path_bake(&self, _context: RawHandle) {}

    fn release(&self, kind: HandleKind, handle: RawHandle) -> BackendResult<()> {
        let mut state = self.state();
        match state.objects.remove(&handle) {
            Some(object) if object.kind() == kind => Ok(()),
            Some(object) => {
                state.objects.insert(handle, object);
                Err(unknown(kind, handle))
            }
            None => Err(unknown(kind, handle)),
        }
    }
}

//! The acoustic engine seam.
//!
//! The bridge never talks to a native library directly. Everything it needs
//! from the engine (contexts, scenes, simulators, sources, probe batches,
//! bakers) goes through [`AcousticBackend`], and every handle it gets back is
//! wrapped in an [`OwnedHandle`] that releases itself exactly once.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryBackend`]: deterministic, journaling, no native code. Used by the
//!   demo and the tests.
//! - `SteamAudioBackend` (feature `steam-audio`): direct-path simulation on top
//!   of `audionimbus`.

pub mod handle;
pub mod memory;
pub mod params;
#[cfg(feature = "steam-audio")]
pub mod steam_audio;

pub use handle::OwnedHandle;
pub use memory::{BackendCall, InMemoryBackend};
pub use params::*;
#[cfg(feature = "steam-audio")]
pub use steam_audio::SteamAudioBackend;

use crate::math::Sphere;
use crate::scene::StaticMeshData;
use std::fmt;
use thiserror::Error;

/// Opaque native handle value. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawHandle(pub u64);

impl RawHandle {
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Context,
    Device,
    Scene,
    StaticMesh,
    Simulator,
    Source,
    ProbeBatch,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Context => "context",
            Self::Device => "device",
            Self::Scene => "scene",
            Self::StaticMesh => "static mesh",
            Self::Simulator => "simulator",
            Self::Source => "source",
            Self::ProbeBatch => "probe batch",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{operation} reported success but returned a null {kind} handle")]
    NullHandle {
        kind: HandleKind,
        operation: &'static str,
    },

    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("unknown {kind} handle {handle}")]
    UnknownHandle { kind: HandleKind, handle: RawHandle },

    #[error("{0} was cancelled")]
    Cancelled(&'static str),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Operations the bridge consumes from an acoustic simulation engine.
///
/// Implementations must be `Send + Sync`: the simulation thread, the physics
/// thread and the bake worker all call in. The bridge serializes the calls that
/// the engine cannot take concurrently (runs, commits, initialization) behind
/// its simulation lock, so implementations only need to be safe for the
/// remaining calls (input pushes, handle creation and release).
///
/// Creation calls return a handle; a null handle is treated as failure even
/// when the call returns `Ok`.
pub trait AcousticBackend: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn create_context(&self, settings: &ContextSettings) -> BackendResult<RawHandle>;

    /// Creates an accelerator device. `dependency` is the OpenCL device for
    /// Radeon Rays and TrueAudio Next.
    fn create_device(
        &self,
        context: RawHandle,
        kind: DeviceKind,
        dependency: Option<RawHandle>,
    ) -> BackendResult<RawHandle>;

    fn create_scene(&self, context: RawHandle, settings: &SceneSettings)
    -> BackendResult<RawHandle>;
    fn commit_scene(&self, scene: RawHandle);

    fn create_static_mesh(
        &self,
        scene: RawHandle,
        mesh: &StaticMeshData,
    ) -> BackendResult<RawHandle>;
    fn add_static_mesh(&self, scene: RawHandle, mesh: RawHandle);
    fn remove_static_mesh(&self, scene: RawHandle, mesh: RawHandle);

    fn create_simulator(
        &self,
        context: RawHandle,
        settings: &SimulatorSettings,
    ) -> BackendResult<RawHandle>;
    fn set_simulator_scene(&self, simulator: RawHandle, scene: RawHandle);
    fn commit_simulator(&self, simulator: RawHandle);

    fn create_source(
        &self,
        simulator: RawHandle,
        flags: SimulationFlags,
    ) -> BackendResult<RawHandle>;
    fn add_source(&self, simulator: RawHandle, source: RawHandle);
    fn remove_source(&self, simulator: RawHandle, source: RawHandle);

    fn set_shared_inputs(&self, simulator: RawHandle, flags: SimulationFlags, inputs: &SharedInputs);
    fn set_source_inputs(&self, source: RawHandle, flags: SimulationFlags, inputs: &SourceInputs);
    fn source_outputs(&self, source: RawHandle, flags: SimulationFlags) -> SourceOutputs;

    fn run_direct(&self, simulator: RawHandle);
    fn run_reflections(&self, simulator: RawHandle);
    fn run_pathing(&self, simulator: RawHandle);

    fn create_probe_batch(&self, context: RawHandle) -> BackendResult<RawHandle>;
    fn add_probe(&self, batch: RawHandle, probe: Sphere);
    fn commit_probe_batch(&self, batch: RawHandle);
    fn save_probe_batch(&self, context: RawHandle, batch: RawHandle) -> BackendResult<Vec<u8>>;
    fn load_probe_batch(&self, context: RawHandle, data: &[u8]) -> BackendResult<RawHandle>;
    fn add_probe_batch(&self, simulator: RawHandle, batch: RawHandle);
    fn remove_probe_batch(&self, simulator: RawHandle, batch: RawHandle);

    fn generate_probes(
        &self,
        context: RawHandle,
        scene: RawHandle,
        params: &ProbeGenerationParams,
    ) -> BackendResult<Vec<Sphere>>;

    /// Bakes reflections into `params.probe_batch`. Returns early (still `Ok`)
    /// when [`cancel_reflections_bake`](Self::cancel_reflections_bake) is called.
    fn bake_reflections(
        &self,
        context: RawHandle,
        params: &ReflectionsBakeParams,
        progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()>;
    fn cancel_reflections_bake(&self, context: RawHandle);

    fn bake_pathing(
        &self,
        context: RawHandle,
        params: &PathBakeParams,
        progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()>;
    fn cancel_path_bake(&self, context: RawHandle);

    /// Releases one reference to a handle. Called exactly once per handle by
    /// [`OwnedHandle`].
    fn release(&self, kind: HandleKind, handle: RawHandle) -> BackendResult<()>;
}

//! # PetalSonic Bridge
//!
//! Runtime orchestration and reverb baking around a Steam Audio style acoustic
//! engine, for games that route their audio through an FMOD style middleware.
//!
//! The bridge sits between three parties it does not own:
//!
//! - the acoustic engine, reached through [`AcousticBackend`],
//! - the audio middleware, reached through [`AudioMiddleware`],
//! - the host engine, which feeds physics ticks, transforms, static geometry
//!   and static source markers into a [`PetalSonicBridge`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use petalsonic_bridge::*;
//! use std::sync::Arc;
//!
//! let backend: Arc<dyn AcousticBackend> = Arc::new(InMemoryBackend::new());
//! let middleware = Arc::new(InMemoryMiddleware::new());
//!
//! let mut bridge = PetalSonicBridge::new(
//!     PetalSonicBridgeDesc::default(),
//!     backend,
//!     middleware.clone(),
//! )?;
//! bridge.start_simulation()?;
//!
//! // The middleware adapter forwards event lifecycle callbacks.
//! let event = middleware.spawn_event(Guid::default(), EventAttributes::default(), true);
//! bridge.command_sender().send(BridgeCommand::EventCreated(event)).ok();
//!
//! // Once per physics frame, from the host:
//! bridge.physics_process(&Transform::IDENTITY, &EmptyWorld);
//! # Ok::<(), PetalSonicError>(())
//! ```
//!
//! ## Architecture
//!
//! 1. **Physics thread**: calls [`PetalSonicBridge::physics_process`], which
//!    drains adapter commands, publishes the listener snapshot, flushes
//!    pending scene commits and runs occlusion processors.
//! 2. **Simulation thread**: owned by the [`SimulationOrchestrator`]; runs the
//!    direct, reflections and pathing stages in that order every cycle.
//! 3. **Bake worker**: owned by a [`PetalSonicBaker`]; runs bake tasks one at
//!    a time on its own short-lived engine instance.
//!
//! Two locks coordinate them. The simulation lock serializes native run,
//! commit and initialization calls; the collections lock guards the source
//! registry and static markers. When both are needed the simulation lock is
//! taken first.

pub mod backend;
pub mod bake;
pub mod bridge;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod middleware;
pub mod occlusion;
pub mod registry;
pub mod scene;
pub mod simulation;
pub mod source;

pub use backend::{AcousticBackend, InMemoryBackend, OwnedHandle, RawHandle};
pub use bake::{BakeResults, PetalSonicBaker};
pub use bridge::PetalSonicBridge;
pub use commit::SceneCommitCoordinator;
pub use config::{
    BakeDesc, CommitMode, PetalSonicBridgeDesc, ProbeGenerationDesc, StaticMatching,
};
pub use error::{PetalSonicError, Result};
pub use events::{BakeEvent, BridgeCommand, BridgeEvent, EVENT_QUEUE_CAPACITY};
pub use math::{CoordinateSpace, Pose, Quat, Sphere, Transform, Vec3};
pub use middleware::{AudioMiddleware, EventAttributes, EventId, Guid, InMemoryMiddleware};
pub use occlusion::{OcclusionProcessor, RaycastOcclusion};
pub use registry::{MarkerId, SharedSourceRegistry, StaticSourceMarker};
pub use scene::{AudioMaterial, EmptyWorld, MeshSurface, RayHit, RayTracer, StaticGeometry};
pub use simulation::SimulationOrchestrator;
pub use source::AcousticSource;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if another thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

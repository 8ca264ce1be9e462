//! Offline baking of reflections and pathing data.
//!
//! A [`PetalSonicBaker`] owns one bake session at a time. [`bake`] validates
//! the request, builds a private engine with the baking geometry, queues one
//! task per layer and hands the queue to a worker thread:
//!
//! ```text
//! Idle → Configuring → Running → (Cancelling) → Idle
//! ```
//!
//! Tasks run one after another. When every task finishes the layers are saved
//! together; a cancelled or failed bake saves nothing.
//!
//! [`bake`]: PetalSonicBaker::bake

pub mod probes;
pub mod progress;
pub mod results;
pub mod task;

pub use progress::BakeProgress;
pub use results::{BakeResults, BakedLayer, LoadedBakeData};
pub use task::{BakeTask, BakeTaskKind, BakeTaskParams};

use crate::backend::{
    AcousticBackend, BackendError, BackendResult, ProbeGenerationParams, RawHandle,
    ReflectionsBakeFlags, SceneBackend,
};
use crate::config::{BakeDesc, ProbeGenerationDesc};
use crate::engine::{EngineRequest, LiveEngine};
use crate::error::{PetalSonicError, Result};
use crate::events::{BakeEvent, EVENT_QUEUE_CAPACITY, EventQueue};
use crate::lock;
use crate::scene::StaticGeometry;
use crossbeam_channel::Receiver;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// How a bake ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BakeOutcome {
    Completed { path: PathBuf, layers: usize },
    Cancelled,
    Failed(String),
}

impl BakeOutcome {
    fn to_event(&self) -> BakeEvent {
        match self {
            Self::Completed { path, layers } => BakeEvent::Completed {
                path: path.clone(),
                layers: *layers,
            },
            Self::Cancelled => BakeEvent::Cancelled,
            Self::Failed(error) => BakeEvent::Failed {
                error: error.clone(),
            },
        }
    }
}

/// State shared between the baker and its worker.
///
/// `running` and `cancel_requested` are only changed together with the
/// `context` lock held, so a cancel never outlives the bake it was meant for.
#[derive(Debug, Default)]
struct BakeShared {
    running: AtomicBool,
    cancel_requested: AtomicBool,
    progress: BakeProgress,
    /// Context of the running bake. Cleared before the context is released.
    context: Mutex<Option<RawHandle>>,
}

impl BakeShared {
    fn finish(&self) {
        let _context = lock(&self.context);
        self.cancel_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Everything one bake owns. Drops queue first, then geometry, then engine.
struct BakeSession {
    queue: VecDeque<BakeTask>,
    geometry: StaticGeometry,
    engine: LiveEngine,
    bake_flags: ReflectionsBakeFlags,
    save_path: PathBuf,
}

/// Runs bakes and probe generation against its own engine instances.
///
/// At most one bake runs at a time. Progress can be polled with
/// [`progress`](Self::progress) or followed through [`events`](Self::events).
pub struct PetalSonicBaker {
    backend: Arc<dyn AcousticBackend>,
    shared: Arc<BakeShared>,
    worker: Mutex<Option<JoinHandle<BakeOutcome>>>,
    events: EventQueue<BakeEvent>,
}

impl PetalSonicBaker {
    pub fn new(backend: Arc<dyn AcousticBackend>) -> Self {
        Self {
            backend,
            shared: Arc::new(BakeShared::default()),
            worker: Mutex::new(None),
            events: EventQueue::new(EVENT_QUEUE_CAPACITY),
        }
    }

    /// Starts a bake on a worker thread and returns once the queue is built.
    ///
    /// # Arguments
    ///
    /// * `desc` - Probes, geometry, static source positions and bake settings
    ///
    /// # Errors
    ///
    /// - [`PetalSonicError::Bake`] if a bake is already running
    /// - [`PetalSonicError::Configuration`] if `desc` is invalid, or Radeon Rays
    ///   was requested and its devices could not be created
    /// - [`PetalSonicError::Initialization`] if the baking engine cannot be
    ///   created
    ///
    /// Nothing is queued when configuration fails.
    pub fn bake(&self, desc: BakeDesc) -> Result<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Bake requested while another bake is running");
            return Err(PetalSonicError::Bake("a bake is already running".into()));
        }

        if let Some(previous) = lock(&self.worker).take() {
            let _ = previous.join();
        }

        let session = match self.configure(&desc) {
            Ok(session) => session,
            Err(e) => {
                log::error!("Bake configuration failed: {}", e);
                self.finish_without_worker();
                return Err(e);
            }
        };

        *lock(&self.shared.context) = Some(session.engine.context().raw());
        self.shared.progress.start(session.queue.len());

        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("petalsonic-bake".into())
            .spawn(move || run_bake(session, &shared, &events));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                lock(&self.shared.context).take();
                self.finish_without_worker();
                Err(PetalSonicError::Engine(format!(
                    "Failed to spawn bake worker: {}",
                    e
                )))
            }
        }
    }

    fn configure(&self, desc: &BakeDesc) -> Result<BakeSession> {
        desc.validate()?;
        let probes = probes::parse_probes(&desc.probe_data)?;

        let engine =
            LiveEngine::initialize(&self.backend, &EngineRequest::baking(desc.scene_backend))?;
        if desc.scene_backend == SceneBackend::RadeonRays {
            let devices = engine.devices();
            if devices.opencl.is_none() || devices.radeon_rays.is_none() {
                return Err(PetalSonicError::Configuration(
                    "Radeon Rays baking needs both an OpenCL and a Radeon Rays device".into(),
                ));
            }
        }

        let geometry = StaticGeometry::new(engine.scene(), &desc.geometry, None)?;
        engine.backend().commit_scene(engine.scene().raw());

        let queue = task::build_bake_queue(&engine, desc, &probes)?;
        log::info!(
            "Configured bake: {} probes, {} meshes, {} tasks",
            probes.len(),
            geometry.len(),
            queue.len()
        );

        Ok(BakeSession {
            queue,
            geometry,
            engine,
            bake_flags: desc.bake_flags,
            save_path: desc.save_path.clone(),
        })
    }

    fn finish_without_worker(&self) {
        self.shared.finish();
    }

    /// Asks the running bake to stop. The task in flight is interrupted, no
    /// further task starts and nothing is saved.
    ///
    /// Returns `false` when no bake is running.
    pub fn cancel(&self) -> bool {
        let context = lock(&self.shared.context);
        if !self.shared.running.load(Ordering::Acquire) {
            log::warn!("Cancel requested but no bake is running");
            return false;
        }

        self.shared.cancel_requested.store(true, Ordering::Release);
        if let Some(context) = *context {
            self.backend.cancel_reflections_bake(context);
            self.backend.cancel_path_bake(context);
        }
        log::info!("Bake cancellation requested");
        true
    }

    pub fn is_bake_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Overall progress of the current or last bake, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.shared.progress.value()
    }

    /// A receiver for bake events. Every clone sees each event once between
    /// them, so use a single consumer. At most [`EVENT_QUEUE_CAPACITY`]
    /// events are kept; the oldest are dropped when nobody drains them.
    pub fn events(&self) -> Receiver<BakeEvent> {
        self.events.subscribe()
    }

    /// Blocks until the current bake ends. `None` if no bake was started
    /// since the last call.
    pub fn wait(&self) -> Option<BakeOutcome> {
        let handle = lock(&self.worker).take()?;
        Some(
            handle
                .join()
                .unwrap_or_else(|_| BakeOutcome::Failed("bake worker panicked".into())),
        )
    }

    /// Fills an area with probes and returns them as a flat buffer, four
    /// floats per probe, ready for [`BakeDesc::probe_data`].
    ///
    /// # Errors
    ///
    /// Fails while a bake is running, when `desc` is invalid, or when the
    /// engine cannot generate probes.
    pub fn generate_probes(&self, desc: &ProbeGenerationDesc) -> Result<Vec<f32>> {
        if self.is_bake_running() {
            return Err(PetalSonicError::Bake(
                "cannot generate probes while a bake is running".into(),
            ));
        }
        desc.validate()?;

        let engine =
            LiveEngine::initialize(&self.backend, &EngineRequest::baking(desc.scene_backend))?;
        let _geometry = StaticGeometry::new(engine.scene(), &desc.geometry, None)?;
        let backend = engine.backend();
        backend.commit_scene(engine.scene().raw());

        let params = ProbeGenerationParams {
            kind: desc.kind,
            spacing: desc.spacing,
            height: desc.height,
            transform: desc.volume_transform(),
        };
        let probes = backend.generate_probes(engine.context().raw(), engine.scene().raw(), &params)?;
        log::info!("Generated {} probes", probes.len());
        Ok(probes::flatten_probes(&probes))
    }
}

impl Drop for PetalSonicBaker {
    fn drop(&mut self) {
        if self.is_bake_running() {
            self.cancel();
        }
        self.wait();
    }
}

impl std::fmt::Debug for PetalSonicBaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PetalSonicBaker")
            .field("backend", &self.backend.name())
            .field("running", &self.is_bake_running())
            .field("progress", &self.progress())
            .finish()
    }
}

fn run_bake(session: BakeSession, shared: &BakeShared, events: &EventQueue<BakeEvent>) -> BakeOutcome {
    let BakeSession {
        mut queue,
        geometry,
        engine,
        bake_flags,
        save_path,
    } = session;
    let backend = Arc::clone(engine.backend());
    let context = engine.context().raw();
    let total = queue.len();

    log::info!("Bake started: {} tasks", total);
    events.push(BakeEvent::Started { tasks: total });

    let mut results = BakeResults::new(bake_flags);
    let mut stopped = None;
    let mut index = 0;

    while let Some(task) = queue.pop_front() {
        if shared.cancel_requested.load(Ordering::Acquire) {
            stopped = Some(BakeOutcome::Cancelled);
            break;
        }

        log::info!("Baking {} ({}/{})", task.kind(), index + 1, total);
        events.push(BakeEvent::TaskStarted {
            index,
            kind: task.kind(),
        });

        match run_task(backend.as_ref(), context, &task, shared, events) {
            Ok(data) => results.insert(task.identifier(), data),
            Err(BackendError::Cancelled(_)) => {
                stopped = Some(BakeOutcome::Cancelled);
                break;
            }
            Err(e) => {
                log::error!("{} bake failed: {}", task.kind(), e);
                stopped = Some(BakeOutcome::Failed(format!("{} bake failed: {}", task.kind(), e)));
                break;
            }
        }

        drop(task);
        shared.progress.complete_task();
        events.push(BakeEvent::TaskFinished {
            index,
            overall: shared.progress.value(),
        });
        index += 1;
    }
    drop(queue);

    let outcome = stopped.unwrap_or_else(|| persist(&results, &save_path));
    match &outcome {
        BakeOutcome::Completed { path, layers } => {
            log::info!("Bake finished: {} layers written to {}", layers, path.display());
        }
        BakeOutcome::Cancelled => {
            shared.progress.reset();
            log::info!("Bake cancelled after {} of {} tasks", index, total);
        }
        BakeOutcome::Failed(_) => {}
    }

    lock(&shared.context).take();
    drop(geometry);
    drop(engine);

    shared.finish();
    events.push(outcome.to_event());
    outcome
}

/// Bakes one task and returns its serialized probe batch.
fn run_task(
    backend: &dyn AcousticBackend,
    context: RawHandle,
    task: &BakeTask,
    shared: &BakeShared,
    events: &EventQueue<BakeEvent>,
) -> BackendResult<Vec<u8>> {
    let mut on_progress = |fraction: f32| {
        shared.progress.report(fraction);
        events.push(BakeEvent::Progress {
            overall: shared.progress.value(),
        });
    };

    match task.params() {
        BakeTaskParams::Reflections(params) => {
            backend.bake_reflections(context, params, &mut on_progress)?
        }
        BakeTaskParams::Pathing(params) => backend.bake_pathing(context, params, &mut on_progress)?,
    }

    if shared.cancel_requested.load(Ordering::Acquire) {
        return Err(BackendError::Cancelled("bake"));
    }
    backend.save_probe_batch(context, task.batch().raw())
}

fn persist(results: &BakeResults, path: &Path) -> BakeOutcome {
    match results.save(path) {
        Ok(()) => BakeOutcome::Completed {
            path: path.to_path_buf(),
            layers: results.len(),
        },
        Err(e) => {
            log::error!("Failed to save bake results to {}: {}", path.display(), e);
            BakeOutcome::Failed(format!("failed to save bake results: {}", e))
        }
    }
}

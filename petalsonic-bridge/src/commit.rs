//! Scene commits, deferred to one safe point per physics frame.

use crate::config::CommitMode;
use crate::engine::EngineSlot;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Coalesces scene commit requests.
///
/// Geometry changes request a commit. While authoring the scene is committed
/// right away. At runtime the request only raises a flag, and
/// [`process_pending`](Self::process_pending), called once per physics frame,
/// commits the scene and then the simulator under the simulation lock. Any
/// number of requests between two frames produce one commit pair.
#[derive(Debug)]
pub struct SceneCommitCoordinator {
    mode: CommitMode,
    pending: AtomicBool,
    commits: AtomicUsize,
    engine: Arc<EngineSlot>,
}

impl SceneCommitCoordinator {
    pub fn new(mode: CommitMode, engine: Arc<EngineSlot>) -> Self {
        Self {
            mode,
            pending: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            engine,
        }
    }

    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    pub fn request_commit(&self) {
        match self.mode {
            CommitMode::Authoring => {
                let _guard = self.engine.lock_simulation();
                if let Some(engine) = self.engine.current() {
                    engine.backend().commit_scene(engine.scene().raw());
                    self.commits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Committed scene");
                }
            }
            CommitMode::Runtime => {
                self.pending.store(true, Ordering::Release);
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Flushes a pending request. Returns whether a commit happened.
    ///
    /// The flag stays raised while no engine is installed, so the commit is
    /// retried on a later frame.
    pub fn process_pending(&self) -> bool {
        if !self.is_pending() {
            return false;
        }

        let _guard = self.engine.lock_simulation();
        let Some(engine) = self.engine.current() else {
            return false;
        };
        if !self.pending.swap(false, Ordering::AcqRel) {
            return false;
        }

        engine.commit_all();
        self.commits.fetch_add(1, Ordering::Relaxed);
        log::debug!("Committed scene and simulator");
        true
    }

    /// Number of commits performed so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Overall bake progress, readable from any thread.
///
/// With `total` tasks, `completed` of them done and the running one at
/// `fraction`, progress is `(completed + fraction) / total`. Within a task the
/// fraction never goes backwards.
#[derive(Debug, Default)]
pub struct BakeProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    fraction: AtomicU32,
}

impl BakeProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, total: usize) {
        self.total.store(total, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.fraction.store(0f32.to_bits(), Ordering::Release);
    }

    /// Records the running task's own progress. Single writer.
    pub(crate) fn report(&self, fraction: f32) {
        let current = f32::from_bits(self.fraction.load(Ordering::Acquire));
        let next = fraction.clamp(0.0, 1.0);
        if next > current {
            self.fraction.store(next.to_bits(), Ordering::Release);
        }
    }

    pub(crate) fn complete_task(&self) {
        self.fraction.store(0f32.to_bits(), Ordering::Release);
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset(&self) {
        self.start(0);
    }

    /// Progress in `[0, 1]`; `0` when nothing is queued.
    pub fn value(&self) -> f32 {
        let total = self.total.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::Acquire);
        let fraction = f32::from_bits(self.fraction.load(Ordering::Acquire));
        ((completed as f32 + fraction) / total as f32).min(1.0)
    }

    pub fn completed_tasks(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total_tasks(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }
}

use crate::error::{PetalSonicError, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select, tick};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A named thread running one closure per tick until told to stop.
///
/// The stop signal is checked before every cycle and while waiting for the
/// next tick. A cycle in progress always runs to completion.
pub struct Worker {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &str, interval: Duration, mut cycle: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    if stop_requested(&shutdown_rx) {
                        break;
                    }
                    cycle();
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {}
                    }
                }
            })
            .map_err(|e| PetalSonicError::Engine(format!("Failed to spawn {}: {}", name, e)))?;

        log::info!("Started {} worker", name);
        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        let _ = shutdown.send(());
        drop(shutdown);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
        log::info!("Stopped {} worker", self.name);
    }
}

fn stop_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_worker_runs_until_stopped() {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cycles);
        let mut worker = Worker::spawn("test-worker", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        while cycles.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        worker.stop();
        let after_stop = cycles.load(Ordering::SeqCst);

        thread::sleep(Duration::from_millis(10));
        assert_eq!(cycles.load(Ordering::SeqCst), after_stop);
        assert!(!worker.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut worker = Worker::spawn("idle-worker", Duration::from_millis(5), || {}).unwrap();
        worker.stop();
        worker.stop();
    }
}

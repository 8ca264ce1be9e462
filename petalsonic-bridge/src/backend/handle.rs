use super::{AcousticBackend, BackendError, BackendResult, HandleKind, RawHandle};
use std::fmt;
use std::sync::Arc;

/// Exclusive owner of one native handle.
///
/// The handle is released through its backend when the owner is dropped or
/// [`release`](Self::release)d, whichever comes first; after that the owner is
/// gone, so a released handle cannot be used again. An owner may pin a parent
/// (the simulator a source lives in, the scene a mesh lives in) so the parent
/// is always released after its children.
pub struct OwnedHandle {
    kind: HandleKind,
    raw: RawHandle,
    released: bool,
    backend: Arc<dyn AcousticBackend>,
    parent: Option<Arc<OwnedHandle>>,
}

impl OwnedHandle {
    /// Takes ownership of the result of a creation call.
    ///
    /// # Errors
    ///
    /// Returns the backend's error unchanged, or [`BackendError::NullHandle`]
    /// when the call succeeded but produced a null handle.
    pub fn adopt(
        backend: &Arc<dyn AcousticBackend>,
        kind: HandleKind,
        operation: &'static str,
        created: BackendResult<RawHandle>,
    ) -> BackendResult<Self> {
        let raw = created?;
        if raw.is_null() {
            return Err(BackendError::NullHandle { kind, operation });
        }

        log::trace!("{} created {} handle {}", backend.name(), kind, raw);
        Ok(Self {
            kind,
            raw,
            released: false,
            backend: Arc::clone(backend),
            parent: None,
        })
    }

    /// Keeps `parent` alive for as long as this handle exists.
    pub fn with_parent(mut self, parent: Arc<OwnedHandle>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn backend(&self) -> &Arc<dyn AcousticBackend> {
        &self.backend
    }

    /// Releases the handle now instead of at scope end.
    pub fn release(mut self) {
        self.release_in_place();
    }

    fn release_in_place(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.backend.release(self.kind, self.raw) {
            Ok(()) => log::trace!("Released {} handle {}", self.kind, self.raw),
            Err(e) => log::error!("Failed to release {} handle {}: {}", self.kind, self.raw, e),
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.release_in_place();
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContextSettings, InMemoryBackend};

    fn backend() -> (Arc<InMemoryBackend>, Arc<dyn AcousticBackend>) {
        let memory = Arc::new(InMemoryBackend::new());
        let dynamic: Arc<dyn AcousticBackend> = memory.clone();
        (memory, dynamic)
    }

    #[test]
    fn test_null_handle_is_rejected() {
        let (_, backend) = backend();
        let result = OwnedHandle::adopt(
            &backend,
            HandleKind::Scene,
            "create_scene",
            Ok(RawHandle::NULL),
        );
        assert!(matches!(result, Err(BackendError::NullHandle { .. })));
    }

    #[test]
    fn test_drop_releases_exactly_once() {
        let (memory, backend) = backend();
        let created = backend.create_context(&ContextSettings::default());
        let handle = OwnedHandle::adopt(&backend, HandleKind::Context, "create_context", created)
            .expect("context");
        let raw = handle.raw();

        assert!(memory.is_live(raw));
        drop(handle);
        assert!(!memory.is_live(raw));
        assert_eq!(memory.release_count(raw), 1);
    }

    #[test]
    fn test_parent_outlives_child() {
        let (memory, backend) = backend();
        let context = Arc::new(
            OwnedHandle::adopt(
                &backend,
                HandleKind::Context,
                "create_context",
                backend.create_context(&ContextSettings::default()),
            )
            .expect("context"),
        );
        let context_raw = context.raw();
        let batch = OwnedHandle::adopt(
            &backend,
            HandleKind::ProbeBatch,
            "create_probe_batch",
            backend.create_probe_batch(context_raw),
        )
        .expect("batch")
        .with_parent(Arc::clone(&context));
        let batch_raw = batch.raw();

        drop(context);
        assert!(memory.is_live(context_raw));

        batch.release();
        assert!(!memory.is_live(batch_raw));
        assert!(!memory.is_live(context_raw));

        let order = memory.released_handles();
        let batch_pos = order.iter().position(|(_, h)| *h == batch_raw).unwrap();
        let context_pos = order.iter().position(|(_, h)| *h == context_raw).unwrap();
        assert!(batch_pos < context_pos);
    }
}

//! The active source collection shared between the physics thread and the
//! simulation thread.

use crate::lock;
use crate::math::{Transform, Vec3};
use crate::middleware::EventId;
use crate::source::AcousticSource;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Identity of a static source marker placed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MarkerId({})", self.0)
    }
}

/// A fixed emitter position the host declared for baking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSourceMarker {
    pub id: MarkerId,
    pub transform: Transform,
}

/// Everything the collections lock guards, borrowed for one visit.
pub struct RegistryView<'a> {
    pub sources: &'a [AcousticSource],
    pub reverb_listener: Option<&'a AcousticSource>,
    pub markers: &'a [StaticSourceMarker],
}

impl RegistryView<'_> {
    pub fn marker(&self, id: MarkerId) -> Option<&StaticSourceMarker> {
        self.markers.iter().find(|m| m.id == id)
    }
}

#[derive(Default)]
struct RegistryState {
    sources: Vec<AcousticSource>,
    reverb_listener: Option<AcousticSource>,
    markers: Vec<StaticSourceMarker>,
}

/// Insertion-ordered active sources, the reverb listener and the static
/// source markers, all behind one lock.
///
/// Visitors only ever see shared references, so nothing can be removed while
/// a visit is in progress. Removal drops the source while the lock is still
/// held; a visitor never observes a released handle.
#[derive(Default)]
pub struct SharedSourceRegistry {
    state: Mutex<RegistryState>,
    next_marker: AtomicU64,
}

impl SharedSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `source`. Returns `false` (and drops the source) when its
    /// handle is invalid or already registered.
    pub fn add(&self, source: AcousticSource) -> bool {
        let mut state = lock(&self.state);
        if !source.is_valid() {
            log::warn!("Ignoring source with an invalid handle");
            return false;
        }
        if state.sources.iter().any(|s| s.raw() == source.raw()) {
            log::debug!("Source {} is already registered", source.raw());
            return false;
        }
        log::debug!("Registered source {}", source.raw());
        state.sources.push(source);
        true
    }

    /// Removes and destroys the first source following `event`. Returns
    /// `false` when there is none, so a second removal is a no-op.
    pub fn remove(&self, event: EventId) -> bool {
        let mut state = lock(&self.state);
        let Some(index) = state.sources.iter().position(|s| s.event() == Some(event)) else {
            return false;
        };
        let source = state.sources.remove(index);
        drop(source);
        true
    }

    /// Installs the reverb listener source and returns the previous one.
    pub fn set_reverb_listener(&self, source: Option<AcousticSource>) -> Option<AcousticSource> {
        std::mem::replace(&mut lock(&self.state).reverb_listener, source)
    }

    /// Visits every emitter in insertion order with the lock held.
    pub fn for_each(&self, mut visitor: impl FnMut(&AcousticSource)) {
        let state = lock(&self.state);
        state.sources.iter().for_each(&mut visitor);
    }

    /// Runs `visitor` over the whole guarded state with the lock held.
    pub fn visit<R>(&self, visitor: impl FnOnce(&RegistryView<'_>) -> R) -> R {
        let state = lock(&self.state);
        visitor(&RegistryView {
            sources: &state.sources,
            reverb_listener: state.reverb_listener.as_ref(),
            markers: &state.markers,
        })
    }

    /// Runs `f` on the source following `event`, if any.
    pub fn with_event_source<R>(
        &self,
        event: EventId,
        f: impl FnOnce(&AcousticSource) -> R,
    ) -> Option<R> {
        let state = lock(&self.state);
        state
            .sources
            .iter()
            .find(|s| s.event() == Some(event))
            .map(f)
    }

    pub fn with_reverb_listener<R>(&self, f: impl FnOnce(&AcousticSource) -> R) -> Option<R> {
        lock(&self.state).reverb_listener.as_ref().map(f)
    }

    pub fn contains_event(&self, event: EventId) -> bool {
        lock(&self.state)
            .sources
            .iter()
            .any(|s| s.event() == Some(event))
    }

    pub fn len(&self) -> usize {
        lock(&self.state).sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every source, including the reverb listener.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        let count = state.sources.len();
        state.sources.clear();
        state.reverb_listener = None;
        if count > 0 {
            log::debug!("Destroyed {} sources", count);
        }
    }

    pub fn add_static_marker(&self, transform: Transform) -> MarkerId {
        let id = MarkerId(self.next_marker.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.state)
            .markers
            .push(StaticSourceMarker { id, transform });
        log::debug!("Added static source marker {} at {}", id, transform.origin);
        id
    }

    pub fn update_static_marker(&self, id: MarkerId, transform: Transform) -> bool {
        match lock(&self.state).markers.iter_mut().find(|m| m.id == id) {
            Some(marker) => {
                marker.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn remove_static_marker(&self, id: MarkerId) -> bool {
        let mut state = lock(&self.state);
        let before = state.markers.len();
        state.markers.retain(|m| m.id != id);
        state.markers.len() != before
    }

    /// Markers in the order they were added.
    pub fn static_markers(&self) -> Vec<StaticSourceMarker> {
        lock(&self.state).markers.clone()
    }

    pub fn static_marker_positions(&self) -> Vec<Vec3> {
        lock(&self.state)
            .markers
            .iter()
            .map(|m| m.transform.origin)
            .collect()
    }
}

impl fmt::Debug for SharedSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SharedSourceRegistry")
            .field("sources", &state.sources.len())
            .field("reverb_listener", &state.reverb_listener.is_some())
            .field("markers", &state.markers.len())
            .finish()
    }
}

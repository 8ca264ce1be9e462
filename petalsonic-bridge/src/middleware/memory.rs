use super::{
    AudioMiddleware, EffectHandle, EventAttributes, EventId, Guid, MiddlewareError,
    MiddlewareResult, SpatializerParam,
};
use crate::backend::RawHandle;
use crate::lock;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
struct MemoryEvent {
    guid: Guid,
    attributes: EventAttributes,
    spatializer: Option<EffectHandle>,
    released: bool,
}

#[derive(Debug, Default)]
struct MiddlewareState {
    next_id: u64,
    events: HashMap<EventId, MemoryEvent>,
    effects: HashMap<EffectHandle, EventId>,
    int_params: HashMap<(EffectHandle, SpatializerParam), i32>,
    float_params: HashMap<(EffectHandle, SpatializerParam), f32>,
    registered: HashMap<i32, RawHandle>,
    next_source_handle: i32,
    unregistered: Vec<i32>,
    reverb_source: Option<RawHandle>,
    spatializer_lookups: usize,
}

/// A middleware stand-in that keeps events and DSP parameters in memory.
///
/// Events are spawned explicitly; parameter writes are recorded and can be
/// read back. Writes to a released event fail with
/// [`MiddlewareError::InvalidHandle`], like a real middleware would.
#[derive(Debug, Default)]
pub struct InMemoryMiddleware {
    state: Mutex<MiddlewareState>,
}

impl InMemoryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a live event. Events without a spatializer are ignored by the
    /// bridge.
    pub fn spawn_event(
        &self,
        guid: Guid,
        attributes: EventAttributes,
        with_spatializer: bool,
    ) -> EventId {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = EventId(0x1000 + state.next_id);
        let spatializer = with_spatializer.then(|| EffectHandle(0x2000 + state.next_id));
        if let Some(effect) = spatializer {
            state.effects.insert(effect, id);
        }
        state.events.insert(
            id,
            MemoryEvent {
                guid,
                attributes,
                spatializer,
                released: false,
            },
        );
        id
    }

    pub fn move_event(&self, event: EventId, attributes: EventAttributes) {
        if let Some(e) = lock(&self.state).events.get_mut(&event) {
            e.attributes = attributes;
        }
    }

    /// Marks the event released; later calls against it fail.
    pub fn release_event(&self, event: EventId) {
        if let Some(e) = lock(&self.state).events.get_mut(&event) {
            e.released = true;
        }
    }

    pub fn spatializer_of(&self, event: EventId) -> Option<EffectHandle> {
        lock(&self.state)
            .events
            .get(&event)
            .and_then(|e| e.spatializer)
    }

    pub fn int_param(&self, effect: EffectHandle, param: SpatializerParam) -> Option<i32> {
        lock(&self.state).int_params.get(&(effect, param)).copied()
    }

    pub fn float_param(&self, effect: EffectHandle, param: SpatializerParam) -> Option<f32> {
        lock(&self.state).float_params.get(&(effect, param)).copied()
    }

    pub fn registered_sources(&self) -> Vec<RawHandle> {
        lock(&self.state).registered.values().copied().collect()
    }

    pub fn unregistered_handles(&self) -> Vec<i32> {
        lock(&self.state).unregistered.clone()
    }

    pub fn reverb_source(&self) -> Option<RawHandle> {
        lock(&self.state).reverb_source
    }

    /// How many times the bridge scanned an event for its spatializer.
    pub fn spatializer_lookups(&self) -> usize {
        lock(&self.state).spatializer_lookups
    }

    fn live_event<'a>(
        state: &'a MiddlewareState,
        event: EventId,
    ) -> MiddlewareResult<&'a MemoryEvent> {
        match state.events.get(&event) {
            Some(e) if !e.released => Ok(e),
            _ => Err(MiddlewareError::InvalidHandle),
        }
    }

    fn check_effect(state: &MiddlewareState, effect: EffectHandle) -> MiddlewareResult<()> {
        let event = state
            .effects
            .get(&effect)
            .ok_or(MiddlewareError::InvalidHandle)?;
        Self::live_event(state, *event).map(|_| ())
    }
}

impl AudioMiddleware for InMemoryMiddleware {
    fn find_spatializer(&self, event: EventId) -> MiddlewareResult<Option<EffectHandle>> {
        let mut state = lock(&self.state);
        state.spatializer_lookups += 1;
        Self::live_event(&state, event).map(|e| e.spatializer)
    }

    fn event_guid(&self, event: EventId) -> MiddlewareResult<Guid> {
        let state = lock(&self.state);
        Self::live_event(&state, event).map(|e| e.guid)
    }

    fn event_attributes(&self, event: EventId) -> MiddlewareResult<EventAttributes> {
        let state = lock(&self.state);
        Self::live_event(&state, event).map(|e| e.attributes)
    }

    fn register_source(&self, source: RawHandle) -> MiddlewareResult<i32> {
        if source.is_null() {
            return Err(MiddlewareError::InvalidHandle);
        }
        let mut state = lock(&self.state);
        state.next_source_handle += 1;
        let handle = state.next_source_handle;
        state.registered.insert(handle, source);
        Ok(handle)
    }

    fn unregister_source(&self, handle: i32) {
        let mut state = lock(&self.state);
        if state.registered.remove(&handle).is_some() {
            state.unregistered.push(handle);
        }
    }

    fn set_reverb_source(&self, source: RawHandle) -> MiddlewareResult<()> {
        lock(&self.state).reverb_source = Some(source);
        Ok(())
    }

    fn set_effect_int(
        &self,
        effect: EffectHandle,
        param: SpatializerParam,
        value: i32,
    ) -> MiddlewareResult<()> {
        let mut state = lock(&self.state);
        Self::check_effect(&state, effect)?;
        state.int_params.insert((effect, param), value);
        Ok(())
    }

    fn set_effect_float(
        &self,
        effect: EffectHandle,
        param: SpatializerParam,
        value: f32,
    ) -> MiddlewareResult<()> {
        let mut state = lock(&self.state);
        Self::check_effect(&state, effect)?;
        state.float_params.insert((effect, param), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_event_rejects_writes() {
        let middleware = InMemoryMiddleware::new();
        let event = middleware.spawn_event(Guid::default(), EventAttributes::default(), true);
        let effect = middleware.spatializer_of(event).unwrap();

        assert!(
            middleware
                .set_effect_float(effect, SpatializerParam::Occlusion, 0.5)
                .is_ok()
        );
        middleware.release_event(event);
        assert_eq!(
            middleware.set_effect_float(effect, SpatializerParam::Occlusion, 0.2),
            Err(MiddlewareError::InvalidHandle)
        );
        assert_eq!(
            middleware.float_param(effect, SpatializerParam::Occlusion),
            Some(0.5)
        );
    }

    #[test]
    fn test_register_and_unregister_source() {
        let middleware = InMemoryMiddleware::new();
        let handle = middleware.register_source(RawHandle(7)).unwrap();
        assert_eq!(middleware.registered_sources(), vec![RawHandle(7)]);

        middleware.unregister_source(handle);
        middleware.unregister_source(handle);
        assert!(middleware.registered_sources().is_empty());
        assert_eq!(middleware.unregistered_handles(), vec![handle]);
    }
}

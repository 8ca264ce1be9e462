//! Commands into the bridge and events out of it.

use crate::bake::task::BakeTaskKind;
use crate::middleware::EventId;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::path::PathBuf;

/// Events kept for a host that is not draining its queue.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Lifecycle callbacks forwarded by the middleware adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    EventCreated(EventId),
    EventRemoved(EventId),
}

impl BridgeCommand {
    pub fn event(&self) -> EventId {
        match self {
            Self::EventCreated(event) | Self::EventRemoved(event) => *event,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    SourceCreated {
        event: EventId,
        guid: String,
        middleware_handle: Option<i32>,
    },
    SourceRemoved {
        event: EventId,
    },
    /// The event carries no spatializer effect, so it gets no source.
    EventIgnored {
        event: EventId,
    },
    SourceError {
        event: EventId,
        error: String,
    },
    BakedDataLoaded {
        layers: usize,
    },
    SceneCommitted,
    SimulationStarted,
    SimulationStopped,
    EngineError {
        error: String,
    },
}

impl BridgeEvent {
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            Self::SourceCreated { event, .. }
            | Self::SourceRemoved { event }
            | Self::EventIgnored { event }
            | Self::SourceError { event, .. } => Some(*event),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::SourceError { .. } | Self::EngineError { .. })
    }

    pub fn is_source_event(&self) -> bool {
        matches!(
            self,
            Self::SourceCreated { .. } | Self::SourceRemoved { .. } | Self::EventIgnored { .. }
        )
    }
}

/// Progress of a bake, in the order the worker produces it.
#[derive(Debug, Clone, PartialEq)]
pub enum BakeEvent {
    Started {
        tasks: usize,
    },
    TaskStarted {
        index: usize,
        kind: BakeTaskKind,
    },
    /// Overall progress in `[0, 1]`.
    Progress {
        overall: f32,
    },
    TaskFinished {
        index: usize,
        overall: f32,
    },
    Completed {
        path: PathBuf,
        layers: usize,
    },
    Cancelled,
    Failed {
        error: String,
    },
}

impl BakeEvent {
    /// Whether no further events follow for this bake.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled | Self::Failed { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn overall(&self) -> Option<f32> {
        match self {
            Self::Progress { overall } | Self::TaskFinished { overall, .. } => Some(*overall),
            Self::Completed { .. } => Some(1.0),
            _ => None,
        }
    }
}

/// A bounded event channel that drops its oldest entry when full.
///
/// The owner keeps a receiver so the channel never disconnects; an undrained
/// queue therefore stays at `capacity` and always holds the newest events.
#[derive(Debug)]
pub(crate) struct EventQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> EventQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub(crate) fn push(&self, mut event: T) {
        loop {
            match self.sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.receiver.try_recv().is_ok() {
                        log::trace!("Event queue full, dropped the oldest event");
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<T> {
        self.receiver.clone()
    }
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_keeps_newest_events() {
        let queue = EventQueue::new(4);
        for i in 0..10 {
            queue.push(i);
        }

        let receiver = queue.subscribe();
        assert_eq!(receiver.len(), 4);
        assert_eq!(receiver.try_iter().collect::<Vec<_>>(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_zero_capacity_still_buffers_one_event() {
        let queue = EventQueue::new(0);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.subscribe().try_recv(), Ok("b"));
    }

    #[test]
    fn test_event_helpers() {
        let created = BridgeEvent::SourceCreated {
            event: EventId(3),
            guid: String::new(),
            middleware_handle: Some(1),
        };
        assert_eq!(created.event_id(), Some(EventId(3)));
        assert!(created.is_source_event());
        assert!(!created.is_error());

        let failed = BridgeEvent::EngineError {
            error: "boom".into(),
        };
        assert_eq!(failed.event_id(), None);
        assert!(failed.is_error());
    }

    #[test]
    fn test_terminal_bake_events() {
        assert!(BakeEvent::Cancelled.is_terminal());
        assert!(
            BakeEvent::Failed {
                error: "disk full".into()
            }
            .is_terminal()
        );
        assert!(!BakeEvent::Progress { overall: 0.5 }.is_terminal());
    }
}

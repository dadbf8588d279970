//! Event fan-out from the classifier to registered consumers.
//!
//! Delivery is synchronous in the edge-callback context; sinks must do
//! bounded, non-blocking work (log, count, enqueue) and never block.

use std::sync::{Arc, Mutex};

use station_common::events::SignalEvent;

/// Consumer of classified signal events.
pub trait EventSink: Send {
    /// Receive one event. Must not block.
    fn on_event(&mut self, event: &SignalEvent);
}

/// Fan-out over registered sinks, in registration order.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink. Sinks cannot be removed; the dispatcher is torn
    /// down as a whole with its classifier.
    pub fn register(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver one event to every sink.
    pub fn dispatch(&mut self, event: &SignalEvent) {
        for sink in &mut self.sinks {
            sink.on_event(event);
        }
    }
}

impl EventSink for EventDispatcher {
    fn on_event(&mut self, event: &SignalEvent) {
        self.dispatch(event);
    }
}

/// Sink that appends every event to a shared vector.
///
/// Used by tests and bounded captures; not meant for unbounded
/// production use.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<SignalEvent>>>,
}

impl CollectingSink {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    #[must_use]
    pub fn events(&self) -> Vec<SignalEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of events collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything collected so far.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for CollectingSink {
    fn on_event(&mut self, event: &SignalEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(*event);
        }
    }
}

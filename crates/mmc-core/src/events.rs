//! State-change notifications.
//!
//! Every observable change in the core is described by one [`CoreEvent`]
//! variant and delivered to all registered [`CoreObserver`]s through the
//! [`EventDispatcher`].
//!
//! # Delivery Guarantees
//!
//! - Synchronous: observers run on the thread that caused the change, before
//!   the triggering operation returns.
//! - Ordered: observers are called in registration order.
//! - Re-entrant: the observer list is snapshotted and its lock released
//!   before any observer runs, so observers may call back into the core or
//!   (un)register observers.
//!
//! ```rust
//! use mmc_core::events::{CoreEvent, EventDispatcher};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let dispatcher = EventDispatcher::new();
//! let sink = seen.clone();
//! dispatcher.register(Arc::new(move |event: &CoreEvent| {
//!     sink.lock().unwrap().push(event.name());
//! }));
//! dispatcher.dispatch(&CoreEvent::SystemConfigurationLoaded);
//! assert_eq!(*seen.lock().unwrap(), vec!["SystemConfigurationLoaded"]);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A state change in the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoreEvent {
    /// Several properties changed at once; observers should re-read state.
    PropertiesChanged,
    /// One property changed.
    PropertyChanged {
        /// Device label (`Core` for core properties).
        device: String,
        /// Property name.
        property: String,
        /// New value.
        value: String,
    },
    /// The current preset of a configuration group may have changed.
    ConfigGroupChanged {
        /// Group name.
        group: String,
        /// Matching preset, empty when none matches.
        preset: String,
    },
    /// The channel group was reassigned.
    ChannelGroupChanged {
        /// New channel group, empty when cleared.
        group: String,
    },
    /// A system configuration file finished loading.
    SystemConfigurationLoaded,
    /// Effective pixel size changed.
    PixelSizeChanged {
        /// New size in micrometers.
        size_um: f64,
    },
    /// Pixel-size affine transform changed.
    PixelSizeAffineChanged {
        /// Affine coefficients.
        affine: [f64; 6],
    },
    /// Camera exposure changed.
    ExposureChanged {
        /// Camera label.
        device: String,
        /// New exposure in milliseconds.
        exposure_ms: f64,
    },
    /// A single-axis stage moved.
    StagePositionChanged {
        /// Stage label.
        device: String,
        /// New position in micrometers.
        position_um: f64,
    },
    /// An XY stage moved.
    XYStagePositionChanged {
        /// Stage label.
        device: String,
        /// New X in micrometers.
        x_um: f64,
        /// New Y in micrometers.
        y_um: f64,
    },
    /// A sequence acquisition started.
    SequenceAcquisitionStarted {
        /// Camera label.
        camera: String,
    },
    /// A sequence acquisition ended.
    SequenceAcquisitionStopped {
        /// Camera label.
        camera: String,
    },
}

impl CoreEvent {
    /// Variant name, stable for logging and tests.
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::PropertiesChanged => "PropertiesChanged",
            CoreEvent::PropertyChanged { .. } => "PropertyChanged",
            CoreEvent::ConfigGroupChanged { .. } => "ConfigGroupChanged",
            CoreEvent::ChannelGroupChanged { .. } => "ChannelGroupChanged",
            CoreEvent::SystemConfigurationLoaded => "SystemConfigurationLoaded",
            CoreEvent::PixelSizeChanged { .. } => "PixelSizeChanged",
            CoreEvent::PixelSizeAffineChanged { .. } => "PixelSizeAffineChanged",
            CoreEvent::ExposureChanged { .. } => "ExposureChanged",
            CoreEvent::StagePositionChanged { .. } => "StagePositionChanged",
            CoreEvent::XYStagePositionChanged { .. } => "XYStagePositionChanged",
            CoreEvent::SequenceAcquisitionStarted { .. } => "SequenceAcquisitionStarted",
            CoreEvent::SequenceAcquisitionStopped { .. } => "SequenceAcquisitionStopped",
        }
    }
}

/// Receiver of core events.
///
/// Implementations must be thread-safe: acquisition events arrive on the
/// producer thread.
pub trait CoreObserver: Send + Sync {
    /// Called once per event.
    fn on_event(&self, event: &CoreEvent);
}

impl<F> CoreObserver for F
where
    F: Fn(&CoreEvent) + Send + Sync,
{
    fn on_event(&self, event: &CoreEvent) {
        self(event)
    }
}

/// Handle returned by [`EventDispatcher::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

type ObserverList = Vec<(ObserverHandle, Arc<dyn CoreObserver>)>;

/// Ordered fan-out of events to observers.
#[derive(Default)]
pub struct EventDispatcher {
    observers: RwLock<Arc<ObserverList>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Creates a dispatcher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer.
    pub fn register(&self, observer: Arc<dyn CoreObserver>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.observers.write();
        let mut list: ObserverList = guard.as_ref().clone();
        list.push((handle, observer));
        *guard = Arc::new(list);
        handle
    }

    /// Removes an observer; returns false if the handle is unknown.
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        let mut guard = self.observers.write();
        let before = guard.len();
        let list: ObserverList = guard
            .iter()
            .filter(|(h, _)| *h != handle)
            .cloned()
            .collect();
        let removed = list.len() != before;
        *guard = Arc::new(list);
        removed
    }

    /// Removes every observer.
    pub fn clear(&self) {
        *self.observers.write() = Arc::new(Vec::new());
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Delivers `event` to every observer registered at call time.
    pub fn dispatch(&self, event: &CoreEvent) {
        let snapshot = self.observers.read().clone();
        tracing::trace!(event = event.name(), observers = snapshot.len(), "dispatch");
        for (_, observer) in snapshot.iter() {
            observer.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_observers_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new();
        for id in 0..3 {
            let log = log.clone();
            dispatcher.register(Arc::new(move |_: &CoreEvent| log.lock().push(id)));
        }
        dispatcher.dispatch(&CoreEvent::PropertiesChanged);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = EventDispatcher::new();
        let handle = dispatcher.register(Arc::new(|_: &CoreEvent| {}));
        assert!(dispatcher.unregister(handle));
        assert!(!dispatcher.unregister(handle));
        assert_eq!(dispatcher.observer_count(), 0);
    }

    #[test]
    fn test_observer_can_reenter_dispatcher() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let weak = Arc::downgrade(&dispatcher);
        let count = Arc::new(Mutex::new(0usize));
        let inner = count.clone();
        dispatcher.register(Arc::new(move |_: &CoreEvent| {
            *inner.lock() += 1;
            if let Some(d) = weak.upgrade() {
                // Registering from inside a callback must not deadlock
                d.register(Arc::new(|_: &CoreEvent| {}));
            }
        }));
        dispatcher.dispatch(&CoreEvent::PropertiesChanged);
        assert_eq!(*count.lock(), 1);
        assert_eq!(dispatcher.observer_count(), 2);
    }

    #[test]
    fn test_event_names() {
        let event = CoreEvent::ExposureChanged {
            device: "Camera".into(),
            exposure_ms: 10.0,
        };
        assert_eq!(event.name(), "ExposureChanged");
    }
}

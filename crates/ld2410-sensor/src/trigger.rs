//! Presence trigger on the module's OUT pin
//!
//! Pin edges are forwarded through an mpsc channel to a tokio task that
//! runs the user handler, so the edge callback itself never blocks.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Queued edges before new ones are dropped
const EDGE_QUEUE_DEPTH: usize = 16;

/// Called by the pin on every edge with the new level
pub type EdgeCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Invoked from the dispatch task for every presence change
pub type TriggerHandler = Box<dyn FnMut(PresenceEvent) + Send>;

/// GPIO line wired to the module's OUT pin
pub trait PresencePin: Send + Sync + 'static {
    /// Current level, `true` while a target is present
    fn is_active(&self) -> bool;

    /// Install or clear the edge callback
    fn set_edge_callback(&self, callback: Option<EdgeCallback>);
}

/// Supported trigger sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceEvent {
    pub present: bool,
}

/// Running dispatch for one installed handler
pub(crate) struct TriggerDispatch {
    pin: Arc<dyn PresencePin>,
    task: JoinHandle<()>,
}

impl TriggerDispatch {
    /// Hook `handler` to edges of `pin`
    pub(crate) fn start(pin: Arc<dyn PresencePin>, mut handler: TriggerHandler) -> Self {
        let (tx, mut rx) = mpsc::channel::<PresenceEvent>(EDGE_QUEUE_DEPTH);

        pin.set_edge_callback(Some(Box::new(move |present| {
            if tx.try_send(PresenceEvent { present }).is_err() {
                tracing::warn!("Presence event queue full, dropping edge");
            }
        })));

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::debug!("Presence changed: {}", event.present);
                handler(event);
            }
        });

        Self { pin, task }
    }
}

impl Drop for TriggerDispatch {
    fn drop(&mut self) {
        self.pin.set_edge_callback(None);
        self.task.abort();
    }
}

#[cfg(test)]
pub(crate) mod test_pin {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Pin driven by hand from tests
    #[derive(Default)]
    pub(crate) struct ManualPin {
        level: AtomicBool,
        callback: Mutex<Option<EdgeCallback>>,
    }

    impl ManualPin {
        pub(crate) fn set_level(&self, present: bool) {
            self.level.store(present, Ordering::SeqCst);
            if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                cb(present);
            }
        }

        pub(crate) fn has_callback(&self) -> bool {
            self.callback.lock().unwrap().is_some()
        }
    }

    impl PresencePin for ManualPin {
        fn is_active(&self) -> bool {
            self.level.load(Ordering::SeqCst)
        }

        fn set_edge_callback(&self, callback: Option<EdgeCallback>) {
            *self.callback.lock().unwrap() = callback;
        }
    }
}

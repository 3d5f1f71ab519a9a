//! Change notifications from the lifecycle to presentation layers.
//!
//! The orchestrator calls [`ChangeNotifier::notify`] after every live feature
//! change. [`DispatchNotifier`] turns that into a message on a channel; a
//! dispatcher task delivers it to the registered observers, which are expected
//! to recompute the component's badges from [`FeatureState`](crate::state::FeatureState).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::models::ComponentKey;

/// Capacity of the broadcast channel for async subscribers.
const EVENT_CAPACITY: usize = 256;

/// Failure inside an observer. Logged, never propagated to the lifecycle.
#[derive(Debug, Error)]
#[error("observer {observer} failed: {message}")]
pub struct ObserverError {
    pub observer: String,
    pub message: String,
}

impl ObserverError {
    pub fn new(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

/// Something that wants to know when a component's presentation is stale.
pub trait ChangeObserver: Send + Sync {
    fn name(&self) -> &str;

    fn component_changed(&self, component: &ComponentKey) -> Result<(), ObserverError>;
}

/// Fire-and-forget signal that a component must be redrawn.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, component: &ComponentKey);
}

/// Observer backed by a closure.
pub struct FnObserver<F> {
    name: String,
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&ComponentKey) -> Result<(), ObserverError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ChangeObserver for FnObserver<F>
where
    F: Fn(&ComponentKey) -> Result<(), ObserverError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn component_changed(&self, component: &ComponentKey) -> Result<(), ObserverError> {
        (self.f)(component)
    }
}

/// Channel-backed notifier with a dispatcher task.
#[derive(Clone)]
pub struct DispatchNotifier {
    tx: mpsc::UnboundedSender<ComponentKey>,
    events: broadcast::Sender<ComponentKey>,
    observers: Arc<RwLock<Vec<Arc<dyn ChangeObserver>>>>,
}

impl DispatchNotifier {
    /// Create the notifier and spawn its dispatcher on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let observers: Arc<RwLock<Vec<Arc<dyn ChangeObserver>>>> = Arc::default();
        tokio::spawn(dispatch(rx, events.clone(), observers.clone()));
        Self {
            tx,
            events,
            observers,
        }
    }

    pub fn register(&self, observer: Arc<dyn ChangeObserver>) {
        tracing::debug!("Registered change observer {}", observer.name());
        self.observers.write().push(observer);
    }

    /// Receive every notified component after observers have seen it.
    pub fn subscribe(&self) -> broadcast::Receiver<ComponentKey> {
        self.events.subscribe()
    }
}

impl ChangeNotifier for DispatchNotifier {
    fn notify(&self, component: &ComponentKey) {
        if self.tx.send(component.clone()).is_err() {
            tracing::warn!("Change dispatcher is gone, dropping update for {}", component);
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<ComponentKey>,
    events: broadcast::Sender<ComponentKey>,
    observers: Arc<RwLock<Vec<Arc<dyn ChangeObserver>>>>,
) {
    while let Some(component) = rx.recv().await {
        let current = observers.read().clone();
        for observer in current {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.component_changed(&component)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("{}", e),
                Err(_) => tracing::error!(
                    "Observer {} panicked while handling {}",
                    observer.name(),
                    component
                ),
            }
        }
        // No subscribers is fine.
        let _ = events.send(component);
    }
    tracing::debug!("Change dispatcher stopped");
}

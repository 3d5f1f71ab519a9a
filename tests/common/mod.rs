#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use component_lifecycle::models::*;
use component_lifecycle::notify::ChangeNotifier;
use component_lifecycle::process::{
    LifecycleCallback, LifecycleCallbacks, ProcessError, ProcessFacade,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Probe(ComponentFeature),
    Start(ComponentFeature),
    Stop(ComponentFeature),
}

struct Launched {
    feature: ComponentFeature,
    alive: bool,
    on_started: Option<LifecycleCallback>,
    on_terminated: Option<LifecycleCallback>,
}

type Running = HashSet<(ComponentKey, ComponentFeature)>;

/// Scriptable facade: reports what tests say is running and hands the
/// lifecycle callbacks back to the test.
#[derive(Clone, Default)]
pub struct FakeFacade {
    running: Arc<Mutex<Running>>,
    launched: Arc<Mutex<HashMap<(ComponentKey, BaseFeature), Launched>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    probes: Arc<AtomicUsize>,
    ready_on_start: Arc<AtomicBool>,
    running_once_ready: Arc<AtomicBool>,
    refuse_double_starts: Arc<AtomicBool>,
    probe_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    probe_error: Arc<Mutex<Option<String>>>,
    start_error: Arc<Mutex<Option<String>>>,
    stop_timeout: Arc<Mutex<Option<Duration>>>,
}

impl FakeFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, key: &ComponentKey, feature: ComponentFeature) {
        mark_running(&mut self.running.lock(), key, feature);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Fire `on_started` right inside `start`.
    pub fn ready_on_start(&self) {
        self.ready_on_start.store(true, Ordering::SeqCst);
    }

    /// Probe a launched session as running only after it reported ready,
    /// like odo does.
    pub fn running_once_ready(&self) {
        self.running_once_ready.store(true, Ordering::SeqCst);
    }

    /// Fail `start` while a session on the same base is still alive.
    pub fn refuse_double_starts(&self) {
        self.refuse_double_starts.store(true, Ordering::SeqCst);
    }

    pub fn is_live(&self, key: &ComponentKey, feature: ComponentFeature) -> bool {
        self.running.lock().contains(&(key.clone(), feature))
    }

    pub fn starts(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Start(_)))
            .count()
    }

    /// Make probes wait until the returned semaphore gets permits.
    pub fn hold_probes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.probe_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn fail_probes(&self, reason: &str) {
        *self.probe_error.lock() = Some(reason.to_string());
    }

    pub fn fail_starts(&self, reason: &str) {
        *self.start_error.lock() = Some(reason.to_string());
    }

    pub fn time_out_stops(&self, after: Duration) {
        *self.stop_timeout.lock() = Some(after);
    }

    /// Report readiness of the session on `base`. Returns false if there was
    /// nothing left to fire.
    pub fn fire_started(&self, key: &ComponentKey, base: BaseFeature) -> bool {
        let fired = self
            .launched
            .lock()
            .get_mut(&(key.clone(), base))
            .and_then(|launched| {
                let callback = launched.on_started.take()?;
                Some((callback, launched.feature, launched.alive))
            });
        match fired {
            Some((callback, feature, alive)) => {
                if alive && self.running_once_ready.load(Ordering::SeqCst) {
                    mark_running(&mut self.running.lock(), key, feature);
                }
                callback();
                true
            }
            None => false,
        }
    }

    /// Simulate the session on `base` exiting on its own.
    pub fn terminate(&self, key: &ComponentKey, base: BaseFeature) -> bool {
        clear_running(&mut self.running.lock(), key, base);
        self.fire_terminated(key, base)
    }

    fn fire_terminated(&self, key: &ComponentKey, base: BaseFeature) -> bool {
        let callback = self
            .launched
            .lock()
            .get_mut(&(key.clone(), base))
            .and_then(|launched| {
                launched.alive = false;
                launched.on_terminated.take()
            });
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

fn mark_running(running: &mut Running, key: &ComponentKey, feature: ComponentFeature) {
    running.insert((key.clone(), feature));
    running.insert((key.clone(), ComponentFeature::Base(feature.base())));
}

fn clear_running(running: &mut Running, key: &ComponentKey, base: BaseFeature) {
    running.remove(&(key.clone(), ComponentFeature::Base(base)));
    running.remove(&(key.clone(), ComponentFeature::Debug(base)));
}

#[async_trait]
impl ProcessFacade for FakeFacade {
    async fn is_running(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<bool, ProcessError> {
        self.calls.lock().push(Call::Probe(feature));
        self.probes.fetch_add(1, Ordering::SeqCst);

        let gate = self.probe_gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("probe gate closed").forget();
        }

        let error = self.probe_error.lock().clone();
        if let Some(reason) = error {
            return Err(ProcessError::tool("odo describe component", reason));
        }
        Ok(self.running.lock().contains(&(component.clone(), feature)))
    }

    async fn start(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
        callbacks: LifecycleCallbacks,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push(Call::Start(feature));

        let error = self.start_error.lock().clone();
        if let Some(reason) = error {
            return Err(ProcessError::tool("odo dev", reason));
        }

        let session = (component.clone(), feature.base());
        if self.refuse_double_starts.load(Ordering::SeqCst)
            && self
                .launched
                .lock()
                .get(&session)
                .is_some_and(|launched| launched.alive)
        {
            return Err(ProcessError::tool("odo dev", "a dev session is already running"));
        }

        if !self.running_once_ready.load(Ordering::SeqCst) {
            mark_running(&mut self.running.lock(), component, feature);
        }
        let LifecycleCallbacks {
            on_started,
            on_terminated,
        } = callbacks;
        self.launched.lock().insert(
            session,
            Launched {
                feature,
                alive: true,
                on_started: Some(on_started),
                on_terminated: Some(on_terminated),
            },
        );

        if self.ready_on_start.load(Ordering::SeqCst) {
            self.fire_started(component, feature.base());
        }
        Ok(())
    }

    async fn stop(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<(), ProcessError> {
        self.calls.lock().push(Call::Stop(feature));

        let timeout = *self.stop_timeout.lock();
        if let Some(timeout) = timeout {
            return Err(ProcessError::StopTimeout {
                component: component.to_string(),
                timeout,
            });
        }

        // A stopped process reports its exit like any other.
        clear_running(&mut self.running.lock(), component, feature.base());
        self.fire_terminated(component, feature.base());
        Ok(())
    }
}

/// Records every notification.
#[derive(Default)]
pub struct CountingNotifier {
    notified: Mutex<Vec<ComponentKey>>,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.notified.lock().len()
    }

    pub fn notified(&self) -> Vec<ComponentKey> {
        self.notified.lock().clone()
    }
}

impl ChangeNotifier for CountingNotifier {
    fn notify(&self, component: &ComponentKey) {
        self.notified.lock().push(component.clone());
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let spawned callback tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn component(namespace: &str, name: &str, modes: &[FeatureMode]) -> Component {
    Component::new(
        ComponentKey::new(namespace, name, format!("/work/{}", name)),
        ComponentInfo {
            component_type: Some("nodejs".to_string()),
            supported_features: modes.to_vec(),
        },
    )
}

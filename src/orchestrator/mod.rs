//! The feature toggle state machine.
//!
//! [`FeatureLifecycleOrchestrator::toggle`] probes the tool, then either stops
//! a running feature or starts a stopped one. Starting only launches the
//! process; the feature becomes live when the facade reports readiness, and
//! stops being live when the process exits, whenever that happens.
//!
//! Every (component, feature) pair has its own gate. A toggle holds the gate
//! for its whole run and is rejected if the gate is taken. Start/terminate
//! callbacks take the same gate before touching [`FeatureState`], and carry
//! the generation of the start that produced them so a late callback from a
//! superseded start is ignored. Different pairs never share a gate.

mod phase;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub use phase::TransitionPhase;
use phase::PairSlot;

use crate::models::{Component, ComponentFeature, ComponentInfo, ComponentKey};
use crate::notify::ChangeNotifier;
use crate::process::{LifecycleCallbacks, ProcessError, ProcessFacade};
use crate::state::FeatureState;
use crate::telemetry::{TelemetrySink, TracingTelemetry, TransitionEvent};

/// Errors ending a single toggle. None of them are retried.
#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("{feature} is not supported by component {component}")]
    Unsupported {
        component: String,
        feature: ComponentFeature,
    },

    #[error("{feature} on {component} is already changing, try again when it settles")]
    TransitionInFlight {
        component: String,
        feature: ComponentFeature,
    },

    #[error("{feature} on {component} is still active, stop it first")]
    StillActive {
        component: String,
        feature: ComponentFeature,
    },

    #[error("cancelled before {feature} on {component} was changed")]
    Cancelled {
        component: String,
        feature: ComponentFeature,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl ToggleError {
    /// The true state is unknown rather than unchanged.
    pub fn is_warning(&self) -> bool {
        match self {
            Self::Process(e) => e.is_warning(),
            _ => false,
        }
    }

    /// Text shown to the user.
    pub fn user_message(&self) -> String {
        if self.is_warning() {
            format!("Warning: {}", self)
        } else {
            format!("Error: {}", self)
        }
    }
}

/// What a successful toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// The process was launched; the feature goes live once it is ready.
    Starting { launched: ComponentFeature },
    Stopped,
}

/// How a stopped feature is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPolicy {
    /// Start base features in debug mode so a debugger can attach later.
    pub debug_by_default: bool,
}

impl Default for StartPolicy {
    fn default() -> Self {
        Self {
            debug_by_default: true,
        }
    }
}

impl StartPolicy {
    /// The feature actually launched when `requested` is toggled on.
    /// Components without debug support get what was asked for.
    pub fn launched(&self, requested: ComponentFeature, info: &ComponentInfo) -> ComponentFeature {
        if self.debug_by_default && info.supports(requested.as_debug()) {
            requested.as_debug()
        } else {
            requested
        }
    }
}

struct Pair {
    gate: tokio::sync::Mutex<()>,
    slot: parking_lot::Mutex<PairSlot>,
}

impl Pair {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            slot: parking_lot::Mutex::new(PairSlot::default()),
        }
    }

    fn set_phase(&self, phase: TransitionPhase) {
        self.slot.lock().phase = phase;
    }
}

type PairKey = (ComponentKey, ComponentFeature);

/// Starts and stops component features and keeps [`FeatureState`] in line with
/// what the external tool reports.
#[derive(Clone)]
pub struct FeatureLifecycleOrchestrator {
    facade: Arc<dyn ProcessFacade>,
    state: FeatureState,
    notifier: Arc<dyn ChangeNotifier>,
    telemetry: Arc<dyn TelemetrySink>,
    policy: StartPolicy,
    pairs: Arc<DashMap<PairKey, Arc<Pair>>>,
}

impl FeatureLifecycleOrchestrator {
    pub fn new(
        facade: Arc<dyn ProcessFacade>,
        state: FeatureState,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            facade,
            state,
            notifier,
            telemetry: Arc::new(TracingTelemetry),
            policy: StartPolicy::default(),
            pairs: Arc::new(DashMap::new()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_policy(mut self, policy: StartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> &FeatureState {
        &self.state
    }

    pub fn policy(&self) -> StartPolicy {
        self.policy
    }

    /// Current phase of a pair. Pairs never toggled are `Unknown`.
    pub fn phase(&self, component: &ComponentKey, feature: ComponentFeature) -> TransitionPhase {
        self.pairs
            .get(&(component.clone(), feature))
            .map(|pair| pair.slot.lock().phase)
            .unwrap_or_default()
    }

    /// Drop all bookkeeping for a component that is being deleted.
    ///
    /// Refused while any of its features is changing, starting or running.
    /// Callbacks of earlier launches still in flight are invalidated so they
    /// cannot bring live features back.
    pub fn forget(&self, component: &ComponentKey) -> Result<(), ToggleError> {
        let pairs: Vec<(ComponentFeature, Arc<Pair>)> = self
            .pairs
            .iter()
            .filter(|entry| &entry.key().0 == component)
            .map(|entry| (entry.key().1, entry.value().clone()))
            .collect();

        let mut gates = Vec::with_capacity(pairs.len());
        for (feature, pair) in &pairs {
            let gate = pair
                .gate
                .try_lock()
                .map_err(|_| ToggleError::TransitionInFlight {
                    component: component.to_string(),
                    feature: *feature,
                })?;
            if pair.slot.lock().phase.is_active() {
                return Err(ToggleError::StillActive {
                    component: component.to_string(),
                    feature: *feature,
                });
            }
            gates.push(gate);
        }

        for (_, pair) in &pairs {
            let mut slot = pair.slot.lock();
            slot.generation += 1;
            slot.phase = TransitionPhase::Stopped;
        }
        self.pairs.retain(|(key, _), _| key != component);
        self.state.forget(component);
        Ok(())
    }

    /// Start `feature` if it is not running, stop it if it is.
    pub async fn toggle(
        &self,
        component: &Component,
        feature: ComponentFeature,
    ) -> Result<ToggleOutcome, ToggleError> {
        self.toggle_cancellable(component, feature, &CancellationToken::new())
            .await
    }

    /// Like [`toggle`](Self::toggle), aborting without side effects if `cancel`
    /// fires before the tool is asked to start or stop anything. Once the
    /// request is issued it runs to completion.
    pub async fn toggle_cancellable(
        &self,
        component: &Component,
        feature: ComponentFeature,
        cancel: &CancellationToken,
    ) -> Result<ToggleOutcome, ToggleError> {
        let result = self.transition(component, feature, cancel).await;
        match &result {
            Ok(outcome) => {
                tracing::info!("{} on {}: {:?}", feature, component.key, outcome);
                self.telemetry
                    .record(TransitionEvent::success(&component.key, feature));
            }
            Err(e) => {
                if e.is_warning() {
                    tracing::warn!("{} on {}: {}", feature, component.key, e);
                } else {
                    tracing::error!("{} on {}: {}", feature, component.key, e);
                }
                self.telemetry
                    .record(TransitionEvent::failure(&component.key, feature, e));
            }
        }
        result
    }

    async fn transition(
        &self,
        component: &Component,
        feature: ComponentFeature,
        cancel: &CancellationToken,
    ) -> Result<ToggleOutcome, ToggleError> {
        let key = &component.key;
        if !component.info.supports(feature) {
            return Err(ToggleError::Unsupported {
                component: key.to_string(),
                feature,
            });
        }

        let pair = self.pair(key, feature);
        let _gate = pair
            .gate
            .try_lock()
            .map_err(|_| ToggleError::TransitionInFlight {
                component: key.to_string(),
                feature,
            })?;

        let cancelled = || ToggleError::Cancelled {
            component: key.to_string(),
            feature,
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let running = self.facade.is_running(key, feature).await?;
        tracing::debug!("Probe of {} on {}: running={}", feature, key, running);

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // A launch that has not reported ready yet still probes as not
        // running. Toggling it again means stopping it, not launching twice.
        let pending = pair.slot.lock().phase == TransitionPhase::Starting;
        if running || pending {
            if pending && !running {
                tracing::debug!("{} on {} is still starting, stopping it", feature, key);
            }
            self.stop_locked(&pair, key, feature).await?;
            Ok(ToggleOutcome::Stopped)
        } else {
            if self.state.has(key, feature) {
                // The cache says live but the tool disagrees: trust the tool.
                tracing::info!("{} on {} is no longer running, clearing it", feature, key);
                self.clear(key, feature, feature);
            }
            let launched = self.start_locked(&pair, component, feature).await?;
            Ok(ToggleOutcome::Starting { launched })
        }
    }

    async fn stop_locked(
        &self,
        pair: &Arc<Pair>,
        key: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<(), ProcessError> {
        let previous = {
            let mut slot = pair.slot.lock();
            std::mem::replace(&mut slot.phase, TransitionPhase::Stopping)
        };

        match self.facade.stop(key, feature).await {
            Ok(()) => {
                pair.set_phase(TransitionPhase::Stopped);
                self.clear(key, feature, feature);
                Ok(())
            }
            Err(e) => {
                pair.set_phase(if e.is_warning() {
                    TransitionPhase::Unknown
                } else {
                    previous
                });
                Err(e)
            }
        }
    }

    async fn start_locked(
        &self,
        pair: &Arc<Pair>,
        component: &Component,
        requested: ComponentFeature,
    ) -> Result<ComponentFeature, ProcessError> {
        let key = &component.key;
        let launched = self.policy.launched(requested, &component.info);
        let generation = {
            let mut slot = pair.slot.lock();
            slot.generation += 1;
            slot.phase = TransitionPhase::Starting;
            slot.generation
        };

        let callbacks = LifecycleCallbacks::new(
            self.started_callback(pair.clone(), key.clone(), requested, launched, generation),
            self.terminated_callback(pair.clone(), key.clone(), requested, launched, generation),
        );

        match self.facade.start(key, launched, callbacks).await {
            Ok(()) => Ok(launched),
            Err(e) => {
                // The probe said it was not running and nothing was launched.
                pair.set_phase(TransitionPhase::Stopped);
                Err(e)
            }
        }
    }

    /// Remove `requested` and `launched` (with its base) and tell observers.
    fn clear(&self, key: &ComponentKey, requested: ComponentFeature, launched: ComponentFeature) {
        clear_features(&self.state, key, requested, launched);
        self.notifier.notify(key);
    }

    fn started_callback(
        &self,
        pair: Arc<Pair>,
        key: ComponentKey,
        requested: ComponentFeature,
        launched: ComponentFeature,
        generation: u64,
    ) -> impl FnOnce() + Send + 'static {
        let runtime = Handle::current();
        let state = self.state.clone();
        let notifier = self.notifier.clone();
        move || {
            runtime.spawn(async move {
                let _gate = pair.gate.lock().await;
                {
                    let mut slot = pair.slot.lock();
                    if slot.generation != generation || slot.phase != TransitionPhase::Starting {
                        tracing::debug!(
                            "Ignoring stale ready signal of {} on {} (generation {}, now {} {})",
                            launched,
                            key,
                            generation,
                            slot.generation,
                            slot.phase.as_str()
                        );
                        return;
                    }
                    slot.phase = TransitionPhase::Running;
                }
                state.add(&key, requested);
                state.add(&key, launched);
                notifier.notify(&key);
            });
        }
    }

    fn terminated_callback(
        &self,
        pair: Arc<Pair>,
        key: ComponentKey,
        requested: ComponentFeature,
        launched: ComponentFeature,
        generation: u64,
    ) -> impl FnOnce() + Send + 'static {
        let runtime = Handle::current();
        let state = self.state.clone();
        let notifier = self.notifier.clone();
        move || {
            runtime.spawn(async move {
                let _gate = pair.gate.lock().await;
                {
                    let mut slot = pair.slot.lock();
                    if slot.generation != generation || !slot.phase.expects_termination() {
                        tracing::debug!(
                            "Ignoring termination of {} on {} (generation {}, now {} {})",
                            launched,
                            key,
                            generation,
                            slot.generation,
                            slot.phase.as_str()
                        );
                        return;
                    }
                    slot.phase = TransitionPhase::Stopped;
                }
                tracing::info!("{} on {} terminated", launched, key);
                clear_features(&state, &key, requested, launched);
                notifier.notify(&key);
            });
        }
    }

    fn pair(&self, key: &ComponentKey, feature: ComponentFeature) -> Arc<Pair> {
        self.pairs
            .entry((key.clone(), feature))
            .or_insert_with(|| Arc::new(Pair::new()))
            .clone()
    }
}

fn clear_features(
    state: &FeatureState,
    key: &ComponentKey,
    requested: ComponentFeature,
    launched: ComponentFeature,
) {
    state.remove(key, requested);
    state.remove(key, launched);
    if let Some(base) = launched.paired() {
        state.remove(key, base);
    }
}

//! Success/failure signal per lifecycle transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{ComponentFeature, ComponentKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionResult {
    Success,
    Failure,
}

/// One toggle as seen by telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// e.g. `Dev component`.
    pub action: String,
    pub component: ComponentKey,
    pub feature: ComponentFeature,
    pub result: TransitionResult,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn success(component: &ComponentKey, feature: ComponentFeature) -> Self {
        Self {
            action: feature.telemetry_action_name(),
            component: component.clone(),
            feature,
            result: TransitionResult::Success,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failure(
        component: &ComponentKey,
        feature: ComponentFeature,
        error: impl ToString,
    ) -> Self {
        Self {
            action: feature.telemetry_action_name(),
            component: component.clone(),
            feature,
            result: TransitionResult::Failure,
            error: Some(error.to_string()),
            at: Utc::now(),
        }
    }
}

/// Where transition events go. Delivery is the sink's business.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TransitionEvent);
}

/// Writes events to the `telemetry` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TransitionEvent) {
        match event.result {
            TransitionResult::Success => tracing::info!(
                target: "telemetry",
                action = %event.action,
                component = %event.component,
                "transition succeeded"
            ),
            TransitionResult::Failure => tracing::warn!(
                target: "telemetry",
                action = %event.action,
                component = %event.component,
                error = event.error.as_deref().unwrap_or_default(),
                "transition failed"
            ),
        }
    }
}

/// Keeps events in memory, newest last.
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TransitionEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TransitionEvent) {
        self.events.lock().push(event);
    }
}

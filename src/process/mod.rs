//! Boundary to the external CLI tool.
//!
//! [`ProcessFacade`] is the only part of the crate that talks to the outside
//! world. The orchestrator depends on the trait, so tests substitute a fake
//! that answers probes from canned values and fires callbacks by hand.

mod describe;
mod exec;
mod odo;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ComponentFeature, ComponentKey};

pub use describe::{ComponentDescription, RunningModes, SupportedOdoFeatures};
pub use odo::{OdoCli, OdoSettings, DEFAULT_READY_MARKER};

/// Failures of the external tool boundary.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The tool ran but reported failure, or produced output we cannot read.
    #[error("{command} failed: {reason}")]
    ToolInvocation { command: String, reason: String },

    /// The tool could not be spawned or talked to.
    #[error("could not run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Stop was requested but not confirmed in time. The feature may still run.
    #[error("{component} did not stop within {}s", timeout.as_secs())]
    StopTimeout {
        component: String,
        timeout: Duration,
    },
}

impl ProcessError {
    pub fn tool(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolInvocation {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn io(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            command: command.into(),
            source,
        }
    }

    /// Timeouts leave the real state unknown, so they are reported as warnings.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::StopTimeout { .. })
    }
}

/// A callback fired by the facade at most once.
pub type LifecycleCallback = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks handed to [`ProcessFacade::start`].
pub struct LifecycleCallbacks {
    /// Fired once the tool signals the feature is ready.
    pub on_started: LifecycleCallback,
    /// Fired exactly once when the launched process exits, whatever the cause.
    pub on_terminated: LifecycleCallback,
}

impl LifecycleCallbacks {
    pub fn new(
        on_started: impl FnOnce() + Send + 'static,
        on_terminated: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            on_started: Box::new(on_started),
            on_terminated: Box::new(on_terminated),
        }
    }
}

/// Start, stop and probe features of a component through the external tool.
#[async_trait]
pub trait ProcessFacade: Send + Sync {
    /// Whether `feature` is currently active. Never mutates anything.
    async fn is_running(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<bool, ProcessError>;

    /// Launch `feature`. Returns once the process is launched; readiness and
    /// termination are reported through `callbacks`.
    async fn start(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
        callbacks: LifecycleCallbacks,
    ) -> Result<(), ProcessError>;

    /// Stop `feature`, waiting a bounded time for confirmation.
    async fn stop(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<(), ProcessError>;
}

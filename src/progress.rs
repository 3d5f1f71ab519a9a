//! Runs lifecycle work off the caller's task behind a cancellable indicator.
//!
//! Cancelling a task only stops whoever is waiting for it. Work that already
//! asked the external tool to start or stop something keeps running and still
//! applies its state changes when it finishes.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("{label} failed unexpectedly: {message}")]
    Crashed { label: String, message: String },
}

/// A task currently shown as in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

struct TaskEntry {
    info: ActiveTask,
    token: CancellationToken,
}

/// Tokio-backed progress host.
#[derive(Clone, Default)]
pub struct ProgressHost {
    tasks: Arc<DashMap<Uuid, TaskEntry>>,
}

impl ProgressHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` with a fresh cancellation token and track it until it ends.
    pub fn run<F, Fut, T>(&self, label: impl Into<String>, work: F) -> ProgressHandle<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.tasks.insert(
            id,
            TaskEntry {
                info: ActiveTask {
                    id,
                    label: label.clone(),
                    started_at: Utc::now(),
                },
                token: token.clone(),
            },
        );
        tracing::info!("{}...", label);

        let fut = work(token.clone());
        let tasks = self.tasks.clone();
        let task_label = label.clone();
        let join = tokio::spawn(async move {
            let output = fut.await;
            tasks.remove(&id);
            tracing::debug!("{} finished", task_label);
            output
        });

        ProgressHandle {
            id,
            label,
            token,
            join,
        }
    }

    /// Tasks still running, oldest first.
    pub fn active(&self) -> Vec<ActiveTask> {
        let mut active: Vec<_> = self.tasks.iter().map(|t| t.info.clone()).collect();
        active.sort_by_key(|t| t.started_at);
        active
    }

    /// Cancel a task by id. Returns false when no such task is running.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.tasks.get(&id) {
            Some(entry) => {
                tracing::info!("Cancelling {}", entry.info.label);
                entry.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Handle to a task started by [`ProgressHost::run`].
pub struct ProgressHandle<T> {
    id: Uuid,
    label: String,
    token: CancellationToken,
    join: JoinHandle<T>,
}

impl<T> ProgressHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the result, or stop waiting once the task is cancelled. The
    /// task itself is never aborted.
    pub async fn wait(self) -> Result<T, ProgressError> {
        let Self {
            label, token, join, ..
        } = self;
        tokio::select! {
            biased;
            joined = join => joined.map_err(|e| ProgressError::Crashed {
                label,
                message: e.to_string(),
            }),
            _ = token.cancelled() => Err(ProgressError::Cancelled(label)),
        }
    }
}

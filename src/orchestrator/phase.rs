use serde::{Deserialize, Serialize};

/// Where a (component, feature) pair is in its start/stop lifecycle.
///
/// ```text
/// Unknown ──probe──► Stopped ──start──► Starting ──ready──► Running
///                       ▲                   │                  │
///                       │             terminated             stop
///                       │                   ▼                  ▼
///                       └──────────────── Stopped ◄─confirm─ Stopping
/// ```
///
/// A stop that times out leaves the pair `Unknown`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    #[default]
    Unknown,
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl TransitionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    /// A launched process may still be alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether a terminated process still has something to clear in this phase.
    pub fn expects_termination(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Bookkeeping for one pair, guarded by the pair's lock.
#[derive(Debug, Default)]
pub(super) struct PairSlot {
    /// Bumped on every start so late callbacks can tell they were superseded.
    pub generation: u64,
    pub phase: TransitionPhase,
}

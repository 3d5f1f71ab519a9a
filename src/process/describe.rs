//! Parsing of `odo describe component -o json`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{FeatureMode, Platform};

/// Which modes a component is running in on one platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningModes {
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub deploy: bool,
}

/// Feature support flags reported by the tool for a devfile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedOdoFeatures {
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub deploy: bool,
    #[serde(default)]
    pub debug: bool,
}

/// The subset of the describe output the lifecycle cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescription {
    /// Per-platform modes (`cluster`, `podman`).
    #[serde(default)]
    pub running_on: BTreeMap<String, RunningModes>,
    /// Older output: modes on the cluster only.
    #[serde(default)]
    pub running_in: Option<RunningModes>,
    #[serde(default)]
    pub supported_odo_features: Option<SupportedOdoFeatures>,
    #[serde(default)]
    pub devfile_path: Option<String>,
}

impl ComponentDescription {
    pub fn parse(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Whether a dev session is running on `platform`.
    pub fn dev_running_on(&self, platform: Platform) -> bool {
        if let Some(modes) = self.running_on.get(platform.as_str()) {
            return modes.dev;
        }
        match platform {
            Platform::Cluster => self.running_in.is_some_and(|modes| modes.dev),
            Platform::Podman => false,
        }
    }

    /// Feature modes the devfile supports. Missing flags mean dev only.
    pub fn supported_modes(&self) -> Vec<FeatureMode> {
        match self.supported_odo_features {
            Some(flags) => {
                let mut modes = Vec::new();
                if flags.dev {
                    modes.push(FeatureMode::Dev);
                }
                if flags.debug {
                    modes.push(FeatureMode::Debug);
                }
                modes
            }
            None => vec![FeatureMode::Dev],
        }
    }
}

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Machine-readable mode of a feature, matched against the modes a component
/// declares as supported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    Dev,
    Debug,
}

impl FeatureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Debug => "debug",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dev" => Some(Self::Dev),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Where a dev session runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Cluster,
    Podman,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Podman => "podman",
        }
    }

    /// Label used in action names ("Start dev on Cluster").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::Podman => "Podman",
        }
    }
}

/// A feature that runs on its own: a dev loop on a given platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseFeature {
    Dev,
    DevOnPodman,
}

impl BaseFeature {
    pub fn platform(&self) -> Platform {
        match self {
            Self::Dev => Platform::Cluster,
            Self::DevOnPodman => Platform::Podman,
        }
    }
}

/// A runtime capability of a component.
///
/// The set is closed: a base feature, or the debug wrapper around one. A
/// debug feature is layered on top of its base: starting it makes the base
/// live too, and it cannot outlive the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentFeature {
    Base(BaseFeature),
    Debug(BaseFeature),
}

impl ComponentFeature {
    pub const DEV: Self = Self::Base(BaseFeature::Dev);
    pub const DEV_ON_PODMAN: Self = Self::Base(BaseFeature::DevOnPodman);
    pub const DEBUG: Self = Self::Debug(BaseFeature::Dev);
    pub const DEBUG_ON_PODMAN: Self = Self::Debug(BaseFeature::DevOnPodman);

    pub const ALL: [Self; 4] = [
        Self::DEV,
        Self::DEV_ON_PODMAN,
        Self::DEBUG,
        Self::DEBUG_ON_PODMAN,
    ];

    pub fn mode(&self) -> FeatureMode {
        match self {
            Self::Base(_) => FeatureMode::Dev,
            Self::Debug(_) => FeatureMode::Debug,
        }
    }

    pub fn base(&self) -> BaseFeature {
        match self {
            Self::Base(base) | Self::Debug(base) => *base,
        }
    }

    pub fn platform(&self) -> Platform {
        self.base().platform()
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, Self::Debug(_))
    }

    /// The base feature a debug feature is layered on. `None` for base features.
    pub fn paired(&self) -> Option<Self> {
        match self {
            Self::Base(_) => None,
            Self::Debug(base) => Some(Self::Base(*base)),
        }
    }

    /// The debug wrapper around this feature's base.
    pub fn as_debug(&self) -> Self {
        Self::Debug(self.base())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base(BaseFeature::Dev) => "dev",
            Self::Base(BaseFeature::DevOnPodman) => "dev-on-podman",
            Self::Debug(BaseFeature::Dev) => "debug",
            Self::Debug(BaseFeature::DevOnPodman) => "debug-on-podman",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Human label of the feature.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Base(BaseFeature::Dev) => "Dev",
            Self::Base(BaseFeature::DevOnPodman) => "Dev on Podman",
            Self::Debug(BaseFeature::Dev) => "Debug",
            Self::Debug(BaseFeature::DevOnPodman) => "Debug on Podman",
        }
    }

    /// Short badge shown next to a component in the tree.
    pub fn badge(&self) -> &'static str {
        match self {
            Self::Base(BaseFeature::Dev) => "dev",
            Self::Base(BaseFeature::DevOnPodman) => "dev on podman",
            Self::Debug(BaseFeature::Dev) => "debug",
            Self::Debug(BaseFeature::DevOnPodman) => "debug on podman",
        }
    }

    /// Menu text for the toggle action, e.g. "Start dev on Cluster".
    pub fn action_label(&self, running: bool) -> String {
        let verb = if running { "Stop" } else { "Start" };
        format!(
            "{} {} on {}",
            verb,
            self.mode().as_str(),
            self.platform().label()
        )
    }

    /// Name reported to telemetry for transitions of this feature.
    pub fn telemetry_action_name(&self) -> String {
        format!("{} component", self.label())
    }
}

impl fmt::Display for ComponentFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ComponentFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ComponentFeature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown component feature '{}'", s)))
    }
}

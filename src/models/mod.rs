//! Domain models for component feature lifecycles.
//!
//! # Core Concepts
//!
//! - [`Component`]: a deployable unit bound to a namespace and a local working
//!   copy, identified by its [`ComponentKey`].
//! - [`ComponentFeature`]: a runtime capability (dev loop, debug bridge) that can
//!   be started and stopped on a component. Debug features wrap a
//!   [`BaseFeature`].
//! - [`LiveFeatures`]: the features believed active on a component. This is a
//!   cache of what the external tool last reported, not ground truth.
//! - [`Namespace`]: the cluster namespace scoping where components run.

mod component;
mod feature;

pub use component::*;
pub use feature::*;

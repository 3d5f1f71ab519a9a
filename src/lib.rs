//! Starts, stops and tracks development features of components through an
//! external CLI tool, keeping a cache of live features in line with reality.

pub mod api;
pub mod client;
pub mod config;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod registry;
pub mod state;
pub mod telemetry;
pub mod tree_render;

//! In-process tree network for running node agents without hardware.
//!
//! ## Module Organization
//!
//! - `scene`: scene file loading and validation
//! - `mesh`: simulated mesh stack (tree attachment, delivery, lifecycle events)
//! - `broker`: simulated publish/subscribe broker
//! - `operator`: operator commands and their wire form
//! - `network_view`: operator's view built from published telemetry
//! - `network_task`: central task booting nodes and running the operator script

pub mod broker;
pub mod mesh;
pub mod network_task;
pub mod network_view;
pub mod operator;
pub mod scene;

#[cfg(test)]
mod scenarios;

pub use network_task::network_task;
pub use scene::load_scene;

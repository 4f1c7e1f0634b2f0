//! Scene loading, parsing, and validation.
//!
//! A scene describes the simulated tree (one entry per node, keyed by radio
//! address), how long to run it, and a timed script of operator commands.

use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;

use super::operator::OperatorCommand;
use crate::address::RadioAddress;
use crate::config::ROUTING_TABLE_CAPACITY;
use crate::node::MAX_NODES;
use crate::time_driver::{MAX_SPEED_PERCENT, MIN_SPEED_PERCENT};

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// One simulated node.
#[derive(Debug, Deserialize, Clone)]
pub struct SceneNode {
    /// Radio (station) address, e.g. `24:0A:C4:00:00:01`.
    pub mac: String,
    /// Radio address of the parent; absent for the root.
    #[serde(default)]
    pub parent: Option<String>,
    /// Overrides the configured fan-out limit for this node.
    #[serde(default)]
    pub max_children: Option<u8>,
}

/// Operator command issued `at_ms` after the simulation starts.
#[derive(Debug, Deserialize, Clone)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub command: OperatorCommand,
}

fn default_duration_ms() -> u64 {
    20_000
}

fn default_speed_percent() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    /// Run time before the simulation exits.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Virtual time speed relative to wall-clock time.
    #[serde(default = "default_speed_percent")]
    pub speed_percent: u32,
    #[serde(default)]
    pub script: Vec<ScriptStep>,
}

impl Scene {
    /// Index of the node without a parent. Valid only after validation.
    pub fn root_index(&self) -> Option<usize> {
        self.nodes.iter().position(|n| n.parent.is_none())
    }

    /// `(node, parent)` radio address pairs in scene order.
    pub fn links(&self) -> Result<Vec<(RadioAddress, Option<RadioAddress>)>, String> {
        self.nodes
            .iter()
            .map(|node| {
                let address: RadioAddress = node.mac.parse()?;
                let parent = node.parent.as_deref().map(str::parse::<RadioAddress>).transpose()?;
                Ok((address, parent))
            })
            .collect()
    }
}

/// Load, parse and validate a scene file.
///
/// # Parameters
///
/// * `path` - Path to the scene JSON file
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;
    parse_scene(&data)
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let mut scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(e.to_string()))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    // Script runs in time order regardless of file order
    scene.script.sort_by_key(|step| step.at_ms);
    Ok(scene)
}

/// Validate the tree described by a scene.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    let mut addresses = HashSet::new();
    for node in &scene.nodes {
        let address: RadioAddress = node.mac.parse().map_err(|e| format!("Node '{}': {}", node.mac, e))?;
        if !addresses.insert(address) {
            return Err(format!("Duplicate node address found: {}", node.mac));
        }
        if let Some(max_children) = node.max_children {
            if max_children == 0 || max_children as usize > ROUTING_TABLE_CAPACITY {
                return Err(format!(
                    "Node {} max_children {} outside 1-{}",
                    node.mac, max_children, ROUTING_TABLE_CAPACITY
                ));
            }
        }
    }

    if !(MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT).contains(&scene.speed_percent) {
        return Err(format!(
            "speed_percent {} outside {}-{}",
            scene.speed_percent, MIN_SPEED_PERCENT, MAX_SPEED_PERCENT
        ));
    }

    let roots = scene.nodes.iter().filter(|n| n.parent.is_none()).count();
    if roots != 1 {
        return Err(format!("Scene must contain exactly one root, found {}", roots));
    }

    let parents: HashMap<RadioAddress, Option<RadioAddress>> = scene.links()?.into_iter().collect();

    for (address, parent) in &parents {
        if let Some(parent) = parent {
            if !parents.contains_key(parent) {
                return Err(format!("Node {} has unknown parent {}", address, parent));
            }
        }
        // Walking up must reach the root within node-count steps
        let mut current = *parent;
        let mut steps = 0;
        while let Some(next) = current {
            steps += 1;
            if next == *address || steps > parents.len() {
                return Err(format!("Node {} is part of a parent cycle", address));
            }
            current = parents.get(&next).copied().flatten();
        }
    }

    for (idx, step) in scene.script.iter().enumerate() {
        if let OperatorCommand::SetMaxChildren { max_children, .. } = step.command {
            if max_children == 0 {
                return Err(format!("Script step {} sets max_children to 0", idx));
            }
        }
    }

    Ok(())
}

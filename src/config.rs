//! Agent configuration loaded from TOML.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Capacity of the routing-table query; also the upper bound for `max_children`.
pub const ROUTING_TABLE_CAPACITY: usize = 20;
/// Size of the outbound report buffer. Serialized reports are capped at `TX_SIZE - 1` bytes.
pub const TX_SIZE: usize = 1460;
/// Largest payload accepted from the mesh.
pub const RX_SIZE: usize = 1500;

/// Mesh tree shape requested from the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    #[default]
    Tree,
    Chain,
}

/// Timing of the blink indicator sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BlinkPattern {
    pub on_ms: u64,
    pub off_ms: u64,
    pub cycles: u32,
    /// Pause after the last cycle before LEDs return to the layer colour.
    pub settle_ms: u64,
}

impl Default for BlinkPattern {
    fn default() -> Self {
        Self {
            on_ms: 200,
            off_ms: 200,
            cycles: 3,
            settle_ms: 100,
        }
    }
}

impl BlinkPattern {
    /// Worst-case time the caller is blocked for.
    pub fn total_ms(&self) -> u64 {
        (self.on_ms + self.off_ms) * self.cycles as u64 + self.settle_ms
    }
}

/// Static mesh network parameters handed to the stack on every (re)configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MeshSettings {
    pub mesh_id: [u8; 6],
    pub channel: u8,
    pub router_ssid: String,
    pub router_password: String,
    pub ap_password: String,
    pub max_layer: u8,
    pub topology: Topology,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            mesh_id: [0x77; 6],
            channel: 0,
            router_ssid: String::new(),
            router_password: String::new(),
            ap_password: String::new(),
            max_layer: 6,
            topology: Topology::Tree,
        }
    }
}

/// Node agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AgentConfig {
    /// Initial telemetry period.
    pub report_interval_ms: u32,
    /// Initial fan-out limit passed to the mesh stack.
    pub max_children: u8,
    /// Period of the reconfiguration controller when idle.
    pub reconfig_poll_ms: u64,
    /// Upper bound of the random delay before restarting the stack.
    pub restart_jitter_max_ms: u64,
    pub broker_uri: String,
    /// Topic the root publishes aggregated network info on.
    pub info_topic: String,
    /// Topic the root subscribes to for operator commands.
    pub command_topic: String,
    pub blink: BlinkPattern,
    pub mesh: MeshSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 2000,
            max_children: 2,
            reconfig_poll_ms: 1000,
            restart_jitter_max_ms: 5000,
            broker_uri: "mqtt://127.0.0.1:1883".to_string(),
            info_topic: "mesh/network/info".to_string(),
            command_topic: "mesh/cmd".to_string(),
            blink: BlinkPattern::default(),
            mesh: MeshSettings::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(AgentConfig)` if the file was read, parsed and validated
    /// * `Err` describing the first problem otherwise
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(config_path).with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            log::info!("No config file at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = toml::from_str(content).context("Failed to parse config file")?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_children == 0 || self.max_children as usize > ROUTING_TABLE_CAPACITY {
            return Err(format!("max-children {} must be within 1-{}", self.max_children, ROUTING_TABLE_CAPACITY));
        }
        if self.reconfig_poll_ms == 0 {
            return Err("reconfig-poll-ms must be positive".to_string());
        }
        if self.info_topic.is_empty() || self.command_topic.is_empty() {
            return Err("info-topic and command-topic must not be empty".to_string());
        }
        if self.mesh.max_layer == 0 {
            return Err("mesh.max-layer must be positive".to_string());
        }
        Ok(())
    }
}

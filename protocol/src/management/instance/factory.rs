use crate::management::instance::config::{FlagsPreset, InstanceType, LATEST_VERSION};
use crate::utils::encoding::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything a caller supplies to create an instance; the id and directories are
/// assigned by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFactorySetting {
    pub name: String,
    pub instance_type: InstanceType,
    #[serde(default = "default_version")]
    pub version: String,
    pub port: u16,
    pub min_memory: u32,
    pub max_memory: u32,
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// optional artifact source understood by the artifact provider (e.g. a `file://` url)
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub launch_command: Option<String>,
    #[serde(default)]
    pub flags_preset: FlagsPreset,
    #[serde(default)]
    pub performance_mode: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub java_path: Option<String>,
    #[serde(default)]
    pub input_encoding: Encoding,
    #[serde(default)]
    pub output_encoding: Encoding,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_version() -> String {
    LATEST_VERSION.to_owned()
}

fn default_max_players() -> u32 {
    20
}

impl InstanceFactorySetting {
    pub fn new(name: impl Into<String>, instance_type: InstanceType, port: u16) -> Self {
        Self {
            name: name.into(),
            instance_type,
            version: default_version(),
            port,
            min_memory: 1024,
            max_memory: 2048,
            max_players: default_max_players(),
            source: None,
            launch_command: None,
            flags_preset: FlagsPreset::default(),
            performance_mode: false,
            auto_start: false,
            java_path: None,
            input_encoding: Encoding::default(),
            output_encoding: Encoding::default(),
            env: HashMap::new(),
        }
    }
}

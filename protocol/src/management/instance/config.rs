use crate::management::backup::BackupCadence;
use crate::utils::encoding::Encoding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// 服务端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    Vanilla,
    Paper,
    Purpur,
    Spigot,
    Forge,
    NeoForge,
    Fabric,
    Quilt,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Vanilla => "vanilla",
            InstanceType::Paper => "paper",
            InstanceType::Purpur => "purpur",
            InstanceType::Spigot => "spigot",
            InstanceType::Forge => "forge",
            InstanceType::NeoForge => "neo_forge",
            InstanceType::Fabric => "fabric",
            InstanceType::Quilt => "quilt",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JVM 参数预设
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagsPreset {
    #[default]
    None,
    Aikar,
    Zgc,
}

/// Marker accepted in `version` until the install pipeline resolves it.
pub const LATEST_VERSION: &str = "latest";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceConfig {
    pub uuid: Uuid,
    pub name: String,
    pub instance_type: InstanceType,
    pub version: String,
    pub port: u16,

    /// MiB
    pub min_memory: u32,
    /// MiB
    pub max_memory: u32,
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    pub working_dir: PathBuf,
    pub backup_dir: PathBuf,

    /// Overrides the generated `java -Xms.. -Xmx.. -jar server.jar nogui` form.
    #[serde(default)]
    pub launch_command: Option<String>,
    #[serde(default)]
    pub flags_preset: FlagsPreset,
    #[serde(default)]
    pub performance_mode: bool,
    #[serde(default)]
    pub auto_start: bool,

    #[serde(default)]
    pub backup_cadence: Option<BackupCadence>,
    #[serde(default)]
    pub last_scheduled_backup: Option<DateTime<Utc>>,

    #[serde(default = "default_java_path")]
    pub java_path: String,
    #[serde(default)]
    pub input_encoding: Encoding,
    #[serde(default)]
    pub output_encoding: Encoding,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Resource limits an operator may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSettings {
    pub min_memory: u32,
    pub max_memory: u32,
    pub max_players: u32,
    /// new port, if it changes
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_java_path() -> String {
    "java".to_owned()
}

fn default_max_players() -> u32 {
    20
}

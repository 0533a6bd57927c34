use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::storage::file::{Config, FileIoWithBackup};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// immutable through full lifetime of app, unless restart app.
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            supervisor: SupervisorConfig::default(),
            polling: PollingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    fn load() -> AppConfig {
        Self::load_config_or_default("config.json", Self::default).unwrap_or_else(|err| {
            eprintln!("config.json unusable ({:#}), falling back to defaults", err);
            Self::default()
        })
    }
}

static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

impl AppConfig {
    pub fn get() -> &'static AppConfig {
        &APP_CONFIG
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub instances_dir: String,
    pub backups_dir: String,
    pub cores_dir: String,
    pub registry_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("daemon"),
            instances_dir: "instances".into(),
            backups_dir: "backups".into(),
            cores_dir: "cores".into(),
            registry_file: "instances.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// grace period after `stop` before the process is killed
    pub stop_timeout_secs: u64,
    pub kill_timeout_secs: u64,
    pub console_buffer_size: usize,
    pub console_trim_batch: usize,
    pub subscriber_capacity: usize,
    pub accept_eula: bool,
    pub java_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 30,
            kill_timeout_secs: 10,
            console_buffer_size: 1000,
            console_trim_batch: 100,
            subscriber_capacity: 256,
            accept_eula: true,
            java_path: "java".into(),
        }
    }
}

impl SupervisorConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// Periodic sampling and the status queries injected into the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub metrics_interval_ms: u64,
    pub tps_interval_secs: u64,
    pub roster_resync_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_gap_ms: u64,
    pub ready_refresh_delay_ms: u64,
    pub join_refresh_delay_ms: u64,
    pub ping_exclusion_secs: u64,
    pub tps_echo_ms: u64,
    pub list_echo_ms: u64,
    pub world_echo_ms: u64,
    pub ping_echo_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: 2000,
            tps_interval_secs: 30,
            roster_resync_secs: 120,
            ping_interval_secs: 20,
            ping_gap_ms: 300,
            ready_refresh_delay_ms: 3000,
            join_refresh_delay_ms: 500,
            ping_exclusion_secs: 300,
            tps_echo_ms: 5000,
            list_echo_ms: 5000,
            world_echo_ms: 5000,
            ping_echo_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub backup_tick_secs: u64,
    /// lead time between the first restart warning and the stop
    pub restart_warning_secs: u64,
    pub restart_settle_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backup_tick_secs: 60,
            restart_warning_secs: 10,
            restart_settle_ms: 2000,
        }
    }
}

use crate::management::instance::config::InstanceConfig;
use crate::management::instance::performance::InstanceProcessMetrics;
use crate::management::instance::status::InstanceStatus;
use crate::management::minecraft::{LatencySupport, Player};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub status: InstanceStatus,
    /// human readable cause of the last `error`/`crashed` transition
    pub error: Option<String>,
    pub config: InstanceConfig,
    pub players: Vec<Player>,
    pub performance_counter: InstanceProcessMetrics,
    pub restart_at: Option<DateTime<Utc>>,
    pub latency: LatencySupport,
}

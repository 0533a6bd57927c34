use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceProcessMetrics {
    /// percent of one core, as reported by the OS
    pub cpu: f32,
    /// bytes
    pub memory: u64,
    pub tps: Option<f64>,
    pub pid: Option<u32>,
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a managed instance.
///
/// `Installing -> {Stopped, Error}`, `Stopped/Crashed/Error -> Booting -> Running -> {Stopped, Crashed}`.
/// Any state may re-enter `Installing` through retry or version update. A backup restore
/// also holds a terminal instance in `Installing` while its files are rewritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Installing,
    Stopped,
    Booting,
    Running,
    Crashed,
    Error,
}

impl InstanceStatus {
    /// No process is alive and nothing is in flight.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Stopped | InstanceStatus::Crashed | InstanceStatus::Error
        )
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, InstanceStatus::Booting | InstanceStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Installing => "installing",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Booting => "booting",
            InstanceStatus::Running => "running",
            InstanceStatus::Crashed => "crashed",
            InstanceStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A player known to be online. Lives only as long as the server process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub name: String,
    pub address: Option<String>,
    /// milliseconds
    pub ping: Option<u32>,
    /// dimension id, e.g. `minecraft:the_nether`
    pub world: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    pub fn new(name: impl Into<String>, joined_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            address: None,
            ping: None,
            world: None,
            joined_at,
        }
    }
}

/// Whether per-player latency can be polled on this instance, and why not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LatencySupport {
    pub supported: bool,
    pub reason: Option<String>,
}

impl LatencySupport {
    pub fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            reason: Some(reason.into()),
        }
    }
}

use serde::{Deserialize, Serialize};

/// One buffered console line. `seq` starts at 1 for every process launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleEntry {
    pub seq: u64,
    pub line: String,
}

/// Item pushed to live console subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsoleFrame {
    Line(ConsoleEntry),
    /// Sequence numbers rewound (new launch); previously received history is invalid.
    Reset,
}

mod process;
mod process_helper;

pub use process::{read_lines, spawn_process, ProcessStartInfo};
pub use process_helper::ProcessHelper;

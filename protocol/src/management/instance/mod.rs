mod config;
mod factory;
mod performance;
mod report;
mod status;

pub use config::*;
pub use factory::*;
pub use performance::*;
pub use report::*;
pub use status::*;

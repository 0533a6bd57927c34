mod backup;
pub mod comm;
pub mod config;
pub mod console;
pub mod error;
pub mod install;
pub mod instance;
mod lifecycle;
mod manager;
pub mod minecraft;
mod monitor;
pub mod polling;
pub mod registry;
pub mod roster;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{InstanceError, InstanceResult};
pub use manager::{InstanceContainer, InstanceManager};

//! Data model shared between the daemon core and whatever transport exposes it.

pub mod console;
pub mod management;
pub mod utils;

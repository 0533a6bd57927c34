pub mod archive;
pub mod file;
mod files;

pub use files::Files;

pub mod backup;
pub mod instance;
pub mod minecraft;

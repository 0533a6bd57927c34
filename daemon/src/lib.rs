pub mod app;
pub mod config;
pub mod management;
pub mod services;
pub mod storage;
pub mod utils;

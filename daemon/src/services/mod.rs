mod graceful_shutdown;
mod service;

pub use graceful_shutdown::GracefulShutdown;
pub use service::Service;

mod backup;
mod restart;

pub use backup::BackupScheduler;

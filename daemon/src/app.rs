use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::management::scheduler::BackupScheduler;
use crate::management::InstanceManager;
use crate::services::GracefulShutdown;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
static START_TIME: LazyLock<DateTime<Utc>> = LazyLock::new(Utc::now);

pub fn get_start_time() -> &'static DateTime<Utc> {
    START_TIME.deref()
}

async fn auto_start(manager: &Arc<InstanceManager>) {
    for id in manager.auto_start_ids().await {
        match manager.start(id).await {
            Ok(()) => info!("instance {} auto-started", id),
            Err(err) => warn!("instance {} could not be auto-started: {}", id, err),
        }
    }
}

pub async fn run_app() -> anyhow::Result<()> {
    let _ = get_start_time();
    let config = AppConfig::get();
    debug!("config loaded: {}", serde_json::to_string_pretty(config)?);
    info!("mcsm daemon {} starting", VERSION);

    let manager = InstanceManager::load(config.clone())?;
    auto_start(&manager).await;

    let mut gs = GracefulShutdown::new();
    gs.add_service(BackupScheduler::new(manager.clone()));
    let (stop, _) = watch::channel(false);
    gs.watch(stop).await;

    info!("stopping all instances");
    manager.shutdown_all().await;
    info!("Bye.");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::sync::watch;
use uuid::Uuid;

use crate::management::manager::InstanceManager;
use crate::services::Service;

impl InstanceManager {
    /// Backs up every instance whose cadence is due at `now`. Returns how many succeeded.
    pub async fn run_backup_tick(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<Uuid> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|config| match (config.backup_cadence, config.last_scheduled_backup) {
                (Some(cadence), Some(last)) => cadence.is_due(last, now),
                _ => false,
            })
            .map(|config| config.uuid)
            .collect();

        let mut done = 0;
        for id in due {
            match self.backup_instance(id, "scheduled").await {
                Ok(_) => {
                    let recorded = self
                        .update_config(id, |config| {
                            config.last_scheduled_backup = Some(now);
                            Ok(())
                        })
                        .await;
                    match recorded {
                        Ok(_) => done += 1,
                        Err(err) => error!("instance {}: backup time not recorded: {}", id, err),
                    }
                }
                Err(err) => error!("instance {}: scheduled backup failed: {}", id, err),
            }
        }
        if done > 0 {
            info!("{} scheduled backup(s) completed", done);
        }
        done
    }
}

/// Periodically runs the backup tick until shutdown.
pub struct BackupScheduler {
    manager: Arc<InstanceManager>,
    tick: Duration,
}

impl BackupScheduler {
    pub fn new(manager: Arc<InstanceManager>) -> Self {
        let tick = Duration::from_secs(manager.settings.scheduler.backup_tick_secs.max(1));
        Self { manager, tick }
    }
}

#[async_trait::async_trait]
impl Service for BackupScheduler {
    fn name(&self) -> &'static str {
        "backup scheduler"
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = async { stop.wait_for(|stop| *stop).await.map(|_| ()) } => break,
                _ = interval.tick() => {
                    debug!("backup tick");
                    self.manager.run_backup_tick(Utc::now()).await;
                }
            }
        }
    }
}

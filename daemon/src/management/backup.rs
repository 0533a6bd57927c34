use std::sync::Arc;

use log::{error, info};
use mcsm_protocol::management::backup::BackupInfo;
use mcsm_protocol::management::instance::InstanceStatus;
use uuid::Uuid;

use crate::management::console::push_notice;
use crate::management::error::{InstanceError, InstanceResult};
use crate::management::manager::InstanceManager;
use crate::storage::archive::archive_path;

impl InstanceManager {
    /// Archives the working directory into the instance's backup directory.
    pub async fn backup_instance(&self, id: Uuid, label: &str) -> InstanceResult<BackupInfo> {
        let config = self.config(id).await?;
        let info = self
            .archiver
            .create(&config.working_dir, &config.backup_dir, label, &[])
            .await?;
        info!("instance {}: backup {} created ({} bytes)", id, info.name, info.size);
        if let Ok(instance) = self.instance(id) {
            push_notice(&instance, format!("[daemon] backup {} created", info.name));
        }
        Ok(info)
    }

    /// Starts a manual backup in the background; the result is reported on the console.
    pub async fn create_backup(self: &Arc<Self>, id: Uuid) -> InstanceResult<()> {
        self.config(id).await?;
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = manager.backup_instance(id, "manual").await {
                error!("instance {}: manual backup failed: {}", id, err);
                if let Ok(instance) = manager.instance(id) {
                    push_notice(&instance, format!("[daemon] backup failed: {}", err));
                }
            }
        });
        Ok(())
    }

    pub async fn list_backups(&self, id: Uuid) -> InstanceResult<Vec<BackupInfo>> {
        let config = self.config(id).await?;
        Ok(self.archiver.list(&config.backup_dir).await?)
    }

    pub async fn delete_backup(&self, id: Uuid, name: &str) -> InstanceResult<()> {
        let config = self.config(id).await?;
        archive_path(&config.backup_dir, name)
            .map_err(|e| InstanceError::Validation(e.to_string()))?;
        self.archiver.delete(&config.backup_dir, name).await?;
        Ok(())
    }

    /// Extracts a backup over the working directory of a stopped instance. The instance
    /// is `Installing` meanwhile, so starts and deletes are refused until it ends
    /// `Stopped` or `Error`.
    pub async fn restore_backup(self: &Arc<Self>, id: Uuid, name: &str) -> InstanceResult<()> {
        let config = self.config(id).await?;
        let archive = archive_path(&config.backup_dir, name)
            .map_err(|e| InstanceError::Validation(e.to_string()))?;
        if !archive.is_file() {
            return Err(InstanceError::Validation(format!("backup {} does not exist", name)));
        }

        let instance = self.instance(id)?;
        {
            let mut state = instance.lock();
            if state.deleted {
                return Err(InstanceError::NotFound(id));
            }
            if !state.status.is_terminal() {
                return Err(InstanceError::invalid_state("restore", state.status));
            }
            state.status = InstanceStatus::Installing;
            state.error = None;
        }

        let manager = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            let result = manager.archiver.extract(&archive, &config.working_dir).await;
            let mut state = instance.lock();
            if state.status != InstanceStatus::Installing {
                return;
            }
            match result {
                Ok(()) => {
                    info!("instance {}: restored {}", id, name);
                    state.status = InstanceStatus::Stopped;
                    state.console.push(format!("[daemon] restored backup {}", name), true);
                }
                Err(err) => {
                    let cause = format!("{:#}", err);
                    error!("instance {}: restore of {} failed: {}", id, name, cause);
                    state.status = InstanceStatus::Error;
                    state.console.push(format!("[daemon] restore failed: {}", cause), true);
                    state.error = Some(cause);
                }
            }
        });
        Ok(())
    }
}

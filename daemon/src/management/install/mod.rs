mod provider;

use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use mcsm_protocol::management::instance::{InstanceStatus, LATEST_VERSION};
use uuid::Uuid;

use crate::management::console::push_notice;
use crate::management::error::{InstanceError, InstanceResult};
use crate::management::manager::InstanceManager;
use crate::management::minecraft::fix_eula;

pub use provider::{ArtifactProvider, LocalArtifactProvider, Progress};

impl InstanceManager {
    /// Runs the install pipeline in the background. The instance must already be
    /// `Installing`; it ends `Stopped` or `Error`.
    pub(crate) fn spawn_install(self: &Arc<Self>, id: Uuid, source: Option<String>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let result = manager.install(id, source.as_deref()).await;
            let Ok(instance) = manager.instance(id) else {
                return;
            };
            match result {
                Ok(version) => {
                    info!("instance {} installed ({})", id, version);
                    push_notice(&instance, format!("[daemon] installed version {}", version));
                    let mut state = instance.lock();
                    if state.status == InstanceStatus::Installing {
                        state.status = InstanceStatus::Stopped;
                        state.error = None;
                    }
                }
                Err(err) => {
                    let cause = format!("{:#}", err);
                    error!("install of instance {} failed: {}", id, cause);
                    push_notice(&instance, format!("[daemon] install failed: {}", cause));
                    let mut state = instance.lock();
                    if state.status == InstanceStatus::Installing {
                        state.status = InstanceStatus::Error;
                        state.error = Some(cause);
                    }
                }
            }
        });
    }

    /// Returns the installed version.
    async fn install(&self, id: Uuid, source: Option<&str>) -> anyhow::Result<String> {
        let config = self.config(id).await?;
        let instance = self.instance(id)?;
        let version = if config.version == LATEST_VERSION {
            self.provider
                .resolve_latest(config.instance_type)
                .await
                .context("failed to resolve the latest version")?
        } else {
            config.version.clone()
        };

        push_notice(
            &instance,
            format!("[daemon] installing {} {}", config.instance_type, version),
        );
        let progress = |message: String| push_notice(&instance, format!("[daemon] {}", message));
        self.provider
            .fetch(
                config.instance_type,
                &version,
                source,
                &config.working_dir,
                &progress,
            )
            .await?;

        if self.settings.supervisor.accept_eula {
            fix_eula(&config.working_dir).await?;
        }

        if version != config.version {
            let resolved = version.clone();
            self.update_config(id, move |config| {
                config.version = resolved;
                Ok(())
            })
            .await?;
        }
        Ok(version)
    }

    /// Re-runs the install of an instance left in `Error`.
    pub async fn retry_install(
        self: &Arc<Self>,
        id: Uuid,
        source: Option<String>,
    ) -> InstanceResult<()> {
        let instance = self.instance(id)?;
        {
            let mut state = instance.lock();
            if state.deleted {
                return Err(InstanceError::NotFound(id));
            }
            if state.status != InstanceStatus::Error {
                return Err(InstanceError::invalid_state("retry install", state.status));
            }
            state.status = InstanceStatus::Installing;
            state.error = None;
        }
        self.spawn_install(id, source);
        Ok(())
    }

    /// Replaces the artifact of a stopped instance with another version.
    pub async fn update_version(
        self: &Arc<Self>,
        id: Uuid,
        version: String,
        source: Option<String>,
    ) -> InstanceResult<()> {
        let version = version.trim().to_string();
        if version.is_empty() {
            return Err(InstanceError::Validation("version must not be empty".into()));
        }
        let instance = self.instance(id)?;
        {
            let mut state = instance.lock();
            if state.deleted {
                return Err(InstanceError::NotFound(id));
            }
            if !state.status.is_terminal() {
                return Err(InstanceError::invalid_state("update version", state.status));
            }
            state.status = InstanceStatus::Installing;
            state.error = None;
        }
        let updated = self
            .update_config(id, |config| {
                config.version = version;
                Ok(())
            })
            .await;
        if let Err(err) = updated {
            let mut state = instance.lock();
            state.status = InstanceStatus::Error;
            state.error = Some(err.to_string());
            return Err(err);
        }
        self.spawn_install(id, source);
        Ok(())
    }
}

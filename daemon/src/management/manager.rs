use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use mcsm_protocol::console::ConsoleEntry;
use mcsm_protocol::management::backup::BackupCadence;
use mcsm_protocol::management::instance::{
    FlagsPreset, InstanceConfig, InstanceFactorySetting, InstanceReport, InstanceStatus,
    ResourceSettings,
};
use mcsm_protocol::management::minecraft::{LatencySupport, Player};
use regex::Regex;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::management::config::InstanceConfigExt;
use crate::management::console::ConsoleSubscription;
use crate::management::error::{InstanceError, InstanceResult};
use crate::management::install::{ArtifactProvider, LocalArtifactProvider};
use crate::management::instance::{Instance, RuntimeState};
use crate::management::minecraft::{ban_command, kick_command, kill_command, FlavorExt};
use crate::management::registry::{Registry, RegistryLock, RegistrySnapshot, RegistryWriter};
use crate::storage::archive::{ArchiveService, TarGzArchiver};
use crate::storage::Files;

lazy_static! {
    static ref PLAYER_NAME: Regex =
        Regex::new(r"^\w{1,16}$").expect("Failed to compile PLAYER_NAME regex");
}

const VERSION_CACHE_TTL: Duration = Duration::from_secs(600);

/// Runtime states keyed by instance id. Structural changes happen under the registry
/// write lock; lookups are lock-free.
pub struct InstanceContainer {
    instances: scc::HashMap<Uuid, Arc<Instance>, ahash::RandomState>,
}

impl InstanceContainer {
    pub fn new() -> Self {
        Self {
            instances: scc::HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn insert(&self, instance: Arc<Instance>) -> bool {
        self.instances.insert(instance.id, instance).is_ok()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Instance>> {
        self.instances.read(&id, |_, v| Arc::clone(v))
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Instance>> {
        self.instances.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.instances.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for InstanceContainer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InstanceManager {
    pub(crate) settings: AppConfig,
    pub(crate) files: Files,
    pub(crate) registry: RegistryLock,
    writer: RegistryWriter,
    pub(crate) instances: InstanceContainer,
    pub(crate) provider: Arc<dyn ArtifactProvider>,
    pub(crate) archiver: Arc<dyn ArchiveService>,
    restart_tokens: AtomicU64,
}

impl InstanceManager {
    /// Loads the registry with the bundled artifact provider and archive service.
    pub fn load(settings: AppConfig) -> anyhow::Result<Arc<Self>> {
        let files = Files::new(&settings.storage)?;
        let provider = Arc::new(LocalArtifactProvider::new(
            files.cores_root.clone(),
            VERSION_CACHE_TTL,
        ));
        Self::with_services(settings, files, provider, Arc::new(TarGzArchiver))
    }

    pub fn with_services(
        settings: AppConfig,
        files: Files,
        provider: Arc<dyn ArtifactProvider>,
        archiver: Arc<dyn ArchiveService>,
    ) -> anyhow::Result<Arc<Self>> {
        let writer = RegistryWriter::new(&files.registry_file);
        let configs = writer.load()?;
        let instances = InstanceContainer::new();

        for config in &configs {
            let mut state = RuntimeState::new(
                InstanceStatus::Stopped,
                &settings.supervisor,
                config.instance_type.latency_support(),
            );
            if config.launch_command.is_none() && !config.jar_path().is_file() {
                state.status = InstanceStatus::Error;
                state.error = Some(format!(
                    "runnable artifact {} is missing",
                    config.jar_path().display()
                ));
            }
            instances.insert(Arc::new(Instance::new(config.uuid, state)));
        }
        info!("loaded {} instance(s) from {}", configs.len(), writer.path().display());

        Ok(Arc::new(Self {
            settings,
            files,
            registry: RegistryLock::new(Registry::new(configs)),
            writer,
            instances,
            provider,
            archiver,
            restart_tokens: AtomicU64::new(1),
        }))
    }

    pub(crate) fn instance(&self, id: Uuid) -> InstanceResult<Arc<Instance>> {
        self.instances.get(id).ok_or(InstanceError::NotFound(id))
    }

    pub(crate) async fn config(&self, id: Uuid) -> InstanceResult<InstanceConfig> {
        self.registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(InstanceError::NotFound(id))
    }

    pub(crate) async fn persist(&self, snapshot: RegistrySnapshot) -> InstanceResult<()> {
        self.writer.write(snapshot).await?;
        Ok(())
    }

    pub(crate) fn next_restart_token(&self) -> u64 {
        self.restart_tokens.fetch_add(1, Ordering::Relaxed)
    }

    /// Applies `update` to the stored configuration and persists the registry.
    pub(crate) async fn update_config<F>(&self, id: Uuid, update: F) -> InstanceResult<InstanceConfig>
    where
        F: FnOnce(&mut InstanceConfig) -> InstanceResult<()>,
    {
        let (config, snapshot) = {
            let mut registry = self.registry.write().await;
            let config = registry.get_mut(id).ok_or(InstanceError::NotFound(id))?;
            update(config)?;
            let config = config.clone();
            (config, registry.snapshot())
        };
        self.persist(snapshot).await?;
        Ok(config)
    }

    pub async fn create(
        self: &Arc<Self>,
        setting: InstanceFactorySetting,
    ) -> InstanceResult<InstanceConfig> {
        validate_name(&setting.name)?;
        validate_port(setting.port)?;
        validate_memory(setting.min_memory, setting.max_memory)?;

        let (config, snapshot) = {
            let mut registry = self.registry.write().await;
            if let Some(owner) = registry.port_owner(setting.port, None) {
                return Err(InstanceError::PortConflict(setting.port, owner));
            }
            let id = Uuid::new_v4();
            let dir_name = id.to_string();
            let config = InstanceConfig {
                uuid: id,
                name: setting.name.trim().to_string(),
                instance_type: setting.instance_type,
                version: setting.version.clone(),
                port: setting.port,
                min_memory: setting.min_memory,
                max_memory: setting.max_memory,
                max_players: setting.max_players,
                working_dir: Files::unique_dir(&self.files.instances_root, &dir_name),
                backup_dir: Files::unique_dir(&self.files.backups_root, &dir_name),
                launch_command: setting.launch_command.clone(),
                flags_preset: setting.flags_preset,
                performance_mode: setting.performance_mode,
                auto_start: setting.auto_start,
                backup_cadence: None,
                last_scheduled_backup: None,
                java_path: setting
                    .java_path
                    .clone()
                    .unwrap_or_else(|| self.settings.supervisor.java_path.clone()),
                input_encoding: setting.input_encoding,
                output_encoding: setting.output_encoding,
                env: setting.env.clone(),
            };
            let state = RuntimeState::new(
                InstanceStatus::Installing,
                &self.settings.supervisor,
                config.instance_type.latency_support(),
            );
            self.instances.insert(Arc::new(Instance::new(id, state)));
            registry.insert(config.clone());
            (config, registry.snapshot())
        };

        let prepared = match tokio::fs::create_dir_all(&config.working_dir).await {
            Ok(()) => self.persist(snapshot).await,
            Err(err) => Err(anyhow::Error::from(err).into()),
        };
        if let Err(err) = prepared {
            error!("instance {} could not be created: {}", config.uuid, err);
            self.rollback_create(&config).await;
            return Err(err);
        }
        info!(
            "instance {} ({}) created on port {}",
            config.uuid, config.name, config.port
        );

        self.spawn_install(config.uuid, setting.source);
        Ok(config)
    }

    /// Forgets an instance whose creation failed half way, releasing its port.
    async fn rollback_create(&self, config: &InstanceConfig) {
        let snapshot = {
            let mut registry = self.registry.write().await;
            if let Some(instance) = self.instances.remove(config.uuid) {
                instance.lock().deleted = true;
            }
            registry.remove(config.uuid);
            registry.snapshot()
        };
        if let Err(err) = self.persist(snapshot).await {
            warn!("instance {}: registry not saved after rollback: {}", config.uuid, err);
        }
        if let Err(err) = tokio::fs::remove_dir(&config.working_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!("could not remove {}: {}", config.working_dir.display(), err);
            }
        }
    }

    /// Removes a terminal instance. With `remove_files`, its working and backup
    /// directories are deleted too.
    pub async fn delete(&self, id: Uuid, remove_files: bool) -> InstanceResult<InstanceConfig> {
        let (config, snapshot) = {
            let mut registry = self.registry.write().await;
            let instance = self.instance(id)?;
            {
                let mut state = instance.lock();
                if !state.status.is_terminal() {
                    return Err(InstanceError::invalid_state("delete", state.status));
                }
                state.deleted = true;
                state.abort_restart();
            }
            self.instances.remove(id);
            let config = registry.remove(id).ok_or(InstanceError::NotFound(id))?;
            (config, registry.snapshot())
        };
        self.persist(snapshot).await?;

        if remove_files {
            for dir in [&config.working_dir, &config.backup_dir] {
                if let Err(err) = tokio::fs::remove_dir_all(dir).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!("could not remove {}: {}", dir.display(), err);
                    }
                }
            }
        }
        info!("instance {} deleted", id);
        Ok(config)
    }

    pub async fn get_report(&self, id: Uuid) -> InstanceResult<InstanceReport> {
        let config = self.config(id).await?;
        let instance = self.instance(id)?;
        Ok(build_report(config, &instance))
    }

    /// Reports of every instance, in creation order.
    pub async fn list(&self) -> Vec<InstanceReport> {
        let configs: Vec<InstanceConfig> = self.registry.read().await.iter().cloned().collect();
        configs
            .into_iter()
            .filter_map(|config| {
                let instance = self.instances.get(config.uuid)?;
                Some(build_report(config, &instance))
            })
            .collect()
    }

    pub async fn rename(&self, id: Uuid, name: &str) -> InstanceResult<InstanceConfig> {
        validate_name(name)?;
        self.update_config(id, |config| {
            config.name = name.trim().to_string();
            Ok(())
        })
        .await
    }

    /// Takes effect on the next start.
    pub async fn update_resource_settings(
        &self,
        id: Uuid,
        resources: ResourceSettings,
    ) -> InstanceResult<InstanceConfig> {
        validate_memory(resources.min_memory, resources.max_memory)?;
        if resources.max_players == 0 {
            return Err(InstanceError::Validation("max players must be positive".into()));
        }
        if let Some(port) = resources.port {
            validate_port(port)?;
        }

        let (config, snapshot) = {
            let mut registry = self.registry.write().await;
            if let Some(port) = resources.port {
                if let Some(owner) = registry.port_owner(port, Some(id)) {
                    return Err(InstanceError::PortConflict(port, owner));
                }
            }
            let config = registry.get_mut(id).ok_or(InstanceError::NotFound(id))?;
            config.min_memory = resources.min_memory;
            config.max_memory = resources.max_memory;
            config.max_players = resources.max_players;
            if let Some(port) = resources.port {
                config.port = port;
            }
            let config = config.clone();
            (config, registry.snapshot())
        };
        self.persist(snapshot).await?;
        Ok(config)
    }

    pub async fn set_auto_start(&self, id: Uuid, auto_start: bool) -> InstanceResult<InstanceConfig> {
        self.update_config(id, |config| {
            config.auto_start = auto_start;
            Ok(())
        })
        .await
    }

    pub async fn set_flags_preset(
        &self,
        id: Uuid,
        preset: FlagsPreset,
        performance_mode: bool,
    ) -> InstanceResult<InstanceConfig> {
        self.update_config(id, |config| {
            config.flags_preset = preset;
            config.performance_mode = performance_mode;
            Ok(())
        })
        .await
    }

    /// `None` restores the generated `java ... -jar server.jar nogui` form.
    pub async fn set_launch_command(
        &self,
        id: Uuid,
        command: Option<String>,
    ) -> InstanceResult<InstanceConfig> {
        let command = command.filter(|c| !c.trim().is_empty());
        self.update_config(id, |config| {
            config.launch_command = command;
            Ok(())
        })
        .await
    }

    /// Enables, changes or (with `None`) clears the recurring backup. The current time is
    /// recorded as the last run, so the first backup happens one period later.
    pub async fn set_backup_schedule(
        &self,
        id: Uuid,
        cadence: Option<BackupCadence>,
    ) -> InstanceResult<InstanceConfig> {
        let now = Utc::now();
        self.update_config(id, |config| {
            config.backup_cadence = cadence;
            config.last_scheduled_backup = cadence.map(|_| now);
            Ok(())
        })
        .await
    }

    pub fn subscribe_console(&self, id: Uuid, last_seen: u64) -> InstanceResult<ConsoleSubscription> {
        let instance = self.instance(id)?;
        let subscription = instance.lock().console.subscribe(last_seen);
        Ok(subscription)
    }

    /// Safe to call any number of times.
    pub fn unsubscribe_console(&self, id: Uuid, subscription: u64) -> InstanceResult<()> {
        let instance = self.instance(id)?;
        instance.lock().console.unsubscribe(subscription);
        Ok(())
    }

    /// Buffered console history, oldest first.
    pub fn console_history(&self, id: Uuid) -> InstanceResult<Vec<ConsoleEntry>> {
        let instance = self.instance(id)?;
        let history = instance.lock().console.entries().cloned().collect();
        Ok(history)
    }

    pub fn list_players(&self, id: Uuid) -> InstanceResult<Vec<Player>> {
        let instance = self.instance(id)?;
        let players = instance.lock().roster.players().to_vec();
        Ok(players)
    }

    pub fn latency_support(&self, id: Uuid) -> InstanceResult<LatencySupport> {
        let instance = self.instance(id)?;
        let latency = instance.lock().polling.latency.clone();
        Ok(latency)
    }

    pub async fn kick_player(&self, id: Uuid, player: &str, reason: Option<&str>) -> InstanceResult<()> {
        validate_player(player)?;
        self.send_command(id, &kick_command(player, reason)).await
    }

    pub async fn ban_player(&self, id: Uuid, player: &str, reason: Option<&str>) -> InstanceResult<()> {
        validate_player(player)?;
        self.send_command(id, &ban_command(player, reason)).await
    }

    pub async fn kill_player(&self, id: Uuid, player: &str) -> InstanceResult<()> {
        validate_player(player)?;
        self.send_command(id, &kill_command(player)).await
    }

    /// Stops every live instance; used when the daemon exits.
    pub async fn shutdown_all(&self) {
        let ids: Vec<Uuid> = self.registry.read().await.iter().map(|c| c.uuid).collect();
        let stops = ids.into_iter().filter_map(|id| {
            let instance = self.instances.get(id)?;
            {
                let mut state = instance.lock();
                state.abort_restart();
                if !state.status.is_alive() {
                    return None;
                }
            }
            Some(async move {
                if let Err(err) = self.stop(id).await {
                    warn!("failed to stop instance {} on shutdown: {}", id, err);
                }
            })
        });
        futures::future::join_all(stops).await;
    }

    /// Ids of instances flagged for auto-start.
    pub async fn auto_start_ids(&self) -> Vec<Uuid> {
        self.registry
            .read()
            .await
            .iter()
            .filter(|c| c.auto_start)
            .map(|c| c.uuid)
            .collect()
    }
}

fn build_report(config: InstanceConfig, instance: &Instance) -> InstanceReport {
    let state = instance.lock();
    InstanceReport {
        status: state.status,
        error: state.error.clone(),
        players: state.roster.players().to_vec(),
        performance_counter: state.metrics.clone(),
        restart_at: state.restart_at(),
        latency: state.polling.latency.clone(),
        config,
    }
}

fn validate_name(name: &str) -> InstanceResult<()> {
    if name.trim().is_empty() {
        return Err(InstanceError::Validation("name must not be empty".into()));
    }
    Ok(())
}

fn validate_port(port: u16) -> InstanceResult<()> {
    if port == 0 {
        return Err(InstanceError::Validation(
            "port must be between 1 and 65535".into(),
        ));
    }
    Ok(())
}

fn validate_memory(min: u32, max: u32) -> InstanceResult<()> {
    if min == 0 || min > max {
        return Err(InstanceError::Validation(format!(
            "memory limits must satisfy 0 < min <= max (got {} / {})",
            min, max
        )));
    }
    Ok(())
}

fn validate_player(name: &str) -> InstanceResult<()> {
    if !PLAYER_NAME.is_match(name) {
        return Err(InstanceError::Validation(format!(
            "invalid player name: {:?}",
            name
        )));
    }
    Ok(())
}

use std::path::{Path, PathBuf};

use log::debug;
use mcsm_protocol::management::instance::InstanceConfig;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::storage::file::{Config, FileIoWithBackup};

/// Durable instance configurations, in creation order.
#[derive(Debug, Default)]
pub struct Registry {
    configs: Vec<InstanceConfig>,
    generation: u64,
}

impl Registry {
    pub fn new(configs: Vec<InstanceConfig>) -> Self {
        Self {
            configs,
            generation: 0,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&InstanceConfig> {
        self.configs.iter().find(|c| c.uuid == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut InstanceConfig> {
        self.configs.iter_mut().find(|c| c.uuid == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceConfig> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Instance already bound to `port`, other than `except`.
    pub fn port_owner(&self, port: u16, except: Option<Uuid>) -> Option<Uuid> {
        self.configs
            .iter()
            .find(|c| c.port == port && Some(c.uuid) != except)
            .map(|c| c.uuid)
    }

    pub fn insert(&mut self, config: InstanceConfig) {
        self.configs.push(config);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<InstanceConfig> {
        let index = self.configs.iter().position(|c| c.uuid == id)?;
        Some(self.configs.remove(index))
    }

    /// Copy of the configurations tagged with a fresh generation number.
    pub fn snapshot(&mut self) -> RegistrySnapshot {
        self.generation += 1;
        RegistrySnapshot {
            generation: self.generation,
            configs: self.configs.clone(),
        }
    }
}

pub struct RegistrySnapshot {
    generation: u64,
    configs: Vec<InstanceConfig>,
}

/// Outer lock over the registry. Held only for structural changes and snapshots,
/// never across file or process I/O.
#[derive(Default)]
pub struct RegistryLock(RwLock<Registry>);

impl RegistryLock {
    pub fn new(registry: Registry) -> Self {
        Self(RwLock::new(registry))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.0.write().await
    }
}

struct RegistryFile;

impl FileIoWithBackup for RegistryFile {}

impl Config for RegistryFile {
    type ConfigType = Vec<InstanceConfig>;
}

/// Writes registry snapshots to disk, never letting an older snapshot replace a newer one.
pub struct RegistryWriter {
    path: PathBuf,
    written: Mutex<u64>,
}

impl RegistryWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Vec<InstanceConfig>> {
        RegistryFile::load_config_or_default(&self.path, Vec::new)
    }

    pub async fn write(&self, snapshot: RegistrySnapshot) -> anyhow::Result<()> {
        let mut written = self.written.lock().await;
        if *written >= snapshot.generation {
            debug!(
                "registry generation {} already superseded by {}",
                snapshot.generation, *written
            );
            return Ok(());
        }
        let path = self.path.clone();
        let configs = snapshot.configs;
        tokio::task::spawn_blocking(move || RegistryFile::save_config(&path, &configs))
            .await
            .map_err(anyhow::Error::from)??;
        *written = snapshot.generation;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsm_protocol::management::instance::{FlagsPreset, InstanceType};
    use mcsm_protocol::utils::Encoding;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(name: &str, port: u16) -> InstanceConfig {
        InstanceConfig {
            uuid: Uuid::new_v4(),
            name: name.into(),
            instance_type: InstanceType::Vanilla,
            version: "1.20.4".into(),
            port,
            min_memory: 512,
            max_memory: 1024,
            max_players: 10,
            working_dir: PathBuf::from(name),
            backup_dir: PathBuf::from("backups").join(name),
            launch_command: None,
            flags_preset: FlagsPreset::None,
            performance_mode: false,
            auto_start: false,
            backup_cadence: None,
            last_scheduled_backup: None,
            java_path: "java".into(),
            input_encoding: Encoding::UTF8,
            output_encoding: Encoding::UTF8,
            env: HashMap::new(),
        }
    }

    #[test]
    fn port_owner_ignores_self() {
        let mut registry = Registry::default();
        let a = config("a", 25565);
        let id = a.uuid;
        registry.insert(a);
        assert_eq!(registry.port_owner(25565, None), Some(id));
        assert_eq!(registry.port_owner(25565, Some(id)), None);
        assert_eq!(registry.port_owner(25566, None), None);
    }

    #[tokio::test]
    async fn stale_snapshot_never_overwrites_newer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RegistryWriter::new(dir.path().join("instances.json"));
        let mut registry = Registry::default();

        registry.insert(config("a", 25565));
        let old = registry.snapshot();
        registry.insert(config("b", 25566));
        let new = registry.snapshot();

        writer.write(new).await.unwrap();
        writer.write(old).await.unwrap();

        let names: Vec<String> = writer.load().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RegistryWriter::new(dir.path().join("instances.json"));
        assert!(writer.load().unwrap().is_empty());
        assert!(writer.path().is_file());
    }
}

//! Fixtures shared by the manager tests.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use mcsm_protocol::management::instance::{
    InstanceConfig, InstanceFactorySetting, InstanceStatus, InstanceType,
};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::management::InstanceManager;

/// Prints the ready banner, logs every input line and answers a few commands.
const FAKE_SERVER: &str = r#"echo "[12:00:00 INFO]: Starting minecraft server version 1.20.4"
echo '[12:00:01 INFO]: Done (1.234s)! For help, type "help"'
while IFS= read -r line; do
  echo "$line" >> commands.log
  case "$line" in
    stop) echo "[12:00:02 INFO]: Stopping the server"; exit 0 ;;
    crash) exit 3 ;;
    list) echo "[12:00:02 INFO]: There are 0 of a max of 20 players online:" ;;
  esac
done
"#;

/// Boots like [`FAKE_SERVER`] but ignores `stop`, so only a kill ends it.
const STUBBORN_SERVER: &str = r#"echo '[12:00:01 INFO]: Done (0.500s)! For help, type "help"'
while IFS= read -r line; do
  echo "$line" >> commands.log
done
"#;

pub fn test_manager() -> (tempfile::TempDir, Arc<InstanceManager>) {
    test_manager_with(|_| {})
}

pub fn test_manager_with<F>(customize: F) -> (tempfile::TempDir, Arc<InstanceManager>)
where
    F: FnOnce(&mut AppConfig),
{
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.root = dir.path().join("daemon");
    config.supervisor.stop_timeout_secs = 5;
    config.supervisor.kill_timeout_secs = 5;
    customize(&mut config);

    let cores = config.storage.root.join(&config.storage.cores_dir);
    for flavor in [InstanceType::Vanilla, InstanceType::Paper] {
        let flavor_dir = cores.join(flavor.as_str());
        fs::create_dir_all(&flavor_dir).unwrap();
        for version in ["1.19.4", "1.20.4", "24w09a"] {
            fs::write(flavor_dir.join(format!("{}.jar", version)), version).unwrap();
        }
    }

    let manager = InstanceManager::load(config).unwrap();
    (dir, manager)
}

pub fn setting(name: &str, port: u16) -> InstanceFactorySetting {
    let mut setting = InstanceFactorySetting::new(name, InstanceType::Vanilla, port);
    setting.version = "1.20.4".into();
    setting.min_memory = 512;
    setting.max_memory = 1024;
    setting
}

pub async fn wait_for_status(manager: &InstanceManager, id: Uuid, expected: InstanceStatus) {
    let instance = manager.instance(id).unwrap();
    for _ in 0..100 {
        if instance.status() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "instance {} stayed {} instead of {}",
        id,
        instance.status(),
        expected
    );
}

/// Replaces the java launch with a shell script that behaves like a tiny server.
pub async fn install_fake_server(manager: &InstanceManager, id: Uuid) -> InstanceConfig {
    install_script(manager, id, FAKE_SERVER).await
}

pub async fn install_stubborn_server(manager: &InstanceManager, id: Uuid) -> InstanceConfig {
    install_script(manager, id, STUBBORN_SERVER).await
}

async fn install_script(manager: &InstanceManager, id: Uuid, script: &str) -> InstanceConfig {
    let config = manager.config(id).await.unwrap();
    fs::write(config.working_dir.join("fake_server.sh"), script).unwrap();
    manager
        .set_launch_command(id, Some("sh fake_server.sh".into()))
        .await
        .unwrap()
}

/// Lines the fake server received on its input.
pub fn read_command_log(config: &InstanceConfig) -> Vec<String> {
    fs::read_to_string(config.working_dir.join("commands.log"))
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

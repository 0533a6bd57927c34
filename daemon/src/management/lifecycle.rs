use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use mcsm_protocol::management::instance::{InstanceConfig, InstanceStatus};
use mcsm_protocol::utils::Encoding;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PollingConfig;
use crate::management::comm::{read_lines, spawn_process, ProcessHelper};
use crate::management::config::InstanceConfigExt;
use crate::management::console::ingest_line;
use crate::management::error::{InstanceError, InstanceResult};
use crate::management::instance::{DisabledDir, Instance, ProcessHandle};
use crate::management::manager::InstanceManager;
use crate::management::minecraft::{sync_server_properties, FlavorExt};
use crate::management::monitor::{self, MonitorContext};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

impl InstanceManager {
    pub async fn start(self: &Arc<Self>, id: Uuid) -> InstanceResult<()> {
        let config = self.config(id).await?;
        let instance = self.instance(id)?;
        let (previous, launch_id) = begin_start(&instance)?;
        self.launch_or_revert(instance, config, previous, launch_id, vec![])
            .await
    }

    /// Starts with the flavor's plugin/mod directories renamed away. They are put back
    /// once the process exits.
    pub async fn start_safe_mode(self: &Arc<Self>, id: Uuid) -> InstanceResult<()> {
        let config = self.config(id).await?;
        let instance = self.instance(id)?;
        let (previous, launch_id) = begin_start(&instance)?;
        let disabled = match disable_extensions(&config).await {
            Ok(disabled) => disabled,
            Err(err) => {
                revert_start(&instance, launch_id, previous, &err);
                return Err(err);
            }
        };
        info!(
            "instance {} starting in safe mode ({} dir(s) disabled)",
            id,
            disabled.len()
        );
        self.launch_or_revert(instance, config, previous, launch_id, disabled)
            .await
    }

    async fn launch_or_revert(
        self: &Arc<Self>,
        instance: Arc<Instance>,
        config: InstanceConfig,
        previous: InstanceStatus,
        launch_id: u64,
        disabled: Vec<DisabledDir>,
    ) -> InstanceResult<()> {
        match self
            .launch(Arc::clone(&instance), &config, launch_id, disabled.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("failed to start instance {}: {}", instance.id, err);
                revert_start(&instance, launch_id, previous, &err);
                restore_extensions(disabled).await;
                Err(err)
            }
        }
    }

    async fn launch(
        self: &Arc<Self>,
        instance: Arc<Instance>,
        config: &InstanceConfig,
        launch_id: u64,
        disabled: Vec<DisabledDir>,
    ) -> InstanceResult<()> {
        let start_info = config.get_start_info()?;
        if let Err(err) =
            sync_server_properties(&config.working_dir, &config.managed_properties()).await
        {
            warn!("instance {}: server.properties not updated: {:#}", instance.id, err);
        }

        debug!(
            "instance {}: launching {} {:?}",
            instance.id, start_info.target, start_info.args
        );
        let mut child = spawn_process(start_info)
            .map_err(|e| InstanceError::Launch(format!("failed to spawn process: {}", e)))?;
        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(InstanceError::Launch("process streams are not piped".into()));
            }
        };

        let pid = child.id();
        let kill = Arc::new(Notify::new());
        let wakeup = Arc::new(Notify::new());
        let (exited_tx, exited_rx) = watch::channel(false);

        let sink = {
            let mut state = instance.lock();
            state.console.reset();
            state.clear_live_state();
            state.polling.latency = config.instance_type.latency_support();
            state.metrics.pid = pid;
            state.disabled_dirs = disabled;
            let handle = ProcessHandle {
                pid,
                stdin: Arc::new(tokio::sync::Mutex::new(stdin)),
                input_encoding: config.input_encoding,
                kill: Arc::clone(&kill),
                exited: exited_rx.clone(),
                wakeup: Arc::clone(&wakeup),
            };
            let sink = handle.sink();
            state.process = Some(handle);
            sink
        };
        instance.launch_settled.notify_waiters();
        info!("instance {} launched (pid {:?})", instance.id, pid);

        let polling = self.settings.polling.clone();
        let drains = vec![
            spawn_drain(stdout, Arc::clone(&instance), config.output_encoding, polling.clone()),
            spawn_drain(stderr, Arc::clone(&instance), config.output_encoding, polling.clone()),
        ];
        tokio::spawn(monitor::run(MonitorContext {
            instance: Arc::clone(&instance),
            flavor: config.instance_type,
            pid,
            sink,
            exited: exited_rx,
            wakeup,
            polling,
        }));
        tokio::spawn(watch_exit(instance, child, launch_id, kill, drains, exited_tx));
        Ok(())
    }

    /// Asks the server to stop, then kills the process tree if it does not exit in time.
    /// A stop that arrives while a start is still preparing waits for the launch to settle.
    pub async fn stop(&self, id: Uuid) -> InstanceResult<()> {
        let instance = self.instance(id)?;
        let mut waited = false;
        let (sink, kill, mut exited, launch_id) = loop {
            let settled = instance.launch_settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            {
                let mut state = instance.lock();
                if state.deleted {
                    return Err(InstanceError::NotFound(id));
                }
                let alive = state.status.is_alive();
                let handles = state
                    .process
                    .as_ref()
                    .filter(|_| alive)
                    .map(|process| (process.sink(), Arc::clone(&process.kill), process.exited.clone()));
                match handles {
                    Some((sink, kill, exited)) => {
                        state.stopping = true;
                        break (sink, kill, exited, state.launch_id);
                    }
                    None if state.status == InstanceStatus::Booting => {}
                    // the launch failed and already left a terminal status behind
                    None if waited && state.status.is_terminal() => return Ok(()),
                    None => return Err(InstanceError::invalid_state("stop", state.status)),
                }
            }
            debug!("instance {}: stop waits for the launch to settle", id);
            settled.await;
            waited = true;
        };
        info!("stopping instance {}", id);

        if let Err(err) = sink.send("stop").await {
            warn!("instance {}: stop command not delivered ({}), killing", id, err);
            kill.notify_one();
        }

        let supervisor = &self.settings.supervisor;
        let exited_in_time = tokio::time::timeout(supervisor.stop_timeout(), exited.wait_for(|e| *e))
            .await
            .is_ok();
        if !exited_in_time {
            warn!(
                "instance {} did not exit within {:?}, killing",
                id,
                supervisor.stop_timeout()
            );
            kill.notify_one();
            let killed = tokio::time::timeout(supervisor.kill_timeout(), exited.wait_for(|e| *e))
                .await
                .is_ok();
            if !killed {
                error!("instance {} still running after kill", id);
            }
        }

        let mut state = instance.lock();
        if state.launch_id == launch_id {
            state.status = InstanceStatus::Stopped;
            state.error = None;
            state.stopping = false;
            state.clear_live_state();
            state.abort_restart();
        }
        Ok(())
    }

    /// Writes one line to the server's input.
    pub async fn send_command(&self, id: Uuid, command: &str) -> InstanceResult<()> {
        if command.contains(['\n', '\r']) {
            return Err(InstanceError::Validation(
                "command must be a single line".into(),
            ));
        }
        let instance = self.instance(id)?;
        let sink = {
            let state = instance.lock();
            if state.deleted {
                return Err(InstanceError::NotFound(id));
            }
            if !state.status.is_alive() {
                return Err(InstanceError::invalid_state("send a command", state.status));
            }
            state
                .process
                .as_ref()
                .map(ProcessHandle::sink)
                .ok_or(InstanceError::NoInput)?
        };
        sink.send(command)
            .await
            .map_err(|e| InstanceError::Internal(e.into()))
    }
}

/// Moves the instance to `Booting` and claims a new launch id.
fn begin_start(instance: &Instance) -> InstanceResult<(InstanceStatus, u64)> {
    let mut state = instance.lock();
    if state.deleted {
        return Err(InstanceError::NotFound(instance.id));
    }
    if !state.status.is_terminal() || state.process.is_some() {
        return Err(InstanceError::invalid_state("start", state.status));
    }
    let previous = state.status;
    state.status = InstanceStatus::Booting;
    state.error = None;
    state.stopping = false;
    state.launch_id += 1;
    Ok((previous, state.launch_id))
}

fn revert_start(instance: &Instance, launch_id: u64, previous: InstanceStatus, err: &InstanceError) {
    let mut state = instance.lock();
    if state.launch_id == launch_id && state.status == InstanceStatus::Booting {
        state.status = previous;
        state.error = Some(err.to_string());
        state.console.push(format!("[daemon] failed to start: {}", err), true);
    }
    drop(state);
    instance.launch_settled.notify_waiters();
}

fn spawn_drain<R>(
    reader: R,
    instance: Arc<Instance>,
    encoding: Encoding,
    polling: PollingConfig,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        read_lines(reader, encoding, |line| ingest_line(&instance, line, &polling)).await;
    })
}

/// Owns the child until it exits, then reconciles the instance state.
async fn watch_exit(
    instance: Arc<Instance>,
    mut child: Child,
    launch_id: u64,
    kill: Arc<Notify>,
    drains: Vec<JoinHandle<()>>,
    exited: watch::Sender<bool>,
) {
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            if let Some(pid) = pid {
                if let Err(err) = ProcessHelper::kill_tree(pid) {
                    warn!("instance {}: failed to kill process tree {}: {}", instance.id, pid, err);
                }
            }
            let _ = child.start_kill();
            child.wait().await
        }
    };

    // let buffered output reach the console before the state flips
    for drain in drains {
        let abort = drain.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            abort.abort();
        }
    }

    let exit = match &status {
        Ok(status) => status.to_string(),
        Err(err) => format!("unknown exit status ({})", err),
    };
    let clean = matches!(&status, Ok(status) if status.success());

    let disabled = {
        let mut state = instance.lock();
        if state.launch_id != launch_id {
            debug!("instance {}: stale exit of launch {} ignored", instance.id, launch_id);
            vec![]
        } else {
            if state.status.is_alive() {
                if state.stopping || clean {
                    info!("instance {} stopped ({})", instance.id, exit);
                    state.status = InstanceStatus::Stopped;
                } else {
                    warn!("instance {} crashed ({})", instance.id, exit);
                    state.status = InstanceStatus::Crashed;
                    state.error = Some(format!("process exited unexpectedly: {}", exit));
                    state.abort_restart();
                }
            }
            state.console.push(format!("[daemon] process exited: {}", exit), true);
            state.process = None;
            state.stopping = false;
            state.clear_live_state();
            std::mem::take(&mut state.disabled_dirs)
        }
    };
    restore_extensions(disabled).await;
    exited.send_replace(true);
}

async fn disable_extensions(config: &InstanceConfig) -> InstanceResult<Vec<DisabledDir>> {
    let mut disabled = vec![];
    for dir in config.instance_type.extension_dirs() {
        let original = config.working_dir.join(dir);
        if !original.is_dir() {
            continue;
        }
        let target = config.working_dir.join(format!("{}.disabled", dir));
        if target.exists() {
            restore_extensions(disabled).await;
            return Err(InstanceError::Validation(format!(
                "{} already exists",
                target.display()
            )));
        }
        if let Err(err) = tokio::fs::rename(&original, &target).await {
            restore_extensions(disabled).await;
            return Err(InstanceError::Internal(err.into()));
        }
        disabled.push(DisabledDir {
            original,
            disabled: target,
        });
    }
    Ok(disabled)
}

async fn restore_extensions(dirs: Vec<DisabledDir>) {
    for dir in dirs {
        // servers recreate an empty plugin dir on boot
        if dir.original.is_dir() && !remove_if_empty(&dir.original).await {
            warn!(
                "{} was recreated with content, leaving {} in place",
                dir.original.display(),
                dir.disabled.display()
            );
            continue;
        }
        if let Err(err) = tokio::fs::rename(&dir.disabled, &dir.original).await {
            warn!(
                "failed to restore {} from {}: {}",
                dir.original.display(),
                dir.disabled.display(),
                err
            );
        }
    }
}

async fn remove_if_empty(dir: &Path) -> bool {
    tokio::fs::remove_dir(dir).await.is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::management::testing::{
        install_fake_server, install_stubborn_server, read_command_log, setting, test_manager,
        test_manager_with, wait_for_status,
    };
    use mcsm_protocol::management::instance::InstanceType;
    use pretty_assertions::assert_eq;
    use std::fs;

    async fn running_instance(
        manager: &Arc<InstanceManager>,
        flavor: InstanceType,
    ) -> InstanceConfig {
        let mut setting = setting("fake", 25565);
        setting.instance_type = flavor;
        let created = manager.create(setting).await.unwrap();
        wait_for_status(manager, created.uuid, InstanceStatus::Stopped).await;
        install_fake_server(manager, created.uuid).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_boots_then_runs_with_one_roster_query() {
        let (_dir, manager) = test_manager_with(|config| {
            config.polling.ready_refresh_delay_ms = 100;
            config.polling.metrics_interval_ms = 100;
        });
        let config = running_instance(&manager, InstanceType::Vanilla).await;
        let id = config.uuid;

        manager.start(id).await.unwrap();
        assert!(manager.instance(id).unwrap().status().is_alive());

        wait_for_status(&manager, id, InstanceStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let commands = read_command_log(&config);
        assert_eq!(commands.iter().filter(|c| *c == "list").count(), 1);

        let history = manager.console_history(id).unwrap();
        assert!(history.iter().any(|e| e.line.contains("Done (")));
        assert!(matches!(
            manager.start(id).await,
            Err(InstanceError::InvalidState { action: "start", .. })
        ));

        manager.stop(id).await.unwrap();
        assert_eq!(manager.instance(id).unwrap().status(), InstanceStatus::Stopped);
        assert!(read_command_log(&config).contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn stop_when_stopped_is_rejected() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Vanilla).await;

        let err = manager.stop(config.uuid).await.unwrap_err();
        assert!(matches!(
            err,
            InstanceError::InvalidState { action: "stop", status: InstanceStatus::Stopped }
        ));
        assert_eq!(
            manager.instance(config.uuid).unwrap().status(),
            InstanceStatus::Stopped
        );
        assert!(matches!(
            manager.send_command(config.uuid, "say hi").await,
            Err(InstanceError::InvalidState { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unexpected_exit_is_a_crash() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Vanilla).await;
        let id = config.uuid;

        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        assert!(matches!(
            manager.send_command(id, "say a\nop b").await,
            Err(InstanceError::Validation(_))
        ));
        manager.send_command(id, "crash").await.unwrap();

        wait_for_status(&manager, id, InstanceStatus::Crashed).await;
        let report = manager.get_report(id).await.unwrap();
        assert!(report.error.unwrap().contains("unexpectedly"));
        assert!(report.players.is_empty());

        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        manager.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn failed_launch_reverts_status() {
        let (_dir, manager) = test_manager();
        let created = manager.create(setting("broken", 25565)).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        manager
            .set_launch_command(id, Some("/nonexistent/binary --nogui".into()))
            .await
            .unwrap();

        assert!(matches!(manager.start(id).await, Err(InstanceError::Launch(_))));
        let report = manager.get_report(id).await.unwrap();
        assert_eq!(report.status, InstanceStatus::Stopped);
        assert!(report.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn safe_mode_restores_plugin_dir() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Paper).await;
        let id = config.uuid;
        let plugins = config.working_dir.join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        fs::write(plugins.join("broken.jar"), b"x").unwrap();

        manager.start_safe_mode(id).await.unwrap();
        assert!(!plugins.exists());
        assert!(config.working_dir.join("plugins.disabled/broken.jar").is_file());
        wait_for_status(&manager, id, InstanceStatus::Running).await;

        manager.stop(id).await.unwrap();
        // restoration happens on the exit watcher
        for _ in 0..50 {
            if plugins.join("broken.jar").is_file() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(plugins.join("broken.jar").is_file());
        assert!(!config.working_dir.join("plugins.disabled").exists());
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..50 {
            if path.is_file() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn safe_mode_restores_plugin_dir_after_crash() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Paper).await;
        let id = config.uuid;
        let plugins = config.working_dir.join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        fs::write(plugins.join("broken.jar"), b"x").unwrap();

        manager.start_safe_mode(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        manager.send_command(id, "crash").await.unwrap();

        wait_for_status(&manager, id, InstanceStatus::Crashed).await;
        wait_for_file(&plugins.join("broken.jar")).await;
        assert!(!config.working_dir.join("plugins.disabled").exists());
    }

    #[tokio::test]
    async fn safe_mode_restores_plugin_dir_when_launch_fails() {
        let (_dir, manager) = test_manager();
        let mut setting = setting("broken", 25565);
        setting.instance_type = InstanceType::Paper;
        let created = manager.create(setting).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        let config = manager
            .set_launch_command(id, Some("/nonexistent/binary --nogui".into()))
            .await
            .unwrap();
        let plugins = config.working_dir.join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        fs::write(plugins.join("broken.jar"), b"x").unwrap();

        assert!(matches!(
            manager.start_safe_mode(id).await,
            Err(InstanceError::Launch(_))
        ));
        assert!(plugins.join("broken.jar").is_file());
        assert!(!config.working_dir.join("plugins.disabled").exists());
        let report = manager.get_report(id).await.unwrap();
        assert_eq!(report.status, InstanceStatus::Stopped);
        assert!(report.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_kills_a_server_that_ignores_it() {
        let (_dir, manager) = test_manager_with(|config| {
            config.supervisor.stop_timeout_secs = 1;
        });
        let created = manager.create(setting("stubborn", 25565)).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        let config = install_stubborn_server(&manager, id).await;

        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        let pid = manager.instance(id).unwrap().lock().metrics.pid.unwrap();

        manager.stop(id).await.unwrap();
        assert_eq!(manager.instance(id).unwrap().status(), InstanceStatus::Stopped);
        assert!(read_command_log(&config).contains(&"stop".to_string()));
        let liveness = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None);
        assert!(liveness.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_waits_for_a_launch_in_progress() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Vanilla).await;
        let id = config.uuid;
        let instance = manager.instance(id).unwrap();

        let (previous, launch_id) = begin_start(&instance).unwrap();
        let stopping = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop(id).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!stopping.is_finished());

        manager
            .launch_or_revert(Arc::clone(&instance), config.clone(), previous, launch_id, vec![])
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(10), stopping)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(instance.status(), InstanceStatus::Stopped);
        assert!(instance.lock().process.is_none());
        assert!(read_command_log(&config).contains(&"stop".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_during_a_failing_launch_settles() {
        let (_dir, manager) = test_manager();
        let config = running_instance(&manager, InstanceType::Vanilla).await;
        let id = config.uuid;
        let instance = manager.instance(id).unwrap();

        let (previous, launch_id) = begin_start(&instance).unwrap();
        let stopping = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.stop(id).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        revert_start(
            &instance,
            launch_id,
            previous,
            &InstanceError::Launch("no java".into()),
        );

        tokio::time::timeout(Duration::from_secs(5), stopping)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(instance.status(), InstanceStatus::Stopped);
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use mcsm_protocol::management::instance::InstanceStatus;
use uuid::Uuid;

use crate::management::error::{InstanceError, InstanceResult};
use crate::management::instance::RestartTimer;
use crate::management::manager::InstanceManager;
use crate::management::minecraft::say_command;

impl InstanceManager {
    /// Schedules a restart of a running instance in `delay_secs`, replacing any earlier
    /// one. Players are warned before the stop.
    pub fn schedule_restart(
        self: &Arc<Self>,
        id: Uuid,
        delay_secs: u64,
    ) -> InstanceResult<DateTime<Utc>> {
        let instance = self.instance(id)?;
        let delay = Duration::from_secs(delay_secs);
        let at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|_| InstanceError::Validation("restart delay is too large".into()))?;

        let mut state = instance.lock();
        if state.deleted {
            return Err(InstanceError::NotFound(id));
        }
        if state.status != InstanceStatus::Running {
            return Err(InstanceError::invalid_state("schedule a restart", state.status));
        }
        if state.abort_restart() {
            info!("instance {}: previous restart replaced", id);
        }
        let token = self.next_restart_token();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.fire_restart(id, token, delay).await });
        state.restart = Some(RestartTimer { token, at, task });
        info!("instance {}: restart scheduled at {}", id, at);
        Ok(at)
    }

    pub fn cancel_restart(&self, id: Uuid) -> InstanceResult<()> {
        let instance = self.instance(id)?;
        if instance.lock().abort_restart() {
            info!("instance {}: scheduled restart cancelled", id);
            Ok(())
        } else {
            Err(InstanceError::NoRestartScheduled)
        }
    }

    async fn fire_restart(self: Arc<Self>, id: Uuid, token: u64, delay: Duration) {
        let warning = Duration::from_secs(self.settings.scheduler.restart_warning_secs);
        tokio::time::sleep(delay.saturating_sub(warning)).await;

        let lead = delay.min(warning);
        let notice = say_command(&format!("Server restarts in {} seconds", lead.as_secs()));
        if let Err(err) = self.send_command(id, &notice).await {
            warn!("instance {}: restart warning not sent: {}", id, err);
        }
        tokio::time::sleep(lead).await;

        // from here on the restart can no longer be cancelled
        let Ok(instance) = self.instance(id) else {
            return;
        };
        {
            let mut state = instance.lock();
            if state.restart.as_ref().map(|timer| timer.token) != Some(token) {
                return;
            }
            state.restart = None;
        }

        info!("instance {}: restarting", id);
        if let Err(err) = self.send_command(id, &say_command("Server is restarting now")).await {
            warn!("instance {}: final restart warning not sent: {}", id, err);
        }
        if let Err(err) = self.stop(id).await {
            warn!("instance {}: restart skipped, stop failed: {}", id, err);
            return;
        }
        tokio::time::sleep(Duration::from_millis(self.settings.scheduler.restart_settle_ms)).await;
        if let Err(err) = self.start(id).await {
            warn!("instance {}: restart could not start the server: {}", id, err);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::management::testing::{
        install_fake_server, read_command_log, setting, test_manager, test_manager_with,
        wait_for_status,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn restart_requires_running() {
        let (_dir, manager) = test_manager();
        let created = manager.create(setting("a", 25565)).await.unwrap();
        wait_for_status(&manager, created.uuid, InstanceStatus::Stopped).await;

        assert!(matches!(
            manager.schedule_restart(created.uuid, 60),
            Err(InstanceError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.cancel_restart(created.uuid),
            Err(InstanceError::NoRestartScheduled)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_before_firing_keeps_server_up() {
        let (_dir, manager) = test_manager();
        let created = manager.create(setting("a", 25565)).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        let config = install_fake_server(&manager, id).await;
        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;

        let at = manager.schedule_restart(id, 60).unwrap();
        assert_eq!(manager.get_report(id).await.unwrap().restart_at, Some(at));
        // rescheduling replaces the timer
        manager.schedule_restart(id, 120).unwrap();
        manager.cancel_restart(id).unwrap();
        assert!(manager.get_report(id).await.unwrap().restart_at.is_none());
        assert!(matches!(
            manager.cancel_restart(id),
            Err(InstanceError::NoRestartScheduled)
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.instance(id).unwrap().status(), InstanceStatus::Running);
        assert!(!read_command_log(&config).contains(&"stop".to_string()));
        manager.stop(id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn immediate_restart_cycles_once() {
        let (_dir, manager) = test_manager_with(|config| {
            config.scheduler.restart_settle_ms = 50;
        });
        let created = manager.create(setting("a", 25565)).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        let config = install_fake_server(&manager, id).await;
        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        let first_launch = manager.instance(id).unwrap().lock().launch_id;

        manager.schedule_restart(id, 0).unwrap();
        // a cancel racing the firing timer must not panic or double start
        let _ = manager.cancel_restart(id);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let launch_id = manager.instance(id).unwrap().lock().launch_id;
        assert!(launch_id <= first_launch + 1);
        let stops = read_command_log(&config)
            .iter()
            .filter(|c| *c == "stop")
            .count();
        assert!(stops <= 1);

        if manager.instance(id).unwrap().status().is_alive() {
            wait_for_status(&manager, id, InstanceStatus::Running).await;
            manager.stop(id).await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn immediate_restart_still_warns_first() {
        let (_dir, manager) = test_manager_with(|config| {
            config.scheduler.restart_settle_ms = 50;
        });
        let created = manager.create(setting("a", 25565)).await.unwrap();
        let id = created.uuid;
        wait_for_status(&manager, id, InstanceStatus::Stopped).await;
        let config = install_fake_server(&manager, id).await;
        manager.start(id).await.unwrap();
        wait_for_status(&manager, id, InstanceStatus::Running).await;
        let instance = manager.instance(id).unwrap();
        let first_launch = instance.lock().launch_id;

        manager.schedule_restart(id, 0).unwrap();
        for _ in 0..100 {
            if instance.lock().launch_id > first_launch {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        wait_for_status(&manager, id, InstanceStatus::Running).await;

        let log = read_command_log(&config);
        let position = |line: &str| log.iter().position(|c| c == line);
        let warning = position("say Server restarts in 0 seconds").unwrap();
        let last_call = position("say Server is restarting now").unwrap();
        let stop = position("stop").unwrap();
        assert!(warning < last_call && last_call < stop);
        manager.stop(id).await.unwrap();
    }
}

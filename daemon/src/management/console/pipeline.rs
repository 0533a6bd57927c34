use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use mcsm_protocol::management::instance::InstanceStatus;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::PollingConfig;
use crate::management::console::parser::{parse_line, ConsoleEvent};
use crate::management::instance::{Instance, RuntimeState};
use crate::management::polling::PollingState;

/// Feeds one raw output line through parsing, state updates and the console buffer.
/// The original line is buffered; polling replies are kept out of the live broadcast.
pub fn ingest_line(instance: &Instance, line: String, config: &PollingConfig) {
    let events = parse_line(&line);
    let now = Instant::now();
    let utc = Utc::now();

    let mut state = instance.lock();
    let suppressed = is_polling_echo(&events, &state.polling, now, config);
    let mut wake = false;
    for event in events {
        wake |= apply_event(&mut state, instance.id, event, now, utc, config);
    }
    state.console.push(line, !suppressed);
    if wake {
        if let Some(process) = &state.process {
            process.wakeup.notify_one();
        }
    }
}

/// Appends a daemon-originated line (install progress etc.) to the console.
pub fn push_notice(instance: &Instance, line: String) {
    instance.lock().console.push(line, true);
}

fn is_polling_echo(
    events: &[ConsoleEvent],
    polling: &PollingState,
    now: Instant,
    config: &PollingConfig,
) -> bool {
    events.iter().any(|event| match (event, event.family()) {
        (_, Some(family)) => polling.is_echo(family, now, config),
        (ConsoleEvent::UnknownCommand, None) => polling.is_unknown_command_echo(now, config),
        _ => false,
    })
}

/// Returns whether the monitor loop should re-plan early.
fn apply_event(
    state: &mut RuntimeState,
    id: Uuid,
    event: ConsoleEvent,
    now: Instant,
    utc: DateTime<Utc>,
    config: &PollingConfig,
) -> bool {
    match event {
        ConsoleEvent::Ready => {
            if state.status == InstanceStatus::Booting {
                state.status = InstanceStatus::Running;
                info!("instance {} is running", id);
            }
            state
                .polling
                .request_roster_refresh(now + Duration::from_millis(config.ready_refresh_delay_ms));
            true
        }
        ConsoleEvent::PlayerJoined { name, address } => {
            debug!("instance {}: {} joined", id, name);
            state.roster.join(&name, address, utc);
            state.polling.pending_world.insert(name);
            state
                .polling
                .request_roster_refresh(now + Duration::from_millis(config.join_refresh_delay_ms));
            true
        }
        ConsoleEvent::PlayerLeft { name } => {
            debug!("instance {}: {} left", id, name);
            state.roster.leave(&name);
            state.polling.forget_player(&name);
            state
                .polling
                .request_roster_refresh(now + Duration::from_millis(config.join_refresh_delay_ms));
            true
        }
        ConsoleEvent::Tps(tps) => {
            state.metrics.tps = Some(tps);
            false
        }
        ConsoleEvent::PlayerWorld { name, world } => {
            state.polling.pending_world.remove(&name);
            state.roster.set_world(&name, world);
            false
        }
        ConsoleEvent::PlayerList { names, .. } => {
            let before = state.roster.names();
            let added = state.roster.reconcile(&names, utc);
            for gone in before.iter().filter(|n| !names.contains(n)) {
                state.polling.forget_player(gone);
            }
            let wake = !added.is_empty();
            state.polling.pending_world.extend(added);
            wake
        }
        ConsoleEvent::PlayerPing { name, ms } => {
            state.roster.set_ping(&name, ms);
            false
        }
        ConsoleEvent::PlayerNotFound => {
            if let Some(target) = state.polling.last_ping_target.take() {
                debug!("instance {}: {} excluded from latency polling", id, target);
                state.polling.exclude_from_ping(
                    target,
                    now + Duration::from_secs(config.ping_exclusion_secs),
                );
            }
            false
        }
        ConsoleEvent::EntityNotFound | ConsoleEvent::UnknownCommand => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::management::console::CommandFamily;
    use mcsm_protocol::console::ConsoleFrame;
    use mcsm_protocol::management::minecraft::LatencySupport;
    use pretty_assertions::assert_eq;

    fn instance(status: InstanceStatus) -> Instance {
        Instance::new(
            Uuid::new_v4(),
            RuntimeState::new(status, &SupervisorConfig::default(), LatencySupport::supported()),
        )
    }

    #[test]
    fn ready_banner_runs_and_schedules_refresh() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Booting);
        ingest_line(
            &instance,
            r#"[12:00:00 INFO]: Done (4.2s)! For help, type "help""#.into(),
            &config,
        );

        let state = instance.lock();
        assert_eq!(state.status, InstanceStatus::Running);
        assert!(state.polling.roster_refresh_due.is_some());
        assert_eq!(state.console.newest_seq(), Some(1));
    }

    #[test]
    fn listing_drops_players_not_listed() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Running);
        for line in [
            "[12:00:00 INFO]: A joined the game",
            "[12:00:01 INFO]: C joined the game",
            "[12:00:02 INFO]: There are 2 of a max of 20 players online: A, B",
        ] {
            ingest_line(&instance, line.to_string(), &config);
        }

        let state = instance.lock();
        assert_eq!(state.roster.names(), vec!["A".to_string(), "B".to_string()]);
        assert!(state.polling.pending_world.contains("B"));
        assert!(!state.polling.pending_world.contains("C"));
    }

    #[test]
    fn polling_replies_are_buffered_but_not_broadcast() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Running);
        let mut sub = instance.lock().console.subscribe(0);
        instance
            .lock()
            .polling
            .issued(CommandFamily::Tps, Instant::now());

        ingest_line(
            &instance,
            "[12:00:00 INFO]: TPS from last 1m, 5m, 15m: 19.5, 19.9, 20.0".into(),
            &config,
        );
        ingest_line(&instance, "[12:00:01 INFO]: Saving chunks".into(), &config);

        {
            let state = instance.lock();
            assert_eq!(state.metrics.tps, Some(19.5));
            assert_eq!(state.console.len(), 2);
        }
        match sub.receiver.try_recv() {
            Ok(ConsoleFrame::Line(entry)) => {
                assert_eq!(entry.seq, 2);
                assert_eq!(entry.line, "[12:00:01 INFO]: Saving chunks");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn operator_typo_is_broadcast_after_a_tps_poll() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Running);
        let mut sub = instance.lock().console.subscribe(0);
        let typo = "[12:00:00 INFO]: Unknown or incomplete command, see below for error";

        instance.lock().polling.issued(CommandFamily::Tps, Instant::now());
        ingest_line(&instance, typo.into(), &config);
        assert!(matches!(sub.receiver.try_recv(), Ok(ConsoleFrame::Line(_))));

        instance.lock().polling.issued(CommandFamily::Ping, Instant::now());
        ingest_line(&instance, typo.into(), &config);
        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(instance.lock().console.len(), 2);
    }

    #[test]
    fn not_found_excludes_last_ping_target() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Running);
        {
            let mut state = instance.lock();
            state.roster.join("Ghost", None, Utc::now());
            state.polling.last_ping_target = Some("Ghost".into());
            state.polling.issued(CommandFamily::Ping, Instant::now());
        }
        ingest_line(&instance, "[12:00:00 INFO]: No player was found".into(), &config);

        let state = instance.lock();
        assert!(state.polling.is_ping_excluded("Ghost", Instant::now()));
        assert!(state.polling.last_ping_target.is_none());
    }

    #[test]
    fn original_line_is_buffered() {
        let config = PollingConfig::default();
        let instance = instance(InstanceStatus::Running);
        let raw = "\x1b[33m[12:00:00 WARN]: §cCan't keep up!\x1b[0m".to_string();
        ingest_line(&instance, raw.clone(), &config);
        let state = instance.lock();
        assert_eq!(state.console.entries().next().map(|e| e.line.clone()), Some(raw));
    }
}

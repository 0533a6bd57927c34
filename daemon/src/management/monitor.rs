use std::sync::Arc;
use std::time::Duration;

use log::debug;
use mcsm_protocol::management::instance::{InstanceStatus, InstanceType};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::config::PollingConfig;
use crate::management::console::CommandFamily;
use crate::management::instance::{CommandSink, Instance};
use crate::management::minecraft::{list_command, world_command, FlavorExt};

pub(crate) struct MonitorContext {
    pub instance: Arc<Instance>,
    pub flavor: InstanceType,
    pub pid: Option<u32>,
    pub sink: CommandSink,
    pub exited: watch::Receiver<bool>,
    pub wakeup: Arc<Notify>,
    pub polling: PollingConfig,
}

/// Queries to inject, decided under the instance lock and sent after it is released.
#[derive(Debug, Default, PartialEq)]
struct QueryPlan {
    commands: Vec<String>,
    pings: Vec<String>,
}

/// Samples resource usage and keeps the roster fresh until the process exits.
pub(crate) async fn run(mut ctx: MonitorContext) {
    let mut system = System::new();
    let interval = Duration::from_millis(ctx.polling.metrics_interval_ms.max(100));
    let mut next_sample = Instant::now();

    loop {
        let refresh_due = ctx.instance.lock().polling.roster_refresh_due;
        let deadline = refresh_due.map_or(next_sample, |due| due.min(next_sample));

        tokio::select! {
            biased;
            changed = ctx.exited.changed() => {
                let done = changed.is_err() || *ctx.exited.borrow();
                if done {
                    break;
                }
            }
            _ = ctx.wakeup.notified() => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let now = Instant::now();
        if now >= next_sample {
            sample(&mut system, &ctx);
            next_sample = now + interval;
        }
        let plan = plan_queries(&ctx.instance, ctx.flavor, &ctx.polling, now);
        if !execute(&ctx, plan).await {
            break;
        }
    }
    debug!("monitor of instance {} finished", ctx.instance.id);
}

fn sample(system: &mut System, ctx: &MonitorContext) {
    let Some(pid) = ctx.pid.map(Pid::from_u32) else {
        return;
    };
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let Some(process) = system.process(pid) else {
        return;
    };
    let (cpu, memory) = (process.cpu_usage(), process.memory());

    let mut state = ctx.instance.lock();
    if state.status.is_alive() {
        state.metrics.cpu = cpu;
        state.metrics.memory = memory;
    }
}

fn due(last: Option<Instant>, now: Instant, every: Duration) -> bool {
    last.map_or(true, |at| now.saturating_duration_since(at) >= every)
}

fn plan_queries(
    instance: &Instance,
    flavor: InstanceType,
    config: &PollingConfig,
    now: Instant,
) -> QueryPlan {
    let mut plan = QueryPlan::default();
    let mut state = instance.lock();
    if state.status != InstanceStatus::Running {
        return plan;
    }
    state.polling.prune(now);

    if let Some(command) = flavor.tps_command() {
        if due(state.polling.last_tps_at, now, Duration::from_secs(config.tps_interval_secs)) {
            plan.commands.push(command.to_string());
            state.polling.issued(CommandFamily::Tps, now);
        }
    }

    let refresh = state.polling.roster_refresh_due.is_some_and(|at| at <= now);
    let last_list = state.polling.last_list_at.or(Some(state.polling.started_at));
    if refresh || due(last_list, now, Duration::from_secs(config.roster_resync_secs)) {
        plan.commands.push(list_command().to_string());
        state.polling.roster_refresh_due = None;
        state.polling.issued(CommandFamily::List, now);
    }

    let pending: Vec<String> = state.polling.pending_world.drain().collect();
    let worlds: Vec<String> = pending
        .into_iter()
        .filter(|name| state.roster.contains(name))
        .map(|name| world_command(&name))
        .collect();
    if !worlds.is_empty() {
        plan.commands.extend(worlds);
        state.polling.issued(CommandFamily::World, now);
    }

    if state.polling.latency.supported
        && !state.roster.is_empty()
        && due(
            state.polling.last_ping_round_at,
            now,
            Duration::from_secs(config.ping_interval_secs),
        )
    {
        state.polling.last_ping_round_at = Some(now);
        plan.pings = state
            .roster
            .names()
            .into_iter()
            .filter(|name| !state.polling.is_ping_excluded(name, now))
            .collect();
    }
    plan
}

/// Returns `false` once the process no longer accepts input.
async fn execute(ctx: &MonitorContext, plan: QueryPlan) -> bool {
    for command in plan.commands {
        if let Err(err) = ctx.sink.send(&command).await {
            debug!("instance {}: query {:?} not sent: {}", ctx.instance.id, command, err);
            return false;
        }
    }

    // one at a time, so a "player not found" reply can be matched to its target
    let gap = Duration::from_millis(ctx.polling.ping_gap_ms);
    for name in plan.pings {
        let Some(command) = ctx.flavor.ping_command(&name) else {
            break;
        };
        {
            let mut state = ctx.instance.lock();
            if state.status != InstanceStatus::Running || !state.roster.contains(&name) {
                continue;
            }
            state.polling.last_ping_target = Some(name);
            state.polling.issued(CommandFamily::Ping, Instant::now());
        }
        if let Err(err) = ctx.sink.send(&command).await {
            debug!("instance {}: ping not sent: {}", ctx.instance.id, err);
            return false;
        }
        tokio::time::sleep(gap).await;
    }
    true
}

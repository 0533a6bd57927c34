use std::collections::{HashMap, HashSet};
use std::time::Duration;

use mcsm_protocol::management::minecraft::LatencySupport;
use tokio::time::Instant;

use crate::config::PollingConfig;
use crate::management::console::CommandFamily;

/// Bookkeeping for the status queries injected into a running server.
#[derive(Debug)]
pub struct PollingState {
    pub started_at: Instant,
    pub last_tps_at: Option<Instant>,
    pub last_list_at: Option<Instant>,
    pub last_world_at: Option<Instant>,
    pub last_ping_at: Option<Instant>,
    pub last_ping_round_at: Option<Instant>,
    /// family of the most recently injected query
    last_issued: Option<CommandFamily>,
    /// earliest time a roster refresh may be sent, if one is pending
    pub roster_refresh_due: Option<Instant>,
    pub pending_world: HashSet<String>,
    pub last_ping_target: Option<String>,
    ping_excluded: HashMap<String, Instant>,
    pub latency: LatencySupport,
}

impl PollingState {
    pub fn new(latency: LatencySupport) -> Self {
        Self {
            started_at: Instant::now(),
            last_tps_at: None,
            last_list_at: None,
            last_world_at: None,
            last_ping_at: None,
            last_ping_round_at: None,
            last_issued: None,
            roster_refresh_due: None,
            pending_world: HashSet::new(),
            last_ping_target: None,
            ping_excluded: HashMap::new(),
            latency,
        }
    }

    /// Keeps the earlier deadline if a refresh is already pending.
    pub fn request_roster_refresh(&mut self, at: Instant) {
        self.roster_refresh_due = Some(match self.roster_refresh_due {
            Some(due) => due.min(at),
            None => at,
        });
    }

    pub fn issued(&mut self, family: CommandFamily, now: Instant) {
        let slot = match family {
            CommandFamily::Tps => &mut self.last_tps_at,
            CommandFamily::List => &mut self.last_list_at,
            CommandFamily::World => &mut self.last_world_at,
            CommandFamily::Ping => &mut self.last_ping_at,
        };
        *slot = Some(now);
        self.last_issued = Some(family);
    }

    /// Whether a reply of `family` arriving at `now` is most likely the echo of our own query.
    pub fn is_echo(&self, family: CommandFamily, now: Instant, config: &PollingConfig) -> bool {
        let (issued, window) = match family {
            CommandFamily::Tps => (self.last_tps_at, config.tps_echo_ms),
            CommandFamily::List => (self.last_list_at, config.list_echo_ms),
            CommandFamily::World => (self.last_world_at, config.world_echo_ms),
            CommandFamily::Ping => (self.last_ping_at, config.ping_echo_ms),
        };
        issued.is_some_and(|at| now.saturating_duration_since(at) <= Duration::from_millis(window))
    }

    /// Whether an "unknown command" reply is the answer to our latest query. Only world
    /// and ping lookups can be missing on older servers.
    pub fn is_unknown_command_echo(&self, now: Instant, config: &PollingConfig) -> bool {
        match self.last_issued {
            Some(family @ (CommandFamily::World | CommandFamily::Ping)) => {
                self.is_echo(family, now, config)
            }
            _ => false,
        }
    }

    pub fn exclude_from_ping(&mut self, name: String, until: Instant) {
        self.ping_excluded.insert(name, until);
    }

    pub fn is_ping_excluded(&self, name: &str, now: Instant) -> bool {
        self.ping_excluded.get(name).is_some_and(|until| *until > now)
    }

    pub fn forget_player(&mut self, name: &str) {
        self.ping_excluded.remove(name);
        self.pending_world.remove(name);
    }

    /// Drops expired exclusions.
    pub fn prune(&mut self, now: Instant) {
        self.ping_excluded.retain(|_, until| *until > now);
    }
}

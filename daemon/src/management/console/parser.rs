//! Best-effort extraction of structured events from server console lines.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// the server finished booting
    Ready,
    PlayerJoined {
        name: String,
        address: Option<String>,
    },
    PlayerLeft {
        name: String,
    },
    Tps(f64),
    PlayerWorld {
        name: String,
        world: String,
    },
    /// authoritative roster listing
    PlayerList {
        online: u32,
        names: Vec<String>,
    },
    PlayerPing {
        name: String,
        ms: u32,
    },
    PlayerNotFound,
    EntityNotFound,
    UnknownCommand,
}

/// Status queries the daemon injects into the console itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandFamily {
    Tps,
    List,
    World,
    Ping,
}

impl ConsoleEvent {
    /// The injected query this line answers, if any.
    pub fn family(&self) -> Option<CommandFamily> {
        match self {
            ConsoleEvent::Tps(_) => Some(CommandFamily::Tps),
            ConsoleEvent::PlayerList { .. } => Some(CommandFamily::List),
            ConsoleEvent::PlayerWorld { .. } | ConsoleEvent::EntityNotFound => {
                Some(CommandFamily::World)
            }
            ConsoleEvent::PlayerPing { .. } | ConsoleEvent::PlayerNotFound => {
                Some(CommandFamily::Ping)
            }
            _ => None,
        }
    }
}

lazy_static! {
    static ref ANSI_PATTERN: Regex =
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[()][A-Za-z0-9]")
            .expect("Failed to compile ANSI_PATTERN regex");
    static ref COLOR_CODE_PATTERN: Regex =
        Regex::new(r"§[0-9a-fk-orx]").expect("Failed to compile COLOR_CODE_PATTERN regex");
    static ref DONE_PATTERN: Regex =
        Regex::new(r#"Done \(\d+(?:\.\d+)?s\)! For help, type ["']help["']"#)
            .expect("Failed to compile DONE_PATTERN regex");
    static ref LOGIN_PATTERN: Regex =
        Regex::new(r"^(\w{1,16})\[/?([^\]]*)\] logged in with entity id")
            .expect("Failed to compile LOGIN_PATTERN regex");
    static ref JOIN_PATTERN: Regex =
        Regex::new(r"^(\w{1,16}) joined the game").expect("Failed to compile JOIN_PATTERN regex");
    static ref LEAVE_PATTERN: Regex =
        Regex::new(r"^(\w{1,16}) (?:left the game|lost connection:)")
            .expect("Failed to compile LEAVE_PATTERN regex");
    static ref PAPER_TPS_PATTERN: Regex =
        Regex::new(r"TPS from last 1m, 5m, 15m: \*?(\d+(?:\.\d+)?)")
            .expect("Failed to compile PAPER_TPS_PATTERN regex");
    static ref FORGE_TPS_PATTERN: Regex = Regex::new(
        r"^Overall\s*:\s*(?:Mean tick time: [\d.]+ ms\. Mean TPS: (\d+(?:\.\d+)?)|(\d+(?:\.\d+)?) TPS)"
    )
    .expect("Failed to compile FORGE_TPS_PATTERN regex");
    static ref WORLD_PATTERN: Regex =
        Regex::new(r#"^(\w{1,16}) has the following entity data: "([^"]+)""#)
            .expect("Failed to compile WORLD_PATTERN regex");
    static ref LIST_PATTERN: Regex = Regex::new(
        r"^There are (\d+)(?: of a max of |/)(\d+) players online:?\s*(.*)$"
    )
    .expect("Failed to compile LIST_PATTERN regex");
    static ref PING_PATTERNS: [Regex; 4] = [
        Regex::new(r"^(\w{1,16})'s ping is (\d+)\s*ms").expect("Failed to compile ping regex"),
        Regex::new(r"^(\w{1,16})'s? ping: (\d+)\s*ms").expect("Failed to compile ping regex"),
        Regex::new(r"^Ping of (\w{1,16}) is (\d+)\s*ms").expect("Failed to compile ping regex"),
        Regex::new(r"^(\w{1,16}) has a ping of (\d+)\s*ms").expect("Failed to compile ping regex"),
    ];
    static ref PLAYER_NOT_FOUND_PATTERN: Regex = Regex::new(
        r"^(?:No player was found|That player cannot be found|Player not found|Could not find player|Player \w{1,16} (?:is not online|not found))"
    )
    .expect("Failed to compile PLAYER_NOT_FOUND_PATTERN regex");
    static ref UNKNOWN_COMMAND_PATTERN: Regex =
        Regex::new(r"^(?:Unknown or incomplete command|Unknown command)")
            .expect("Failed to compile UNKNOWN_COMMAND_PATTERN regex");
}

/// Removes terminal escape sequences and `§` color codes.
pub fn strip_formatting(line: &str) -> String {
    let stripped = ANSI_PATTERN.replace_all(line, "");
    COLOR_CODE_PATTERN.replace_all(&stripped, "").into_owned()
}

/// `[12:00:00] [Server thread/INFO]: Steve joined the game` -> `Steve joined the game`
fn message_of(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('[') {
        if let Some((_, message)) = line.split_once("]: ") {
            return message.trim();
        }
    }
    line
}

pub fn parse_line(line: &str) -> Vec<ConsoleEvent> {
    let cleaned = strip_formatting(line);
    let message = message_of(&cleaned);
    let mut events = vec![];

    if DONE_PATTERN.is_match(message) {
        events.push(ConsoleEvent::Ready);
        return events;
    }

    if let Some(caps) = LOGIN_PATTERN.captures(message) {
        let address = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|a| !a.is_empty() && a != "local");
        events.push(ConsoleEvent::PlayerJoined {
            name: caps[1].to_string(),
            address,
        });
    } else if let Some(caps) = JOIN_PATTERN.captures(message) {
        events.push(ConsoleEvent::PlayerJoined {
            name: caps[1].to_string(),
            address: None,
        });
    } else if let Some(caps) = LEAVE_PATTERN.captures(message) {
        events.push(ConsoleEvent::PlayerLeft {
            name: caps[1].to_string(),
        });
    } else if let Some(caps) = PAPER_TPS_PATTERN.captures(message) {
        if let Ok(tps) = caps[1].parse() {
            events.push(ConsoleEvent::Tps(tps));
        }
    } else if let Some(caps) = FORGE_TPS_PATTERN.captures(message) {
        if let Some(Ok(tps)) = caps.get(1).or(caps.get(2)).map(|m| m.as_str().parse()) {
            events.push(ConsoleEvent::Tps(tps));
        }
    } else if let Some(caps) = WORLD_PATTERN.captures(message) {
        events.push(ConsoleEvent::PlayerWorld {
            name: caps[1].to_string(),
            world: caps[2].to_string(),
        });
    } else if message.starts_with("No entity was found") {
        events.push(ConsoleEvent::EntityNotFound);
    } else if let Some(caps) = LIST_PATTERN.captures(message) {
        let names = caps[3]
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        events.push(ConsoleEvent::PlayerList {
            online: caps[1].parse().unwrap_or(0),
            names,
        });
    } else if let Some(caps) = PING_PATTERNS.iter().find_map(|p| p.captures(message)) {
        if let Ok(ms) = caps[2].parse() {
            events.push(ConsoleEvent::PlayerPing {
                name: caps[1].to_string(),
                ms,
            });
        }
    } else if PLAYER_NOT_FOUND_PATTERN.is_match(message) {
        events.push(ConsoleEvent::PlayerNotFound);
    } else if UNKNOWN_COMMAND_PATTERN.is_match(message) {
        events.push(ConsoleEvent::UnknownCommand);
    }

    events
}

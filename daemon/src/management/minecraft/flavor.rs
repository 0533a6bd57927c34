use mcsm_protocol::management::instance::InstanceType;
use mcsm_protocol::management::minecraft::LatencySupport;

/// Console commands and directory conventions that differ between server flavors.
pub trait FlavorExt {
    /// Command printing the server's ticks per second, if the flavor has one.
    fn tps_command(&self) -> Option<&'static str>;
    fn latency_support(&self) -> LatencySupport;
    fn ping_command(&self, player: &str) -> Option<String>;
    /// Directories holding plugins or mods, relative to the working directory.
    fn extension_dirs(&self) -> &'static [&'static str];
}

impl FlavorExt for InstanceType {
    fn tps_command(&self) -> Option<&'static str> {
        match self {
            InstanceType::Paper | InstanceType::Purpur | InstanceType::Spigot => Some("tps"),
            InstanceType::Forge => Some("forge tps"),
            InstanceType::NeoForge => Some("neoforge tps"),
            InstanceType::Vanilla | InstanceType::Fabric | InstanceType::Quilt => None,
        }
    }

    fn latency_support(&self) -> LatencySupport {
        match self {
            InstanceType::Paper | InstanceType::Purpur => LatencySupport::supported(),
            InstanceType::Spigot => {
                LatencySupport::unsupported("spigot has no console ping command")
            }
            InstanceType::Vanilla => {
                LatencySupport::unsupported("vanilla servers do not expose player latency")
            }
            InstanceType::Forge | InstanceType::NeoForge | InstanceType::Fabric | InstanceType::Quilt => {
                LatencySupport::unsupported("modded servers need a ping mod to report latency")
            }
        }
    }

    fn ping_command(&self, player: &str) -> Option<String> {
        self.latency_support()
            .supported
            .then(|| format!("ping {}", player))
    }

    fn extension_dirs(&self) -> &'static [&'static str] {
        match self {
            InstanceType::Paper | InstanceType::Purpur | InstanceType::Spigot => &["plugins"],
            InstanceType::Forge | InstanceType::NeoForge => &["mods"],
            InstanceType::Fabric | InstanceType::Quilt => &["mods"],
            InstanceType::Vanilla => &[],
        }
    }
}

pub fn list_command() -> &'static str {
    "list"
}

pub fn world_command(player: &str) -> String {
    format!("data get entity {} Dimension", player)
}

pub fn say_command(message: &str) -> String {
    format!("say {}", message)
}

pub fn kick_command(player: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.trim().is_empty() => format!("kick {} {}", player, reason.trim()),
        _ => format!("kick {}", player),
    }
}

pub fn ban_command(player: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.trim().is_empty() => format!("ban {} {}", player, reason.trim()),
        _ => format!("ban {}", player),
    }
}

pub fn kill_command(player: &str) -> String {
    format!("kill {}", player)
}

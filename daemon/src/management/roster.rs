use chrono::{DateTime, Utc};
use mcsm_protocol::management::minecraft::Player;

/// Players currently believed online, in join order.
#[derive(Debug, Default)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn names(&self) -> Vec<String> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.players.iter().any(|p| p.name == name)
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Returns whether the player is new.
    pub fn join(&mut self, name: &str, address: Option<String>, now: DateTime<Utc>) -> bool {
        if let Some(player) = self.find_mut(name) {
            if address.is_some() {
                player.address = address;
            }
            return false;
        }
        let mut player = Player::new(name, now);
        player.address = address;
        self.players.push(player);
        true
    }

    pub fn leave(&mut self, name: &str) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.name != name);
        before != self.players.len()
    }

    /// Replaces the roster with `names`, keeping session data of players still listed.
    /// Returns the names that were not tracked before.
    pub fn reconcile(&mut self, names: &[String], now: DateTime<Utc>) -> Vec<String> {
        self.players.retain(|p| names.contains(&p.name));
        let mut added = vec![];
        for name in names {
            if !self.contains(name) {
                self.players.push(Player::new(name.as_str(), now));
                added.push(name.clone());
            }
        }
        added
    }

    pub fn set_world(&mut self, name: &str, world: String) {
        if let Some(player) = self.find_mut(name) {
            player.world = Some(world);
        }
    }

    pub fn set_ping(&mut self, name: &str, ms: u32) {
        if let Some(player) = self.find_mut(name) {
            player.ping = Some(ms);
        }
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.name == name)
    }
}

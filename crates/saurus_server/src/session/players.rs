use super::{Player, PlayerInfo};
use dashmap::DashMap;
use multisocket::Connection;
use saurus_events::EventEmitter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Default)]
struct PlayersInner {
    uuids: DashMap<String, Player>,
    names: DashMap<String, Player>,
    joins: EventEmitter<Player>,
    quits: EventEmitter<Player>,
}

/// Players online on one game server, tracked from join/quit events.
#[derive(Clone, Default)]
pub struct Players {
    inner: Arc<PlayersInner>,
}

impl std::fmt::Debug for Players {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Players").field("online", &self.len()).finish()
    }
}

impl Players {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires with every player that joins.
    pub fn joins(&self) -> &EventEmitter<Player> {
        &self.inner.joins
    }

    /// Fires with every player that quits, before the player's own `ended`.
    pub fn quits(&self) -> &EventEmitter<Player> {
        &self.inner.quits
    }

    pub fn get(&self, uuid: &str) -> Option<Player> {
        self.inner.uuids.get(uuid).map(|p| p.clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Player> {
        self.inner.names.get(name).map(|p| p.clone())
    }

    pub fn list(&self) -> Vec<PlayerInfo> {
        let mut infos: Vec<PlayerInfo> = self
            .inner
            .uuids
            .iter()
            .map(|entry| entry.value().info().clone())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.uuids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a joining player. A stale session under the same uuid is
    /// ended first.
    pub(crate) fn join(&self, info: PlayerInfo, server: &Connection, request_timeout: Duration) -> Player {
        let player = Player::new(info.clone(), server.clone(), request_timeout);
        if let Some(stale) = self.inner.uuids.insert(info.uuid.clone(), player.clone()) {
            self.inner.names.remove_if(stale.name(), |_, p| p.uuid() == stale.uuid());
            stale.end();
        }
        self.inner.names.insert(info.name.clone(), player.clone());

        info!("🎮 Player {} joined", info.name);
        self.inner.joins.emit(&player);
        player
    }

    /// The online player with this identity, registering it if the server
    /// never announced the join.
    pub(crate) fn get_or_join(&self, info: &PlayerInfo, server: &Connection, request_timeout: Duration) -> Player {
        match self.get(&info.uuid) {
            Some(player) => player,
            None => {
                debug!("Player {} acted before joining, registering", info.name);
                self.join(info.clone(), server, request_timeout)
            }
        }
    }

    /// Removes a quitting player and ends its session.
    pub(crate) fn quit(&self, info: &PlayerInfo) -> Option<Player> {
        let (_, player) = self.inner.uuids.remove(&info.uuid)?;
        self.inner.names.remove_if(&info.name, |_, p| p.uuid() == info.uuid);

        info!("🚪 Player {} quit", info.name);
        self.inner.quits.emit(&player);
        player.end();
        Some(player)
    }

    /// Ends every player, used when the server connection goes away.
    pub(crate) fn end_all(&self) {
        let players: Vec<Player> = self.inner.uuids.iter().map(|e| e.value().clone()).collect();
        self.inner.uuids.clear();
        self.inner.names.clear();
        for player in players {
            self.inner.quits.emit(&player);
            player.end();
        }
    }
}

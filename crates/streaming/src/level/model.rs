use std::fmt;

use serde::{Deserialize, Serialize};

use super::map::LevelMap;
use crate::grid::{CellXY, Direction, TileXY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelId(pub u64);

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

/// Actor living in a level. `energy` is the scheduler's per-actor state and
/// survives serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub pos: CellXY,
    pub speed: u32,
    pub energy: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub pos: CellXY,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub kind: String,
    pub pos: CellXY,
}

/// Reference-free form of a connection target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(rename = "targetLevelID")]
    pub target_level_id: LevelId,
    #[serde(rename = "targetCoord")]
    pub target_coord: CellXY,
}

/// Slot address of a connection inside a materialized tile level.
///
/// Only meaningful while the tile at `tile` is LOADED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    pub tile: TileXY,
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTarget {
    Live(ConnectionHandle),
    Descriptor(ConnectionDescriptor),
}

impl ConnectionTarget {
    pub fn live(&self) -> Option<ConnectionHandle> {
        match self {
            ConnectionTarget::Live(handle) => Some(*handle),
            ConnectionTarget::Descriptor(_) => None,
        }
    }

    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        match self {
            ConnectionTarget::Live(_) => None,
            ConnectionTarget::Descriptor(descriptor) => Some(*descriptor),
        }
    }
}

/// Passage from cell `src` of one level into another level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub name: String,
    pub src: CellXY,
    pub target: ConnectionTarget,
}

impl Connection {
    pub fn unlinked(
        name: impl Into<String>,
        src: CellXY,
        target_level_id: LevelId,
        target_coord: CellXY,
    ) -> Self {
        Self {
            name: name.into(),
            src,
            target: ConnectionTarget::Descriptor(ConnectionDescriptor {
                target_level_id,
                target_coord,
            }),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.target, ConnectionTarget::Live(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub id: LevelId,
    pub level_number: u32,
    pub map: LevelMap,
    pub actors: Vec<Actor>,
    pub items: Vec<Item>,
    pub elements: Vec<Element>,
    /// Slot order is what `ConnectionHandle`s index into, so only the
    /// streaming layer may add, remove or relink connections.
    pub(crate) connections: Vec<Connection>,
    pub sub_levels: Vec<Level>,
}

impl Level {
    pub fn new(id: LevelId, level_number: u32, map: LevelMap) -> Self {
        Self {
            id,
            level_number,
            map,
            actors: Vec::new(),
            items: Vec::new(),
            elements: Vec::new(),
            connections: Vec::new(),
            sub_levels: Vec::new(),
        }
    }

    /// ```compile_fail
    /// fn drop_passages(level: &mut streaming::Level) {
    ///     level.connections.clear();
    /// }
    /// ```
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection(&self, slot: usize) -> Option<&Connection> {
        self.connections.get(slot)
    }

    pub fn connection_at(&self, src: CellXY) -> Option<usize> {
        self.connections.iter().position(|conn| conn.src == src)
    }

    /// Slots of connections whose source cell lies on the edge facing `dir`
    /// and which lead to `target`. Connections into sub-levels never match.
    pub fn edge_slots(&self, dir: Direction, target: LevelId) -> Vec<usize> {
        self.connections
            .iter()
            .enumerate()
            .filter(|(_, conn)| self.map.is_on_edge(conn.src, dir))
            .filter(|(_, conn)| match conn.target {
                ConnectionTarget::Descriptor(descriptor) => descriptor.target_level_id == target,
                ConnectionTarget::Live(_) => false,
            })
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Slots of live connections whose source cell lies on the edge facing `dir`.
    pub fn live_edge_slots(&self, dir: Direction) -> Vec<(usize, ConnectionHandle)> {
        self.connections
            .iter()
            .enumerate()
            .filter(|(_, conn)| self.map.is_on_edge(conn.src, dir))
            .filter_map(|(slot, conn)| conn.target.live().map(|handle| (slot, handle)))
            .collect()
    }

    pub fn live_connection_count(&self) -> usize {
        self.connections.iter().filter(|conn| conn.is_live()).count()
    }

    /// This level's id followed by every nested sub-level id, depth first.
    pub fn level_ids(&self) -> Vec<LevelId> {
        let mut ids = vec![self.id];
        for sub_level in &self.sub_levels {
            ids.extend(sub_level.level_ids());
        }
        ids
    }

    /// Actors of this level and all sub-levels paired with their level id.
    pub fn all_actors(&self) -> Vec<(LevelId, Actor)> {
        let mut actors = self
            .actors
            .iter()
            .map(|actor| (self.id, actor.clone()))
            .collect::<Vec<_>>();
        for sub_level in &self.sub_levels {
            actors.extend(sub_level.all_actors());
        }
        actors
    }
}

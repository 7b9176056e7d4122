use thiserror::Error;
use tracing::debug;

use crate::grid::{AreaGrid, CellXY, Direction, TilePayload, TileState, TileXY};
use crate::level::{
    ConnectionDescriptor, ConnectionHandle, ConnectionTarget, Level, LevelId, LevelSnapshot,
    SnapshotError,
};
use crate::sim::TileEffect;
use crate::store::{PersistentStore, StoreError};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("tile {tile} is outside the grid")]
    OutOfBounds { tile: TileXY },
    #[error("illegal transition for tile {tile}: {from:?} -> {to:?}")]
    Illegal {
        tile: TileXY,
        from: TileState,
        to: TileState,
    },
    #[error("tile {tile} is already mid-transition ({state:?})")]
    InProgress { tile: TileXY, state: TileState },
    #[error("tile {tile} has no connections on its {edge} edge toward tile {neighbor}")]
    MissingConnections {
        tile: TileXY,
        edge: Direction,
        neighbor: TileXY,
    },
    #[error("tile {tile} connection at {src} expects cell {target_coord} of tile {neighbor}, which has no matching connection")]
    UnmatchedConnection {
        tile: TileXY,
        src: CellXY,
        neighbor: TileXY,
        target_coord: CellXY,
    },
    #[error("tile {tile} slot {slot} and tile {neighbor} slot {neighbor_slot} do not point at each other")]
    AsymmetricLink {
        tile: TileXY,
        slot: usize,
        neighbor: TileXY,
        neighbor_slot: usize,
    },
    #[error("tile {tile} slot {slot} holds a live link into tile {target} that does not cross a shared loaded edge")]
    StaleLink {
        tile: TileXY,
        slot: usize,
        target: TileXY,
    },
    #[error("store has no entry for tile {tile} under key '{key}'")]
    StoreMiss { tile: TileXY, key: String },
    #[error("store entry for tile {tile} holds level {found}, expected {expected}")]
    LevelMismatch {
        tile: TileXY,
        expected: LevelId,
        found: LevelId,
    },
    #[error("tile {tile} payload does not match its {state:?} state")]
    PayloadMismatch { tile: TileXY, state: TileState },
    #[error("tile {tile}: {source}")]
    Snapshot {
        tile: TileXY,
        #[source]
        source: SnapshotError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Edges on which a demotion insists on live links toward every LOADED
/// neighbor: the edge facing the player's move, or all four when there is no
/// move to go by. Live links on the remaining edges are still converted; they
/// lead to tiles leaving the load band in the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeScope {
    Toward(Direction),
    All,
}

impl EdgeScope {
    pub fn from_move(dir: Option<Direction>) -> Self {
        match dir {
            Some(dir) => EdgeScope::Toward(dir),
            None => EdgeScope::All,
        }
    }

    fn edges(self) -> Vec<Direction> {
        match self {
            EdgeScope::Toward(dir) => vec![dir],
            EdgeScope::All => Direction::ALL.to_vec(),
        }
    }
}

struct Demotion {
    snapshot: LevelSnapshot,
    neighbor_rewrites: Vec<(ConnectionHandle, ConnectionDescriptor)>,
    effects: Vec<TileEffect>,
}

struct Promotion {
    level: Level,
    links: Vec<(usize, ConnectionHandle)>,
    effects: Vec<TileEffect>,
}

/// Drives single tiles through the legal transition table:
///
/// | from    | to      |
/// |---------|---------|
/// | ON_DISK | JSON    |
/// | JSON    | LOADED  |
/// | LOADED  | JSON    |
/// | JSON    | ON_DISK |
/// | LOADED  | ON_DISK |
///
/// Every transition validates first and mutates last, so an `Err` leaves the
/// tile (and its neighbors) exactly as they were.
pub struct TileStateMachine<'a, S: PersistentStore + ?Sized> {
    grid: &'a mut AreaGrid,
    store: &'a mut S,
}

impl<'a, S: PersistentStore + ?Sized> TileStateMachine<'a, S> {
    pub fn new(grid: &'a mut AreaGrid, store: &'a mut S) -> Self {
        Self { grid, store }
    }

    pub fn transition(
        &mut self,
        xy: TileXY,
        to: TileState,
        scope: EdgeScope,
    ) -> Result<Vec<TileEffect>, TransitionError> {
        let from = self
            .grid
            .state(xy)
            .ok_or(TransitionError::OutOfBounds { tile: xy })?;
        if from.is_transient() {
            return Err(TransitionError::InProgress {
                tile: xy,
                state: from,
            });
        }

        let marker = match (from, to) {
            (TileState::OnDisk, TileState::Json) => Some(TileState::OnDiskToJson),
            (TileState::Json, TileState::Loaded) => None,
            (TileState::Loaded, TileState::Json) | (TileState::Loaded, TileState::OnDisk) => {
                Some(TileState::LoadedToJson)
            }
            (TileState::Json, TileState::OnDisk) => Some(TileState::JsonToOnDisk),
            _ => {
                return Err(TransitionError::Illegal {
                    tile: xy,
                    from,
                    to,
                })
            }
        };
        if let Some(marker) = marker {
            self.set_state(xy, marker);
        }

        let result = match (from, to) {
            (TileState::OnDisk, TileState::Json) => self.read_from_store(xy).map(|()| Vec::new()),
            (TileState::Json, TileState::Loaded) => self.materialize(xy),
            (TileState::Loaded, TileState::Json) => self.dematerialize(xy, scope, false),
            (TileState::Loaded, TileState::OnDisk) => self.dematerialize(xy, scope, true),
            _ => self.write_to_store(xy).map(|()| Vec::new()),
        };

        match result {
            Ok(effects) => {
                self.set_state(xy, to);
                debug!(
                    tile = %xy,
                    from = ?from,
                    to = ?to,
                    effects = effects.len(),
                    "tile_transition"
                );
                Ok(effects)
            }
            Err(error) => {
                self.set_state(xy, from);
                Err(error)
            }
        }
    }

    fn set_state(&mut self, xy: TileXY, state: TileState) {
        if let Some(tile) = self.grid.tile_mut(xy) {
            tile.set_state(state);
        }
    }

    fn read_from_store(&mut self, xy: TileXY) -> Result<(), TransitionError> {
        let tile = self
            .grid
            .tile(xy)
            .ok_or(TransitionError::OutOfBounds { tile: xy })?;
        let key = tile.tile_id().to_string();
        let expected = tile.level_id();

        let raw = self
            .store
            .get_item(&key)?
            .ok_or_else(|| TransitionError::StoreMiss {
                tile: xy,
                key: key.clone(),
            })?;
        let snapshot = LevelSnapshot::from_json(&raw)
            .map_err(|source| TransitionError::Snapshot { tile: xy, source })?;
        if snapshot.id != expected {
            return Err(TransitionError::LevelMismatch {
                tile: xy,
                expected,
                found: snapshot.id,
            });
        }

        if let Some(tile) = self.grid.tile_mut(xy) {
            tile.payload = TilePayload::Json(snapshot);
        }
        Ok(())
    }

    fn write_to_store(&mut self, xy: TileXY) -> Result<(), TransitionError> {
        let tile = self
            .grid
            .tile(xy)
            .ok_or(TransitionError::OutOfBounds { tile: xy })?;
        let snapshot = tile.snapshot().ok_or(TransitionError::PayloadMismatch {
            tile: xy,
            state: TileState::Json,
        })?;
        let key = tile.tile_id().to_string();
        let raw = snapshot
            .to_json()
            .map_err(|source| TransitionError::Snapshot { tile: xy, source })?;

        self.store.set_item(&key, raw)?;
        // Only drop the in-memory copy once the store holds it.
        if let Some(tile) = self.grid.tile_mut(xy) {
            tile.payload = TilePayload::OnDisk;
        }
        Ok(())
    }

    fn dematerialize(
        &mut self,
        xy: TileXY,
        scope: EdgeScope,
        to_disk: bool,
    ) -> Result<Vec<TileEffect>, TransitionError> {
        let demotion = self.plan_demotion(xy, scope)?;

        let payload = if to_disk {
            self.set_state(xy, TileState::JsonToOnDisk);
            let key = self
                .grid
                .tile(xy)
                .map(|tile| tile.tile_id().to_string())
                .ok_or(TransitionError::OutOfBounds { tile: xy })?;
            let raw = demotion
                .snapshot
                .to_json()
                .map_err(|source| TransitionError::Snapshot { tile: xy, source })?;
            self.store.set_item(&key, raw)?;
            TilePayload::OnDisk
        } else {
            TilePayload::Json(demotion.snapshot)
        };

        for (handle, descriptor) in demotion.neighbor_rewrites {
            if let Some(conn) = self
                .grid
                .level_mut(handle.tile)
                .and_then(|level| level.connections.get_mut(handle.slot))
            {
                conn.target = ConnectionTarget::Descriptor(descriptor);
            }
        }
        if let Some(tile) = self.grid.tile_mut(xy) {
            tile.payload = payload;
        }
        Ok(demotion.effects)
    }

    fn plan_demotion(&self, xy: TileXY, scope: EdgeScope) -> Result<Demotion, TransitionError> {
        let level = self.grid.level(xy).ok_or(TransitionError::PayloadMismatch {
            tile: xy,
            state: TileState::Loaded,
        })?;

        for edge in scope.edges() {
            let Some(neighbor) = self.grid.neighbor(xy, edge) else {
                continue;
            };
            let Some(neighbor_level) = self.grid.level(neighbor) else {
                continue;
            };
            let ours = level
                .live_edge_slots(edge)
                .iter()
                .any(|(_, handle)| handle.tile == neighbor);
            let theirs = neighbor_level
                .live_edge_slots(edge.opposite())
                .iter()
                .any(|(_, handle)| handle.tile == xy);
            if !ours || !theirs {
                return Err(TransitionError::MissingConnections {
                    tile: xy,
                    edge,
                    neighbor,
                });
            }
        }

        let mut neighbor_rewrites = Vec::new();
        for (slot, conn) in level.connections.iter().enumerate() {
            let ConnectionTarget::Live(handle) = conn.target else {
                continue;
            };
            let crosses_edge = Direction::ALL.into_iter().any(|edge| {
                self.grid.neighbor(xy, edge) == Some(handle.tile)
                    && level.map.is_on_edge(conn.src, edge)
            });
            let neighbor_level = self.grid.level(handle.tile);
            if !crosses_edge || neighbor_level.is_none() {
                return Err(TransitionError::StaleLink {
                    tile: xy,
                    slot,
                    target: handle.tile,
                });
            }
            let points_back = neighbor_level
                .and_then(|neighbor| neighbor.connection(handle.slot))
                .and_then(|back| back.target.live())
                .is_some_and(|back| back.tile == xy && back.slot == slot);
            if !points_back {
                return Err(TransitionError::AsymmetricLink {
                    tile: xy,
                    slot,
                    neighbor: handle.tile,
                    neighbor_slot: handle.slot,
                });
            }
            neighbor_rewrites.push((
                handle,
                ConnectionDescriptor {
                    target_level_id: level.id,
                    target_coord: conn.src,
                },
            ));
        }

        let grid = &*self.grid;
        let snapshot = LevelSnapshot::capture(level, &|handle| grid.resolve_handle(handle))
            .map_err(|source| TransitionError::Snapshot { tile: xy, source })?;

        let effects = vec![
            TileEffect::ActorsDeregistered {
                tile: xy,
                actors: level
                    .all_actors()
                    .into_iter()
                    .map(|(level_id, actor)| (level_id, actor.id))
                    .collect(),
            },
            TileEffect::BattlesUnloaded {
                tile: xy,
                level: level.id,
            },
            TileEffect::LevelsRemoved {
                tile: xy,
                levels: level.level_ids(),
            },
        ];

        Ok(Demotion {
            snapshot,
            neighbor_rewrites,
            effects,
        })
    }

    fn materialize(&mut self, xy: TileXY) -> Result<Vec<TileEffect>, TransitionError> {
        let promotion = self.plan_promotion(xy)?;
        let mut level = promotion.level;

        for (slot, handle) in &promotion.links {
            if let Some(conn) = self
                .grid
                .level_mut(handle.tile)
                .and_then(|neighbor| neighbor.connections.get_mut(handle.slot))
            {
                conn.target = ConnectionTarget::Live(ConnectionHandle {
                    tile: xy,
                    slot: *slot,
                });
            }
            level.connections[*slot].target = ConnectionTarget::Live(*handle);
        }
        if let Some(tile) = self.grid.tile_mut(xy) {
            tile.payload = TilePayload::Loaded(level);
        }
        Ok(promotion.effects)
    }

    /// Links are only made toward neighbors that are LOADED right now; the
    /// remaining descriptors wait until their other end is materialized.
    fn plan_promotion(&self, xy: TileXY) -> Result<Promotion, TransitionError> {
        let snapshot = self
            .grid
            .tile(xy)
            .and_then(|tile| tile.snapshot())
            .ok_or(TransitionError::PayloadMismatch {
                tile: xy,
                state: TileState::Json,
            })?;
        let level = snapshot
            .materialize()
            .map_err(|source| TransitionError::Snapshot { tile: xy, source })?;

        let mut links = Vec::new();
        for edge in Direction::ALL {
            let Some(neighbor) = self.grid.neighbor(xy, edge) else {
                continue;
            };
            let Some(neighbor_tile) = self.grid.tile(neighbor) else {
                continue;
            };
            let Some(neighbor_level) = neighbor_tile.level() else {
                continue;
            };

            let ours = level.edge_slots(edge, neighbor_level.id);
            let theirs = neighbor_level.edge_slots(edge.opposite(), level.id);
            if ours.is_empty() || theirs.is_empty() {
                return Err(TransitionError::MissingConnections {
                    tile: xy,
                    edge,
                    neighbor,
                });
            }

            let mut paired = Vec::with_capacity(ours.len());
            for slot in ours {
                let conn = &level.connections[slot];
                let Some(descriptor) = conn.target.descriptor() else {
                    continue;
                };
                let neighbor_slot = theirs
                    .iter()
                    .copied()
                    .find(|candidate| {
                        neighbor_level.connections[*candidate].src == descriptor.target_coord
                    })
                    .ok_or(TransitionError::UnmatchedConnection {
                        tile: xy,
                        src: conn.src,
                        neighbor,
                        target_coord: descriptor.target_coord,
                    })?;
                let points_back = neighbor_level.connections[neighbor_slot]
                    .target
                    .descriptor()
                    .is_some_and(|back| {
                        back.target_level_id == level.id && back.target_coord == conn.src
                    });
                if !points_back {
                    return Err(TransitionError::AsymmetricLink {
                        tile: xy,
                        slot,
                        neighbor,
                        neighbor_slot,
                    });
                }
                paired.push(neighbor_slot);
                links.push((
                    slot,
                    ConnectionHandle {
                        tile: neighbor,
                        slot: neighbor_slot,
                    },
                ));
            }

            if let Some(unpaired) = theirs.iter().find(|slot| !paired.contains(slot)) {
                let conn = &neighbor_level.connections[*unpaired];
                let target_coord = conn
                    .target
                    .descriptor()
                    .map(|descriptor| descriptor.target_coord)
                    .unwrap_or(conn.src);
                return Err(TransitionError::UnmatchedConnection {
                    tile: neighbor,
                    src: conn.src,
                    neighbor: xy,
                    target_coord,
                });
            }
        }

        let effects = vec![
            TileEffect::LevelsAdded {
                tile: xy,
                levels: level.level_ids(),
            },
            TileEffect::ActorsRegistered {
                tile: xy,
                actors: level.all_actors(),
            },
        ];

        Ok(Promotion {
            level,
            links,
            effects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamingConfig;
    use crate::grid::TileXY;
    use crate::level::Connection;
    use crate::store::MemoryStore;
    use crate::worldgen::PlainWorld;

    fn strip(size_x: u32) -> (AreaGrid, MemoryStore) {
        let config = StreamingConfig {
            session_id: "t".to_string(),
            size_x,
            size_y: 1,
            ..StreamingConfig::default()
        };
        let levels = PlainWorld::default().build_area(&config).expect("area");
        (AreaGrid::new(&config, levels).expect("grid"), MemoryStore::new())
    }

    fn step(
        grid: &mut AreaGrid,
        store: &mut MemoryStore,
        xy: TileXY,
        to: TileState,
        scope: EdgeScope,
    ) -> Result<Vec<TileEffect>, TransitionError> {
        TileStateMachine::new(grid, store).transition(xy, to, scope)
    }

    #[test]
    fn on_disk_to_loaded_is_illegal_and_changes_nothing() {
        let (mut grid, mut store) = strip(2);
        let a = TileXY::new(0, 0);
        step(&mut grid, &mut store, a, TileState::OnDisk, EdgeScope::All).expect("to disk");
        let error = step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All)
            .expect_err("illegal");
        assert!(matches!(
            error,
            TransitionError::Illegal {
                from: TileState::OnDisk,
                to: TileState::Loaded,
                ..
            }
        ));
        assert_eq!(grid.state(a), Some(TileState::OnDisk));
        grid.check_links().expect("consistent");
    }

    #[test]
    fn disk_round_trip_restores_identical_snapshot() {
        let (mut grid, mut store) = strip(1);
        let xy = TileXY::new(0, 0);
        let before = grid.tile(xy).and_then(|t| t.snapshot()).cloned().expect("json");

        step(&mut grid, &mut store, xy, TileState::OnDisk, EdgeScope::All).expect("write");
        assert_eq!(grid.tile(xy).expect("tile").payload(), &TilePayload::OnDisk);
        assert!(store.contains_key("t,0,0"));

        step(&mut grid, &mut store, xy, TileState::Json, EdgeScope::All).expect("read");
        let after = grid.tile(xy).and_then(|t| t.snapshot()).cloned().expect("json");
        assert_eq!(before, after);
    }

    #[test]
    fn store_miss_keeps_tile_on_disk() {
        let (mut grid, mut store) = strip(1);
        let xy = TileXY::new(0, 0);
        step(&mut grid, &mut store, xy, TileState::OnDisk, EdgeScope::All).expect("write");
        store.restore_dump(Default::default()).expect("wipe");

        let error =
            step(&mut grid, &mut store, xy, TileState::Json, EdgeScope::All).expect_err("miss");
        assert!(matches!(error, TransitionError::StoreMiss { ref key, .. } if key == "t,0,0"));
        assert_eq!(grid.state(xy), Some(TileState::OnDisk));
    }

    #[test]
    fn promotion_links_only_loaded_neighbors() {
        let (mut grid, mut store) = strip(3);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));

        let effects = step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All)
            .expect("load a");
        assert_eq!(grid.level(a).expect("a").live_connection_count(), 0);
        assert!(matches!(effects[1], TileEffect::ActorsRegistered { ref actors, .. } if actors.len() == 2));

        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");
        let level_b = grid.level(b).expect("b");
        assert_eq!(level_b.live_edge_slots(Direction::West).len(), 2);
        // The eastern neighbor is still JSON, so those passages stay descriptors.
        assert!(level_b.live_edge_slots(Direction::East).is_empty());
        assert_eq!(level_b.edge_slots(Direction::East, grid.tile(TileXY::new(2, 0)).expect("c").level_id()).len(), 2);
        grid.check_links().expect("consistent");
    }

    #[test]
    fn demotion_converts_reciprocal_connections() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");

        let effects = step(
            &mut grid,
            &mut store,
            a,
            TileState::Json,
            EdgeScope::Toward(Direction::East),
        )
        .expect("demote a");
        assert!(matches!(effects[0], TileEffect::ActorsDeregistered { .. }));
        assert!(matches!(effects[1], TileEffect::BattlesUnloaded { .. }));

        let level_b = grid.level(b).expect("b");
        assert_eq!(level_b.live_connection_count(), 0);
        let a_id = grid.tile(a).expect("a").level_id();
        assert_eq!(level_b.edge_slots(Direction::West, a_id).len(), 2);
        grid.check_links().expect("consistent");

        // The snapshot of A carries descriptors equal to the ones it started with.
        let snapshot = grid.tile(a).and_then(|t| t.snapshot()).expect("json");
        let rebuilt = PlainWorld::default()
            .build_level(
                &StreamingConfig {
                    session_id: "t".to_string(),
                    size_x: 2,
                    size_y: 1,
                    ..StreamingConfig::default()
                },
                a,
            )
            .expect("level");
        assert_eq!(
            snapshot,
            &LevelSnapshot::capture_detached(&rebuilt).expect("capture")
        );
    }

    #[test]
    fn demotion_scope_only_narrows_the_strict_edges() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");

        step(
            &mut grid,
            &mut store,
            a,
            TileState::OnDisk,
            EdgeScope::Toward(Direction::North),
        )
        .expect("demote a");
        assert_eq!(grid.level(b).expect("b").live_connection_count(), 0);
        assert!(store.contains_key("t,0,0"));
        grid.check_links().expect("consistent");
    }

    #[test]
    fn asymmetric_link_blocks_demotion_without_mutation() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");

        let back_slot = grid.level(a).expect("a").connections[0]
            .target
            .live()
            .expect("live")
            .slot;
        grid.level_mut(b).expect("b").connections[back_slot].target =
            ConnectionTarget::Live(ConnectionHandle { tile: a, slot: 1 });

        let error = step(&mut grid, &mut store, a, TileState::OnDisk, EdgeScope::All)
            .expect_err("asymmetric");
        assert!(matches!(
            error,
            TransitionError::AsymmetricLink { slot: 0, .. }
        ));
        assert_eq!(grid.state(a), Some(TileState::Loaded));
        assert!(grid.level(a).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn mid_transition_tile_rejects_another_transition() {
        let (mut grid, mut store) = strip(2);
        let b = TileXY::new(1, 0);
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");
        let payload = grid.tile(b).expect("b").payload().clone();
        grid.tile_mut(b)
            .expect("b")
            .set_state(TileState::LoadedToJson);

        let error = step(&mut grid, &mut store, b, TileState::Json, EdgeScope::All)
            .expect_err("re-entrant");
        assert!(matches!(
            error,
            TransitionError::InProgress {
                state: TileState::LoadedToJson,
                ..
            }
        ));
        assert_eq!(grid.state(b), Some(TileState::LoadedToJson));
        assert_eq!(grid.tile(b).expect("b").payload(), &payload);
        assert!(store.is_empty());
    }

    #[test]
    fn demotion_needs_live_links_on_the_move_edge() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");

        // Unlink the shared edge on both sides, leaving matching descriptors.
        let a_id = grid.tile(a).expect("a").level_id();
        let b_id = grid.tile(b).expect("b").level_id();
        let shared = grid.level(a).expect("a").live_edge_slots(Direction::East);
        assert_eq!(shared.len(), 2);
        for (slot, handle) in shared {
            let a_src = grid.level(a).expect("a").connections[slot].src;
            let b_src = grid.level(b).expect("b").connections[handle.slot].src;
            grid.level_mut(a).expect("a").connections[slot].target =
                ConnectionTarget::Descriptor(ConnectionDescriptor {
                    target_level_id: b_id,
                    target_coord: b_src,
                });
            grid.level_mut(b).expect("b").connections[handle.slot].target =
                ConnectionTarget::Descriptor(ConnectionDescriptor {
                    target_level_id: a_id,
                    target_coord: a_src,
                });
        }

        let error = step(
            &mut grid,
            &mut store,
            a,
            TileState::Json,
            EdgeScope::Toward(Direction::East),
        )
        .expect_err("missing");
        assert!(matches!(
            error,
            TransitionError::MissingConnections {
                edge: Direction::East,
                ..
            }
        ));
        assert_eq!(grid.state(a), Some(TileState::Loaded));
        assert!(grid.level(a).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn blob_of_another_level_keeps_tile_on_disk() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::OnDisk, EdgeScope::All).expect("drop a");
        step(&mut grid, &mut store, b, TileState::OnDisk, EdgeScope::All).expect("drop b");
        let foreign = store.get_item("t,1,0").expect("get").expect("b blob");
        store.set_item("t,0,0", foreign).expect("overwrite");

        let error =
            step(&mut grid, &mut store, a, TileState::Json, EdgeScope::All).expect_err("mismatch");
        let (a_id, b_id) = (
            grid.tile(a).expect("a").level_id(),
            grid.tile(b).expect("b").level_id(),
        );
        assert!(matches!(
            error,
            TransitionError::LevelMismatch { expected, found, .. }
                if expected == a_id && found == b_id
        ));
        assert_eq!(grid.state(a), Some(TileState::OnDisk));
        assert_eq!(grid.tile(a).expect("a").payload(), &TilePayload::OnDisk);
    }

    #[test]
    fn live_link_to_a_non_neighbor_blocks_demotion() {
        let (mut grid, mut store) = strip(3);
        let (a, b, c) = (TileXY::new(0, 0), TileXY::new(1, 0), TileXY::new(2, 0));
        for xy in [a, b, c] {
            step(&mut grid, &mut store, xy, TileState::Loaded, EdgeScope::All).expect("load");
        }
        grid.level_mut(a).expect("a").connections[0].target =
            ConnectionTarget::Live(ConnectionHandle { tile: c, slot: 0 });
        let b_live = grid.level(b).expect("b").live_connection_count();

        let error = step(&mut grid, &mut store, a, TileState::Json, EdgeScope::All)
            .expect_err("stale");
        assert!(matches!(
            error,
            TransitionError::StaleLink { slot: 0, target, .. } if target == c
        ));
        assert_eq!(grid.state(a), Some(TileState::Loaded));
        assert!(grid.level(a).is_some());
        assert_eq!(grid.level(b).expect("b").live_connection_count(), b_live);
        assert!(store.is_empty());
    }

    #[test]
    fn loaded_straight_to_disk_skips_json_payload() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");
        step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All).expect("load b");

        step(&mut grid, &mut store, b, TileState::OnDisk, EdgeScope::All).expect("drop b");
        assert_eq!(grid.state(b), Some(TileState::OnDisk));
        assert!(store.contains_key("t,1,0"));
        assert_eq!(grid.level(a).expect("a").live_connection_count(), 0);
        grid.check_links().expect("consistent");
    }

    #[test]
    fn missing_edge_connections_block_promotion() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");

        // Strip B's western passages as a broken generator would.
        if let Some(tile) = grid.tile_mut(b) {
            if let TilePayload::Json(snapshot) = &mut tile.payload {
                snapshot
                    .connections
                    .retain(|record| record.src_xy.x != 0);
            }
        }
        let error = step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All)
            .expect_err("missing");
        assert!(matches!(
            error,
            TransitionError::MissingConnections {
                edge: Direction::West,
                ..
            }
        ));
        assert_eq!(grid.state(b), Some(TileState::Json));
        assert_eq!(grid.level(a).expect("a").live_connection_count(), 0);
    }

    #[test]
    fn unmatched_descriptor_blocks_promotion() {
        let (mut grid, mut store) = strip(2);
        let (a, b) = (TileXY::new(0, 0), TileXY::new(1, 0));
        step(&mut grid, &mut store, a, TileState::Loaded, EdgeScope::All).expect("load a");

        let a_id = grid.tile(a).expect("a").level_id();
        if let Some(tile) = grid.tile_mut(b) {
            if let TilePayload::Json(snapshot) = &mut tile.payload {
                let record = snapshot
                    .connections
                    .iter_mut()
                    .find(|record| record.descriptor.target_level_id == a_id)
                    .expect("west passage");
                record.descriptor.target_coord = CellXY::new(7, 7);
            }
        }
        let error = step(&mut grid, &mut store, b, TileState::Loaded, EdgeScope::All)
            .expect_err("unmatched");
        assert!(matches!(error, TransitionError::UnmatchedConnection { .. }));
        assert_eq!(grid.state(b), Some(TileState::Json));
    }

    #[test]
    fn sub_level_connections_stay_descriptors() {
        let config = StreamingConfig {
            session_id: "t".to_string(),
            size_x: 1,
            size_y: 1,
            ..StreamingConfig::default()
        };
        let world = PlainWorld {
            with_cellars: true,
            ..PlainWorld::default()
        };
        let levels = world.build_area(&config).expect("area");
        let mut grid = AreaGrid::new(&config, levels).expect("grid");
        let mut store = MemoryStore::new();
        let xy = TileXY::new(0, 0);

        let effects =
            step(&mut grid, &mut store, xy, TileState::Loaded, EdgeScope::All).expect("load");
        assert!(matches!(
            &effects[0],
            TileEffect::LevelsAdded { levels, .. } if levels.len() == 2
        ));
        let level = grid.level(xy).expect("level");
        assert_eq!(level.live_connection_count(), 0);
        assert!(level
            .connections
            .iter()
            .any(|conn: &Connection| conn.name == "stairs_down"));

        step(&mut grid, &mut store, xy, TileState::OnDisk, EdgeScope::All).expect("drop");
        step(&mut grid, &mut store, xy, TileState::Json, EdgeScope::All).expect("read");
        let snapshot = grid.tile(xy).and_then(|t| t.snapshot()).expect("json");
        assert_eq!(snapshot.sub_levels.len(), 1);
    }
}

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{ChunkManager, StreamingError};
use crate::config::StreamingConfig;
use crate::grid::{tile_id_for, AreaGrid, TilePayload, TileState, TileXY};
use crate::level::{LevelId, LevelSnapshot};
use crate::sim::{apply_effects, SimulationEngine};
use crate::store::PersistentStore;
use crate::transition::{EdgeScope, TileStateMachine};

pub const SAVE_VERSION: u32 = 1;

/// Session save: everything needed to rebuild a [`ChunkManager`] in a fresh
/// process, given an empty store and a fresh engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManagerSave {
    pub save_version: u32,
    pub config: StreamingConfig,
    /// Tile states as `[x][y]` columns.
    pub state: Vec<Vec<TileState>>,
    /// Level id of every tile, row-major.
    pub level_ids: Vec<LevelId>,
    /// `[newXY, oldXY]` pairs in call order.
    pub recorded_tile_moves: Vec<(TileXY, Option<TileXY>)>,
    #[serde(default)]
    pub player_tile: Option<TileXY>,
    pub store_dump: BTreeMap<String, String>,
    /// Descriptor-only snapshots of every JSON and LOADED tile, by tile id.
    pub snapshots: BTreeMap<String, LevelSnapshot>,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("failed to parse session save at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to encode session save: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("validation failed at {path}: {message}")]
    Invalid { path: String, message: String },
}

fn invalid(path: impl Into<String>, message: impl Into<String>) -> SaveError {
    SaveError::Invalid {
        path: path.into(),
        message: message.into(),
    }
}

fn expected_actual(
    path: impl Into<String>,
    expected: impl Display,
    actual: impl Display,
) -> SaveError {
    invalid(path, format!("expected {expected}, got {actual}"))
}

impl ChunkManagerSave {
    pub fn from_json(raw: &str) -> Result<Self, SaveError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize::<_, ChunkManagerSave>(&mut deserializer).map_err(
            |error| {
                let path = error.path().to_string();
                let source = error.into_inner();
                SaveError::Parse {
                    path: if path.is_empty() {
                        ".".to_string()
                    } else {
                        path
                    },
                    message: source.to_string(),
                }
            },
        )
    }

    pub fn to_json(&self) -> Result<String, SaveError> {
        serde_json::to_string_pretty(self).map_err(SaveError::Encode)
    }

    pub fn validate(&self) -> Result<(), SaveError> {
        if self.save_version != SAVE_VERSION {
            return Err(expected_actual(
                "saveVersion",
                SAVE_VERSION,
                self.save_version,
            ));
        }
        self.config
            .validate()
            .map_err(|error| invalid("config", error.to_string()))?;

        let size_x = self.config.size_x as usize;
        let size_y = self.config.size_y as usize;
        if self.state.len() != size_x {
            return Err(expected_actual("state", format!("{size_x} columns"), self.state.len()));
        }
        for (x, column) in self.state.iter().enumerate() {
            if column.len() != size_y {
                return Err(expected_actual(
                    format!("state[{x}]"),
                    format!("{size_y} rows"),
                    column.len(),
                ));
            }
        }
        if self.level_ids.len() != self.config.tile_count() {
            return Err(expected_actual(
                "levelIds",
                format!("{} entries", self.config.tile_count()),
                self.level_ids.len(),
            ));
        }

        let mut expected_snapshots = 0;
        for (index, level_id) in self.level_ids.iter().enumerate() {
            let xy = TileXY::new((index % size_x) as u32, (index / size_x) as u32);
            let state = self.state[xy.x as usize][xy.y as usize];
            let key = tile_id_for(&self.config.session_id, xy);
            match state {
                TileState::OnDisk => {
                    if !self.store_dump.contains_key(&key) {
                        return Err(invalid(
                            format!("storeDump.{key}"),
                            "ON_DISK tile has no stored blob",
                        ));
                    }
                }
                TileState::Json | TileState::Loaded => {
                    expected_snapshots += 1;
                    let Some(snapshot) = self.snapshots.get(&key) else {
                        return Err(invalid(
                            format!("snapshots.{key}"),
                            format!("{state:?} tile has no snapshot"),
                        ));
                    };
                    if snapshot.id != *level_id {
                        return Err(expected_actual(
                            format!("snapshots.{key}.id"),
                            level_id,
                            snapshot.id,
                        ));
                    }
                }
                transient => {
                    return Err(invalid(
                        format!("state[{}][{}]", xy.x, xy.y),
                        format!("tile saved mid-transition ({transient:?})"),
                    ));
                }
            }
        }
        if self.snapshots.len() != expected_snapshots {
            return Err(expected_actual(
                "snapshots",
                format!("{expected_snapshots} entries"),
                self.snapshots.len(),
            ));
        }

        if let Some(player) = self.player_tile {
            if player.x as usize >= size_x || player.y as usize >= size_y {
                return Err(invalid("playerTile", format!("{player} is outside the grid")));
            }
        }
        Ok(())
    }
}

impl<S: PersistentStore, E: SimulationEngine> ChunkManager<S, E> {
    pub fn to_save(&self) -> Result<ChunkManagerSave, StreamingError> {
        let mut snapshots = BTreeMap::new();
        for tile in self.grid.tiles() {
            let snapshot = match tile.payload() {
                TilePayload::Json(snapshot) => snapshot.clone(),
                TilePayload::Loaded(level) => {
                    LevelSnapshot::capture(level, &|handle| self.grid.resolve_handle(handle))
                        .map_err(|source| StreamingError::Snapshot {
                            tile: tile.xy(),
                            source,
                        })?
                }
                TilePayload::OnDisk => continue,
            };
            snapshots.insert(tile.tile_id().to_string(), snapshot);
        }

        Ok(ChunkManagerSave {
            save_version: SAVE_VERSION,
            config: self.config.clone(),
            state: self.grid.state_columns(),
            level_ids: self.grid.tiles().map(|tile| tile.level_id()).collect(),
            recorded_tile_moves: self.recorded_tile_moves.clone(),
            player_tile: self.player_tile,
            store_dump: self.store.dump()?,
            snapshots,
        })
    }

    pub fn save_json(&self) -> Result<String, StreamingError> {
        Ok(self.to_save()?.to_json()?)
    }

    /// Rebuilds a session. The store is overwritten with the saved dump;
    /// LOADED tiles are materialized again, linked on all four edges and
    /// their actors registered with `engine`.
    pub fn from_save(
        save: ChunkManagerSave,
        mut store: S,
        mut engine: E,
    ) -> Result<Self, StreamingError> {
        save.validate()?;
        let ChunkManagerSave {
            config,
            state,
            level_ids,
            recorded_tile_moves,
            player_tile,
            store_dump,
            mut snapshots,
            ..
        } = save;

        let size_x = config.size_x as usize;
        let mut parts = Vec::with_capacity(level_ids.len());
        let mut to_load = Vec::new();
        for (index, level_id) in level_ids.into_iter().enumerate() {
            let xy = TileXY::new((index % size_x) as u32, (index / size_x) as u32);
            let part = match state[xy.x as usize][xy.y as usize] {
                TileState::OnDisk => (TileState::OnDisk, level_id, TilePayload::OnDisk),
                saved => {
                    let key = tile_id_for(&config.session_id, xy);
                    let snapshot = snapshots.remove(&key).ok_or_else(|| {
                        invalid(format!("snapshots.{key}"), "tile has no snapshot")
                    })?;
                    if saved == TileState::Loaded {
                        to_load.push(xy);
                    }
                    (TileState::Json, level_id, TilePayload::Json(snapshot))
                }
            };
            parts.push(part);
        }

        let mut grid = AreaGrid::from_parts(&config, parts)?;
        store.restore_dump(store_dump)?;
        for &xy in &to_load {
            let effects = TileStateMachine::new(&mut grid, &mut store).transition(
                xy,
                TileState::Loaded,
                EdgeScope::All,
            )?;
            apply_effects(&mut engine, &effects);
        }

        info!(
            session = %config.session_id,
            loaded = to_load.len(),
            moves = recorded_tile_moves.len(),
            "session_restored"
        );
        Ok(Self {
            config,
            grid,
            store,
            engine,
            player_tile,
            recorded_tile_moves,
        })
    }

    pub fn restore_json(raw: &str, store: S, engine: E) -> Result<Self, StreamingError> {
        let save = ChunkManagerSave::from_json(raw)?;
        Self::from_save(save, store, engine)
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::coords::{Direction, TileXY};
use crate::config::{ConfigError, StreamingConfig};
use crate::level::{ConnectionDescriptor, ConnectionHandle, Level, LevelId, LevelSnapshot};

/// Fidelity tier of a tile, plus markers for transitions in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileState {
    Loaded,
    Json,
    OnDisk,
    LoadedToJson,
    JsonToOnDisk,
    OnDiskToJson,
}

impl TileState {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            TileState::LoadedToJson | TileState::JsonToOnDisk | TileState::OnDiskToJson
        )
    }

    /// Single character used by the grid dump.
    pub fn as_char(self) -> char {
        match self {
            TileState::Loaded => 'L',
            TileState::Json => 'J',
            TileState::OnDisk => 'D',
            TileState::LoadedToJson => 'j',
            TileState::JsonToOnDisk => 'd',
            TileState::OnDiskToJson => 'u',
        }
    }

    /// Higher is more materialized. Transient markers have no rank.
    pub(crate) fn rank(self) -> Option<u8> {
        match self {
            TileState::OnDisk => Some(0),
            TileState::Json => Some(1),
            TileState::Loaded => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TilePayload {
    Loaded(Level),
    Json(LevelSnapshot),
    OnDisk,
}

#[derive(Debug, Clone)]
pub struct Tile {
    xy: TileXY,
    tile_id: String,
    level_id: LevelId,
    state: TileState,
    pub(crate) payload: TilePayload,
}

impl Tile {
    pub fn xy(&self) -> TileXY {
        self.xy
    }

    /// Persistence key, `"<session>,<x>,<y>"`.
    pub fn tile_id(&self) -> &str {
        &self.tile_id
    }

    pub fn level_id(&self) -> LevelId {
        self.level_id
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn payload(&self) -> &TilePayload {
        &self.payload
    }

    pub fn level(&self) -> Option<&Level> {
        match &self.payload {
            TilePayload::Loaded(level) => Some(level),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Option<&LevelSnapshot> {
        match &self.payload {
            TilePayload::Json(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub(crate) fn set_state(&mut self, state: TileState) {
        self.state = state;
    }
}

#[derive(Debug, Error)]
pub enum AreaError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("area needs {expected} tile levels, got {actual}")]
    TileCountMismatch { expected: usize, actual: usize },
    #[error("level id {level} is used by tiles {first} and {second}")]
    DuplicateLevelId {
        level: LevelId,
        first: TileXY,
        second: TileXY,
    },
}

pub fn tile_id_for(session_id: &str, xy: TileXY) -> String {
    format!("{session_id},{},{}", xy.x, xy.y)
}

/// Fixed `size_x * size_y` matrix of tiles, stored row-major by slot.
#[derive(Debug, Clone)]
pub struct AreaGrid {
    size_x: u32,
    size_y: u32,
    tiles: Vec<Tile>,
}

impl AreaGrid {
    /// Creates the grid with every tile in JSON state. `levels` are given
    /// row-major: index `y * size_x + x`.
    pub fn new(config: &StreamingConfig, levels: Vec<LevelSnapshot>) -> Result<Self, AreaError> {
        let tiles = levels
            .into_iter()
            .map(|snapshot| (TileState::Json, snapshot.id, TilePayload::Json(snapshot)))
            .collect();
        Self::from_parts(config, tiles)
    }

    pub(crate) fn from_parts(
        config: &StreamingConfig,
        parts: Vec<(TileState, LevelId, TilePayload)>,
    ) -> Result<Self, AreaError> {
        config.validate()?;
        let expected = config.tile_count();
        if parts.len() != expected {
            return Err(AreaError::TileCountMismatch {
                expected,
                actual: parts.len(),
            });
        }

        let mut tiles = Vec::with_capacity(expected);
        let mut tiles_by_level = HashMap::with_capacity(expected);
        for (index, (state, level_id, payload)) in parts.into_iter().enumerate() {
            let xy = TileXY::new(
                (index % config.size_x as usize) as u32,
                (index / config.size_x as usize) as u32,
            );
            if let Some(first) = tiles_by_level.insert(level_id, xy) {
                return Err(AreaError::DuplicateLevelId {
                    level: level_id,
                    first,
                    second: xy,
                });
            }
            tiles.push(Tile {
                xy,
                tile_id: tile_id_for(&config.session_id, xy),
                level_id,
                state,
                payload,
            });
        }

        Ok(Self {
            size_x: config.size_x,
            size_y: config.size_y,
            tiles,
        })
    }

    pub fn size_x(&self) -> u32 {
        self.size_x
    }

    pub fn size_y(&self) -> u32 {
        self.size_y
    }

    pub fn contains(&self, xy: TileXY) -> bool {
        xy.x < self.size_x && xy.y < self.size_y
    }

    fn index_of(&self, xy: TileXY) -> Option<usize> {
        if !self.contains(xy) {
            return None;
        }
        Some(xy.y as usize * self.size_x as usize + xy.x as usize)
    }

    pub fn tile(&self, xy: TileXY) -> Option<&Tile> {
        self.index_of(xy).map(|index| &self.tiles[index])
    }

    pub(crate) fn tile_mut(&mut self, xy: TileXY) -> Option<&mut Tile> {
        self.index_of(xy).map(|index| &mut self.tiles[index])
    }

    /// Tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    pub fn state(&self, xy: TileXY) -> Option<TileState> {
        self.tile(xy).map(Tile::state)
    }

    pub fn neighbor(&self, xy: TileXY, dir: Direction) -> Option<TileXY> {
        xy.step(dir, self.size_x, self.size_y)
    }

    pub fn level(&self, xy: TileXY) -> Option<&Level> {
        self.tile(xy).and_then(Tile::level)
    }

    /// Mutable access to a materialized level, for game logic moving actors
    /// and items around. Connections stay read-only outside this crate.
    pub fn level_mut(&mut self, xy: TileXY) -> Option<&mut Level> {
        match &mut self.tile_mut(xy)?.payload {
            TilePayload::Loaded(level) => Some(level),
            _ => None,
        }
    }

    /// Descriptor for the connection `handle` points at, if that tile is
    /// materialized and the slot exists.
    pub fn resolve_handle(&self, handle: ConnectionHandle) -> Option<ConnectionDescriptor> {
        let tile = self.tile(handle.tile)?;
        let conn = tile.level()?.connection(handle.slot)?;
        Some(ConnectionDescriptor {
            target_level_id: tile.level_id(),
            target_coord: conn.src,
        })
    }

    /// One character per tile, one line per grid row.
    pub fn render_states(&self) -> String {
        let mut output = String::with_capacity(self.tiles.len() + self.size_y as usize);
        for row in self.tiles.chunks(self.size_x as usize) {
            for tile in row {
                output.push(tile.state.as_char());
            }
            output.push('\n');
        }
        output
    }

    pub fn count_in_state(&self, state: TileState) -> usize {
        self.tiles.iter().filter(|tile| tile.state == state).count()
    }

    /// State table as `[x][y]` columns, the layout used in session saves.
    pub fn state_columns(&self) -> Vec<Vec<TileState>> {
        (0..self.size_x)
            .map(|x| {
                (0..self.size_y)
                    .map(|y| self.tiles[y as usize * self.size_x as usize + x as usize].state)
                    .collect()
            })
            .collect()
    }

    pub(crate) fn summary_line(&self) -> String {
        format!(
            "loaded={} json={} on_disk={}",
            self.count_in_state(TileState::Loaded),
            self.count_in_state(TileState::Json),
            self.count_in_state(TileState::OnDisk)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{LevelMap, CELL_FLOOR};

    fn blank_snapshot(id: u64) -> LevelSnapshot {
        LevelSnapshot {
            id: LevelId(id),
            level_number: 0,
            actors: Vec::new(),
            items: Vec::new(),
            elements: Vec::new(),
            map: LevelMap::filled(3, 3, CELL_FLOOR).expect("map"),
            connections: Vec::new(),
            sub_levels: Vec::new(),
        }
    }

    fn config(size_x: u32, size_y: u32) -> StreamingConfig {
        StreamingConfig {
            session_id: "w".to_string(),
            size_x,
            size_y,
            ..StreamingConfig::default()
        }
    }

    #[test]
    fn tiles_are_laid_out_row_major() {
        let levels = (0..6).map(blank_snapshot).collect();
        let grid = AreaGrid::new(&config(3, 2), levels).expect("grid");
        let tile = grid.tile(TileXY::new(2, 1)).expect("tile");
        assert_eq!(tile.level_id(), LevelId(5));
        assert_eq!(tile.tile_id(), "w,2,1");
        assert_eq!(tile.state(), TileState::Json);
        assert_eq!(grid.tile(TileXY::new(1, 1)).map(Tile::level_id), Some(LevelId(4)));
        assert!(grid.tile(TileXY::new(3, 0)).is_none());
    }

    #[test]
    fn level_count_must_match_grid() {
        let levels = (0..5).map(blank_snapshot).collect();
        assert!(matches!(
            AreaGrid::new(&config(3, 2), levels),
            Err(AreaError::TileCountMismatch {
                expected: 6,
                actual: 5
            })
        ));
    }

    #[test]
    fn duplicate_level_ids_are_rejected() {
        let levels = vec![blank_snapshot(1), blank_snapshot(1)];
        assert!(matches!(
            AreaGrid::new(&config(2, 1), levels),
            Err(AreaError::DuplicateLevelId { .. })
        ));
    }

    #[test]
    fn render_and_columns_agree_on_layout() {
        let levels = (0..6).map(blank_snapshot).collect();
        let mut grid = AreaGrid::new(&config(3, 2), levels).expect("grid");
        grid.tile_mut(TileXY::new(2, 0))
            .expect("tile")
            .set_state(TileState::OnDisk);
        assert_eq!(grid.render_states(), "JJD\nJJJ\n");
        let columns = grid.state_columns();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2], vec![TileState::OnDisk, TileState::Json]);
        assert_eq!(grid.count_in_state(TileState::Json), 5);
    }

    #[test]
    fn tile_state_serializes_in_screaming_case() {
        let raw = serde_json::to_string(&[TileState::OnDisk, TileState::LoadedToJson])
            .expect("encode");
        assert_eq!(raw, r#"["ON_DISK","LOADED_TO_JSON"]"#);
    }
}

//! Minimal deterministic area layout: flat levels joined by passages on
//! every shared edge. Real content generation lives outside this crate; this
//! is what the demo binary and the test-suite stream around.

use thiserror::Error;

use crate::config::StreamingConfig;
use crate::grid::{CellXY, Direction, TileXY};
use crate::level::{
    Actor, ActorId, Connection, Element, Item, Level, LevelId, LevelMap, LevelMapError,
    LevelSnapshot, SnapshotError, CELL_FLOOR, CELL_PASSAGE,
};

#[derive(Debug, Error)]
pub enum WorldgenError {
    #[error(transparent)]
    Map(#[from] LevelMapError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Debug, Clone)]
pub struct PlainWorld {
    pub level_cols: u32,
    pub level_rows: u32,
    pub passages_per_edge: u32,
    pub actors_per_tile: u32,
    /// Adds a one-room sub-level under every tile whose `x + y` is even.
    pub with_cellars: bool,
}

impl Default for PlainWorld {
    fn default() -> Self {
        Self {
            level_cols: 8,
            level_rows: 8,
            passages_per_edge: 2,
            actors_per_tile: 2,
            with_cellars: false,
        }
    }
}

pub fn level_id_for(config: &StreamingConfig, xy: TileXY) -> LevelId {
    LevelId(u64::from(xy.y) * u64::from(config.size_x) + u64::from(xy.x) + 1)
}

fn cellar_id_for(config: &StreamingConfig, xy: TileXY) -> LevelId {
    LevelId(config.tile_count() as u64 + level_id_for(config, xy).0)
}

impl PlainWorld {
    /// Cell on the `dir` edge used by passage number `index`.
    pub fn passage_cell(&self, dir: Direction, index: u32) -> CellXY {
        let along_x = (index + 1) * self.level_cols / (self.passages_per_edge + 1);
        let along_y = (index + 1) * self.level_rows / (self.passages_per_edge + 1);
        match dir {
            Direction::North => CellXY::new(along_x, 0),
            Direction::South => CellXY::new(along_x, self.level_rows - 1),
            Direction::West => CellXY::new(0, along_y),
            Direction::East => CellXY::new(self.level_cols - 1, along_y),
        }
    }

    pub fn build_level(&self, config: &StreamingConfig, xy: TileXY) -> Result<Level, WorldgenError> {
        let id = level_id_for(config, xy);
        let map = LevelMap::filled(self.level_cols, self.level_rows, CELL_FLOOR)?;
        let mut level = Level::new(id, 0, map);

        for dir in Direction::ALL {
            let Some(neighbor) = xy.step(dir, config.size_x, config.size_y) else {
                continue;
            };
            let neighbor_id = level_id_for(config, neighbor);
            for index in 0..self.passages_per_edge {
                let src = self.passage_cell(dir, index);
                level.map.set_cell(src, CELL_PASSAGE);
                level.connections.push(Connection::unlinked(
                    format!("{}_{index}", dir.as_token()),
                    src,
                    neighbor_id,
                    self.passage_cell(dir.opposite(), index),
                ));
            }
        }

        let base_actor = (id.0 - 1) * 100;
        let inner_cols = self.level_cols.saturating_sub(2).max(1);
        let inner_rows = self.level_rows.saturating_sub(2).max(1);
        for index in 0..self.actors_per_tile {
            level.actors.push(Actor {
                id: ActorId(base_actor + u64::from(index)),
                name: format!("denizen_{}_{}_{index}", xy.x, xy.y),
                pos: CellXY::new(
                    (1 + index % inner_cols).min(self.level_cols - 1),
                    (1 + (index / inner_cols) % inner_rows).min(self.level_rows - 1),
                ),
                speed: 100,
                energy: 0,
            });
        }
        level.items.push(Item {
            name: "supplies".to_string(),
            pos: CellXY::new(self.level_cols / 2, self.level_rows / 2),
        });

        if self.with_cellars && (xy.x + xy.y) % 2 == 0 {
            let cellar_id = cellar_id_for(config, xy);
            let stairs_down =
                CellXY::new(self.level_cols / 2, (self.level_rows / 2).saturating_sub(1));
            let mut cellar = Level::new(cellar_id, 1, LevelMap::filled(3, 3, CELL_FLOOR)?);
            cellar
                .connections
                .push(Connection::unlinked("stairs_up", CellXY::new(1, 1), id, stairs_down));
            cellar.actors.push(Actor {
                id: ActorId(base_actor + 99),
                name: format!("cellar_rat_{}_{}", xy.x, xy.y),
                pos: CellXY::new(0, 0),
                speed: 80,
                energy: 0,
            });
            level
                .connections
                .push(Connection::unlinked("stairs_down", stairs_down, cellar_id, CellXY::new(1, 1)));
            level.elements.push(Element {
                kind: "stairs".to_string(),
                pos: stairs_down,
            });
            level.sub_levels.push(cellar);
        }

        Ok(level)
    }

    /// Snapshots for every tile, row-major, ready for `AreaGrid::new`.
    pub fn build_area(&self, config: &StreamingConfig) -> Result<Vec<LevelSnapshot>, WorldgenError> {
        let mut snapshots = Vec::with_capacity(config.tile_count());
        for y in 0..config.size_y {
            for x in 0..config.size_x {
                let level = self.build_level(config, TileXY::new(x, y))?;
                snapshots.push(LevelSnapshot::capture_detached(&level)?);
            }
        }
        Ok(snapshots)
    }
}

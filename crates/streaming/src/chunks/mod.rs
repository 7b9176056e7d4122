//! Player-driven streaming policy.
//!
//! [`ChunkManager`] owns the area grid, the persistent store and the
//! simulation engine binding. Each time the player crosses into another tile
//! it recomputes the three Chebyshev bands around that tile and drives every
//! tile whose band changed through the [`TileStateMachine`], demotions first.

mod save;

use thiserror::Error;
use tracing::info;

use crate::config::StreamingConfig;
use crate::grid::{move_direction, AreaError, AreaGrid, LinkViolation, TileState, TileXY};
use crate::level::{Level, LevelSnapshot, SnapshotError};
use crate::sim::{apply_effects, SimulationEngine};
use crate::store::{PersistentStore, StoreError};
use crate::transition::{EdgeScope, TileStateMachine, TransitionError};

pub use save::{ChunkManagerSave, SaveError, SAVE_VERSION};

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error(transparent)]
    Area(#[from] AreaError),
    #[error("tile {tile} is outside the {size_x}x{size_y} grid")]
    OutOfBounds { tile: TileXY, size_x: u32, size_y: u32 },
    #[error("diagonal move from {from} to {to}; moves must change one axis only")]
    Diagonal { from: TileXY, to: TileXY },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to snapshot tile {tile}: {source}")]
    Snapshot {
        tile: TileXY,
        #[source]
        source: SnapshotError,
    },
    #[error(transparent)]
    Save(#[from] SaveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionStep {
    pub tile: TileXY,
    pub from: TileState,
    pub to: TileState,
}

/// Every transition applied by one `on_player_tile_changed` call, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub steps: Vec<TransitionStep>,
}

impl TransitionReport {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Steps applied to `tile`, as `(from, to)` pairs.
    pub fn steps_for(&self, tile: TileXY) -> Vec<(TileState, TileState)> {
        self.steps
            .iter()
            .filter(|step| step.tile == tile)
            .map(|step| (step.from, step.to))
            .collect()
    }

    pub fn count(&self, from: TileState, to: TileState) -> usize {
        self.steps
            .iter()
            .filter(|step| step.from == from && step.to == to)
            .count()
    }
}

pub struct ChunkManager<S: PersistentStore, E: SimulationEngine> {
    config: StreamingConfig,
    grid: AreaGrid,
    store: S,
    engine: E,
    player_tile: Option<TileXY>,
    recorded_tile_moves: Vec<(TileXY, Option<TileXY>)>,
}

impl<S: PersistentStore, E: SimulationEngine> ChunkManager<S, E> {
    /// Builds a session with every tile in JSON state. `levels` are the tile
    /// levels in row-major order. Nothing is loaded until the first
    /// `on_player_tile_changed` call.
    pub fn new(
        config: StreamingConfig,
        levels: Vec<LevelSnapshot>,
        store: S,
        engine: E,
    ) -> Result<Self, StreamingError> {
        let grid = AreaGrid::new(&config, levels)?;
        info!(
            session = %config.session_id,
            size_x = config.size_x,
            size_y = config.size_y,
            load_radius = config.load_radius,
            json_radius = config.json_radius,
            "chunk_manager_created"
        );
        Ok(Self {
            config,
            grid,
            store,
            engine,
            player_tile: None,
            recorded_tile_moves: Vec::new(),
        })
    }

    /// Re-bands the grid around `new`.
    ///
    /// `old` is the tile the player came from, or `None` on the first call.
    /// All demotions are decided from the state table as it was on entry and
    /// applied before any promotion. A failing transition aborts the pass
    /// with that tile untouched; steps already applied stay applied.
    pub fn on_player_tile_changed(
        &mut self,
        new: TileXY,
        old: Option<TileXY>,
    ) -> Result<TransitionReport, StreamingError> {
        self.ensure_in_bounds(new)?;
        let direction = match old {
            Some(old) => {
                self.ensure_in_bounds(old)?;
                move_direction(old, new).map_err(|diagonal| StreamingError::Diagonal {
                    from: diagonal.from,
                    to: diagonal.to,
                })?
            }
            None => None,
        };
        let scope = EdgeScope::from_move(direction);

        let before = self
            .grid
            .tiles()
            .map(|tile| (tile.xy(), tile.state()))
            .collect::<Vec<_>>();
        let mut report = TransitionReport::default();

        for &(xy, state) in &before {
            let target = self.band_of(xy, new);
            let demote = matches!(
                (state.rank(), target.rank()),
                (Some(current), Some(wanted)) if wanted < current
            );
            if demote {
                self.apply(xy, target, scope, &mut report)?;
            }
        }

        for &(xy, state) in &before {
            let target = self.band_of(xy, new);
            if state == TileState::OnDisk && target != TileState::OnDisk {
                self.apply(xy, TileState::Json, scope, &mut report)?;
            }
            if matches!(state, TileState::OnDisk | TileState::Json) && target == TileState::Loaded
            {
                self.apply(xy, TileState::Loaded, scope, &mut report)?;
            }
        }

        self.player_tile = Some(new);
        self.recorded_tile_moves.push((new, old));
        info!(
            player = %new,
            direction = ?direction,
            steps = report.len(),
            states = %self.grid.summary_line(),
            "player_tile_changed"
        );
        debug_assert!(
            self.grid.check_links().is_ok(),
            "link integrity broken after moving to {new}"
        );
        Ok(report)
    }

    fn ensure_in_bounds(&self, tile: TileXY) -> Result<(), StreamingError> {
        if self.grid.contains(tile) {
            Ok(())
        } else {
            Err(StreamingError::OutOfBounds {
                tile,
                size_x: self.grid.size_x(),
                size_y: self.grid.size_y(),
            })
        }
    }

    fn band_of(&self, xy: TileXY, player: TileXY) -> TileState {
        let distance = xy.distance(player);
        if distance <= self.config.load_radius {
            TileState::Loaded
        } else if distance <= self.config.json_radius {
            TileState::Json
        } else {
            TileState::OnDisk
        }
    }

    fn apply(
        &mut self,
        xy: TileXY,
        to: TileState,
        scope: EdgeScope,
        report: &mut TransitionReport,
    ) -> Result<(), StreamingError> {
        let Some(from) = self.grid.state(xy) else {
            return Err(StreamingError::OutOfBounds {
                tile: xy,
                size_x: self.grid.size_x(),
                size_y: self.grid.size_y(),
            });
        };
        let effects =
            TileStateMachine::new(&mut self.grid, &mut self.store).transition(xy, to, scope)?;
        apply_effects(&mut self.engine, &effects);
        report.steps.push(TransitionStep { tile: xy, from, to });
        Ok(())
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn state(&self, xy: TileXY) -> Option<TileState> {
        self.grid.state(xy)
    }

    pub fn is_loaded(&self, xy: TileXY) -> bool {
        self.state(xy) == Some(TileState::Loaded)
    }

    pub fn is_json(&self, xy: TileXY) -> bool {
        self.state(xy) == Some(TileState::Json)
    }

    pub fn is_on_disk(&self, xy: TileXY) -> bool {
        self.state(xy) == Some(TileState::OnDisk)
    }

    pub fn count_in_state(&self, state: TileState) -> usize {
        self.grid.count_in_state(state)
    }

    pub fn loaded_tiles(&self) -> Vec<TileXY> {
        self.grid
            .tiles()
            .filter(|tile| tile.state() == TileState::Loaded)
            .map(|tile| tile.xy())
            .collect()
    }

    pub fn level(&self, xy: TileXY) -> Option<&Level> {
        self.grid.level(xy)
    }

    /// Game-logic access to a materialized level. Actors, items and elements
    /// are editable; connections are read-only outside this crate.
    pub fn level_mut(&mut self, xy: TileXY) -> Option<&mut Level> {
        self.grid.level_mut(xy)
    }

    pub fn grid(&self) -> &AreaGrid {
        &self.grid
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn player_tile(&self) -> Option<TileXY> {
        self.player_tile
    }

    /// `(new, old)` pairs in call order.
    pub fn recorded_tile_moves(&self) -> &[(TileXY, Option<TileXY>)] {
        &self.recorded_tile_moves
    }

    pub fn check_links(&self) -> Result<(), LinkViolation> {
        self.grid.check_links()
    }

    /// Header line with the player tile and per-state counts, then one row of
    /// state characters per grid row.
    pub fn grid_dump(&self) -> String {
        let player = self
            .player_tile
            .map(|tile| tile.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "player={player} {}\n{}",
            self.grid.summary_line(),
            self.grid.render_states()
        )
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}

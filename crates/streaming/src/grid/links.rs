use thiserror::Error;

use super::area::{AreaGrid, TilePayload, TileState};
use super::coords::TileXY;
use crate::level::ConnectionTarget;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkViolation {
    #[error("tile {tile} is still marked {state:?}")]
    TransientState { tile: TileXY, state: TileState },
    #[error("tile {tile} is {state:?} but holds a {payload} payload")]
    PayloadMismatch {
        tile: TileXY,
        state: TileState,
        payload: &'static str,
    },
    #[error("tile {tile} slot {slot} links into tile {target}, which is not materialized")]
    TargetNotLoaded {
        tile: TileXY,
        slot: usize,
        target: TileXY,
    },
    #[error("tile {tile} slot {slot} links to missing slot {target_slot} of tile {target}")]
    MissingSlot {
        tile: TileXY,
        slot: usize,
        target: TileXY,
        target_slot: usize,
    },
    #[error("tile {tile} slot {slot} links to tile {target} slot {target_slot}, which does not link back")]
    NotReciprocal {
        tile: TileXY,
        slot: usize,
        target: TileXY,
        target_slot: usize,
    },
    #[error("tile {tile} slot {slot} links to non-adjacent tile {target}")]
    NotAdjacent {
        tile: TileXY,
        slot: usize,
        target: TileXY,
    },
}

fn payload_name(payload: &TilePayload) -> &'static str {
    match payload {
        TilePayload::Loaded(_) => "loaded",
        TilePayload::Json(_) => "json",
        TilePayload::OnDisk => "on_disk",
    }
}

impl AreaGrid {
    /// Verifies the steady-state invariants of the whole grid:
    /// - every state matches its payload and no transition marker is left
    /// - live connections only point into LOADED, adjacent tiles
    /// - every live link is reciprocated by exactly the connection it names
    pub fn check_links(&self) -> Result<(), LinkViolation> {
        for tile in self.tiles() {
            let state = tile.state();
            if state.is_transient() {
                return Err(LinkViolation::TransientState {
                    tile: tile.xy(),
                    state,
                });
            }
            let matches = matches!(
                (state, tile.payload()),
                (TileState::Loaded, TilePayload::Loaded(_))
                    | (TileState::Json, TilePayload::Json(_))
                    | (TileState::OnDisk, TilePayload::OnDisk)
            );
            if !matches {
                return Err(LinkViolation::PayloadMismatch {
                    tile: tile.xy(),
                    state,
                    payload: payload_name(tile.payload()),
                });
            }
        }

        for tile in self.tiles() {
            let Some(level) = tile.level() else {
                continue;
            };
            for (slot, conn) in level.connections.iter().enumerate() {
                let ConnectionTarget::Live(handle) = conn.target else {
                    continue;
                };
                if tile.xy().distance(handle.tile) != 1
                    || (tile.xy().x != handle.tile.x && tile.xy().y != handle.tile.y)
                {
                    return Err(LinkViolation::NotAdjacent {
                        tile: tile.xy(),
                        slot,
                        target: handle.tile,
                    });
                }
                let Some(target_level) = self.level(handle.tile) else {
                    return Err(LinkViolation::TargetNotLoaded {
                        tile: tile.xy(),
                        slot,
                        target: handle.tile,
                    });
                };
                let Some(reciprocal) = target_level.connection(handle.slot) else {
                    return Err(LinkViolation::MissingSlot {
                        tile: tile.xy(),
                        slot,
                        target: handle.tile,
                        target_slot: handle.slot,
                    });
                };
                let points_back = matches!(
                    reciprocal.target,
                    ConnectionTarget::Live(back) if back.tile == tile.xy() && back.slot == slot
                );
                if !points_back {
                    return Err(LinkViolation::NotReciprocal {
                        tile: tile.xy(),
                        slot,
                        target: handle.tile,
                        target_slot: handle.slot,
                    });
                }
            }
        }
        Ok(())
    }
}

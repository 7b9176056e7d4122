mod area;
mod coords;
mod links;

pub use area::{tile_id_for, AreaError, AreaGrid, Tile, TilePayload, TileState};
pub use coords::{move_direction, CellXY, DiagonalMove, Direction, TileXY};
pub use links::LinkViolation;

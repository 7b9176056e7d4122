use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a tile inside the area grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileXY {
    pub x: u32,
    pub y: u32,
}

impl TileXY {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance, the metric the streaming bands are defined in.
    pub fn distance(self, other: TileXY) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// Neighbor one step in `dir`, or `None` when that would leave `0..size`.
    pub fn step(self, dir: Direction, size_x: u32, size_y: u32) -> Option<TileXY> {
        let (dx, dy) = dir.offset();
        let x = self.x.checked_add_signed(dx)?;
        let y = self.y.checked_add_signed(dy)?;
        if x >= size_x || y >= size_y {
            return None;
        }
        Some(TileXY { x, y })
    }
}

impl fmt::Display for TileXY {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Position of a cell inside a level map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellXY {
    pub x: u32,
    pub y: u32,
}

impl CellXY {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CellXY {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Compass direction between adjacent tiles.
///
/// Edge convention for a level map: NORTH is the `y == 0` row, SOUTH the last
/// row, WEST the `x == 0` column and EAST the last column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagonalMove {
    pub from: TileXY,
    pub to: TileXY,
}

/// Direction of an axis-aligned move between two tiles.
///
/// Returns `Ok(None)` when the tiles are equal and `Err` when both axes change.
pub fn move_direction(from: TileXY, to: TileXY) -> Result<Option<Direction>, DiagonalMove> {
    let dx_changed = from.x != to.x;
    let dy_changed = from.y != to.y;
    match (dx_changed, dy_changed) {
        (true, true) => Err(DiagonalMove { from, to }),
        (false, false) => Ok(None),
        (true, false) if to.x > from.x => Ok(Some(Direction::East)),
        (true, false) => Ok(Some(Direction::West)),
        (false, true) if to.y > from.y => Ok(Some(Direction::South)),
        (false, true) => Ok(Some(Direction::North)),
    }
}

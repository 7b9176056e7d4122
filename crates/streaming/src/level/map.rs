use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{CellXY, Direction};

pub const CELL_FLOOR: u16 = 0;
pub const CELL_WALL: u16 = 1;
pub const CELL_PASSAGE: u16 = 2;

/// Cell grid of a level.
///
/// Cell (0,0) is the north-west corner; `y` grows southward. Cell values are
/// opaque to the streaming layer apart from the constants above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SerializedMap", into = "SerializedMap")]
pub struct LevelMap {
    cols: u32,
    rows: u32,
    cells: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LevelMapError {
    #[error("map cell count mismatch: expected {expected}, got {actual}")]
    CellCountMismatch { expected: usize, actual: usize },
    #[error("map must be at least 1x1, got {cols}x{rows}")]
    Empty { cols: u32, rows: u32 },
}

#[derive(Serialize, Deserialize)]
struct SerializedMap {
    cols: u32,
    rows: u32,
    cells: Vec<u16>,
}

impl TryFrom<SerializedMap> for LevelMap {
    type Error = LevelMapError;

    fn try_from(value: SerializedMap) -> Result<Self, Self::Error> {
        LevelMap::new(value.cols, value.rows, value.cells)
    }
}

impl From<LevelMap> for SerializedMap {
    fn from(value: LevelMap) -> Self {
        Self {
            cols: value.cols,
            rows: value.rows,
            cells: value.cells,
        }
    }
}

impl LevelMap {
    pub fn new(cols: u32, rows: u32, cells: Vec<u16>) -> Result<Self, LevelMapError> {
        if cols == 0 || rows == 0 {
            return Err(LevelMapError::Empty { cols, rows });
        }
        let expected = cols as usize * rows as usize;
        let actual = cells.len();
        if expected != actual {
            return Err(LevelMapError::CellCountMismatch { expected, actual });
        }
        Ok(Self { cols, rows, cells })
    }

    pub fn filled(cols: u32, rows: u32, fill: u16) -> Result<Self, LevelMapError> {
        Self::new(cols, rows, vec![fill; cols as usize * rows as usize])
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn index_of(&self, cell: CellXY) -> Option<usize> {
        if cell.x >= self.cols || cell.y >= self.rows {
            return None;
        }
        Some(cell.y as usize * self.cols as usize + cell.x as usize)
    }

    pub fn contains(&self, cell: CellXY) -> bool {
        self.index_of(cell).is_some()
    }

    pub fn cell_at(&self, cell: CellXY) -> Option<u16> {
        self.index_of(cell)
            .and_then(|index| self.cells.get(index).copied())
    }

    pub fn set_cell(&mut self, cell: CellXY, value: u16) -> bool {
        match self.index_of(cell) {
            Some(index) => {
                self.cells[index] = value;
                true
            }
            None => false,
        }
    }

    /// Whether `cell` lies on the boundary edge facing `dir`.
    pub fn is_on_edge(&self, cell: CellXY, dir: Direction) -> bool {
        if !self.contains(cell) {
            return false;
        }
        match dir {
            Direction::North => cell.y == 0,
            Direction::South => cell.y == self.rows - 1,
            Direction::West => cell.x == 0,
            Direction::East => cell.x == self.cols - 1,
        }
    }
}

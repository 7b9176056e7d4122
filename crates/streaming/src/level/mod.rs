mod map;
mod model;
mod snapshot;

pub use map::{LevelMap, LevelMapError, CELL_FLOOR, CELL_PASSAGE, CELL_WALL};
pub use model::{
    Actor, ActorId, Connection, ConnectionDescriptor, ConnectionHandle, ConnectionTarget,
    Element, Item, Level, LevelId,
};
pub use snapshot::{
    ActorRecord, ConnectionRecord, ElementRecord, ItemRecord, LevelSnapshot, Placed,
    SnapshotError,
};

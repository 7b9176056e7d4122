//! Tile streaming for a turn-based open world.
//!
//! The world area is a fixed grid of tiles, each holding one level in one of
//! three fidelity tiers: LOADED (live and simulated), JSON (serialized in
//! memory) or ON_DISK (serialized in a [`PersistentStore`]). The
//! [`ChunkManager`] keeps tiers banded around the player's tile and keeps
//! cross-tile connections consistent as tiles change tier.

pub mod chunks;
pub mod config;
pub mod grid;
pub mod level;
pub mod sim;
pub mod store;
pub mod transition;
pub mod worldgen;

pub use chunks::{
    ChunkManager, ChunkManagerSave, SaveError, StreamingError, TransitionReport, TransitionStep,
    SAVE_VERSION,
};
pub use config::{ConfigError, StreamingConfig, DEFAULT_SESSION_ID};
pub use grid::{
    move_direction, tile_id_for, AreaError, AreaGrid, CellXY, DiagonalMove, Direction,
    LinkViolation, Tile, TilePayload, TileState, TileXY,
};
pub use level::{
    Actor, ActorId, Connection, ConnectionDescriptor, ConnectionHandle, ConnectionTarget, Level,
    LevelId, LevelMap, LevelSnapshot, SnapshotError,
};
pub use sim::{EngineCall, RecordingEngine, SimulationEngine, TileEffect};
pub use store::{FileStore, MemoryStore, PersistentStore, StoreError};
pub use transition::{EdgeScope, TileStateMachine, TransitionError};
pub use worldgen::{PlainWorld, WorldgenError};

use crate::grid::TileXY;
use crate::level::{Actor, ActorId, LevelId};

/// Turn scheduler and game-master hooks the streaming layer drives.
///
/// The chunk manager calls each hook exactly once per actor (or level) per
/// transition; implementations need not be idempotent.
pub trait SimulationEngine {
    fn add_actor(&mut self, level: LevelId, actor: &Actor);

    fn remove_actor(&mut self, level: LevelId, actor: ActorId);

    fn add_levels(&mut self, levels: &[LevelId]);

    fn remove_levels(&mut self, levels: &[LevelId]);

    /// Tears down any live battle attached to `level`.
    fn unload_battles(&mut self, level: LevelId);
}

/// Side effect produced by a tile transition, applied to the engine only
/// after the transition has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEffect {
    LevelsAdded {
        tile: TileXY,
        levels: Vec<LevelId>,
    },
    ActorsRegistered {
        tile: TileXY,
        actors: Vec<(LevelId, Actor)>,
    },
    BattlesUnloaded {
        tile: TileXY,
        level: LevelId,
    },
    ActorsDeregistered {
        tile: TileXY,
        actors: Vec<(LevelId, ActorId)>,
    },
    LevelsRemoved {
        tile: TileXY,
        levels: Vec<LevelId>,
    },
}

pub(crate) fn apply_effects<E: SimulationEngine + ?Sized>(engine: &mut E, effects: &[TileEffect]) {
    for effect in effects {
        match effect {
            TileEffect::LevelsAdded { levels, .. } => engine.add_levels(levels),
            TileEffect::ActorsRegistered { actors, .. } => {
                for (level, actor) in actors {
                    engine.add_actor(*level, actor);
                }
            }
            TileEffect::BattlesUnloaded { level, .. } => engine.unload_battles(*level),
            TileEffect::ActorsDeregistered { actors, .. } => {
                for (level, actor) in actors {
                    engine.remove_actor(*level, *actor);
                }
            }
            TileEffect::LevelsRemoved { levels, .. } => engine.remove_levels(levels),
        }
    }
}

/// Engine that only records what it was told. Useful for tools and tests
/// that drive streaming without a real scheduler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingEngine {
    pub scheduled: Vec<(LevelId, ActorId)>,
    pub active_levels: Vec<LevelId>,
    pub calls: Vec<EngineCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AddActor(ActorId),
    RemoveActor(ActorId),
    AddLevels(Vec<LevelId>),
    RemoveLevels(Vec<LevelId>),
    UnloadBattles(LevelId),
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self, actor: ActorId) -> bool {
        self.scheduled.iter().any(|(_, id)| *id == actor)
    }

    pub fn calls_for(&self, actor: ActorId) -> usize {
        self.calls
            .iter()
            .filter(|call| {
                matches!(call, EngineCall::AddActor(id) | EngineCall::RemoveActor(id) if *id == actor)
            })
            .count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl SimulationEngine for RecordingEngine {
    fn add_actor(&mut self, level: LevelId, actor: &Actor) {
        self.scheduled.push((level, actor.id));
        self.calls.push(EngineCall::AddActor(actor.id));
    }

    fn remove_actor(&mut self, _level: LevelId, actor: ActorId) {
        self.scheduled.retain(|(_, id)| *id != actor);
        self.calls.push(EngineCall::RemoveActor(actor));
    }

    fn add_levels(&mut self, levels: &[LevelId]) {
        self.active_levels.extend_from_slice(levels);
        self.calls.push(EngineCall::AddLevels(levels.to_vec()));
    }

    fn remove_levels(&mut self, levels: &[LevelId]) {
        self.active_levels.retain(|level| !levels.contains(level));
        self.calls.push(EngineCall::RemoveLevels(levels.to_vec()));
    }

    fn unload_battles(&mut self, level: LevelId) {
        self.calls.push(EngineCall::UnloadBattles(level));
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::map::LevelMap;
use super::model::{
    Actor, ActorId, Connection, ConnectionDescriptor, ConnectionHandle, ConnectionTarget,
    Element, Item, Level, LevelId,
};
use crate::grid::CellXY;

/// Serialized, reference-free form of a level.
///
/// Field names follow the save format shared with external tooling:
/// `{ id, levelNumber, actors, items, elements, map, connections, subLevels }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSnapshot {
    pub id: LevelId,
    pub level_number: u32,
    pub actors: Vec<Placed<ActorRecord>>,
    pub items: Vec<Placed<ItemRecord>>,
    pub elements: Vec<Placed<ElementRecord>>,
    pub map: LevelMap,
    pub connections: Vec<ConnectionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_levels: Vec<LevelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placed<T> {
    pub x: u32,
    pub y: u32,
    pub obj: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: ActorId,
    pub name: String,
    pub speed: u32,
    pub energy: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub name: String,
    #[serde(rename = "srcXY")]
    pub src_xy: CellXY,
    pub descriptor: ConnectionDescriptor,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to parse level snapshot at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("failed to encode level snapshot {level}: {source}")]
    Encode {
        level: LevelId,
        #[source]
        source: serde_json::Error,
    },
    #[error("level {level} connection slot {slot} has a live target that cannot be resolved")]
    UnresolvedLink { level: LevelId, slot: usize },
    #[error("level {level} {what} at {cell} lies outside the {cols}x{rows} map")]
    OutsideMap {
        level: LevelId,
        what: &'static str,
        cell: CellXY,
        cols: u32,
        rows: u32,
    },
    #[error("level {level} has two connections starting at {cell}")]
    DuplicateConnection { level: LevelId, cell: CellXY },
}

impl LevelSnapshot {
    /// Captures `level` without mutating it. Live connection targets are
    /// converted through `resolve`, which maps a handle to the descriptor of
    /// the connection it points at.
    pub fn capture<F>(level: &Level, resolve: &F) -> Result<Self, SnapshotError>
    where
        F: Fn(ConnectionHandle) -> Option<ConnectionDescriptor>,
    {
        let mut connections = Vec::with_capacity(level.connections.len());
        for (slot, conn) in level.connections.iter().enumerate() {
            let descriptor = match conn.target {
                ConnectionTarget::Descriptor(descriptor) => descriptor,
                ConnectionTarget::Live(handle) => {
                    resolve(handle).ok_or(SnapshotError::UnresolvedLink {
                        level: level.id,
                        slot,
                    })?
                }
            };
            connections.push(ConnectionRecord {
                name: conn.name.clone(),
                src_xy: conn.src,
                descriptor,
            });
        }

        let sub_levels = level
            .sub_levels
            .iter()
            .map(|sub_level| Self::capture(sub_level, resolve))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: level.id,
            level_number: level.level_number,
            actors: level
                .actors
                .iter()
                .map(|actor| Placed {
                    x: actor.pos.x,
                    y: actor.pos.y,
                    obj: ActorRecord {
                        id: actor.id,
                        name: actor.name.clone(),
                        speed: actor.speed,
                        energy: actor.energy,
                    },
                })
                .collect(),
            items: level
                .items
                .iter()
                .map(|item| Placed {
                    x: item.pos.x,
                    y: item.pos.y,
                    obj: ItemRecord {
                        name: item.name.clone(),
                    },
                })
                .collect(),
            elements: level
                .elements
                .iter()
                .map(|element| Placed {
                    x: element.pos.x,
                    y: element.pos.y,
                    obj: ElementRecord {
                        kind: element.kind.clone(),
                    },
                })
                .collect(),
            map: level.map.clone(),
            connections,
            sub_levels,
        })
    }

    /// Captures a level that holds no live connections.
    pub fn capture_detached(level: &Level) -> Result<Self, SnapshotError> {
        Self::capture(level, &|_| None)
    }

    /// Builds a live level. Every connection comes back as a descriptor;
    /// linking against neighbors is the state machine's job.
    pub fn materialize(&self) -> Result<Level, SnapshotError> {
        let map = &self.map;
        let check = |what: &'static str, cell: CellXY| {
            if map.contains(cell) {
                Ok(cell)
            } else {
                Err(SnapshotError::OutsideMap {
                    level: self.id,
                    what,
                    cell,
                    cols: map.cols(),
                    rows: map.rows(),
                })
            }
        };

        let mut level = Level::new(self.id, self.level_number, self.map.clone());
        for placed in &self.actors {
            let pos = check("actor", CellXY::new(placed.x, placed.y))?;
            level.actors.push(Actor {
                id: placed.obj.id,
                name: placed.obj.name.clone(),
                pos,
                speed: placed.obj.speed,
                energy: placed.obj.energy,
            });
        }
        for placed in &self.items {
            let pos = check("item", CellXY::new(placed.x, placed.y))?;
            level.items.push(Item {
                name: placed.obj.name.clone(),
                pos,
            });
        }
        for placed in &self.elements {
            let pos = check("element", CellXY::new(placed.x, placed.y))?;
            level.elements.push(Element {
                kind: placed.obj.kind.clone(),
                pos,
            });
        }
        for record in &self.connections {
            let src = check("connection", record.src_xy)?;
            if level.connection_at(src).is_some() {
                return Err(SnapshotError::DuplicateConnection {
                    level: self.id,
                    cell: src,
                });
            }
            level.connections.push(Connection {
                name: record.name.clone(),
                src,
                target: ConnectionTarget::Descriptor(record.descriptor),
            });
        }
        for sub_level in &self.sub_levels {
            level.sub_levels.push(sub_level.materialize()?);
        }
        Ok(level)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|source| SnapshotError::Encode {
            level: self.id,
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize::<_, LevelSnapshot>(&mut deserializer).map_err(|error| {
            let path = error.path().to_string();
            let source = error.into_inner();
            SnapshotError::Parse {
                path: if path.is_empty() {
                    ".".to_string()
                } else {
                    path
                },
                message: source.to_string(),
            }
        })
    }

    /// This snapshot's id followed by every nested sub-level id.
    pub fn level_ids(&self) -> Vec<LevelId> {
        let mut ids = vec![self.id];
        for sub_level in &self.sub_levels {
            ids.extend(sub_level.level_ids());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::grid::TileXY;
    use crate::level::map::{CELL_FLOOR, CELL_PASSAGE};

    fn sample_level() -> Level {
        let mut map = LevelMap::filled(4, 4, CELL_FLOOR).expect("map");
        map.set_cell(CellXY::new(3, 1), CELL_PASSAGE);
        let mut level = Level::new(LevelId(11), 2, map);
        level.actors.push(Actor {
            id: ActorId(5),
            name: "wolf".to_string(),
            pos: CellXY::new(1, 2),
            speed: 110,
            energy: -40,
        });
        level.items.push(Item {
            name: "rope".to_string(),
            pos: CellXY::new(0, 0),
        });
        level.elements.push(Element {
            kind: "tree".to_string(),
            pos: CellXY::new(2, 2),
        });
        level.connections.push(Connection::unlinked(
            "pass_east",
            CellXY::new(3, 1),
            LevelId(12),
            CellXY::new(0, 1),
        ));
        level
    }

    #[test]
    fn capture_materialize_capture_is_stable() {
        let level = sample_level();
        let first = LevelSnapshot::capture_detached(&level).expect("capture");
        let rebuilt = first.materialize().expect("materialize");
        let second = LevelSnapshot::capture_detached(&rebuilt).expect("capture");
        assert_eq!(first, second);
        assert_eq!(rebuilt, level);
    }

    #[test]
    fn live_targets_are_resolved_to_descriptors() {
        let mut level = sample_level();
        let handle = ConnectionHandle {
            tile: TileXY::new(1, 0),
            slot: 0,
        };
        level.connections[0].target = ConnectionTarget::Live(handle);
        let resolved = ConnectionDescriptor {
            target_level_id: LevelId(12),
            target_coord: CellXY::new(0, 1),
        };
        let snapshot = LevelSnapshot::capture(&level, &|h| (h == handle).then_some(resolved))
            .expect("capture");
        assert_eq!(snapshot.connections[0].descriptor, resolved);
        // The live level itself is left as it was.
        assert!(level.connections[0].is_live());
    }

    #[test]
    fn unresolvable_live_target_is_an_error() {
        let mut level = sample_level();
        level.connections[0].target = ConnectionTarget::Live(ConnectionHandle {
            tile: TileXY::new(1, 0),
            slot: 0,
        });
        let error = LevelSnapshot::capture_detached(&level).expect_err("must fail");
        assert!(matches!(
            error,
            SnapshotError::UnresolvedLink {
                level: LevelId(11),
                slot: 0
            }
        ));
    }

    #[test]
    fn json_shape_uses_descriptor_field_names() {
        let snapshot = LevelSnapshot::capture_detached(&sample_level()).expect("capture");
        let value = serde_json::to_value(&snapshot).expect("encode");
        assert_eq!(value["levelNumber"], json!(2));
        assert_eq!(value["actors"][0]["x"], json!(1));
        assert_eq!(value["actors"][0]["obj"]["name"], json!("wolf"));
        assert_eq!(
            value["connections"][0],
            json!({
                "name": "pass_east",
                "srcXY": {"x": 3, "y": 1},
                "descriptor": {"targetLevelID": 12, "targetCoord": {"x": 0, "y": 1}}
            })
        );
        assert!(value.get("subLevels").is_none());
    }

    #[test]
    fn parse_error_reports_json_path() {
        let mut value = serde_json::to_value(
            LevelSnapshot::capture_detached(&sample_level()).expect("capture"),
        )
        .expect("encode");
        value["connections"][0]["descriptor"]["targetLevelID"] = json!("twelve");
        let error = LevelSnapshot::from_json(&value.to_string()).expect_err("must fail");
        match error {
            SnapshotError::Parse { path, .. } => {
                assert_eq!(path, "connections[0].descriptor.targetLevelID");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn materialize_rejects_connections_outside_map() {
        let mut snapshot = LevelSnapshot::capture_detached(&sample_level()).expect("capture");
        snapshot.connections[0].src_xy = CellXY::new(9, 1);
        assert!(matches!(
            snapshot.materialize(),
            Err(SnapshotError::OutsideMap {
                what: "connection",
                ..
            })
        ));
    }

    #[test]
    fn sub_levels_round_trip_through_json() {
        let mut level = sample_level();
        let mut cellar = Level::new(
            LevelId(40),
            3,
            LevelMap::filled(2, 2, CELL_FLOOR).expect("map"),
        );
        cellar.connections.push(Connection::unlinked(
            "up",
            CellXY::new(0, 0),
            LevelId(11),
            CellXY::new(2, 2),
        ));
        level.sub_levels.push(cellar);

        let snapshot = LevelSnapshot::capture_detached(&level).expect("capture");
        let raw = snapshot.to_json().expect("json");
        let parsed = LevelSnapshot::from_json(&raw).expect("parse");
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.level_ids(), vec![LevelId(11), LevelId(40)]);
        assert_eq!(parsed.materialize().expect("materialize"), level);
    }
}

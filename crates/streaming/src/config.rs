use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SESSION_ID: &str = "session";

/// Grid size and band radii for one streaming session.
///
/// Radii are Chebyshev distances in tiles measured from the player's tile:
/// - `distance <= load_radius` keeps the tile fully simulated (LOADED)
/// - `distance <= json_radius` keeps it in memory as a snapshot (JSON)
/// - anything further is written to the persistent store (ON_DISK)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    pub session_id: String,
    pub size_x: u32,
    pub size_y: u32,
    pub load_radius: u32,
    pub json_radius: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION_ID.to_string(),
            size_x: 7,
            size_y: 7,
            load_radius: 1,
            json_radius: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("grid size must be at least 1x1, got {size_x}x{size_y}")]
    EmptyGrid { size_x: u32, size_y: u32 },
    #[error("json_radius {json_radius} must be >= load_radius {load_radius}")]
    RadiusOrder { load_radius: u32, json_radius: u32 },
    #[error("session id cannot be empty")]
    EmptySessionId,
    #[error("session id '{0}' may only contain ASCII letters, digits, '_' and '-'")]
    InvalidSessionId(String),
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size_x == 0 || self.size_y == 0 {
            return Err(ConfigError::EmptyGrid {
                size_x: self.size_x,
                size_y: self.size_y,
            });
        }
        if self.json_radius < self.load_radius {
            return Err(ConfigError::RadiusOrder {
                load_radius: self.load_radius,
                json_radius: self.json_radius,
            });
        }
        if self.session_id.is_empty() {
            return Err(ConfigError::EmptySessionId);
        }
        // Tile ids are "<session>,<x>,<y>", so the session part must not carry commas.
        if !self
            .session_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            return Err(ConfigError::InvalidSessionId(self.session_id.clone()));
        }
        Ok(())
    }

    pub fn tile_count(&self) -> usize {
        self.size_x as usize * self.size_y as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        StreamingConfig::default().validate().expect("valid");
    }

    #[test]
    fn json_radius_below_load_radius_is_rejected() {
        let config = StreamingConfig {
            load_radius: 3,
            json_radius: 2,
            ..StreamingConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::RadiusOrder {
                load_radius: 3,
                json_radius: 2
            })
        );
    }

    #[test]
    fn session_id_with_comma_is_rejected() {
        let config = StreamingConfig {
            session_id: "a,b".to_string(),
            ..StreamingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn config_parses_from_camel_case_json() {
        let raw = r#"{"sessionId":"w1","sizeX":9,"sizeY":5,"loadRadius":1,"jsonRadius":3}"#;
        let config: StreamingConfig = serde_json::from_str(raw).expect("parse");
        assert_eq!(config.size_x, 9);
        assert_eq!(config.json_radius, 3);
        assert_eq!(config.tile_count(), 45);
    }
}

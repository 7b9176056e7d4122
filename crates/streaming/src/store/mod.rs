mod atomic_io;
mod file;
mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key/value backing store for tiles that have left the json band.
///
/// Values are snapshot JSON text keyed by tile id. Implementations are not
/// expected to be transactional; the chunk manager never touches one key
/// from two places at once.
pub trait PersistentStore {
    fn set_item(&mut self, key: &str, value: String) -> Result<(), StoreError>;

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Entire store contents, used for session saves.
    fn dump(&self) -> Result<BTreeMap<String, String>, StoreError>;

    /// Replaces the entire store contents with `dump`.
    fn restore_dump(&mut self, dump: BTreeMap<String, String>) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store key '{0}' may only contain ASCII letters, digits, ',', '_' and '-'")]
    InvalidKey(String),
    #[error("store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ',' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_ids_are_valid_keys() {
        validate_key("session,3,4").expect("valid");
        validate_key("w-1_a,0,0").expect("valid");
    }

    #[test]
    fn path_like_keys_are_rejected() {
        for key in ["", "../x", "a/b", "a b", "a.json"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}

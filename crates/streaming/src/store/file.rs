use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use super::atomic_io::{read_blob, write_blob_atomic};
use super::{validate_key, PersistentStore, StoreError};

const BLOB_SUFFIX: &str = ".tile.json";

/// Directory-backed store: one `<key>.tile.json` file per tile.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{BLOB_SUFFIX}"))
    }

    fn stored_keys(&self) -> Result<Vec<String>, StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(BLOB_SUFFIX) {
                if validate_key(key).is_ok() {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl PersistentStore for FileStore {
    fn set_item(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.blob_path(key);
        write_blob_atomic(&path, &value).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(key, bytes = value.len(), path = %path.display(), "store_write");
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        let path = self.blob_path(key);
        read_blob(&path).map_err(|source| StoreError::Io { path, source })
    }

    fn dump(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut dump = BTreeMap::new();
        for key in self.stored_keys()? {
            if let Some(value) = self.get_item(&key)? {
                dump.insert(key, value);
            }
        }
        Ok(dump)
    }

    fn restore_dump(&mut self, dump: BTreeMap<String, String>) -> Result<(), StoreError> {
        for key in dump.keys() {
            validate_key(key)?;
        }
        for key in self.stored_keys()? {
            if !dump.contains_key(&key) {
                let path = self.blob_path(&key);
                fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
            }
        }
        for (key, value) in dump {
            self.set_item(&key, value)?;
        }
        Ok(())
    }
}

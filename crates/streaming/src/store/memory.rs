use std::collections::BTreeMap;

use super::{validate_key, PersistentStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    items: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }
}

impl PersistentStore for MemoryStore {
    fn set_item(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        validate_key(key)?;
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        Ok(self.items.get(key).cloned())
    }

    fn dump(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.items.clone())
    }

    fn restore_dump(&mut self, dump: BTreeMap<String, String>) -> Result<(), StoreError> {
        for key in dump.keys() {
            validate_key(key)?;
        }
        self.items = dump;
        Ok(())
    }
}

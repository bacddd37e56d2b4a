use tpkv_replica::store::LocalStore;

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;

/// Key/value deployment flavor: a process-local map.
#[derive(Default)]
pub struct MemStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.map.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.write().remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }
}

// SPDX-License-Identifier: MPL-2.0

use crate::storage::{StateStorage, StorageError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local slots; nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().expect("storage lock poisoned");
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().expect("storage lock poisoned");
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().expect("storage lock poisoned");
        slots.remove(key);
        Ok(())
    }
}

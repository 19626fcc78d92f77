use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStoreError {
    WriteRejected,
}

/// Settings store backed by a map, with switchable write failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, u16>,
    fail_writes: bool,
    writes: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: u16) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful writes.
    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn value(&self, key: &str) -> Option<u16> {
        self.values.get(key).copied()
    }
}

impl SettingsStore for MemoryStore {
    type Error = MemoryStoreError;

    fn get_u16(&mut self, key: &str) -> Result<Option<u16>, MemoryStoreError> {
        Ok(self.values.get(key).copied())
    }

    fn set_u16(&mut self, key: &str, value: u16) -> Result<(), MemoryStoreError> {
        if self.fail_writes {
            return Err(MemoryStoreError::WriteRejected);
        }
        self.values.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }
}

use std::sync::RwLock;

use super::{StoreBackend, StoreData};
use crate::error::Result;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(f(&data))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let mut staged = data.clone();
        let result = f(&mut staged)?;
        *data = staged;
        Ok(result)
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use super::{StoreBackend, StoreData};
use crate::error::{AppError, Result};

/// TOML-file store. Each mutation is a locked read-modify-write; the cached
/// snapshot is replaced only after the new file is in place.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<StoreData>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_from_disk(&path)?;
        log::info!("Opened state file {:?}", path);
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(data)),
        })
    }

    fn snapshot(&self) -> Arc<StoreData> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&cache)
    }
}

fn load_from_disk(path: &Path) -> Result<StoreData> {
    if !path.exists() {
        return Ok(StoreData::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::persistence(format!("Failed to read {:?}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| AppError::persistence(format!("Failed to parse {:?}: {}", path, e)))
}

fn save_to_disk(path: &Path, data: &StoreData) -> Result<()> {
    let content = toml::to_string_pretty(data)
        .map_err(|e| AppError::persistence(format!("Failed to serialize state: {}", e)))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::persistence(format!("Failed to create {:?}: {}", parent, e)))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content)
        .map_err(|e| AppError::persistence(format!("Failed to write {:?}: {}", tmp, e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| AppError::persistence(format!("Failed to replace {:?}: {}", path, e)))
}

impl StoreBackend for FileStore {
    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T> {
        Ok(f(&self.snapshot()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut updated = (*self.snapshot()).clone();
        let result = f(&mut updated)?;
        save_to_disk(&self.path, &updated)?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);
        Ok(result)
    }
}

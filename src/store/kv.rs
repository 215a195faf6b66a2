use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use tracing::warn;

/// Small synchronous key value store local to this client. Nothing in it is shared with other
/// observers.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        locked(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        locked(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Keeps values in a json file. The whole file is rewritten on every `set`, which is fine for the
/// handful of markers stored here.
pub struct FileKv {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    pub fn open(path: PathBuf) -> Result<Self> {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Local values in {path:?} are corrupted, starting over: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        locked(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = locked(&self.values);
        let previous = values.insert(key.to_string(), value.to_string());
        let written = serde_json::to_vec_pretty(&*values)
            .map_err(anyhow::Error::from)
            .and_then(|buffer| {
                std::fs::write(&self.path, buffer)
                    .with_context(|| format!("Failed to write {:?}", self.path))
            });
        if written.is_err() {
            // Keep memory and disk in agreement.
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
        }
        written
    }
}

//! In-memory storage backend. Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::StorageError;
use crate::storage::{ApplyWrites, BufferedTx, ScanFn, StorageBackend, Transaction};

struct Entry {
    value: Vec<u8>,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline.is_none_or(|d| now < d)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
    tx_lock: Mutex<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: &str, value: &[u8], deadline: Option<Instant>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                deadline,
            },
        );
        Ok(())
    }

    /// Snapshot of live entries under `prefix`, taken under the read lock.
    fn live_range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        let now = Instant::now();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value.clone()),
            _ => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.insert(key, value, None)
    }

    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        self.insert(key, value, Instant::now().checked_add(ttl))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries
            .get(key)
            .is_some_and(|e| e.is_live(Instant::now())))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.live_range(prefix)?.into_iter().map(|(k, _)| k).collect())
    }

    fn scan(&self, prefix: &str, f: &mut ScanFn<'_>) -> Result<(), StorageError> {
        // Callback runs outside the lock so it may read the store again.
        for (key, value) in self.live_range(prefix)? {
            f(&key, &value)?;
        }
        Ok(())
    }

    fn begin_tx(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        let guard = self.tx_lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(Box::new(BufferedTx::new(self, guard)))
    }

    fn compact(&self) -> Result<usize, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }

    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl ApplyWrites for MemoryBackend {
    fn read_committed(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key)
    }

    fn apply(&self, writes: BTreeMap<String, Option<Vec<u8>>>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        for (key, value) in writes {
            match value {
                Some(value) => {
                    entries.insert(
                        key,
                        Entry {
                            value,
                            deadline: None,
                        },
                    );
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

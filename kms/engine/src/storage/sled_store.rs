//! Embedded on-disk backend built on sled.
//!
//! Every stored value starts with a one-byte header. `0` means no expiry;
//! `1` is followed by an 8-byte big-endian deadline in unix milliseconds.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::StorageError;
use crate::storage::{ApplyWrites, BufferedTx, ScanFn, StorageBackend, Transaction};

const NO_EXPIRY: u8 = 0;
const WITH_EXPIRY: u8 = 1;

pub struct SledBackend {
    db: sled::Db,
    tx_lock: Mutex<()>,
    sync_writes: bool,
}

impl SledBackend {
    /// Open (or create) a store at `path`. With `sync_writes` every write is
    /// flushed to disk before returning.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), sync_writes, "opened sled store");
        Ok(Self {
            db,
            tx_lock: Mutex::new(()),
            sync_writes,
        })
    }

    fn maybe_flush(&self) -> Result<(), StorageError> {
        if self.sync_writes {
            self.db.flush()?;
        }
        Ok(())
    }

    fn put(&self, key: &str, value: &[u8], deadline_ms: Option<u64>) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), encode(value, deadline_ms))?;
        self.maybe_flush()
    }

    fn live_entries(&self, prefix: &str) -> impl Iterator<Item = Result<(String, Vec<u8>), StorageError>> + '_ {
        let now = now_millis();
        self.db.scan_prefix(prefix.as_bytes()).filter_map(move |item| {
            let decoded = item.map_err(StorageError::from).and_then(|(k, v)| {
                let key = String::from_utf8(k.to_vec())
                    .map_err(|_| StorageError::Corrupt(String::from_utf8_lossy(&k).into_owned()))?;
                let (deadline, payload) = decode(&key, &v)?;
                Ok((key, deadline, payload.to_vec()))
            });
            match decoded {
                Ok((key, deadline, payload)) => {
                    if deadline.is_none_or(|d| now < d) {
                        Some(Ok((key, payload)))
                    } else {
                        None
                    }
                }
                Err(e) => Some(Err(e)),
            }
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn encode(value: &[u8], deadline_ms: Option<u64>) -> Vec<u8> {
    match deadline_ms {
        None => {
            let mut out = Vec::with_capacity(value.len() + 1);
            out.push(NO_EXPIRY);
            out.extend_from_slice(value);
            out
        }
        Some(deadline) => {
            let mut out = Vec::with_capacity(value.len() + 9);
            out.push(WITH_EXPIRY);
            out.extend_from_slice(&deadline.to_be_bytes());
            out.extend_from_slice(value);
            out
        }
    }
}

fn decode<'v>(key: &str, raw: &'v [u8]) -> Result<(Option<u64>, &'v [u8]), StorageError> {
    match raw.split_first() {
        Some((&NO_EXPIRY, rest)) => Ok((None, rest)),
        Some((&WITH_EXPIRY, rest)) if rest.len() >= 8 => {
            let (deadline, payload) = rest.split_at(8);
            let mut buf = [0u8; 8];
            buf.copy_from_slice(deadline);
            Ok((Some(u64::from_be_bytes(buf)), payload))
        }
        _ => Err(StorageError::Corrupt(key.to_string())),
    }
}

impl StorageBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let raw = self
            .db
            .get(key.as_bytes())?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        let (deadline, payload) = decode(key, &raw)?;
        if deadline.is_some_and(|d| now_millis() >= d) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(payload.to_vec())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.put(key, value, None)
    }

    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
        let deadline = u64::try_from(ttl.as_millis())
            .ok()
            .and_then(|ms| now_millis().checked_add(ms));
        self.put(key, value, deadline)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        self.maybe_flush()
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.live_entries(prefix).map(|r| r.map(|(k, _)| k)).collect()
    }

    fn scan(&self, prefix: &str, f: &mut ScanFn<'_>) -> Result<(), StorageError> {
        for entry in self.live_entries(prefix) {
            let (key, value) = entry?;
            f(&key, &value)?;
        }
        Ok(())
    }

    fn begin_tx(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        let guard = self.tx_lock.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(Box::new(BufferedTx::new(self, guard)))
    }

    fn compact(&self) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut expired = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item?;
            if v.first() == Some(&WITH_EXPIRY) {
                let key = String::from_utf8_lossy(&k).into_owned();
                if let (Some(deadline), _) = decode(&key, &v)? {
                    if now >= deadline {
                        expired.push(k);
                    }
                }
            }
        }
        for key in &expired {
            self.db.remove(key)?;
        }
        self.db.flush()?;
        Ok(expired.len())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl ApplyWrites for SledBackend {
    fn read_committed(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key)
    }

    fn apply(&self, writes: BTreeMap<String, Option<Vec<u8>>>) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            match value {
                Some(value) => batch.insert(key.as_bytes(), encode(&value, None)),
                None => batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(batch)?;
        self.maybe_flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let raw = encode(b"value", Some(42));
        assert_eq!(decode("k", &raw).unwrap(), (Some(42), &b"value"[..]));
        let raw = encode(b"value", None);
        assert_eq!(decode("k", &raw).unwrap(), (None, &b"value"[..]));
        assert!(decode("k", &[]).is_err());
        assert!(decode("k", &[WITH_EXPIRY, 0, 1]).is_err());
    }
}

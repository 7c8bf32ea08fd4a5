//! Pluggable key/value storage for KMS records.
//!
//! Backends provide prefix scans, TTL, and buffered transactions that hold
//! the backend's transaction lock until commit or rollback, so every
//! read-modify-write done inside a transaction is linearized.

pub mod memory;
pub mod sled_store;

use std::collections::BTreeMap;
use std::sync::MutexGuard;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{KmsResult, StorageError};

pub use memory::MemoryBackend;
pub use sled_store::SledBackend;

pub const KEY_PREFIX: &str = "kms/key/";
pub const MATERIAL_PREFIX: &str = "kms/material/";
pub const SECRET_PREFIX: &str = "kms/secret/";
pub const WALLET_PREFIX: &str = "kms/mpc/wallet/";
pub const NODE_PREFIX: &str = "kms/mpc/node/";
pub const SIGNING_PREFIX: &str = "kms/mpc/signing/";
pub const SHARE_PREFIX: &str = "kms/mpc/share/";

pub fn key_path(id: &str) -> String {
    format!("{KEY_PREFIX}{id}")
}

pub fn material_path(id: &str, version: u32) -> String {
    format!("{MATERIAL_PREFIX}{id}/{version}")
}

pub fn secret_path(id: &str) -> String {
    format!("{SECRET_PREFIX}{id}")
}

pub fn wallet_path(id: &str) -> String {
    format!("{WALLET_PREFIX}{id}")
}

pub fn node_path(id: &str) -> String {
    format!("{NODE_PREFIX}{id}")
}

pub fn signing_path(id: &str) -> String {
    format!("{SIGNING_PREFIX}{id}")
}

pub fn share_path(wallet_id: &str, node_id: &str) -> String {
    format!("{SHARE_PREFIX}{wallet_id}/{node_id}")
}

/// Callback invoked per entry by [`StorageBackend::scan`]. An error aborts the scan.
pub type ScanFn<'a> = dyn FnMut(&str, &[u8]) -> Result<(), StorageError> + 'a;

/// Key/value store contract shared by all backends.
pub trait StorageBackend: Send + Sync {
    /// Fetch a live value. Absent and expired entries are `NotFound`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Store a value that stops being visible once `ttl` has elapsed. A `ttl`
    /// too large to represent as a deadline never expires.
    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Live keys under `prefix`, ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Visit live entries under `prefix` in ascending key order.
    fn scan(&self, prefix: &str, f: &mut ScanFn<'_>) -> Result<(), StorageError>;

    /// Start a transaction. Blocks while another transaction is open.
    fn begin_tx(&self) -> Result<Box<dyn Transaction + '_>, StorageError>;

    /// Purge expired entries. Returns how many were removed.
    fn compact(&self) -> Result<usize, StorageError>;

    /// Flush outstanding writes.
    fn close(&self) -> Result<(), StorageError>;
}

/// Buffered write set applied atomically on commit.
pub trait Transaction {
    /// Read through the write buffer, then committed state.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;
    fn commit(self: Box<Self>) -> Result<(), StorageError>;
    /// Discard buffered writes. Dropping an uncommitted transaction does the same.
    fn rollback(self: Box<Self>);
}

/// What a backend must expose for [`BufferedTx`] to work on top of it.
pub(crate) trait ApplyWrites {
    fn read_committed(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    /// Apply every buffered write at once. `None` means delete.
    fn apply(&self, writes: BTreeMap<String, Option<Vec<u8>>>) -> Result<(), StorageError>;
}

pub(crate) struct BufferedTx<'a, B: ApplyWrites> {
    backend: &'a B,
    writes: BTreeMap<String, Option<Vec<u8>>>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, B: ApplyWrites> BufferedTx<'a, B> {
    pub(crate) fn new(backend: &'a B, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            backend,
            writes: BTreeMap::new(),
            _guard: guard,
        }
    }
}

impl<B: ApplyWrites> Transaction for BufferedTx<'_, B> {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match self.writes.get(key) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(StorageError::NotFound(key.to_string())),
            None => self.backend.read_committed(key),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.writes.insert(key.to_string(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.backend.apply(this.writes)
        // guard released here
    }

    fn rollback(self: Box<Self>) {}
}

/// JSON helpers for anything implementing [`StorageBackend`].
pub trait StorageJsonExt {
    /// Decode the JSON record under `key`, or `None` when absent.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> KmsResult<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> KmsResult<()>;
}

impl<S: StorageBackend + ?Sized> StorageJsonExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> KmsResult<Option<T>> {
        decode_optional(self.get(key))
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> KmsResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)?;
        Ok(())
    }
}

/// JSON helpers for an open [`Transaction`].
pub trait TxJsonExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> KmsResult<Option<T>>;
    fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> KmsResult<()>;
}

impl<X: Transaction + ?Sized> TxJsonExt for X {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> KmsResult<Option<T>> {
        decode_optional(self.get(key))
    }

    fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> KmsResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)?;
        Ok(())
    }
}

fn decode_optional<T: DeserializeOwned>(
    raw: Result<Vec<u8>, StorageError>,
) -> KmsResult<Option<T>> {
    match raw {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Decode every JSON record under `prefix`, in key order.
pub fn scan_json<T: DeserializeOwned>(
    store: &dyn StorageBackend,
    prefix: &str,
) -> KmsResult<Vec<T>> {
    let mut out = Vec::new();
    store.scan(prefix, &mut |key: &str, value: &[u8]| {
        let record = serde_json::from_slice(value)
            .map_err(|_| StorageError::Corrupt(key.to_string()))?;
        out.push(record);
        Ok(())
    })?;
    Ok(out)
}

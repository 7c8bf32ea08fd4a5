//! KMS Engine Core Library
//!
//! Key management, envelope encryption, signing, encrypted secrets and MPC
//! signing-request bookkeeping over a pluggable storage backend.

pub mod audit;
pub mod bootstrap;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod logging;
pub mod mpc;
pub mod secrets;
pub mod storage;
pub mod types;

use std::sync::Arc;

use tracing::info;

pub use bootstrap::KmsConfig;
pub use error::{KmsError, KmsResult, StorageError};

use audit::AuditTracker;
use crypto::RootCipher;
use keys::KeyManager;
use mpc::MpcManager;
use secrets::SecretStore;
use storage::StorageBackend;

/// One KMS instance: storage plus the managers built on it. Built once and
/// shared behind an `Arc`.
pub struct Kms {
    pub store: Arc<dyn StorageBackend>,
    pub keys: Arc<KeyManager>,
    pub secrets: SecretStore,
    pub mpc: MpcManager,
    pub audit: Arc<AuditTracker>,
}

impl Kms {
    /// Assemble managers over an existing store and root key.
    pub fn new(store: Arc<dyn StorageBackend>, root: RootCipher, config: &KmsConfig) -> KmsResult<Self> {
        let audit = Arc::new(AuditTracker::new(config.audit_capacity));
        let root = Arc::new(root);
        let keys = Arc::new(KeyManager::new(store.clone(), root, audit.clone()));
        let secrets = SecretStore::new(store.clone(), keys.clone(), audit.clone());
        let expiry = chrono::Duration::from_std(config.signing_expiry)
            .map_err(|e| KmsError::Config(format!("signing expiry out of range: {e}")))?;
        let mpc = MpcManager::new(store.clone(), keys.clone(), audit.clone()).with_default_expiry(expiry);

        Ok(Self {
            store,
            keys,
            secrets,
            mpc,
            audit,
        })
    }

    /// Open storage and root key as configured.
    pub fn open(config: &KmsConfig) -> KmsResult<Self> {
        let store = bootstrap::open_store(config)?;
        let root = bootstrap::load_root_key(config)?;
        info!(in_memory = config.in_memory, "KMS opened");
        Self::new(store, root, config)
    }

    /// In-memory instance with an ephemeral root key.
    pub fn in_memory() -> KmsResult<Self> {
        let config = KmsConfig {
            in_memory: true,
            ..KmsConfig::default()
        };
        Self::new(Arc::new(storage::MemoryBackend::new()), RootCipher::ephemeral(), &config)
    }

    /// Replace the MPC signature combiner.
    pub fn with_combiner(mut self, combiner: Arc<dyn mpc::SignatureCombiner>) -> Self {
        self.mpc = self.mpc.with_combiner(combiner);
        self
    }

    /// Purge expired storage entries.
    pub fn compact(&self) -> KmsResult<usize> {
        Ok(self.store.compact()?)
    }

    /// Flush storage.
    pub fn close(&self) -> KmsResult<()> {
        Ok(self.store.close()?)
    }
}

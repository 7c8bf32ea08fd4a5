//! Key Manager: generation, lookup, rotation and use of managed keys.
//!
//! Key records and their material are written together in one storage
//! transaction. Material is immutable once written; rotation adds a new
//! version rather than replacing the old one.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::audit::{AuditEventType, AuditRecord, AuditTracker};
use crate::crypto::root::{self, RootCipher};
use crate::crypto::{random_id, signing};
use crate::error::{KmsError, KmsResult};
use crate::storage::{
    KEY_PREFIX, StorageBackend, StorageJsonExt, Transaction, TxJsonExt, key_path, material_path,
    scan_json,
};
use crate::types::{Envelope, Key, KeyMaterial, KeyStatus, KeyType, KeyUsage};

/// Optional attributes for a new key.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub description: String,
    pub org_id: String,
    pub project_id: String,
    pub metadata: BTreeMap<String, String>,
    pub expires_in: Option<Duration>,
}

pub struct KeyManager {
    store: Arc<dyn StorageBackend>,
    root: Arc<RootCipher>,
    audit: Arc<AuditTracker>,
    writer: Mutex<()>, // serializes key creation, rotation, deletion, status changes
}

impl KeyManager {
    pub fn new(store: Arc<dyn StorageBackend>, root: Arc<RootCipher>, audit: Arc<AuditTracker>) -> Self {
        Self {
            store,
            root,
            audit,
            writer: Mutex::new(()),
        }
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a key and its first version of material.
    pub fn generate_key(
        &self,
        name: &str,
        key_type: KeyType,
        usage: KeyUsage,
        opts: KeyOptions,
    ) -> KmsResult<Key> {
        let _w = self.write_lock();
        self.generate_locked(name, key_type, usage, opts)
    }

    fn generate_locked(
        &self,
        name: &str,
        key_type: KeyType,
        usage: KeyUsage,
        opts: KeyOptions,
    ) -> KmsResult<Key> {
        if key_type.is_mpc() {
            return Err(KmsError::UnsupportedKeyType(key_type.to_string()));
        }
        if !key_type.permits(usage) {
            return Err(KmsError::WrongUsage {
                key_id: name.to_string(),
                usage: usage.to_string(),
                operation: "be created with this key type",
            });
        }

        let now = Utc::now();
        let expires_at = opts
            .expires_in
            .map(|d| {
                now.checked_add_signed(d)
                    .ok_or_else(|| KmsError::InvalidRequestBody("key expiry out of range".into()))
            })
            .transpose()?;
        let key = Key {
            id: random_id(),
            name: name.to_string(),
            description: opts.description,
            key_type,
            usage,
            status: KeyStatus::Active,
            version: 1,
            org_id: opts.org_id,
            project_id: opts.project_id,
            created: now,
            updated: now,
            expires_at,
            metadata: opts.metadata,
            threshold: None,
            total_shares: None,
            share_holders: Vec::new(),
        };
        let material = self.new_material(&key.id, key_type, 1)?;

        let mut tx = self.store.begin_tx()?;
        tx.set_json(&key_path(&key.id), &key)?;
        tx.set_json(&material_path(&key.id, 1), &material)?;
        tx.commit()?;

        info!(key_id = %key.id, key_type = %key_type, usage = %usage, "generated key");
        self.audit.log(AuditRecord::new(
            AuditEventType::KeyCreated,
            &key.id,
            format!("{name} ({key_type})"),
        ));
        Ok(key)
    }

    fn new_material(&self, key_id: &str, key_type: KeyType, version: u32) -> KmsResult<KeyMaterial> {
        let generated = signing::generate(key_type)?;
        let (nonce, sealed) = self.root.seal(&generated.private)?;
        Ok(KeyMaterial {
            key_id: key_id.to_string(),
            version,
            nonce,
            sealed,
            public_key: generated.public,
            created: Utc::now(),
        })
    }

    fn load_material(&self, key_id: &str, version: u32) -> KmsResult<KeyMaterial> {
        self.store
            .get_json(&material_path(key_id, version))?
            .ok_or_else(|| KmsError::not_found("key material", format!("{key_id}@v{version}")))
    }

    /// Unseal private or symmetric bytes for one material version.
    fn unseal(&self, material: &KeyMaterial) -> KmsResult<zeroize::Zeroizing<Vec<u8>>> {
        self.root.open(&material.nonce, &material.sealed)
    }

    pub fn get_key(&self, id: &str) -> KmsResult<Key> {
        self.store
            .get_json(&key_path(id))?
            .ok_or_else(|| KmsError::not_found("key", id))
    }

    /// First non-deleted key with this name, optionally restricted to a project.
    pub fn get_key_by_name(&self, name: &str, project_id: Option<&str>) -> KmsResult<Key> {
        self.list_keys("")?
            .into_iter()
            .find(|k| k.name == name && project_id.is_none_or(|p| k.project_id == p))
            .ok_or_else(|| KmsError::not_found("key", name))
    }

    /// Non-deleted keys whose name starts with `name_prefix`, in id order.
    pub fn list_keys(&self, name_prefix: &str) -> KmsResult<Vec<Key>> {
        let keys: Vec<Key> = scan_json(self.store.as_ref(), KEY_PREFIX)?;
        Ok(keys
            .into_iter()
            .filter(|k| k.status != KeyStatus::Deleted && k.name.starts_with(name_prefix))
            .collect())
    }

    /// Look up `name`, creating it with the given type and usage when absent.
    pub fn ensure_key(&self, name: &str, key_type: KeyType, usage: KeyUsage) -> KmsResult<Key> {
        let _w = self.write_lock();
        match self.get_key_by_name(name, None) {
            Ok(key) => Ok(key),
            Err(KmsError::NotFound { .. }) => {
                self.generate_locked(name, key_type, usage, KeyOptions::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Soft delete. Material is kept so existing envelopes stay decryptable.
    /// Returns the key as it was before deletion.
    pub fn delete_key(&self, id: &str) -> KmsResult<Key> {
        let _w = self.write_lock();
        let mut tx = self.store.begin_tx()?;
        let mut key: Key = tx
            .get_json(&key_path(id))?
            .ok_or_else(|| KmsError::not_found("key", id))?;
        let before = key.clone();
        key.status = KeyStatus::Deleted;
        key.updated = Utc::now();
        tx.set_json(&key_path(id), &key)?;
        tx.commit()?;

        info!(key_id = %id, "deleted key");
        self.audit
            .log(AuditRecord::new(AuditEventType::KeyDeleted, id, "soft delete"));
        Ok(before)
    }

    /// Generate a new material version. Older versions stay readable for decryption.
    pub fn rotate_key(&self, id: &str) -> KmsResult<Key> {
        let _w = self.write_lock();
        let mut key = self.get_key(id)?;
        if key.key_type.is_mpc() {
            return Err(KmsError::UnsupportedKeyType(key.key_type.to_string()));
        }
        key.ensure_usable()?;

        let version = key.version + 1;
        let material = self.new_material(id, key.key_type, version)?;
        key.version = version;
        key.updated = Utc::now();

        let mut tx = self.store.begin_tx()?;
        tx.set_json(&material_path(id, version), &material)?;
        tx.set_json(&key_path(id), &key)?;
        tx.commit()?;

        info!(key_id = %id, version, "rotated key");
        self.audit.log(AuditRecord::new(
            AuditEventType::KeyRotated,
            id,
            format!("now at version {version}"),
        ));
        Ok(key)
    }

    /// Encrypt under the key's current version with a fresh nonce.
    pub fn encrypt(&self, id: &str, plaintext: &[u8]) -> KmsResult<Envelope> {
        let key = self.get_key(id)?;
        key.ensure_usage(KeyUsage::EncryptDecrypt, "encrypt")?;
        key.ensure_usable()?;

        let material = self.load_material(id, key.version)?;
        let data_key = self.unseal(&material)?;
        let (nonce, ciphertext) = root::seal(&data_key, plaintext)?;

        let mut data = nonce;
        data.extend_from_slice(&ciphertext);
        debug!(key_id = %id, version = key.version, "encrypted payload");
        Ok(Envelope {
            key_id: key.id,
            key_version: key.version,
            data,
        })
    }

    /// Decrypt an envelope with the material version it names. Deleted keys
    /// still decrypt so data can be recovered.
    pub fn decrypt(&self, envelope: &Envelope) -> KmsResult<Vec<u8>> {
        let key = self.get_key(&envelope.key_id)?;
        key.ensure_usage(KeyUsage::EncryptDecrypt, "decrypt")?;

        let material = self.load_material(&key.id, envelope.key_version)?;
        let data_key = self.unseal(&material)?;
        let (nonce, ciphertext) = root::split_nonce(&envelope.data)?;
        let plaintext = root::open(&data_key, nonce, ciphertext)?;
        Ok(plaintext.to_vec())
    }

    pub fn sign(&self, id: &str, data: &[u8]) -> KmsResult<Vec<u8>> {
        let key = self.get_key(id)?;
        key.ensure_usage(KeyUsage::SignVerify, "sign")?;
        key.ensure_usable()?;

        let material = self.load_material(id, key.version)?;
        let private = self.unseal(&material)?;
        signing::sign(key.key_type, &private, data)
    }

    /// Check a signature against the current version's public key.
    pub fn verify(&self, id: &str, data: &[u8], signature: &[u8]) -> KmsResult<bool> {
        let key = self.get_key(id)?;
        key.ensure_usage(KeyUsage::SignVerify, "verify")?;

        let public = self.public_der(&key)?;
        signing::verify(key.key_type, &public, data, signature)
    }

    /// PEM-encoded public key of the current version.
    pub fn get_public_key(&self, id: &str) -> KmsResult<String> {
        let key = self.get_key(id)?;
        let public = self.public_der(&key)?;
        signing::public_key_pem(key.key_type, &public)
    }

    fn public_der(&self, key: &Key) -> KmsResult<Vec<u8>> {
        if !key.key_type.is_asymmetric() {
            return Err(KmsError::NotAsymmetric(key.id.clone()));
        }
        self.load_material(&key.id, key.version)?
            .public_key
            .ok_or_else(|| KmsError::NotAsymmetric(key.id.clone()))
    }

    pub fn signing_algorithms(&self, id: &str) -> KmsResult<Vec<&'static str>> {
        let key = self.get_key(id)?;
        if !key.key_type.is_asymmetric() {
            return Err(KmsError::NotAsymmetric(key.id));
        }
        Ok(signing::signing_algorithms(key.key_type).to_vec())
    }

    /// Write an MPC mirror key as part of the caller's transaction.
    pub fn put_mirror_key_tx(&self, tx: &mut (dyn Transaction + '_), key: &Key) -> KmsResult<()> {
        if !key.key_type.is_mpc() || key.usage != KeyUsage::Mpc {
            return Err(KmsError::UnsupportedKeyType(key.key_type.to_string()));
        }
        tx.set_json(&key_path(&key.id), key)
    }

    /// Change a key's status as part of the caller's transaction.
    pub fn set_key_status_tx(
        &self,
        tx: &mut (dyn Transaction + '_),
        id: &str,
        status: KeyStatus,
    ) -> KmsResult<Key> {
        let mut key: Key = tx
            .get_json(&key_path(id))?
            .ok_or_else(|| KmsError::not_found("key", id))?;
        key.status = status;
        key.updated = Utc::now();
        tx.set_json(&key_path(id), &key)?;
        Ok(key)
    }

    pub fn set_key_status(&self, id: &str, status: KeyStatus) -> KmsResult<Key> {
        let _w = self.write_lock();
        let mut tx = self.store.begin_tx()?;
        let key = self.set_key_status_tx(tx.as_mut(), id, status)?;
        tx.commit()?;
        info!(key_id = %id, status = status.as_str(), "key status changed");
        Ok(key)
    }
}

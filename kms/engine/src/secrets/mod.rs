//! Secret Store: named values kept as envelopes under a Key Manager key.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::{AuditEventType, AuditRecord, AuditTracker};
use crate::crypto::random_id;
use crate::error::{KmsError, KmsResult};
use crate::keys::KeyManager;
use crate::storage::{SECRET_PREFIX, StorageBackend, StorageJsonExt, TxJsonExt, scan_json, secret_path};
use crate::types::{Envelope, KeyType, KeyUsage, Secret, normalize_path};

/// Name of the key used when a secret names none.
pub const DEFAULT_KEY_NAME: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct SecretOptions {
    pub key_id: Option<String>,
    pub environment: String,
    pub path: String,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub org_id: String,
    pub project_id: String,
    pub comment: Option<String>,
}

pub struct SecretStore {
    store: Arc<dyn StorageBackend>,
    keys: Arc<KeyManager>,
    audit: Arc<AuditTracker>,
}

impl SecretStore {
    pub fn new(store: Arc<dyn StorageBackend>, keys: Arc<KeyManager>, audit: Arc<AuditTracker>) -> Self {
        Self { store, keys, audit }
    }

    fn seal(&self, key_id: &str, value: &[u8]) -> KmsResult<Vec<u8>> {
        self.keys.encrypt(key_id, value)?.to_bytes()
    }

    /// Encrypt and store a new secret at version 1.
    pub fn create_secret(&self, name: &str, value: &[u8], opts: SecretOptions) -> KmsResult<Secret> {
        let path = normalize_path(&opts.path);
        // Resolve the key before taking the transaction lock; creating the
        // default key opens its own transaction.
        let key_id = match opts.key_id {
            Some(id) => id,
            None => {
                self.keys
                    .ensure_key(DEFAULT_KEY_NAME, KeyType::Aes256Gcm, KeyUsage::EncryptDecrypt)?
                    .id
            }
        };

        let mut tx = self.store.begin_tx()?;
        if self
            .find_secret(name, &opts.environment, &path, Some(opts.project_id.as_str()))
            .is_ok()
        {
            return Err(KmsError::AlreadyExists {
                kind: "secret",
                id: format!("{}:{}{}", opts.environment, path, name),
            });
        }

        let now = Utc::now();
        let secret = Secret {
            id: random_id(),
            name: name.to_string(),
            version: 1,
            sealed_value: self.seal(&key_id, value)?,
            key_id,
            environment: opts.environment,
            path,
            tags: opts.tags,
            metadata: opts.metadata,
            org_id: opts.org_id,
            project_id: opts.project_id,
            created: now,
            updated: now,
            comment: opts.comment,
        };
        tx.set_json(&secret_path(&secret.id), &secret)?;
        tx.commit()?;

        info!(secret_id = %secret.id, key_id = %secret.key_id, "created secret");
        self.audit.log(AuditRecord::new(
            AuditEventType::SecretWritten,
            &secret.id,
            format!("{} v1", secret.name),
        ));
        Ok(secret)
    }

    pub fn get_secret(&self, id: &str) -> KmsResult<Secret> {
        self.store
            .get_json(&secret_path(id))?
            .ok_or_else(|| KmsError::not_found("secret", id))
    }

    pub fn get_secret_value(&self, id: &str) -> KmsResult<Vec<u8>> {
        let secret = self.get_secret(id)?;
        self.open(&secret)
    }

    /// Decrypt a secret record already in hand.
    pub fn open(&self, secret: &Secret) -> KmsResult<Vec<u8>> {
        let envelope = Envelope::from_bytes(&secret.sealed_value)?;
        self.keys.decrypt(&envelope)
    }

    /// Locate a secret by name within an environment and path.
    /// `project_id` of `None` matches any project.
    pub fn find_secret(
        &self,
        name: &str,
        environment: &str,
        path: &str,
        project_id: Option<&str>,
    ) -> KmsResult<Secret> {
        let path = normalize_path(path);
        let secrets: Vec<Secret> = scan_json(self.store.as_ref(), SECRET_PREFIX)?;
        secrets
            .into_iter()
            .find(|s| {
                s.name == name
                    && s.environment == environment
                    && s.path == path
                    && project_id.is_none_or(|p| s.project_id == p)
            })
            .ok_or_else(|| KmsError::not_found("secret", name))
    }

    /// Re-encrypt under the same key id and bump the version.
    pub fn update_secret(&self, id: &str, value: &[u8]) -> KmsResult<Secret> {
        let mut tx = self.store.begin_tx()?;
        let mut secret: Secret = tx
            .get_json(&secret_path(id))?
            .ok_or_else(|| KmsError::not_found("secret", id))?;
        secret.sealed_value = self.seal(&secret.key_id, value)?;
        secret.version += 1;
        secret.updated = Utc::now();
        tx.set_json(&secret_path(id), &secret)?;
        tx.commit()?;

        info!(secret_id = %id, version = secret.version, "updated secret");
        self.audit.log(AuditRecord::new(
            AuditEventType::SecretWritten,
            id,
            format!("{} v{}", secret.name, secret.version),
        ));
        Ok(secret)
    }

    /// Secret records (no plaintext) matching the filters. Empty filter matches any.
    pub fn list_secrets(&self, environment: &str, path: &str) -> KmsResult<Vec<Secret>> {
        let secrets: Vec<Secret> = scan_json(self.store.as_ref(), SECRET_PREFIX)?;
        Ok(secrets
            .into_iter()
            .filter(|s| environment.is_empty() || s.environment == environment)
            .filter(|s| path.is_empty() || s.path == path)
            .collect())
    }

    /// Hard delete.
    pub fn delete_secret(&self, id: &str) -> KmsResult<()> {
        if !self.store.exists(&secret_path(id))? {
            return Err(KmsError::not_found("secret", id));
        }
        self.store.delete(&secret_path(id))?;
        info!(secret_id = %id, "deleted secret");
        self.audit
            .log(AuditRecord::new(AuditEventType::SecretDeleted, id, "hard delete"));
        Ok(())
    }
}

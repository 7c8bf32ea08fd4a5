//! Opens the storage backend and root key for a KMS instance.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::root::{KEY_LEN, RootCipher};
use crate::crypto::random_bytes;
use crate::error::{KmsError, KmsResult};
use crate::mpc::DEFAULT_SIGNING_EXPIRY_SECS;
use crate::storage::{MemoryBackend, SledBackend, StorageBackend};

/// Hex-encoded 32-byte root key. Takes precedence over the key file.
pub const ROOT_KEY_ENV: &str = "KMS_ROOT_KEY";
/// Root key file name inside the data directory.
pub const ROOT_KEY_FILE: &str = ".root_key";
/// sled database directory inside the data directory.
pub const DB_DIR: &str = "db";

#[derive(Debug, Clone)]
pub struct KmsConfig {
    pub data_dir: PathBuf,
    /// Keep everything in memory; nothing is written under `data_dir`.
    pub in_memory: bool,
    /// Flush every sled write before returning.
    pub sync_writes: bool,
    pub signing_expiry: Duration,
    pub audit_capacity: usize,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./kms-data"),
            in_memory: false,
            sync_writes: true,
            signing_expiry: Duration::from_secs(DEFAULT_SIGNING_EXPIRY_SECS as u64),
            audit_capacity: 500,
        }
    }
}

/// Storage backend selected by `config`.
pub fn open_store(config: &KmsConfig) -> KmsResult<Arc<dyn StorageBackend>> {
    if config.in_memory {
        info!("using in-memory storage");
        return Ok(Arc::new(MemoryBackend::new()));
    }
    fs::create_dir_all(&config.data_dir).map_err(|e| {
        KmsError::Config(format!("create data dir {}: {e}", config.data_dir.display()))
    })?;
    let path = config.data_dir.join(DB_DIR);
    info!(path = %path.display(), "using sled storage");
    Ok(Arc::new(SledBackend::open(path, config.sync_writes)?))
}

/// Root key for `config`, reading `KMS_ROOT_KEY` from the environment.
pub fn load_root_key(config: &KmsConfig) -> KmsResult<RootCipher> {
    let from_env = std::env::var(ROOT_KEY_ENV).ok().map(Zeroizing::new);
    let dir = (!config.in_memory).then_some(config.data_dir.as_path());
    resolve_root_key(from_env.as_deref().map(String::as_str), dir)
}

/// Environment value first, then `{data_dir}/.root_key` (created on first
/// run), else an ephemeral key when there is no data directory.
pub fn resolve_root_key(env_value: Option<&str>, data_dir: Option<&Path>) -> KmsResult<RootCipher> {
    if let Some(hex_key) = env_value.filter(|v| !v.trim().is_empty()) {
        info!("root key loaded from {ROOT_KEY_ENV}");
        return root_from_hex(hex_key);
    }

    let Some(dir) = data_dir else {
        warn!("no root key configured; using an ephemeral key");
        return Ok(RootCipher::ephemeral());
    };

    let path = dir.join(ROOT_KEY_FILE);
    if path.exists() {
        let contents = Zeroizing::new(
            fs::read_to_string(&path)
                .map_err(|e| KmsError::Config(format!("read {}: {e}", path.display())))?,
        );
        info!(path = %path.display(), "root key loaded from file");
        return root_from_hex(&contents);
    }

    let key = Zeroizing::new(random_bytes::<KEY_LEN>());
    write_key_file(&path, &Zeroizing::new(hex::encode(&key[..])))?;
    info!(path = %path.display(), "generated new root key");
    RootCipher::new(&key[..])
}

fn root_from_hex(hex_key: &str) -> KmsResult<RootCipher> {
    let bytes = Zeroizing::new(
        hex::decode(hex_key.trim())
            .map_err(|e| KmsError::Config(format!("root key is not valid hex: {e}")))?,
    );
    RootCipher::new(&bytes)
}

fn write_key_file(path: &Path, contents: &str) -> KmsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KmsError::Config(format!("create {}: {e}", parent.display())))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| KmsError::Config(format!("create {}: {e}", path.display())))?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| KmsError::Config(format!("write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_is_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let first = resolve_root_key(None, Some(dir.path())).unwrap();
        let (nonce, ct) = first.seal(b"sealed").unwrap();

        let second = resolve_root_key(None, Some(dir.path())).unwrap();
        assert_eq!(second.open(&nonce, &ct).unwrap().as_slice(), b"sealed");

        let contents = fs::read_to_string(dir.path().join(ROOT_KEY_FILE)).unwrap();
        assert_eq!(contents.len(), 64);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join(ROOT_KEY_FILE)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn env_value_wins_and_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let hex_key = "11".repeat(32);
        resolve_root_key(Some(&hex_key), Some(dir.path())).unwrap();
        assert!(!dir.path().join(ROOT_KEY_FILE).exists());

        assert!(matches!(
            resolve_root_key(Some("zz"), None),
            Err(KmsError::Config(_))
        ));
        assert!(matches!(
            resolve_root_key(Some("abcd"), None),
            Err(KmsError::Config(_))
        ));
    }
}

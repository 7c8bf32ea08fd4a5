//! Centralized KMS error types.

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No live entry exists under the key (absent or TTL elapsed).
    #[error("key not found: {0}")]
    NotFound(String),
    /// Embedded database failure.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    /// Stored bytes could not be interpreted.
    #[error("corrupt entry under {0}")]
    Corrupt(String),
    /// A lock guarding the backend was poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    Poisoned,
    /// Error returned by a scan callback; aborts the scan.
    #[error("scan aborted: {0}")]
    ScanAborted(String),
}

/// Errors surfaced by the key manager, secret store and MPC manager.
#[derive(Error, Debug)]
pub enum KmsError {
    /// Key, secret, wallet, node, share or signing request absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// A record with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },
    /// Key usage does not permit the requested operation.
    #[error("key {key_id} has usage {usage} and cannot be used to {operation}")]
    WrongUsage {
        key_id: String,
        usage: String,
        operation: &'static str,
    },
    /// Deleted, expired, pending or inactive key used for a crypto operation.
    #[error("key {0} is not active")]
    InactiveKey(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("key {0} is not an asymmetric key")]
    NotAsymmetric(String),
    /// AEAD open failed: tampered ciphertext or wrong key.
    #[error("decryption failed")]
    DecryptionFailure,
    #[error("invalid threshold {threshold}: must be between 1 and {total_parties}")]
    InvalidThreshold { threshold: usize, total_parties: usize },
    #[error("participant count mismatch: expected {expected}, got {got}")]
    ParticipantCountMismatch { expected: usize, got: usize },
    #[error("node {node_id} is not a participant in wallet {wallet_id}")]
    NotAParticipant { node_id: String, wallet_id: String },
    #[error("node {0} has already submitted a signature")]
    DuplicateSignature(String),
    #[error("signing request {0} has expired")]
    RequestExpired(String),
    #[error("signing request {0} is already complete")]
    AlreadyComplete(String),
    #[error("signing request {0} has failed")]
    RequestFailed(String),
    /// Malformed JSON or encoding in a request.
    #[error("invalid request body: {0}")]
    InvalidRequestBody(String),
    /// Well-formed request carrying unparseable cryptographic input.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unauthorized")]
    Unauthorized,
    /// Generic cryptographic operation failure.
    #[error("cryptographic error: {0}")]
    Crypto(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Storage(StorageError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl KmsError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        KmsError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<StorageError> for KmsError {
    fn from(err: StorageError) -> Self {
        match err {
            // Callers that know what they looked up remap this with a better kind.
            StorageError::NotFound(key) => KmsError::NotFound {
                kind: "entry",
                id: key,
            },
            other => KmsError::Storage(other),
        }
    }
}

/// Convenience alias used across the engine.
pub type KmsResult<T> = Result<T, KmsError>;

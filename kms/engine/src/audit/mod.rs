use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

/// Type of KMS event being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    KeyCreated,
    KeyRotated,
    KeyDeleted,
    SecretWritten,
    SecretDeleted,
    NodeRegistered,
    WalletCreated,
    WalletActivated,
    SigningRequested,
    PartialSignature,
    SigningComplete,
    KeyShareStored,
    Error,
}

/// Record of a KMS lifecycle event. Holds identifiers only, never material or plaintext.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub subject_id: String,
    pub node_id: Option<String>,
    pub message: String,
    pub timestamp: String, // RFC3339
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, subject_id: &str, message: impl Into<String>) -> Self {
        Self {
            event_type,
            subject_id: subject_id.to_string(),
            node_id: None,
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    pub fn event_type_label(&self) -> &'static str {
        match self.event_type {
            AuditEventType::KeyCreated => "KEY_CREATED",
            AuditEventType::KeyRotated => "KEY_ROTATED",
            AuditEventType::KeyDeleted => "KEY_DELETED",
            AuditEventType::SecretWritten => "SECRET_WRITTEN",
            AuditEventType::SecretDeleted => "SECRET_DELETED",
            AuditEventType::NodeRegistered => "NODE_REGISTERED",
            AuditEventType::WalletCreated => "WALLET_CREATED",
            AuditEventType::WalletActivated => "WALLET_ACTIVATED",
            AuditEventType::SigningRequested => "SIGNING_REQUESTED",
            AuditEventType::PartialSignature => "PARTIAL_SIGNATURE",
            AuditEventType::SigningComplete => "SIGNING_COMPLETE",
            AuditEventType::KeyShareStored => "KEY_SHARE_STORED",
            AuditEventType::Error => "ERROR",
        }
    }
}

/// Bounded in-memory audit trail. Oldest entries are evicted first.
pub struct AuditTracker {
    records: Mutex<VecDeque<AuditRecord>>,
    max_entries: usize,
}

impl AuditTracker {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries: max_entries.max(1),
        }
    }

    /// Record a new event in the audit log
    pub fn log(&self, record: AuditRecord) {
        info!(
            target: "kms::audit",
            event = record.event_type_label(),
            subject = %record.subject_id,
            node = record.node_id.as_deref().unwrap_or(""),
            "{}",
            record.message
        );
        // A poisoned trail is still a valid ring buffer.
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.max_entries {
            records.pop_front(); // evict oldest
        }
        records.push_back(record);
    }

    /// Most recent events, newest first.
    pub fn recent(&self, count: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditTracker {
    fn default() -> Self {
        Self::new(500)
    }
}

/// Helper to get current timestamp as RFC3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

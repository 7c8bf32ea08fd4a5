//! MPC Manager: threshold wallets, signer registry, signing-request bookkeeping
//! and key-share custody. The cryptographic combination itself is delegated
//! to a [`SignatureCombiner`].

pub mod combiner;
pub mod signing_session;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::audit::{AuditEventType, AuditRecord, AuditTracker};
use crate::crypto::random_id;
use crate::error::{KmsError, KmsResult, StorageError};
use crate::keys::KeyManager;
use crate::storage::{
    NODE_PREFIX, SIGNING_PREFIX, StorageBackend, StorageJsonExt, TxJsonExt, WALLET_PREFIX,
    node_path, scan_json, share_path, signing_path, wallet_path,
};
use crate::types::{Key, KeyStatus, KeyType, KeyUsage, MpcScheme};

pub use combiner::{DeferredCombiner, SignatureCombiner};
pub use types::{
    MpcChain, MpcNode, MpcSigningRequest, MpcWallet, NodeOptions, SigningOptions, SigningStatus,
    WalletOptions,
};

/// Signing requests expire after this long unless configured otherwise.
pub const DEFAULT_SIGNING_EXPIRY_SECS: i64 = 300;

pub struct MpcManager {
    store: Arc<dyn StorageBackend>,
    keys: Arc<KeyManager>,
    audit: Arc<AuditTracker>,
    combiner: Arc<dyn SignatureCombiner>,
    default_expiry: Duration,
}

impl MpcManager {
    pub fn new(store: Arc<dyn StorageBackend>, keys: Arc<KeyManager>, audit: Arc<AuditTracker>) -> Self {
        Self {
            store,
            keys,
            audit,
            combiner: Arc::new(DeferredCombiner),
            default_expiry: Duration::seconds(DEFAULT_SIGNING_EXPIRY_SECS),
        }
    }

    pub fn with_combiner(mut self, combiner: Arc<dyn SignatureCombiner>) -> Self {
        self.combiner = combiner;
        self
    }

    pub fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = expiry;
        self
    }

    // ---- nodes ----

    pub fn register_node(
        &self,
        name: &str,
        endpoint: &str,
        port: u16,
        public_key: Vec<u8>,
        opts: NodeOptions,
    ) -> KmsResult<MpcNode> {
        let now = Utc::now();
        let node = MpcNode {
            id: random_id(),
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            port,
            public_key,
            status: "active".to_string(),
            org_id: opts.org_id,
            metadata: opts.metadata,
            created: now,
            last_seen: now,
        };
        self.store.set_json(&node_path(&node.id), &node)?;

        info!(node_id = %node.id, endpoint = %node.endpoint, port, "registered MPC node");
        self.audit.log(AuditRecord::new(
            AuditEventType::NodeRegistered,
            &node.id,
            format!("{name} at {endpoint}:{port}"),
        ));
        Ok(node)
    }

    pub fn get_node(&self, id: &str) -> KmsResult<MpcNode> {
        self.store
            .get_json(&node_path(id))?
            .ok_or_else(|| KmsError::not_found("node", id))
    }

    pub fn list_nodes(&self) -> KmsResult<Vec<MpcNode>> {
        scan_json(self.store.as_ref(), NODE_PREFIX)
    }

    /// Set a node's status and refresh its last-seen time.
    pub fn update_node_status(&self, id: &str, status: &str) -> KmsResult<MpcNode> {
        let mut tx = self.store.begin_tx()?;
        let mut node: MpcNode = tx
            .get_json(&node_path(id))?
            .ok_or_else(|| KmsError::not_found("node", id))?;
        node.status = status.to_string();
        node.last_seen = Utc::now();
        tx.set_json(&node_path(id), &node)?;
        tx.commit()?;
        info!(node_id = %id, status, "node status updated");
        Ok(node)
    }

    // ---- wallets ----

    /// Create a pending wallet and its mirror key in one transaction.
    pub fn create_wallet(
        &self,
        name: &str,
        scheme: MpcScheme,
        threshold: usize,
        total_parties: usize,
        participant_ids: Vec<String>,
        opts: WalletOptions,
    ) -> KmsResult<MpcWallet> {
        if threshold < 1 || threshold > total_parties {
            return Err(KmsError::InvalidThreshold {
                threshold,
                total_parties,
            });
        }
        let distinct: BTreeSet<&String> = participant_ids.iter().collect();
        if participant_ids.len() != total_parties || distinct.len() != total_parties {
            return Err(KmsError::ParticipantCountMismatch {
                expected: total_parties,
                got: distinct.len(),
            });
        }

        let now = Utc::now();
        let wallet = MpcWallet {
            id: random_id(),
            name: name.to_string(),
            key_type: scheme,
            threshold,
            total_parties,
            participant_ids,
            public_key: None,
            chain_addresses: BTreeMap::new(),
            status: KeyStatus::Pending, // key generation not yet complete
            org_id: opts.org_id,
            project_id: opts.project_id,
            metadata: opts.metadata,
            created: now,
            updated: now,
        };
        let mirror = Key {
            id: wallet.id.clone(),
            name: name.to_string(),
            description: format!("MPC wallet ({threshold}-of-{total_parties})"),
            key_type: KeyType::Mpc(scheme),
            usage: KeyUsage::Mpc,
            status: KeyStatus::Pending,
            version: 1,
            org_id: wallet.org_id.clone(),
            project_id: wallet.project_id.clone(),
            created: now,
            updated: now,
            expires_at: None,
            metadata: wallet.metadata.clone(),
            threshold: Some(threshold),
            total_shares: Some(total_parties),
            share_holders: wallet.participant_ids.clone(),
        };

        let mut tx = self.store.begin_tx()?;
        tx.set_json(&wallet_path(&wallet.id), &wallet)?;
        self.keys.put_mirror_key_tx(tx.as_mut(), &mirror)?;
        tx.commit()?;

        info!(wallet_id = %wallet.id, scheme = scheme.as_str(), threshold, total_parties, "created MPC wallet");
        self.audit.log(AuditRecord::new(
            AuditEventType::WalletCreated,
            &wallet.id,
            format!("{name} {threshold}-of-{total_parties}"),
        ));
        Ok(wallet)
    }

    pub fn get_wallet(&self, id: &str) -> KmsResult<MpcWallet> {
        self.store
            .get_json(&wallet_path(id))?
            .ok_or_else(|| KmsError::not_found("wallet", id))
    }

    pub fn list_wallets(&self) -> KmsResult<Vec<MpcWallet>> {
        scan_json(self.store.as_ref(), WALLET_PREFIX)
    }

    /// Record the group public key produced by DKG and activate the wallet.
    pub fn set_wallet_public_key(
        &self,
        id: &str,
        public_key: Vec<u8>,
        chain_addresses: BTreeMap<MpcChain, String>,
    ) -> KmsResult<MpcWallet> {
        if public_key.is_empty() {
            return Err(KmsError::InvalidRequestBody("public key is empty".into()));
        }

        let mut tx = self.store.begin_tx()?;
        let mut wallet: MpcWallet = tx
            .get_json(&wallet_path(id))?
            .ok_or_else(|| KmsError::not_found("wallet", id))?;
        wallet.public_key = Some(public_key);
        wallet.chain_addresses = chain_addresses;
        wallet.status = KeyStatus::Active;
        wallet.updated = Utc::now();
        tx.set_json(&wallet_path(id), &wallet)?;
        self.keys.set_key_status_tx(tx.as_mut(), id, KeyStatus::Active)?;
        tx.commit()?;

        info!(wallet_id = %id, chains = wallet.chain_addresses.len(), "wallet activated");
        self.audit.log(AuditRecord::new(
            AuditEventType::WalletActivated,
            id,
            "public key set",
        ));
        Ok(wallet)
    }

    // ---- signing ----

    pub fn create_signing_request(
        &self,
        wallet_id: &str,
        chain: MpcChain,
        raw_transaction: Vec<u8>,
        opts: SigningOptions,
    ) -> KmsResult<MpcSigningRequest> {
        let wallet = self.get_wallet(wallet_id)?;
        if wallet.status != KeyStatus::Active {
            return Err(KmsError::InactiveKey(wallet_id.to_string()));
        }

        let request = MpcSigningRequest::open(
            &wallet,
            chain,
            raw_transaction,
            opts,
            self.default_expiry,
            Utc::now(),
        )?;
        self.store.set_json(&signing_path(&request.id), &request)?;

        info!(
            request_id = %request.id,
            wallet_id,
            chain = chain.as_str(),
            required = request.required_sigs,
            "signing request created"
        );
        self.audit.log(AuditRecord::new(
            AuditEventType::SigningRequested,
            &request.id,
            format!("wallet {wallet_id} on {chain}"),
        ));
        Ok(request)
    }

    pub fn get_signing_request(&self, id: &str) -> KmsResult<MpcSigningRequest> {
        self.store
            .get_json(&signing_path(id))?
            .ok_or_else(|| KmsError::not_found("signing request", id))
    }

    /// Record one node's partial signature. The whole read-modify-write runs
    /// under the storage transaction lock.
    pub fn submit_partial_signature(
        &self,
        request_id: &str,
        node_id: &str,
        signature: Vec<u8>,
    ) -> KmsResult<MpcSigningRequest> {
        let mut tx = self.store.begin_tx()?;
        let mut request: MpcSigningRequest = tx
            .get_json(&signing_path(request_id))?
            .ok_or_else(|| KmsError::not_found("signing request", request_id))?;

        // STEP 1: A late submission closes the request for good
        if request.expire_if_due(Utc::now()) {
            tx.set_json(&signing_path(request_id), &request)?;
            tx.commit()?;
            warn!(request_id, node_id, "submission after deadline; request expired");
            return Err(KmsError::RequestExpired(request_id.to_string()));
        }

        // STEP 2: Validate and record against the wallet's participant set
        let wallet: MpcWallet = tx
            .get_json(&wallet_path(&request.wallet_id))?
            .ok_or_else(|| KmsError::not_found("wallet", &request.wallet_id))?;
        let completed = request.record_partial(&wallet, node_id, signature)?;

        // STEP 3: At threshold, give the combiner its chance
        if completed {
            match self.combiner.combine(&wallet, &request) {
                Ok(Some(final_sig)) => request.finalize(final_sig),
                Ok(None) => {}
                Err(e) => {
                    warn!(request_id, error = %e, "signature combination failed");
                    request.fail();
                    tx.set_json(&signing_path(request_id), &request)?;
                    tx.commit()?;
                    self.audit.log(
                        AuditRecord::new(AuditEventType::Error, request_id, e.to_string())
                            .with_node(node_id),
                    );
                    return Err(KmsError::RequestFailed(request_id.to_string()));
                }
            }
        }

        tx.set_json(&signing_path(request_id), &request)?;
        tx.commit()?;

        info!(
            request_id,
            node_id,
            collected = request.collected_sigs,
            required = request.required_sigs,
            "partial signature recorded"
        );
        self.audit.log(
            AuditRecord::new(
                AuditEventType::PartialSignature,
                request_id,
                format!("{}/{}", request.collected_sigs, request.required_sigs),
            )
            .with_node(node_id),
        );
        if completed {
            self.audit.log(AuditRecord::new(
                AuditEventType::SigningComplete,
                request_id,
                "threshold reached",
            ));
        }
        Ok(request)
    }

    /// Store the combined signature and force the request to `complete`.
    /// Expired requests stay expired.
    pub fn set_final_signature(&self, request_id: &str, signature: Vec<u8>) -> KmsResult<MpcSigningRequest> {
        let mut tx = self.store.begin_tx()?;
        let mut request: MpcSigningRequest = tx
            .get_json(&signing_path(request_id))?
            .ok_or_else(|| KmsError::not_found("signing request", request_id))?;

        if request.expire_if_due(Utc::now()) {
            tx.set_json(&signing_path(request_id), &request)?;
            tx.commit()?;
            warn!(request_id, "final signature after deadline; request expired");
            return Err(KmsError::RequestExpired(request_id.to_string()));
        }
        if request.status == SigningStatus::Expired {
            return Err(KmsError::RequestExpired(request_id.to_string()));
        }

        request.finalize(signature);
        tx.set_json(&signing_path(request_id), &request)?;
        tx.commit()?;

        info!(request_id, "final signature recorded");
        self.audit.log(AuditRecord::new(
            AuditEventType::SigningComplete,
            request_id,
            "final signature set",
        ));
        Ok(request)
    }

    /// Open (`pending` or `collecting`) requests for a wallet.
    pub fn list_pending_signing_requests(&self, wallet_id: &str) -> KmsResult<Vec<MpcSigningRequest>> {
        let requests: Vec<MpcSigningRequest> = scan_json(self.store.as_ref(), SIGNING_PREFIX)?;
        Ok(requests
            .into_iter()
            .filter(|r| r.wallet_id == wallet_id && r.is_open())
            .collect())
    }

    // ---- key shares ----

    fn participant_wallet(&self, wallet_id: &str, node_id: &str) -> KmsResult<MpcWallet> {
        let wallet = self.get_wallet(wallet_id)?;
        if !wallet.has_participant(node_id) {
            return Err(KmsError::NotAParticipant {
                node_id: node_id.to_string(),
                wallet_id: wallet_id.to_string(),
            });
        }
        Ok(wallet)
    }

    /// Keep a node's (already node-encrypted) key share. Bytes are stored as given.
    pub fn store_key_share(&self, wallet_id: &str, node_id: &str, share: &[u8]) -> KmsResult<()> {
        self.participant_wallet(wallet_id, node_id)?;
        self.store.set(&share_path(wallet_id, node_id), share)?;
        info!(wallet_id, node_id, "key share stored");
        self.audit.log(
            AuditRecord::new(AuditEventType::KeyShareStored, wallet_id, "share stored")
                .with_node(node_id),
        );
        Ok(())
    }

    pub fn get_key_share(&self, wallet_id: &str, node_id: &str) -> KmsResult<Vec<u8>> {
        self.participant_wallet(wallet_id, node_id)?;
        match self.store.get(&share_path(wallet_id, node_id)) {
            Ok(share) => Ok(share),
            Err(StorageError::NotFound(_)) => {
                Err(KmsError::not_found("key share", format!("{wallet_id}/{node_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

//! MPC records: wallets, signer nodes, signing requests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KmsError;
use crate::types::{KeyStatus, MpcScheme, b64, b64_map, b64_opt};

/// Chains a wallet can hold addresses on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MpcChain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Avalanche,
    Bnb,
    Bitcoin,
    Solana,
    Lux,
}

impl MpcChain {
    pub fn as_str(self) -> &'static str {
        match self {
            MpcChain::Ethereum => "ethereum",
            MpcChain::Polygon => "polygon",
            MpcChain::Arbitrum => "arbitrum",
            MpcChain::Optimism => "optimism",
            MpcChain::Base => "base",
            MpcChain::Avalanche => "avalanche",
            MpcChain::Bnb => "bnb",
            MpcChain::Bitcoin => "bitcoin",
            MpcChain::Solana => "solana",
            MpcChain::Lux => "lux",
        }
    }
}

impl fmt::Display for MpcChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MpcChain {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ethereum" => MpcChain::Ethereum,
            "polygon" => MpcChain::Polygon,
            "arbitrum" => MpcChain::Arbitrum,
            "optimism" => MpcChain::Optimism,
            "base" => MpcChain::Base,
            "avalanche" => MpcChain::Avalanche,
            "bnb" => MpcChain::Bnb,
            "bitcoin" => MpcChain::Bitcoin,
            "solana" => MpcChain::Solana,
            "lux" => MpcChain::Lux,
            other => {
                return Err(KmsError::InvalidRequestBody(format!("unknown chain: {other}")));
            }
        })
    }
}

/// t-of-n threshold wallet. Status mirrors the wallet's Key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcWallet {
    pub id: String,
    pub name: String,
    pub key_type: MpcScheme,
    pub threshold: usize,
    pub total_parties: usize,
    pub participant_ids: Vec<String>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
    #[serde(default)]
    pub chain_addresses: BTreeMap<MpcChain, String>,
    pub status: KeyStatus,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl MpcWallet {
    pub fn has_participant(&self, node_id: &str) -> bool {
        self.participant_ids.iter().any(|p| p == node_id)
    }
}

/// Signer node known to this KMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcNode {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub port: u16,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    pub status: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningStatus {
    Pending,
    Collecting,
    Complete,
    Failed,
    Expired,
}

impl SigningStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningStatus::Pending => "pending",
            SigningStatus::Collecting => "collecting",
            SigningStatus::Complete => "complete",
            SigningStatus::Failed => "failed",
            SigningStatus::Expired => "expired",
        }
    }
}

/// Request to collect partial signatures over a transaction or message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSigningRequest {
    pub id: String,
    pub wallet_id: String,
    pub chain: MpcChain,
    #[serde(with = "b64")]
    pub raw_transaction: Vec<u8>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub message: Option<Vec<u8>>,
    pub status: SigningStatus,
    #[serde(with = "b64_map")]
    pub signatures: BTreeMap<String, Vec<u8>>, // node id -> partial signature
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub final_signature: Option<Vec<u8>>,
    pub required_sigs: usize,
    pub collected_sigs: usize,
    pub created: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub org_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct WalletOptions {
    pub org_id: String,
    pub project_id: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct SigningOptions {
    pub message: Option<Vec<u8>>,
    /// Overrides the manager's default expiry.
    pub expires_in: Option<Duration>,
    pub metadata: BTreeMap<String, String>,
}

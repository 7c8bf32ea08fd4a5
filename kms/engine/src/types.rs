//! Shared data types for the KMS: key records, key material, envelopes and secrets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KmsError, KmsResult};

/// RSA modulus sizes supported for generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsaBits {
    Rsa3072,
    Rsa4096,
}

impl RsaBits {
    pub fn bits(self) -> usize {
        match self {
            RsaBits::Rsa3072 => 3072,
            RsaBits::Rsa4096 => 4096,
        }
    }
}

/// NIST curves supported for ECDSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    P256,
    P384,
}

/// Signature scheme of an MPC wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MpcScheme {
    Ecdsa,
    Eddsa,
    Taproot,
}

impl MpcScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            MpcScheme::Ecdsa => "ecdsa",
            MpcScheme::Eddsa => "eddsa",
            MpcScheme::Taproot => "taproot",
        }
    }
}

impl FromStr for MpcScheme {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa" => Ok(MpcScheme::Ecdsa),
            "eddsa" => Ok(MpcScheme::Eddsa),
            "taproot" => Ok(MpcScheme::Taproot),
            other => Err(KmsError::UnsupportedKeyType(other.to_string())),
        }
    }
}

/// Closed set of key types. Persisted as its string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyType {
    Aes256Gcm,
    Rsa(RsaBits),
    Ecdsa(EcCurve),
    Ed25519,
    Mpc(MpcScheme),
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Aes256Gcm => "aes-256-gcm",
            KeyType::Rsa(RsaBits::Rsa3072) => "rsa-3072",
            KeyType::Rsa(RsaBits::Rsa4096) => "rsa-4096",
            KeyType::Ecdsa(EcCurve::P256) => "ecdsa-p256",
            KeyType::Ecdsa(EcCurve::P384) => "ecdsa-p384",
            KeyType::Ed25519 => "ed25519",
            KeyType::Mpc(scheme) => scheme.as_str(),
        }
    }

    /// True for key types carrying a public half.
    pub fn is_asymmetric(self) -> bool {
        matches!(
            self,
            KeyType::Rsa(_) | KeyType::Ecdsa(_) | KeyType::Ed25519
        )
    }

    pub fn is_mpc(self) -> bool {
        matches!(self, KeyType::Mpc(_))
    }

    /// Whether a key of this type may be created with the given usage.
    pub fn permits(self, usage: KeyUsage) -> bool {
        match self {
            KeyType::Aes256Gcm => usage == KeyUsage::EncryptDecrypt,
            KeyType::Rsa(_) | KeyType::Ecdsa(_) | KeyType::Ed25519 => {
                usage == KeyUsage::SignVerify
            }
            KeyType::Mpc(_) => usage == KeyUsage::Mpc,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "aes-256-gcm" => KeyType::Aes256Gcm,
            "rsa-3072" => KeyType::Rsa(RsaBits::Rsa3072),
            "rsa-4096" => KeyType::Rsa(RsaBits::Rsa4096),
            "ecdsa-p256" => KeyType::Ecdsa(EcCurve::P256),
            "ecdsa-p384" => KeyType::Ecdsa(EcCurve::P384),
            "ed25519" => KeyType::Ed25519,
            other => KeyType::Mpc(other.parse()?),
        })
    }
}

impl TryFrom<String> for KeyType {
    type Error = KmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyType> for String {
    fn from(value: KeyType) -> Self {
        value.as_str().to_string()
    }
}

/// Permitted use of a key. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyUsage {
    EncryptDecrypt,
    SignVerify,
    Mpc,
}

impl KeyUsage {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyUsage::EncryptDecrypt => "encrypt-decrypt",
            KeyUsage::SignVerify => "sign-verify",
            KeyUsage::Mpc => "mpc",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsage {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encrypt-decrypt" => Ok(KeyUsage::EncryptDecrypt),
            "sign-verify" => Ok(KeyUsage::SignVerify),
            "mpc" => Ok(KeyUsage::Mpc),
            other => Err(KmsError::InvalidRequestBody(format!(
                "unknown key usage: {other}"
            ))),
        }
    }
}

/// Lifecycle status shared by keys and MPC wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Inactive,
    Deleted,
    Pending,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Inactive => "inactive",
            KeyStatus::Deleted => "deleted",
            KeyStatus::Pending => "pending",
        }
    }
}

/// Metadata record for a managed key. Never carries material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub usage: KeyUsage,
    pub status: KeyStatus,
    pub version: u32,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub project_id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    // MPC-backed keys only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_shares: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub share_holders: Vec<String>,
}

impl Key {
    /// A key is usable for crypto iff it is active and not past its expiry.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == KeyStatus::Active && self.expires_at.is_none_or(|exp| now < exp)
    }

    pub fn ensure_usable(&self) -> KmsResult<()> {
        if self.is_usable_at(Utc::now()) {
            Ok(())
        } else {
            Err(KmsError::InactiveKey(self.id.clone()))
        }
    }

    pub fn ensure_usage(&self, usage: KeyUsage, operation: &'static str) -> KmsResult<()> {
        if self.usage == usage {
            Ok(())
        } else {
            Err(KmsError::WrongUsage {
                key_id: self.id.clone(),
                usage: self.usage.to_string(),
                operation,
            })
        }
    }
}

/// Sealed key material for one (key id, version).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    pub key_id: String,
    pub version: u32,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Symmetric key or PKCS#8 private key, sealed under the root key.
    #[serde(with = "b64")]
    pub sealed: Vec<u8>,
    /// SubjectPublicKeyInfo DER for asymmetric keys.
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
    pub created: DateTime<Utc>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Self-describing ciphertext: which key version sealed it, plus nonce‖ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub key_id: String,
    pub key_version: u32,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> KmsResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> KmsResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| KmsError::MalformedInput(format!("invalid envelope: {e}")))
    }
}

/// Encrypted secret record. The value is held as envelope bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub key_id: String,
    #[serde(default)]
    pub environment: String,
    pub path: String,
    #[serde(with = "b64")]
    pub sealed_value: Vec<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub project_id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Secret paths are rooted; the empty path means `/`.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Serde adapter: `Vec<u8>` as standard base64.
pub mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<Vec<u8>>` as standard base64.
pub mod b64_opt {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter: map of base64 byte strings.
pub mod b64_map {
    use std::collections::BTreeMap;

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_map(map.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        BTreeMap::<String, String>::deserialize(d)?
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_string_forms_are_stable() {
        for s in [
            "aes-256-gcm",
            "rsa-3072",
            "rsa-4096",
            "ecdsa-p256",
            "ecdsa-p384",
            "ed25519",
            "ecdsa",
            "eddsa",
            "taproot",
        ] {
            let parsed: KeyType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(matches!(
            "des".parse::<KeyType>(),
            Err(KmsError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn usage_must_match_type() {
        assert!(KeyType::Aes256Gcm.permits(KeyUsage::EncryptDecrypt));
        assert!(!KeyType::Aes256Gcm.permits(KeyUsage::SignVerify));
        assert!(KeyType::Ed25519.permits(KeyUsage::SignVerify));
        assert!(!KeyType::Ecdsa(EcCurve::P256).permits(KeyUsage::Mpc));
        assert!(KeyType::Mpc(MpcScheme::Taproot).permits(KeyUsage::Mpc));
    }

    #[test]
    fn envelope_json_shape() {
        let env = Envelope {
            key_id: "abc".into(),
            key_version: 2,
            data: vec![1, 2, 3],
        };
        let json: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(json["keyId"], "abc");
        assert_eq!(json["keyVersion"], 2);
        assert_eq!(json["data"], "AQID");
    }

    #[test]
    fn empty_path_is_root() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/app"), "/app");
    }
}

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use kms_engine::keys::KeyOptions;
use kms_engine::types::{EcCurve, Envelope, Key, KeyStatus, KeyType, KeyUsage, RsaBits};
use kms_engine::{KmsError, KmsResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{decode_b64, encode_b64, expiry_from_secs, run};
use crate::AppState;
use crate::error::{ApiJson, ApiResult};

/// Key view in the client SDK's vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmsKey {
    pub id: String,
    pub description: String,
    pub is_disabled: bool,
    pub org_id: String,
    pub name: String,
    pub project_id: String,
    pub key_usage: String,
    pub version: u32,
    pub encryption_algorithm: String,
    /// Exact internal type; `encryptionAlgorithm` folds RSA and ECDSA sizes.
    pub key_type: String,
}

impl From<&Key> for KmsKey {
    fn from(key: &Key) -> Self {
        Self {
            id: key.id.clone(),
            description: key.description.clone(),
            is_disabled: key.status != KeyStatus::Active,
            org_id: key.org_id.clone(),
            name: key.name.clone(),
            project_id: key.project_id.clone(),
            key_usage: key.usage.to_string(),
            version: key.version,
            encryption_algorithm: sdk_algorithm(key.key_type).to_string(),
            key_type: key.key_type.to_string(),
        }
    }
}

/// SDK algorithm name for a key type.
pub fn sdk_algorithm(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::Aes256Gcm => "aes-256-gcm",
        KeyType::Rsa(_) => "rsa-4096",
        KeyType::Ecdsa(_) => "ecc-nist-p256",
        KeyType::Ed25519 => "ed25519",
        KeyType::Mpc(scheme) => scheme.as_str(),
    }
}

/// Accepts both SDK names and internal names. Empty means AES-256-GCM.
pub fn key_type_for_algorithm(algorithm: &str) -> KmsResult<KeyType> {
    let key_type = match algorithm {
        "" | "aes-256-gcm" | "aes-128-gcm" => KeyType::Aes256Gcm,
        "rsa-4096" => KeyType::Rsa(RsaBits::Rsa4096),
        "ecc-nist-p256" => KeyType::Ecdsa(EcCurve::P256),
        other => other.parse()?,
    };
    if key_type.is_mpc() {
        return Err(KmsError::UnsupportedKeyType(algorithm.to_string()));
    }
    Ok(key_type)
}

fn usage_for(requested: &str, key_type: KeyType) -> KmsResult<KeyUsage> {
    if requested.is_empty() {
        return Ok(if key_type.is_asymmetric() {
            KeyUsage::SignVerify
        } else {
            KeyUsage::EncryptDecrypt
        });
    }
    requested.parse()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub key_usage: String,
    #[serde(default)]
    pub encryption_algorithm: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub expires_in_secs: Option<i64>,
}

#[derive(Serialize)]
pub struct KeyResponse {
    pub key: KmsKey,
}

#[derive(Serialize)]
pub struct KeysResponse {
    pub keys: Vec<KmsKey>,
}

#[derive(Deserialize)]
pub struct EncryptRequest {
    pub plaintext: String,
}

#[derive(Serialize)]
pub struct EncryptResponse {
    pub ciphertext: String,
}

#[derive(Deserialize)]
pub struct DecryptRequest {
    pub ciphertext: String,
}

#[derive(Serialize)]
pub struct DecryptResponse {
    pub plaintext: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub data: String,
    #[serde(default)]
    pub signing_algorithm: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub signature: String,
    pub key_id: String,
    pub signing_algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub data: String,
    pub signature: String,
    #[serde(default)]
    pub signing_algorithm: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub signature_valid: bool,
    pub key_id: String,
    pub signing_algorithm: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// Base64 of the PEM text.
    pub public_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningAlgorithmsResponse {
    pub signing_algorithms: Vec<&'static str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEncryptRequest {
    pub key_id: String,
    pub plaintext: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDecryptRequest {
    #[serde(default)]
    pub key_id: String,
    pub ciphertext: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySignRequest {
    pub key_id: String,
    pub data: String,
    #[serde(default)]
    pub signing_algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyVerifyRequest {
    pub key_id: String,
    pub data: String,
    pub signature: String,
    #[serde(default)]
    pub signing_algorithm: String,
}

pub fn routes() -> Router<AppState> {
    let mut router = Router::new()
        .route("/v1/encrypt", post(legacy_encrypt))
        .route("/v1/decrypt", post(legacy_decrypt))
        .route("/v1/sign", post(legacy_sign))
        .route("/v1/verify", post(legacy_verify));

    for prefix in ["/v1/kms/keys", "/v1/keys"] {
        router = router
            .route(prefix, get(list_keys).post(create_key))
            .route(&format!("{prefix}/name/:name"), get(get_key_by_name))
            .route(
                &format!("{prefix}/name/:name/project/:project_id"),
                get(get_key_by_name_in_project),
            )
            .route(&format!("{prefix}/:id"), get(get_key).delete(delete_key))
            .route(&format!("{prefix}/:id/rotate"), post(rotate_key))
            .route(&format!("{prefix}/:id/encrypt"), post(encrypt))
            .route(&format!("{prefix}/:id/decrypt"), post(decrypt))
            .route(&format!("{prefix}/:id/sign"), post(sign))
            .route(&format!("{prefix}/:id/verify"), post(verify))
            .route(&format!("{prefix}/:id/public-key"), get(public_key))
            .route(&format!("{prefix}/:id/signing-algorithms"), get(signing_algorithms));
    }
    router
}

/// GET /v1/kms/keys
pub async fn list_keys(State(state): State<AppState>) -> ApiResult<Json<KeysResponse>> {
    let keys = run(&state, |kms| kms.keys.list_keys("")).await?;
    Ok(Json(KeysResponse {
        keys: keys.iter().map(KmsKey::from).collect(),
    }))
}

/// POST /v1/kms/keys
pub async fn create_key(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateKeyRequest>,
) -> ApiResult<(StatusCode, Json<KeyResponse>)> {
    if req.name.is_empty() {
        return Err(KmsError::InvalidRequestBody("name is required".into()).into());
    }
    let key_type = key_type_for_algorithm(&req.encryption_algorithm)?;
    let usage = usage_for(&req.key_usage, key_type)?;
    let opts = KeyOptions {
        description: req.description,
        org_id: req.org_id,
        project_id: req.project_id,
        metadata: req.metadata,
        expires_in: expiry_from_secs(req.expires_in_secs)?,
    };

    let name = req.name;
    let key = run(&state, move |kms| kms.keys.generate_key(&name, key_type, usage, opts)).await?;
    info!(key_id = %key.id, key_type = %key.key_type, "key created over API");
    Ok((StatusCode::CREATED, Json(KeyResponse { key: KmsKey::from(&key) })))
}

/// GET /v1/kms/keys/:id
pub async fn get_key(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<KeyResponse>> {
    let key = run(&state, move |kms| kms.keys.get_key(&id)).await?;
    Ok(Json(KeyResponse { key: KmsKey::from(&key) }))
}

/// DELETE /v1/kms/keys/:id, answers with the key as it was before deletion
pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let key = run(&state, move |kms| kms.keys.delete_key(&id)).await?;
    Ok(Json(KeyResponse { key: KmsKey::from(&key) }))
}

/// POST /v1/kms/keys/:id/rotate
pub async fn rotate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let key = run(&state, move |kms| kms.keys.rotate_key(&id)).await?;
    Ok(Json(KeyResponse { key: KmsKey::from(&key) }))
}

pub async fn get_key_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let key = run(&state, move |kms| kms.keys.get_key_by_name(&name, None)).await?;
    Ok(Json(KeyResponse { key: KmsKey::from(&key) }))
}

pub async fn get_key_by_name_in_project(
    State(state): State<AppState>,
    Path((name, project_id)): Path<(String, String)>,
) -> ApiResult<Json<KeyResponse>> {
    let key = run(&state, move |kms| {
        kms.keys.get_key_by_name(&name, Some(project_id.as_str()))
    })
    .await?;
    Ok(Json(KeyResponse { key: KmsKey::from(&key) }))
}

/// POST /v1/kms/keys/:id/encrypt
pub async fn encrypt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<EncryptRequest>,
) -> ApiResult<Json<EncryptResponse>> {
    encrypt_with(&state, id, &req.plaintext).await
}

/// POST /v1/kms/keys/:id/decrypt
pub async fn decrypt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<DecryptRequest>,
) -> ApiResult<Json<DecryptResponse>> {
    decrypt_with(&state, Some(id), &req.ciphertext).await
}

/// POST /v1/kms/keys/:id/sign
pub async fn sign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SignRequest>,
) -> ApiResult<Json<SignResponse>> {
    sign_with(&state, id, &req.data, req.signing_algorithm).await
}

/// POST /v1/kms/keys/:id/verify
pub async fn verify(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    verify_with(&state, id, &req.data, &req.signature, req.signing_algorithm).await
}

/// GET /v1/kms/keys/:id/public-key
pub async fn public_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PublicKeyResponse>> {
    let pem = run(&state, move |kms| kms.keys.get_public_key(&id)).await?;
    Ok(Json(PublicKeyResponse {
        public_key: encode_b64(pem.as_bytes()),
    }))
}

/// GET /v1/kms/keys/:id/signing-algorithms
pub async fn signing_algorithms(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SigningAlgorithmsResponse>> {
    let signing_algorithms = run(&state, move |kms| kms.keys.signing_algorithms(&id)).await?;
    Ok(Json(SigningAlgorithmsResponse { signing_algorithms }))
}

pub async fn legacy_encrypt(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LegacyEncryptRequest>,
) -> ApiResult<Json<EncryptResponse>> {
    encrypt_with(&state, req.key_id, &req.plaintext).await
}

pub async fn legacy_decrypt(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LegacyDecryptRequest>,
) -> ApiResult<Json<DecryptResponse>> {
    let expected = (!req.key_id.is_empty()).then_some(req.key_id);
    decrypt_with(&state, expected, &req.ciphertext).await
}

pub async fn legacy_sign(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LegacySignRequest>,
) -> ApiResult<Json<SignResponse>> {
    sign_with(&state, req.key_id, &req.data, req.signing_algorithm).await
}

pub async fn legacy_verify(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LegacyVerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    verify_with(&state, req.key_id, &req.data, &req.signature, req.signing_algorithm).await
}

async fn encrypt_with(state: &AppState, id: String, plaintext: &str) -> ApiResult<Json<EncryptResponse>> {
    let plaintext = decode_b64("plaintext", plaintext)?;
    let envelope = run(state, move |kms| kms.keys.encrypt(&id, &plaintext)?.to_bytes()).await?;
    Ok(Json(EncryptResponse {
        ciphertext: encode_b64(&envelope),
    }))
}

/// The envelope names its key; `expected_key` must agree when given.
async fn decrypt_with(
    state: &AppState,
    expected_key: Option<String>,
    ciphertext: &str,
) -> ApiResult<Json<DecryptResponse>> {
    let envelope = Envelope::from_bytes(&decode_b64("ciphertext", ciphertext)?)?;
    if let Some(id) = expected_key.filter(|id| *id != envelope.key_id) {
        return Err(KmsError::MalformedInput(format!("ciphertext was not produced by key {id}")).into());
    }
    let plaintext = run(state, move |kms| kms.keys.decrypt(&envelope)).await?;
    Ok(Json(DecryptResponse {
        plaintext: encode_b64(&plaintext),
    }))
}

async fn sign_with(
    state: &AppState,
    id: String,
    data: &str,
    requested_algorithm: String,
) -> ApiResult<Json<SignResponse>> {
    let data = decode_b64("data", data)?;
    let key_id = id.clone();
    let (signature, algorithms) = run(state, move |kms| {
        let signature = kms.keys.sign(&id, &data)?;
        Ok((signature, kms.keys.signing_algorithms(&id)?))
    })
    .await?;
    Ok(Json(SignResponse {
        signature: encode_b64(&signature),
        key_id,
        signing_algorithm: algorithm_or_default(requested_algorithm, &algorithms),
    }))
}

async fn verify_with(
    state: &AppState,
    id: String,
    data: &str,
    signature: &str,
    requested_algorithm: String,
) -> ApiResult<Json<VerifyResponse>> {
    let data = decode_b64("data", data)?;
    let signature = decode_b64("signature", signature)?;
    let key_id = id.clone();
    let (signature_valid, algorithms) = run(state, move |kms| {
        let valid = kms.keys.verify(&id, &data, &signature)?;
        Ok((valid, kms.keys.signing_algorithms(&id)?))
    })
    .await?;
    Ok(Json(VerifyResponse {
        signature_valid,
        key_id,
        signing_algorithm: algorithm_or_default(requested_algorithm, &algorithms),
    }))
}

fn algorithm_or_default(requested: String, supported: &[&'static str]) -> String {
    if requested.is_empty() {
        supported.first().copied().unwrap_or_default().to_string()
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_engine::types::MpcScheme;

    #[test]
    fn test_algorithm_vocabulary() {
        assert_eq!(key_type_for_algorithm("aes-128-gcm").unwrap(), KeyType::Aes256Gcm);
        assert_eq!(key_type_for_algorithm("").unwrap(), KeyType::Aes256Gcm);
        assert_eq!(
            key_type_for_algorithm("ecdsa-p384").unwrap(),
            KeyType::Ecdsa(EcCurve::P384)
        );
        assert!(matches!(
            key_type_for_algorithm("taproot"),
            Err(KmsError::UnsupportedKeyType(_))
        ));
        assert!(matches!(
            key_type_for_algorithm("des"),
            Err(KmsError::UnsupportedKeyType(_))
        ));

        assert_eq!(sdk_algorithm(KeyType::Rsa(RsaBits::Rsa3072)), "rsa-4096");
        assert_eq!(sdk_algorithm(KeyType::Ecdsa(EcCurve::P384)), "ecc-nist-p256");
        assert_eq!(sdk_algorithm(KeyType::Mpc(MpcScheme::Eddsa)), "eddsa");
    }

    #[test]
    fn test_usage_defaults_follow_key_type() {
        assert_eq!(usage_for("", KeyType::Ed25519).unwrap(), KeyUsage::SignVerify);
        assert_eq!(usage_for("", KeyType::Aes256Gcm).unwrap(), KeyUsage::EncryptDecrypt);
        assert!(usage_for("encrypt", KeyType::Aes256Gcm).is_err());
    }
}

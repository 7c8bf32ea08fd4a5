// Node registry, wallets, signing-request collection and key-share custody.
// Binary fields travel as standard base64.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use kms_engine::mpc::{
    MpcChain, MpcNode, MpcSigningRequest, MpcWallet, NodeOptions, SigningOptions, WalletOptions,
};
use kms_engine::types::MpcScheme;
use serde::{Deserialize, Serialize};

use super::{decode_b64, encode_b64, expiry_from_secs, run};
use crate::AppState;
use crate::error::{ApiJson, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    pub name: String,
    pub endpoint: String,
    pub port: u16,
    pub public_key: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct NodeStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub name: String,
    pub key_type: MpcScheme,
    pub threshold: usize,
    pub total_parties: usize,
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPublicKeyRequest {
    pub public_key: String,
    #[serde(default)]
    pub chain_addresses: BTreeMap<MpcChain, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSigningRequest {
    pub wallet_id: String,
    pub chain: MpcChain,
    pub raw_transaction: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub expires_in_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSignatureRequest {
    pub node_id: String,
    pub partial_signature: String,
}

#[derive(Debug, Deserialize)]
pub struct FinalSignatureRequest {
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyShareRequest {
    pub share: String,
}

#[derive(Serialize)]
pub struct NodeResponse {
    pub node: MpcNode,
}

#[derive(Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<MpcNode>,
}

#[derive(Serialize)]
pub struct WalletResponse {
    pub wallet: MpcWallet,
}

#[derive(Serialize)]
pub struct WalletsResponse {
    pub wallets: Vec<MpcWallet>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequestResponse {
    pub signing_request: MpcSigningRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequestsResponse {
    pub signing_requests: Vec<MpcSigningRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShareResponse {
    pub wallet_id: String,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/mpc/nodes", get(list_nodes).post(register_node))
        .route("/v1/mpc/nodes/:id", get(get_node))
        .route("/v1/mpc/nodes/:id/status", post(update_node_status))
        .route("/v1/mpc/wallets", get(list_wallets).post(create_wallet))
        .route("/v1/mpc/wallets/:id", get(get_wallet))
        .route("/v1/mpc/wallets/:id/public-key", post(set_wallet_public_key))
        .route("/v1/mpc/wallets/:id/pending", get(pending_requests))
        .route(
            "/v1/mpc/wallets/:id/shares/:node_id",
            get(get_key_share).put(store_key_share),
        )
        .route("/v1/mpc/sign", post(create_signing_request))
        .route("/v1/mpc/signing/:id", get(get_signing_request))
        .route("/v1/mpc/signing/:id/signature", post(submit_partial_signature))
        .route("/v1/mpc/signing/:id/final-signature", post(set_final_signature))
}

/// GET /v1/mpc/nodes
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<NodesResponse>> {
    let nodes = run(&state, |kms| kms.mpc.list_nodes()).await?;
    Ok(Json(NodesResponse { nodes }))
}

/// POST /v1/mpc/nodes
pub async fn register_node(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterNodeRequest>,
) -> ApiResult<(StatusCode, Json<NodeResponse>)> {
    let public_key = decode_b64("publicKey", &req.public_key)?;
    let opts = NodeOptions {
        org_id: req.org_id,
        metadata: req.metadata,
    };
    let node = run(&state, move |kms| {
        kms.mpc
            .register_node(&req.name, &req.endpoint, req.port, public_key, opts)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(NodeResponse { node })))
}

/// GET /v1/mpc/nodes/:id
pub async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<NodeResponse>> {
    let node = run(&state, move |kms| kms.mpc.get_node(&id)).await?;
    Ok(Json(NodeResponse { node }))
}

/// POST /v1/mpc/nodes/:id/status
pub async fn update_node_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<NodeStatusRequest>,
) -> ApiResult<Json<NodeResponse>> {
    let node = run(&state, move |kms| kms.mpc.update_node_status(&id, &req.status)).await?;
    Ok(Json(NodeResponse { node }))
}

/// GET /v1/mpc/wallets
pub async fn list_wallets(State(state): State<AppState>) -> ApiResult<Json<WalletsResponse>> {
    let wallets = run(&state, |kms| kms.mpc.list_wallets()).await?;
    Ok(Json(WalletsResponse { wallets }))
}

/// POST /v1/mpc/wallets
pub async fn create_wallet(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateWalletRequest>,
) -> ApiResult<(StatusCode, Json<WalletResponse>)> {
    let opts = WalletOptions {
        org_id: req.org_id,
        project_id: req.project_id,
        metadata: req.metadata,
    };
    let wallet = run(&state, move |kms| {
        kms.mpc.create_wallet(
            &req.name,
            req.key_type,
            req.threshold,
            req.total_parties,
            req.participant_ids,
            opts,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(WalletResponse { wallet })))
}

/// GET /v1/mpc/wallets/:id
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WalletResponse>> {
    let wallet = run(&state, move |kms| kms.mpc.get_wallet(&id)).await?;
    Ok(Json(WalletResponse { wallet }))
}

/// POST /v1/mpc/wallets/:id/public-key, called once DKG has finished
pub async fn set_wallet_public_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<WalletPublicKeyRequest>,
) -> ApiResult<Json<WalletResponse>> {
    let public_key = decode_b64("publicKey", &req.public_key)?;
    let addresses = req.chain_addresses;
    let wallet = run(&state, move |kms| {
        kms.mpc.set_wallet_public_key(&id, public_key, addresses)
    })
    .await?;
    Ok(Json(WalletResponse { wallet }))
}

/// GET /v1/mpc/wallets/:id/pending
pub async fn pending_requests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SigningRequestsResponse>> {
    let signing_requests = run(&state, move |kms| kms.mpc.list_pending_signing_requests(&id)).await?;
    Ok(Json(SigningRequestsResponse { signing_requests }))
}

/// PUT /v1/mpc/wallets/:id/shares/:node_id
pub async fn store_key_share(
    State(state): State<AppState>,
    Path((wallet_id, node_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<KeyShareRequest>,
) -> ApiResult<Json<KeyShareResponse>> {
    let share = decode_b64("share", &req.share)?;
    let (w, n) = (wallet_id.clone(), node_id.clone());
    run(&state, move |kms| kms.mpc.store_key_share(&w, &n, &share)).await?;
    Ok(Json(KeyShareResponse {
        wallet_id,
        node_id,
        share: None,
    }))
}

/// GET /v1/mpc/wallets/:id/shares/:node_id
pub async fn get_key_share(
    State(state): State<AppState>,
    Path((wallet_id, node_id)): Path<(String, String)>,
) -> ApiResult<Json<KeyShareResponse>> {
    let (w, n) = (wallet_id.clone(), node_id.clone());
    let share = run(&state, move |kms| kms.mpc.get_key_share(&w, &n)).await?;
    Ok(Json(KeyShareResponse {
        wallet_id,
        node_id,
        share: Some(encode_b64(&share)),
    }))
}

/// POST /v1/mpc/sign
pub async fn create_signing_request(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateSigningRequest>,
) -> ApiResult<(StatusCode, Json<SigningRequestResponse>)> {
    let raw_transaction = decode_b64("rawTransaction", &req.raw_transaction)?;
    let message = match req.message.as_deref() {
        Some(m) if !m.is_empty() => Some(decode_b64("message", m)?),
        _ => None,
    };
    let opts = SigningOptions {
        message,
        expires_in: expiry_from_secs(req.expires_in_secs)?,
        metadata: req.metadata,
    };
    let wallet_id = req.wallet_id;
    let chain = req.chain;

    let signing_request = run(&state, move |kms| {
        kms.mpc
            .create_signing_request(&wallet_id, chain, raw_transaction, opts)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(SigningRequestResponse { signing_request })))
}

/// GET /v1/mpc/signing/:id
pub async fn get_signing_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SigningRequestResponse>> {
    let signing_request = run(&state, move |kms| kms.mpc.get_signing_request(&id)).await?;
    Ok(Json(SigningRequestResponse { signing_request }))
}

/// POST /v1/mpc/signing/:id/signature
pub async fn submit_partial_signature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PartialSignatureRequest>,
) -> ApiResult<Json<SigningRequestResponse>> {
    let partial = decode_b64("partialSignature", &req.partial_signature)?;
    let node_id = req.node_id;
    let signing_request = run(&state, move |kms| {
        kms.mpc.submit_partial_signature(&id, &node_id, partial)
    })
    .await?;
    Ok(Json(SigningRequestResponse { signing_request }))
}

/// POST /v1/mpc/signing/:id/final-signature
pub async fn set_final_signature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<FinalSignatureRequest>,
) -> ApiResult<Json<SigningRequestResponse>> {
    let signature = decode_b64("signature", &req.signature)?;
    let signing_request = run(&state, move |kms| kms.mpc.set_final_signature(&id, signature)).await?;
    Ok(Json(SigningRequestResponse { signing_request }))
}

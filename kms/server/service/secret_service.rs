use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use kms_engine::secrets::SecretOptions;
use kms_engine::types::Secret;
use kms_engine::{Kms, KmsError, KmsResult};
use serde::{Deserialize, Serialize};

use super::run;
use crate::AppState;
use crate::error::{ApiJson, ApiResult};

/// Secret view in the client SDK's vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretView {
    pub id: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_value: Option<String>,
    pub version: u32,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub environment: String,
    pub secret_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_comment: Option<String>,
}

impl SecretView {
    fn new(secret: &Secret, value: Option<&[u8]>) -> Self {
        Self {
            id: secret.id.clone(),
            secret_key: secret.name.clone(),
            secret_value: value.map(|v| String::from_utf8_lossy(v).into_owned()),
            version: secret.version,
            secret_type: "shared".to_string(),
            environment: secret.environment.clone(),
            secret_path: secret.path.clone(),
            secret_comment: secret.comment.clone(),
        }
    }
}

// `type` and `skipMultilineEncoding` sent by the SDK are ignored.

/// Scope filters shared by list, retrieve and delete.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretScope {
    pub workspace_id: String,
    pub workspace_slug: String,
    pub environment: String,
    pub secret_path: String,
}

impl SecretScope {
    fn project(&self) -> &str {
        if self.workspace_id.is_empty() {
            &self.workspace_slug
        } else {
            &self.workspace_id
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSecretRequest {
    pub workspace_id: String,
    pub environment: String,
    pub secret_path: String,
    pub secret_comment: String,
    pub secret_value: String,
    /// Encrypt under this key instead of the default one.
    pub key_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateSecretRequest {
    pub workspace_id: String,
    pub environment: String,
    pub secret_path: String,
    pub secret_value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSecret {
    pub secret_key: String,
    pub secret_value: String,
    pub secret_comment: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchCreateRequest {
    pub environment: String,
    pub workspace_id: String,
    pub secret_path: String,
    pub secrets: Vec<BatchSecret>,
}

#[derive(Serialize)]
pub struct SecretResponse {
    pub secret: SecretView,
}

#[derive(Serialize)]
pub struct SecretListResponse {
    pub secrets: Vec<SecretView>,
    pub imports: Vec<serde_json::Value>,
}

#[derive(Serialize)]
pub struct BatchCreateResponse {
    pub secrets: Vec<SecretView>,
}

pub fn routes() -> Router<AppState> {
    let mut router = Router::new().route("/v3/secrets/batch/raw", post(batch_create));
    for prefix in ["/v3/secrets/raw", "/v1/secrets"] {
        router = router
            .route(prefix, get(list_secrets))
            .route(
                &format!("{prefix}/:name"),
                get(retrieve_secret)
                    .post(create_secret)
                    .patch(update_secret)
                    .delete(delete_secret),
            )
            .route(&format!("{prefix}/:name/value"), get(retrieve_secret_value));
    }
    router
}

/// Name lookup within a scope. Empty environment or path matches any.
fn locate(kms: &Kms, name: &str, environment: &str, path: &str, project: &str) -> KmsResult<Secret> {
    kms.secrets
        .list_secrets(environment, path)?
        .into_iter()
        .find(|s| s.name == name && (project.is_empty() || s.project_id == project))
        .ok_or_else(|| KmsError::not_found("secret", name))
}

fn options(environment: String, path: String, project_id: String, comment: String) -> SecretOptions {
    SecretOptions {
        environment,
        path,
        project_id,
        comment: (!comment.is_empty()).then_some(comment),
        ..SecretOptions::default()
    }
}

/// GET /v3/secrets/raw
pub async fn list_secrets(
    State(state): State<AppState>,
    Query(mut scope): Query<SecretScope>,
) -> ApiResult<Json<SecretListResponse>> {
    if scope.secret_path.is_empty() {
        scope.secret_path = "/".to_string();
    }
    let secrets = run(&state, move |kms| {
        let project = scope.project().to_string();
        Ok(kms
            .secrets
            .list_secrets(&scope.environment, &scope.secret_path)?
            .into_iter()
            .filter(|s| project.is_empty() || s.project_id == project)
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(SecretListResponse {
        secrets: secrets.iter().map(|s| SecretView::new(s, None)).collect(),
        imports: Vec::new(),
    }))
}

/// GET /v3/secrets/raw/:name, metadata only
pub async fn retrieve_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(scope): Query<SecretScope>,
) -> ApiResult<Json<SecretResponse>> {
    let secret = run(&state, move |kms| {
        locate(kms, &name, &scope.environment, &scope.secret_path, scope.project())
    })
    .await?;
    Ok(Json(SecretResponse {
        secret: SecretView::new(&secret, None),
    }))
}

/// GET /v3/secrets/raw/:name/value
pub async fn retrieve_secret_value(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(scope): Query<SecretScope>,
) -> ApiResult<Json<SecretResponse>> {
    let (secret, value) = run(&state, move |kms| {
        let secret = locate(kms, &name, &scope.environment, &scope.secret_path, scope.project())?;
        let value = kms.secrets.open(&secret)?;
        Ok((secret, value))
    })
    .await?;
    Ok(Json(SecretResponse {
        secret: SecretView::new(&secret, Some(&value)),
    }))
}

/// POST /v3/secrets/raw/:name
pub async fn create_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(req): ApiJson<CreateSecretRequest>,
) -> ApiResult<(StatusCode, Json<SecretResponse>)> {
    let mut opts = options(req.environment, req.secret_path, req.workspace_id, req.secret_comment);
    opts.key_id = req.key_id.filter(|id| !id.is_empty());
    let value = req.secret_value;

    let secret = run(&state, move |kms| {
        kms.secrets.create_secret(&name, value.as_bytes(), opts)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(SecretResponse {
            secret: SecretView::new(&secret, None),
        }),
    ))
}

/// PATCH /v3/secrets/raw/:name
pub async fn update_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(req): ApiJson<UpdateSecretRequest>,
) -> ApiResult<Json<SecretResponse>> {
    let secret = run(&state, move |kms| {
        let existing = locate(kms, &name, &req.environment, &req.secret_path, &req.workspace_id)?;
        kms.secrets.update_secret(&existing.id, req.secret_value.as_bytes())
    })
    .await?;
    Ok(Json(SecretResponse {
        secret: SecretView::new(&secret, None),
    }))
}

/// DELETE /v3/secrets/raw/:name, answers with the deleted record
pub async fn delete_secret(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(scope): Query<SecretScope>,
) -> ApiResult<Json<SecretResponse>> {
    let secret = run(&state, move |kms| {
        let existing = locate(kms, &name, &scope.environment, &scope.secret_path, scope.project())?;
        kms.secrets.delete_secret(&existing.id)?;
        Ok(existing)
    })
    .await?;
    Ok(Json(SecretResponse {
        secret: SecretView::new(&secret, None),
    }))
}

/// POST /v3/secrets/batch/raw. Stops at the first failure; earlier entries stay created.
pub async fn batch_create(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BatchCreateRequest>,
) -> ApiResult<(StatusCode, Json<BatchCreateResponse>)> {
    let created = run(&state, move |kms| {
        let mut created = Vec::with_capacity(req.secrets.len());
        for entry in req.secrets {
            let opts = options(
                req.environment.clone(),
                req.secret_path.clone(),
                req.workspace_id.clone(),
                entry.secret_comment,
            );
            created.push(
                kms.secrets
                    .create_secret(&entry.secret_key, entry.secret_value.as_bytes(), opts)?,
            );
        }
        Ok(created)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(BatchCreateResponse {
            secrets: created.iter().map(|s| SecretView::new(s, None)).collect(),
        }),
    ))
}

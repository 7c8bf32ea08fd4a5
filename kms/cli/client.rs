// Thin HTTP client for talking to a running KMS server.

use anyhow::{Context, bail};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

pub struct KmsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl KmsClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// Sends one request and returns the JSON body. Non-2xx answers become errors
    /// carrying the server's message.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "kms request");

        let mut request = self.http.request(method, &url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("invalid response from {url}"))?;

        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("request failed");
            bail!("{message} ({status})");
        }
        Ok(body)
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        self.call(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.call(Method::POST, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        self.call(Method::DELETE, path, query, None).await
    }
}

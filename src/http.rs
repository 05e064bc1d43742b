use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::TokenStore;

/// Fixed per-request timeout. Requests exceeding this fail with a timeout
/// error; there is no retry and no queueing.
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Header carrying the active tenant id on tenant-scoped requests
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// The one configured request pipeline all API operations go through.
///
/// Every outgoing request picks up the stored bearer token and tenant id at
/// send time, so a token written by login or refresh is in effect on the very
/// next call. The underlying client keeps a cookie jar: the HTTP-only refresh
/// credential set by the server rides along on `/auth/refresh` without this
/// crate ever reading it.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: TokenStore,
}

impl ApiClient {
    pub fn new(config: &Config, store: TokenStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.api_url.clone(),
            store,
        }
    }

    /// The store this client reads credentials from
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.request(Method::GET, self.url(path))).await?;
        Self::decode(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .send(self.http.request(Method::POST, self.url(path)).json(body))
            .await?;
        Self::decode(response).await
    }

    /// POST with no request body and no interesting response body
    pub async fn post_empty(&self, path: &str) -> Result<()> {
        self.send(self.http.request(Method::POST, self.url(path)))
            .await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Attach credentials, send, and normalize non-2xx responses into
    /// [`Error::Api`] with the status and payload still inspectable.
    async fn send(&self, mut builder: RequestBuilder) -> Result<Response> {
        if let Some(token) = self.store.access_token().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(tenant_id) = self.store.tenant_id().await {
            builder = builder.header(TENANT_HEADER, tenant_id);
        }

        let response = builder.send().await?;
        let status = response.status();
        trace!(status = %status, "API response received");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let payload: Option<Value> = serde_json::from_str(&body).ok();
        let message = match &payload {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None if !body.is_empty() => body.clone(),
            None => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };

        debug!(status = %status, message = %message, "API request rejected");
        Err(Error::Api {
            status,
            message,
            payload,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| Error::InvalidResponse {
            reason: e.to_string(),
        })
    }
}

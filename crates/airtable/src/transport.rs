//! The raw request/response seam between the token manager and the network.
//!
//! Kept as a trait so the manager's refresh/retry behavior is testable with
//! a hand-rolled fake; the reqwest implementation is the only one used in
//! production.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

/// One outbound provider request: method, absolute URL, optional JSON body.
/// The bearer token is attached by the caller ([`crate::TokenManager`]), not
/// carried here.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Issue the request with the given bearer token.
    ///
    /// A 401 surfaces as [`ApiError::Unauthorized`], distinct from every
    /// other non-success status, so the manager can decide to refresh.
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn execute(&self, request: &ApiRequest, bearer: &str) -> Result<ApiResponse, ApiError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Patch => self.client.patch(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.as_u16() == 401 {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

//! The OAuth token endpoint: refresh-token exchanges for the lifecycle
//! manager and authorization-code exchanges for the login flow.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use airform_config::OauthConfig;

use crate::ApiError;

/// The two grants this system ever sends to the token endpoint.
#[derive(Debug, Clone)]
pub enum GrantRequest {
    RefreshToken {
        refresh_token: String,
    },
    AuthorizationCode {
        code: String,
        code_verifier: String,
        redirect_uri: String,
    },
}

impl GrantRequest {
    fn form_params(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::RefreshToken { refresh_token } => vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            Self::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
            } => vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("redirect_uri", redirect_uri),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// The provider rotates refresh tokens only sometimes; absent means
    /// "keep using the current one".
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, grant: &GrantRequest) -> Result<TokenResponse, ApiError>;
}

/// reqwest-backed token endpoint: urlencoded POST with Basic client
/// credentials, per the provider's OAuth contract.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
    basic_credentials: String,
}

impl HttpTokenEndpoint {
    pub fn new(oauth: &OauthConfig) -> Self {
        let basic_credentials =
            STANDARD.encode(format!("{}:{}", oauth.client_id, oauth.client_secret));
        Self {
            client: reqwest::Client::new(),
            token_url: oauth.token_url.clone(),
            basic_credentials,
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(&self, grant: &GrantRequest) -> Result<TokenResponse, ApiError> {
        let response = self
            .client
            .post(&self.token_url)
            .header("Authorization", format!("Basic {}", self.basic_credentials))
            .form(&grant.form_params())
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let detail = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("no error detail")
                .to_string();
            return Err(ApiError::TokenExchange(format!("{status}: {detail}")));
        }

        serde_json::from_value(body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

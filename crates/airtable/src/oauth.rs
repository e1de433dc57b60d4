//! Authorization-code-with-PKCE login flow.
//!
//! The HTTP layer that actually redirects the user is out of scope; this
//! module produces the authorization URL (plus the state and verifier the
//! caller must hold onto) and turns the callback code into a persisted
//! [`Credential`].

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;
use url::Url;

use airform_config::OauthConfig;
use airform_core::{Credential, UserId};
use airform_store::{CredentialStore, StoreError};

use crate::token::{GrantRequest, TokenEndpoint};
use crate::transport::{ApiRequest, ProviderTransport};
use crate::ApiError;

/// Everything the caller needs to start a login: the URL to send the user
/// to, and the state/verifier pair to stash until the callback returns.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Subset of the provider's `whoami` payload the credential records
/// explicitly; the full payload is kept as a snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoamiProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// S256 code challenge: base64url(sha256(verifier)), no padding.
fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[derive(Clone)]
pub struct OauthFlow {
    oauth: OauthConfig,
    api_base_url: String,
    endpoint: Arc<dyn TokenEndpoint>,
    transport: Arc<dyn ProviderTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl OauthFlow {
    pub fn new(
        oauth: OauthConfig,
        api_base_url: impl Into<String>,
        endpoint: Arc<dyn TokenEndpoint>,
        transport: Arc<dyn ProviderTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            oauth,
            api_base_url: api_base_url.into(),
            endpoint,
            transport,
            credentials,
        }
    }

    /// Build the authorization URL with a fresh state and PKCE verifier.
    pub fn begin_authorization(&self) -> Result<AuthorizationRequest, ApiError> {
        let state = random_token(16);
        let code_verifier = random_token(32);
        let challenge = pkce_challenge(&code_verifier);

        let url = Url::parse_with_params(
            &self.oauth.authorize_url,
            &[
                ("client_id", self.oauth.client_id.as_str()),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
                ("response_type", "code"),
                ("state", state.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("scope", self.oauth.scopes.join(" ").as_str()),
            ],
        )
        .map_err(|e| ApiError::Malformed(format!("authorize url: {e}")))?;

        Ok(AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier,
        })
    }

    /// Exchange the callback code, fetch the user's provider profile, and
    /// persist the resulting credential (updating an existing one in place).
    pub async fn complete_authorization(
        &self,
        user_id: UserId,
        code: &str,
        code_verifier: &str,
    ) -> Result<Credential, ApiError> {
        let grant = GrantRequest::AuthorizationCode {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            redirect_uri: self.oauth.redirect_uri.clone(),
        };
        let tokens = self.endpoint.exchange(&grant).await?;

        let whoami = self
            .transport
            .execute(
                &ApiRequest::get(format!("{}/v0/meta/whoami", self.api_base_url)),
                &tokens.access_token,
            )
            .await?;
        let profile: WhoamiProfile = serde_json::from_value(whoami.body.clone())
            .map_err(|e| ApiError::Malformed(format!("whoami payload: {e}")))?;

        let now = Utc::now();
        let mut credential = match self.credentials.find_credential(&user_id).await {
            Ok(existing) => existing,
            Err(StoreError::NotFound) => Credential {
                user_id,
                airtable_user_id: profile.id.clone(),
                email: None,
                display_name: None,
                access_token: String::new(),
                refresh_token: String::new(),
                token_expiry: now,
                airtable_profile: serde_json::Value::Null,
                created_at: now,
                last_active_at: now,
            },
            Err(other) => return Err(other.into()),
        };

        credential.airtable_user_id = profile.id.clone();
        if profile.email.is_some() {
            credential.email = profile.email.clone();
        }
        if profile.name.is_some() {
            credential.display_name = profile.name.clone();
        }
        credential.airtable_profile = whoami.body;
        credential.apply_tokens(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            now,
        );

        self.credentials.save_credential(&credential).await?;
        info!(%user_id, airtable_user = %profile.id, "completed provider authorization");
        Ok(credential)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

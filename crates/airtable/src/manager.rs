//! The token lifecycle manager.
//!
//! Guarantees a caller always holds a currently-valid access token:
//! refreshes silently on expiry, persists the rotated credential before
//! returning, and retries an outbound call exactly once when the provider
//! rejects a token believed fresh (clock skew, server-side revocation).
//! Refresh exchanges are serialized per credential so concurrent callers
//! cannot invalidate each other's refresh token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use airform_core::{Credential, UserId};
use airform_store::CredentialStore;

use crate::token::{GrantRequest, TokenEndpoint};
use crate::transport::{ApiRequest, ApiResponse, ProviderTransport};
use crate::ApiError;

#[derive(Clone)]
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    transport: Arc<dyn ProviderTransport>,
    credentials: Arc<dyn CredentialStore>,
    /// Per-credential refresh locks, created lazily and never dropped. The
    /// outer mutex only guards the map.
    locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl TokenManager {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        transport: Arc<dyn ProviderTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            credentials,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(*user_id).or_default().clone()
    }

    /// Return a credential whose access token is currently valid, refreshing
    /// and persisting first when the stored one has expired.
    ///
    /// The expiry check before taking the per-credential lock lets readers of
    /// a live token proceed without contention; the loser of a concurrent
    /// refresh re-reads under the lock and finds the winner's fresh token.
    pub async fn ensure_fresh(&self, user_id: &UserId) -> Result<Credential, ApiError> {
        let credential = self.credentials.find_credential(user_id).await?;
        if !credential.is_expired(Utc::now()) {
            return Ok(credential);
        }

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let credential = self.credentials.find_credential(user_id).await?;
        if !credential.is_expired(Utc::now()) {
            debug!(%user_id, "token already refreshed by a concurrent caller");
            return Ok(credential);
        }
        self.refresh_locked(credential).await
    }

    /// Refresh even though the stored expiry claims the token is live, used
    /// after the provider rejected it anyway. `stale_token` guards against
    /// a concurrent caller having already rotated it.
    async fn force_refresh(
        &self,
        user_id: &UserId,
        stale_token: &str,
    ) -> Result<Credential, ApiError> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let credential = self.credentials.find_credential(user_id).await?;
        if credential.access_token != stale_token {
            debug!(%user_id, "token already rotated; skipping forced refresh");
            return Ok(credential);
        }
        self.refresh_locked(credential).await
    }

    /// Caller must hold the per-credential lock.
    async fn refresh_locked(&self, mut credential: Credential) -> Result<Credential, ApiError> {
        let grant = GrantRequest::RefreshToken {
            refresh_token: credential.refresh_token.clone(),
        };
        let tokens = self.endpoint.exchange(&grant).await?;
        credential.apply_tokens(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            Utc::now(),
        );
        self.credentials.save_credential(&credential).await?;
        info!(user_id = %credential.user_id, "refreshed provider access token");
        Ok(credential)
    }

    /// Issue an authenticated provider request on behalf of `user_id`.
    ///
    /// On a 401 despite a believed-fresh token, performs exactly one
    /// refresh-and-retry cycle; a second 401 is fatal to this call. No
    /// further automatic retries — hammering the token endpoint on a
    /// persistently revoked grant is explicitly disallowed.
    pub async fn call(
        &self,
        user_id: &UserId,
        request: &ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        let credential = self.ensure_fresh(user_id).await?;

        match self.transport.execute(request, &credential.access_token).await {
            Err(ApiError::Unauthorized) => {
                warn!(%user_id, url = %request.url, "provider rejected a fresh token; refreshing once");
                let credential = self.force_refresh(user_id, &credential.access_token).await?;
                match self.transport.execute(request, &credential.access_token).await {
                    Err(ApiError::Unauthorized) => Err(ApiError::AuthExhausted(format!(
                        "provider rejected refreshed token for {user_id}"
                    ))),
                    other => other,
                }
            }
            other => other,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

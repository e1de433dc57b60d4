//! Provider-side plumbing: the OAuth token lifecycle manager, the PKCE login
//! flow, and the HTTP operations the rest of the system issues against the
//! provider. Every outbound call routes through [`TokenManager::call`], so
//! every call inherits silent refresh and the single retry-on-401.

pub mod api;
pub mod manager;
pub mod oauth;
pub mod token;
pub mod transport;

pub use api::{AirtableApi, AirtableClient, BaseInfo, CreatedRecord, FieldSchema, TableSchema};
pub use manager::TokenManager;
pub use oauth::{AuthorizationRequest, OauthFlow, WhoamiProfile};
pub use token::{GrantRequest, HttpTokenEndpoint, TokenEndpoint, TokenResponse};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, ProviderTransport};

use airform_store::StoreError;

/// Failure taxonomy for outbound provider traffic.
///
/// `Unauthorized` is the transport-level 401 the manager may still recover
/// from; `AuthExhausted` means the one refresh-and-retry cycle is spent and
/// the call is fatally unauthenticated.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("authentication failed after token refresh: {0}")]
    AuthExhausted(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected provider response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

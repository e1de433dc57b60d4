use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── OAuth client configuration ───────────────────────────────────────────────

/// Credentials and endpoints for the provider's OAuth integration.
///
/// `client_id`, `client_secret` and `redirect_uri` have no sensible defaults;
/// they come from the config file or the `AIRTABLE_CLIENT_ID` /
/// `AIRTABLE_CLIENT_SECRET` / `AIRTABLE_REDIRECT_URI` environment variables
/// (env wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    /// OAuth scopes requested at login.
    pub scopes: Vec<String>,
}

impl Default for OauthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            authorize_url: "https://airtable.com/oauth2/v1/authorize".to_string(),
            token_url: "https://airtable.com/oauth2/v1/token".to_string(),
            scopes: vec![
                "data.records:read".to_string(),
                "data.records:write".to_string(),
                "schema.bases:read".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the provider's REST API.
    pub base_url: String,
    /// Request timeout in seconds for outbound provider calls.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.airtable.com".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub oauth: OauthConfig,
    pub api: ApiConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        for (var, slot) in [
            ("AIRTABLE_CLIENT_ID", &mut config.oauth.client_id),
            ("AIRTABLE_CLIENT_SECRET", &mut config.oauth.client_secret),
            ("AIRTABLE_REDIRECT_URI", &mut config.oauth.redirect_uri),
        ] {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    *slot = value;
                }
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// True when everything needed to run the OAuth flow is present.
    pub fn oauth_ready(&self) -> bool {
        !self.oauth.client_id.is_empty()
            && !self.oauth.client_secret.is_empty()
            && !self.oauth.redirect_uri.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_point_at_provider_endpoints() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.oauth.authorize_url, "https://airtable.com/oauth2/v1/authorize");
        assert_eq!(cfg.oauth.token_url, "https://airtable.com/oauth2/v1/token");
        assert_eq!(cfg.api.base_url, "https://api.airtable.com");
        assert_eq!(cfg.oauth.scopes.len(), 3);
        assert!(!cfg.oauth_ready());
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.telemetry.log_level, "info");
        assert_eq!(cfg.api.timeout_secs, 15);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("airform.toml");
        fs::write(
            &path,
            r#"
[oauth]
client_id = "cid"
client_secret = "secret"
redirect_uri = "https://example.com/callback"

[api]
timeout_secs = 30
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.oauth.client_id, "cid");
        assert!(cfg.oauth_ready());
        assert_eq!(cfg.api.timeout_secs, 30);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.oauth.token_url, "https://airtable.com/oauth2/v1/token");
    }

    #[test]
    fn save_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/airform.toml");
        let mut cfg = AppConfig::default();
        cfg.oauth.client_id = "cid".to_string();
        cfg.save_to(&path).unwrap();

        let back = AppConfig::load_from(&path).unwrap();
        assert_eq!(back.oauth.client_id, "cid");
    }
}

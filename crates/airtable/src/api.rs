//! Typed provider operations. Everything routes through
//! [`TokenManager::call`], so each operation inherits silent refresh and the
//! single retry-on-401.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use airform_core::{AnswerMap, FieldType, UserId};

use crate::manager::TokenManager;
use crate::transport::ApiRequest;
use crate::ApiError;

/// The provider record created by a submission write.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRecord {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Columns a form can bind: only the supported field types survive.
    pub fn supported_fields(&self) -> Vec<&FieldSchema> {
        self.fields
            .iter()
            .filter(|f| FieldType::is_supported(&f.field_type))
            .collect()
    }
}

/// The provider operations the engines depend on, kept as a trait so the
/// submission path is testable without a network.
#[async_trait]
pub trait AirtableApi: Send + Sync {
    /// Write one record into the table behind a form. `fields` is keyed by
    /// provider field id (the output of the answer pipeline's projection).
    async fn create_record(
        &self,
        user_id: &UserId,
        base_id: &str,
        table_id: &str,
        fields: &AnswerMap,
    ) -> Result<CreatedRecord, ApiError>;

    async fn list_bases(&self, user_id: &UserId) -> Result<Vec<BaseInfo>, ApiError>;

    async fn list_tables(
        &self,
        user_id: &UserId,
        base_id: &str,
    ) -> Result<Vec<TableSchema>, ApiError>;
}

#[derive(Clone)]
pub struct AirtableClient {
    manager: TokenManager,
    base_url: String,
}

impl AirtableClient {
    pub fn new(manager: TokenManager, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            manager,
        }
    }
}

#[async_trait]
impl AirtableApi for AirtableClient {
    async fn create_record(
        &self,
        user_id: &UserId,
        base_id: &str,
        table_id: &str,
        fields: &AnswerMap,
    ) -> Result<CreatedRecord, ApiError> {
        let request = ApiRequest::post(
            format!("{}/v0/{base_id}/{table_id}", self.base_url),
            json!({ "fields": fields }),
        );
        let response = self.manager.call(user_id, &request).await?;
        serde_json::from_value(response.body)
            .map_err(|e| ApiError::Malformed(format!("create record payload: {e}")))
    }

    async fn list_bases(&self, user_id: &UserId) -> Result<Vec<BaseInfo>, ApiError> {
        let request = ApiRequest::get(format!("{}/v0/meta/bases", self.base_url));
        let response = self.manager.call(user_id, &request).await?;
        let bases = response
            .body
            .get("bases")
            .cloned()
            .ok_or_else(|| ApiError::Malformed("missing bases list".to_string()))?;
        serde_json::from_value(bases).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn list_tables(
        &self,
        user_id: &UserId,
        base_id: &str,
    ) -> Result<Vec<TableSchema>, ApiError> {
        let request = ApiRequest::get(format!("{}/v0/meta/bases/{base_id}/tables", self.base_url));
        let response = self.manager.call(user_id, &request).await?;
        let tables = response
            .body
            .get("tables")
            .cloned()
            .ok_or_else(|| ApiError::Malformed("missing tables list".to_string()))?;
        serde_json::from_value(tables).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::Value;
    use tokio::sync::Mutex;

    use airform_core::Credential;
    use airform_store::{CredentialStore, MemoryStore};

    use crate::token::{GrantRequest, TokenEndpoint, TokenResponse};
    use crate::transport::{ApiResponse, Method, ProviderTransport};

    struct NoRefresh;

    #[async_trait]
    impl TokenEndpoint for NoRefresh {
        async fn exchange(&self, _grant: &GrantRequest) -> Result<TokenResponse, ApiError> {
            panic!("fresh credential must not hit the token endpoint");
        }
    }

    /// Records every request and plays back canned responses.
    struct ScriptedTransport {
        seen: Mutex<Vec<ApiRequest>>,
        response: Value,
    }

    #[async_trait]
    impl ProviderTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: &ApiRequest,
            bearer: &str,
        ) -> Result<ApiResponse, ApiError> {
            assert_eq!(bearer, "access-0");
            self.seen.lock().await.push(request.clone());
            Ok(ApiResponse {
                status: 200,
                body: self.response.clone(),
            })
        }
    }

    async fn client(store: &MemoryStore, response: Value) -> (AirtableClient, Arc<ScriptedTransport>, UserId) {
        let user_id = UserId::new();
        let now = Utc::now();
        store
            .save_credential(&Credential {
                user_id,
                airtable_user_id: "usrX".to_string(),
                email: None,
                display_name: None,
                access_token: "access-0".to_string(),
                refresh_token: "refresh-0".to_string(),
                token_expiry: now + chrono::Duration::hours(1),
                airtable_profile: Value::Null,
                created_at: now,
                last_active_at: now,
            })
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport {
            seen: Mutex::new(Vec::new()),
            response,
        });
        let manager = TokenManager::new(
            Arc::new(NoRefresh),
            transport.clone(),
            Arc::new(store.clone()),
        );
        (
            AirtableClient::new(manager, "https://api.airtable.com/"),
            transport,
            user_id,
        )
    }

    #[tokio::test]
    async fn create_record_posts_projected_fields() {
        let store = MemoryStore::new();
        let (client, transport, user) = client(&store, json!({"id": "recNew"})).await;

        let mut fields = AnswerMap::new();
        fields.insert("fld1".to_string(), json!("hello"));
        let created = client
            .create_record(&user, "app1", "tbl1", &fields)
            .await
            .unwrap();
        assert_eq!(created.id, "recNew");

        let seen = transport.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, Method::Post);
        assert_eq!(seen[0].url, "https://api.airtable.com/v0/app1/tbl1");
        assert_eq!(
            seen[0].body.as_ref().unwrap()["fields"]["fld1"],
            json!("hello")
        );
    }

    #[tokio::test]
    async fn list_tables_parses_schema() {
        let store = MemoryStore::new();
        let (client, _transport, user) = client(
            &store,
            json!({"tables": [{
                "id": "tbl1",
                "name": "Orders",
                "fields": [
                    {"id": "fld1", "name": "Name", "type": "singleLineText"},
                    {"id": "fld2", "name": "Total", "type": "number"},
                    {"id": "fld3", "name": "Status", "type": "singleSelect"}
                ]
            }]}),
        )
        .await;

        let tables = client.list_tables(&user, "app1").await.unwrap();
        assert_eq!(tables.len(), 1);

        // Unsupported column types are filtered out of the bindable set.
        let supported: Vec<_> = tables[0]
            .supported_fields()
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(supported, vec!["fld1", "fld3"]);
    }

    #[tokio::test]
    async fn list_bases_requires_bases_key() {
        let store = MemoryStore::new();
        let (client, _transport, user) = client(&store, json!({"unexpected": []})).await;
        let err = client.list_bases(&user).await.unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }
}

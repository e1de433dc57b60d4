use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use airform_core::{Credential, Form, FormId, FormResponse, ResponseId, UserId};

use crate::{CredentialStore, FormStore, ResponseStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    forms: HashMap<FormId, Form>,
    /// Insertion order of forms, so `find_forms_by_table` is deterministic.
    form_order: Vec<FormId>,
    responses: HashMap<ResponseId, FormResponse>,
    response_order: Vec<ResponseId>,
    /// Uniqueness index on the external record id.
    by_record_id: HashMap<String, ResponseId>,
    credentials: HashMap<UserId, Credential>,
}

/// In-memory implementation of all three store traits behind one handle.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored responses, tombstoned included. Test helper.
    pub async fn response_count(&self) -> usize {
        self.inner.read().await.responses.len()
    }
}

#[async_trait]
impl FormStore for MemoryStore {
    async fn find_form(&self, id: &FormId) -> StoreResult<Form> {
        self.inner
            .read()
            .await
            .forms
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_forms_by_table(&self, table_id: &str) -> StoreResult<Vec<Form>> {
        let inner = self.inner.read().await;
        Ok(inner
            .form_order
            .iter()
            .filter_map(|id| inner.forms.get(id))
            .filter(|form| form.connected_table_id == table_id)
            .cloned()
            .collect())
    }

    async fn save_form(&self, form: &Form) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.forms.contains_key(&form.id) {
            inner.form_order.push(form.id);
        }
        inner.forms.insert(form.id, form.clone());
        Ok(())
    }

    async fn record_submission(&self, id: &FormId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let form = inner.forms.get_mut(id).ok_or(StoreError::NotFound)?;
        form.submission_count += 1;
        Ok(())
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn find_by_record_id(&self, airtable_record_id: &str) -> StoreResult<FormResponse> {
        let inner = self.inner.read().await;
        inner
            .by_record_id
            .get(airtable_record_id)
            .and_then(|id| inner.responses.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save_response(&self, response: &FormResponse) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.by_record_id.contains_key(&response.airtable_record_id) {
            return Err(StoreError::Conflict(format!(
                "response for record {} already exists",
                response.airtable_record_id
            )));
        }
        inner
            .by_record_id
            .insert(response.airtable_record_id.clone(), response.id);
        inner.response_order.push(response.id);
        inner.responses.insert(response.id, response.clone());
        Ok(())
    }

    async fn update_response(&self, response: &FormResponse) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.responses.contains_key(&response.id) {
            return Err(StoreError::NotFound);
        }
        inner.responses.insert(response.id, response.clone());
        Ok(())
    }

    async fn tombstone_matching(&self, airtable_record_id: &str) -> StoreResult<usize> {
        let mut inner = self.inner.write().await;
        let mut updated = 0;
        for response in inner.responses.values_mut() {
            if response.airtable_record_id == airtable_record_id {
                response.mark_deleted();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_active(&self, form_id: &FormId) -> StoreResult<Vec<FormResponse>> {
        let inner = self.inner.read().await;
        let mut active: Vec<FormResponse> = inner
            .response_order
            .iter()
            .filter_map(|id| inner.responses.get(id))
            .filter(|r| r.parent_form == *form_id && !r.is_deleted_in_airtable)
            .cloned()
            .collect();
        active.reverse(); // newest first
        Ok(active)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_credential(&self, user_id: &UserId) -> StoreResult<Credential> {
        self.inner
            .read()
            .await
            .credentials
            .get(user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn save_credential(&self, credential: &Credential) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .credentials
            .insert(credential.user_id, credential.clone());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

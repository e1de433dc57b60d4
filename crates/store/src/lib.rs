//! Persistence collaborator traits and an in-memory implementation.
//!
//! The engine crates depend only on these traits; a real deployment plugs in
//! whatever document store it likes. [`MemoryStore`] backs every test and is
//! usable as-is by single-process embedders.

pub mod memory;

use async_trait::async_trait;

use airform_core::{Credential, Form, FormId, FormResponse, UserId};

pub use memory::MemoryStore;

/// Storage failures the engine must tell apart: a missing row is routine, a
/// uniqueness conflict drives the reconciliation fallbacks, and anything else
/// is a backend fault.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    /// A uniqueness constraint (the external record id) was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait FormStore: Send + Sync {
    async fn find_form(&self, id: &FormId) -> StoreResult<Form>;

    /// Every form bound to one external table, in creation order. A table
    /// may be shared by several forms.
    async fn find_forms_by_table(&self, table_id: &str) -> StoreResult<Vec<Form>>;

    async fn save_form(&self, form: &Form) -> StoreResult<()>;

    /// Bump the form's submission counter after a successful submission.
    async fn record_submission(&self, id: &FormId) -> StoreResult<()>;
}

#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn find_by_record_id(&self, airtable_record_id: &str) -> StoreResult<FormResponse>;

    /// Insert a new response. Fails with [`StoreError::Conflict`] when a
    /// response with the same external record id already exists.
    async fn save_response(&self, response: &FormResponse) -> StoreResult<()>;

    /// Overwrite an existing response (matched by local id).
    async fn update_response(&self, response: &FormResponse) -> StoreResult<()>;

    /// Tombstone every response carrying this external record id; returns
    /// how many were updated. Defined as a bulk update to stay resilient to
    /// duplicates even though at most one match is expected.
    async fn tombstone_matching(&self, airtable_record_id: &str) -> StoreResult<usize>;

    /// Non-tombstoned responses for a form, newest first.
    async fn list_active(&self, form_id: &FormId) -> StoreResult<Vec<FormResponse>>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(&self, user_id: &UserId) -> StoreResult<Credential>;
    async fn save_credential(&self, credential: &Credential) -> StoreResult<()>;
}

//! The outbound half of the sync loop: validate a submission, write it to
//! the provider under the form owner's credential, then mirror it locally.
//!
//! The external write comes first; a failed write persists nothing, and a
//! failed validation never reaches the provider at all.

use std::sync::Arc;

use tracing::{info, warn};

use airform_airtable::{AirtableApi, ApiError};
use airform_core::{
    live_answers, project_answers, validate_answers, AnswerMap, FormId, FormResponse,
    ValidationError,
};
use airform_store::{FormStore, ResponseStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("form not found")]
    FormNotFound,
    #[error("form is not accepting submissions")]
    FormInactive,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum SubmissionOutcome {
    /// The provider write succeeded and the response is stored locally.
    Accepted(FormResponse),
    /// User-correctable problems; nothing was written anywhere.
    Invalid(Vec<ValidationError>),
}

#[derive(Clone)]
pub struct SubmissionService {
    forms: Arc<dyn FormStore>,
    responses: Arc<dyn ResponseStore>,
    api: Arc<dyn AirtableApi>,
}

impl SubmissionService {
    pub fn new(
        forms: Arc<dyn FormStore>,
        responses: Arc<dyn ResponseStore>,
        api: Arc<dyn AirtableApi>,
    ) -> Self {
        Self {
            forms,
            responses,
            api,
        }
    }

    pub async fn submit(
        &self,
        form_id: &FormId,
        answers: &AnswerMap,
    ) -> Result<SubmissionOutcome, SubmitError> {
        let form = match self.forms.find_form(form_id).await {
            Ok(form) => form,
            Err(StoreError::NotFound) => return Err(SubmitError::FormNotFound),
            Err(err) => return Err(err.into()),
        };
        if !form.is_active {
            return Err(SubmitError::FormInactive);
        }

        let errors = validate_answers(&form, answers);
        if !errors.is_empty() {
            return Ok(SubmissionOutcome::Invalid(errors));
        }

        let fields = project_answers(&form, answers);
        let created = self
            .api
            .create_record(
                &form.form_owner,
                &form.connected_base_id,
                &form.connected_table_id,
                &fields,
            )
            .await?;

        // Locally mirror exactly what went outbound: the live answers,
        // keyed by field key.
        let response = FormResponse::new(
            form.id,
            created.id.clone(),
            live_answers(&form, answers),
            "web_form",
        );
        self.responses.save_response(&response).await?;
        if let Err(err) = self.forms.record_submission(&form.id).await {
            // The response itself is safe; losing a counter bump is not
            // worth failing the submission over.
            warn!(form_id = %form.id, %err, "failed to bump submission counter");
        }

        info!(form_id = %form.id, record_id = %created.id, "submission synced to provider");
        Ok(SubmissionOutcome::Accepted(response))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use airform_airtable::{BaseInfo, CreatedRecord, TableSchema};
    use airform_core::{
        ComparisonType, Condition, FieldType, Form, FormField, RuleOperator, UserId,
        VisibilityRule,
    };
    use airform_store::MemoryStore;

    struct FakeApi {
        writes: Mutex<Vec<AnswerMap>>,
        fail_with: Option<fn() -> ApiError>,
        sequence: AtomicUsize,
    }

    impl FakeApi {
        fn ok() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail_with: None,
                sequence: AtomicUsize::new(0),
            }
        }

        fn failing(fail_with: fn() -> ApiError) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                fail_with: Some(fail_with),
                sequence: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AirtableApi for FakeApi {
        async fn create_record(
            &self,
            _user_id: &UserId,
            _base_id: &str,
            _table_id: &str,
            fields: &AnswerMap,
        ) -> Result<CreatedRecord, ApiError> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            self.writes.lock().await.push(fields.clone());
            let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CreatedRecord {
                id: format!("rec{n}"),
            })
        }

        async fn list_bases(&self, _user_id: &UserId) -> Result<Vec<BaseInfo>, ApiError> {
            unimplemented!("not used by submissions")
        }

        async fn list_tables(
            &self,
            _user_id: &UserId,
            _base_id: &str,
        ) -> Result<Vec<TableSchema>, ApiError> {
            unimplemented!("not used by submissions")
        }
    }

    fn answers(pairs: &[(&str, Value)]) -> AnswerMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// q1 singleSelect yes/no required; q2 text required, shown iff q1 == "yes".
    fn branching_form() -> Form {
        Form::new(
            "Branching",
            UserId::new(),
            "app1",
            "tbl1",
            vec![
                FormField {
                    field_key: "q1".to_string(),
                    airtable_field_id: "fld_q1".to_string(),
                    display_label: "Q1".to_string(),
                    field_type: FieldType::SingleSelect,
                    is_required: true,
                    select_options: vec!["yes".to_string(), "no".to_string()],
                    visibility_rules: None,
                    field_order: 0,
                },
                FormField {
                    field_key: "q2".to_string(),
                    airtable_field_id: "fld_q2".to_string(),
                    display_label: "Q2".to_string(),
                    field_type: FieldType::SingleLineText,
                    is_required: true,
                    select_options: Vec::new(),
                    visibility_rules: Some(VisibilityRule {
                        operator: RuleOperator::And,
                        conditions: vec![Condition {
                            field_key: "q1".to_string(),
                            comparison_type: ComparisonType::IsEqual,
                            expected_value: json!("yes"),
                        }],
                    }),
                    field_order: 1,
                },
            ],
        )
    }

    async fn service(store: &MemoryStore, api: Arc<FakeApi>) -> (SubmissionService, Form) {
        let form = branching_form();
        store.save_form(&form).await.unwrap();
        let service = SubmissionService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            api,
        );
        (service, form)
    }

    #[tokio::test]
    async fn valid_submission_writes_then_persists() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::ok());
        let (service, form) = service(&store, api.clone()).await;

        let outcome = service
            .submit(&form.id, &answers(&[("q1", json!("yes")), ("q2", json!("hello"))]))
            .await
            .unwrap();
        let SubmissionOutcome::Accepted(response) = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(response.airtable_record_id, "rec1");
        assert_eq!(response.field_responses["q2"], json!("hello"));

        let writes = api.writes.lock().await;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0]["fld_q1"], json!("yes"));
        assert_eq!(writes[0]["fld_q2"], json!("hello"));

        let stored = store.find_by_record_id("rec1").await.unwrap();
        assert_eq!(stored.submission_source, "web_form");
        assert_eq!(store.find_form(&form.id).await.unwrap().submission_count, 1);
    }

    #[tokio::test]
    async fn hidden_branch_is_neither_required_nor_written() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::ok());
        let (service, form) = service(&store, api.clone()).await;

        // q2 is hidden for q1 == "no": no validation error, and a stale q2
        // value neither reaches the provider nor the local mirror.
        let outcome = service
            .submit(&form.id, &answers(&[("q1", json!("no")), ("q2", json!("stale"))]))
            .await
            .unwrap();
        let SubmissionOutcome::Accepted(response) = outcome else {
            panic!("expected acceptance");
        };
        assert!(!response.field_responses.contains_key("q2"));

        let writes = api.writes.lock().await;
        assert_eq!(writes[0].len(), 1);
        assert!(!writes[0].contains_key("fld_q2"));
    }

    #[tokio::test]
    async fn invalid_submission_persists_nothing() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::ok());
        let (service, form) = service(&store, api.clone()).await;

        let outcome = service
            .submit(&form.id, &answers(&[("q1", json!("yes"))]))
            .await
            .unwrap();
        let SubmissionOutcome::Invalid(errors) = outcome else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field_key, "q2");

        assert!(api.writes.lock().await.is_empty());
        assert_eq!(store.response_count().await, 0);
        assert_eq!(store.find_form(&form.id).await.unwrap().submission_count, 0);
    }

    #[tokio::test]
    async fn failed_provider_write_persists_nothing() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::failing(|| ApiError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }));
        let (service, form) = service(&store, api).await;

        let err = service
            .submit(&form.id, &answers(&[("q1", json!("no"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Api(ApiError::Status { status: 503, .. })));
        assert_eq!(store.response_count().await, 0);
    }

    #[tokio::test]
    async fn auth_exhaustion_surfaces_to_the_caller() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::failing(|| {
            ApiError::AuthExhausted("revoked".to_string())
        }));
        let (service, form) = service(&store, api).await;

        let err = service
            .submit(&form.id, &answers(&[("q1", json!("no"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Api(ApiError::AuthExhausted(_))));
    }

    #[tokio::test]
    async fn inactive_form_rejects_submissions() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::ok());
        let (service, mut form) = service(&store, api).await;
        form.is_active = false;
        store.save_form(&form).await.unwrap();

        let err = service
            .submit(&form.id, &answers(&[("q1", json!("no"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::FormInactive));
    }

    #[tokio::test]
    async fn unknown_form_is_not_found() {
        let store = MemoryStore::new();
        let api = Arc::new(FakeApi::ok());
        let (service, _form) = service(&store, api).await;

        let err = service
            .submit(&FormId::new(), &AnswerMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::FormNotFound));
    }
}

//! The webhook reconciliation engine.
//!
//! Applies a provider change-notification batch to the locally stored
//! responses, idempotently: replaying a batch, or racing a concurrent
//! delivery, never duplicates or loses a record. Per-record failures are
//! accumulated into the report instead of aborting the batch, so the
//! provider acknowledgment can stay success-shaped and redelivery storms
//! are avoided.

use std::sync::Arc;

use tracing::{debug, warn};

use airform_core::{AnswerMap, Form, FormResponse};
use airform_store::{FormStore, ResponseStore, StoreError};

use crate::webhook::{
    ChangedRecordPayload, CreatedRecordPayload, TableChanges, WebhookNotification,
};

/// One record the engine could not apply. Scoped to the record: the rest of
/// the batch is unaffected.
#[derive(Debug, Clone)]
pub struct RecordFailure {
    pub table_id: String,
    pub record_id: String,
    pub reason: String,
}

/// Outcome of one batch. Always produced for a well-formed batch, whatever
/// happened to individual records.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub tombstoned: usize,
    /// Idempotent no-ops: replayed creates, changes for unknown records,
    /// destroys with nothing left to tombstone.
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    fn fail(&mut self, table_id: &str, record_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(table_id, record_id, %reason, "webhook record not applied");
        self.failures.push(RecordFailure {
            table_id: table_id.to_string(),
            record_id: record_id.to_string(),
            reason,
        });
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    forms: Arc<dyn FormStore>,
    responses: Arc<dyn ResponseStore>,
}

impl ReconciliationEngine {
    pub fn new(forms: Arc<dyn FormStore>, responses: Arc<dyn ResponseStore>) -> Self {
        Self { forms, responses }
    }

    /// Apply one notification batch. Within each table, created records are
    /// reconciled before changed records, which precede destroyed ids; a
    /// record must exist before it can be changed or tombstoned. Across
    /// batches the idempotency rules make ordering irrelevant.
    pub async fn apply(&self, notification: &WebhookNotification) -> BatchReport {
        let mut report = BatchReport::default();

        for (table_id, changes) in &notification.webhook.changed_tables_by_id {
            self.apply_table(table_id, changes, &mut report).await;
        }

        report
    }

    async fn apply_table(&self, table_id: &str, changes: &TableChanges, report: &mut BatchReport) {
        for (record_id, payload) in &changes.created_records_by_id {
            self.apply_created(table_id, record_id, payload, report).await;
        }
        for (record_id, payload) in &changes.changed_records_by_id {
            self.apply_changed(table_id, record_id, payload, report).await;
        }
        for record_id in &changes.destroyed_record_ids {
            self.apply_destroyed(table_id, record_id, report).await;
        }
    }

    async fn apply_created(
        &self,
        table_id: &str,
        record_id: &str,
        payload: &CreatedRecordPayload,
        report: &mut BatchReport,
    ) {
        // Idempotency guard: a record already mirrored locally is a no-op.
        match self.responses.find_by_record_id(record_id).await {
            Ok(_) => {
                debug!(record_id, "created notification replayed; already stored");
                report.skipped += 1;
                return;
            }
            Err(StoreError::NotFound) => {}
            Err(err) => {
                report.fail(table_id, record_id, err.to_string());
                return;
            }
        }

        let forms = match self.forms.find_forms_by_table(table_id).await {
            Ok(forms) => forms,
            Err(err) => {
                report.fail(table_id, record_id, format!("listing bound forms: {err}"));
                return;
            }
        };
        if forms.is_empty() {
            debug!(table_id, record_id, "no form bound to table; ignoring created record");
            report.skipped += 1;
            return;
        }

        // The table may be shared by several forms; persist under the first
        // form whose write succeeds. A uniqueness conflict means another
        // delivery (or the submission path) raced us here: already handled.
        let mut conflicted = false;
        let mut last_error = None;
        for form in &forms {
            let answers = reverse_map(form, &payload.cell_values_by_field_id);
            let response =
                FormResponse::new(form.id, record_id, answers, "airtable_webhook");
            match self.responses.save_response(&response).await {
                Ok(()) => {
                    report.created += 1;
                    return;
                }
                Err(StoreError::Conflict(_)) => {
                    conflicted = true;
                    continue;
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    continue;
                }
            }
        }

        if conflicted {
            debug!(record_id, "create raced a concurrent write; treating as applied");
            report.skipped += 1;
        } else if let Some(reason) = last_error {
            report.fail(table_id, record_id, reason);
        }
    }

    async fn apply_changed(
        &self,
        table_id: &str,
        record_id: &str,
        payload: &ChangedRecordPayload,
        report: &mut BatchReport,
    ) {
        let mut response = match self.responses.find_by_record_id(record_id).await {
            Ok(response) => response,
            Err(StoreError::NotFound) => {
                // Out-of-order delivery: a change with no stored counterpart
                // is dropped, never backfilled through a create path.
                debug!(record_id, "changed notification for unknown record dropped");
                report.skipped += 1;
                return;
            }
            Err(err) => {
                report.fail(table_id, record_id, err.to_string());
                return;
            }
        };

        let Some(current) = &payload.current else {
            debug!(record_id, "changed notification without cell data; nothing to merge");
            report.skipped += 1;
            return;
        };

        let form = match self.forms.find_form(&response.parent_form).await {
            Ok(form) => form,
            Err(err) => {
                report.fail(
                    table_id,
                    record_id,
                    format!("parent form {} not resolvable: {err}", response.parent_form),
                );
                return;
            }
        };

        // Merge only the notified cells; untouched keys stay as they are.
        let updates = reverse_map(&form, &current.cell_values_by_field_id);
        response.merge_answers(updates);

        match self.responses.update_response(&response).await {
            Ok(()) => report.updated += 1,
            Err(err) => report.fail(table_id, record_id, err.to_string()),
        }
    }

    async fn apply_destroyed(&self, table_id: &str, record_id: &str, report: &mut BatchReport) {
        match self.responses.tombstone_matching(record_id).await {
            Ok(0) => {
                debug!(record_id, "destroy for unknown record; nothing to tombstone");
                report.skipped += 1;
            }
            Ok(count) => report.tombstoned += count,
            Err(err) => report.fail(table_id, record_id, err.to_string()),
        }
    }
}

/// Reverse the projection: provider field ids back to the form's field keys.
/// Cells whose field id the form does not bind are skipped (the table may
/// carry columns the form never asks about).
fn reverse_map(form: &Form, cells: &AnswerMap) -> AnswerMap {
    let mut answers = AnswerMap::new();
    for (field_id, value) in cells {
        match form.field_by_airtable_id(field_id) {
            Some(field) => {
                answers.insert(field.field_key.clone(), value.clone());
            }
            None => {
                debug!(%field_id, form_id = %form.id, "cell for unbound provider field skipped");
            }
        }
    }
    answers
}

// ── Tests ────────────────────────────────────────────────────────────────────

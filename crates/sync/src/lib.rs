//! Keeping the provider table and the locally stored responses mutually
//! consistent: the webhook reconciliation engine for inbound change
//! notifications, and the submission service for outbound writes.

pub mod reconcile;
pub mod submit;
pub mod webhook;

pub use reconcile::{BatchReport, ReconciliationEngine, RecordFailure};
pub use submit::{SubmissionOutcome, SubmissionService, SubmitError};
pub use webhook::{
    ChangedRecordPayload, CreatedRecordPayload, RecordSnapshot, TableChanges, WebhookBody,
    WebhookNotification,
};

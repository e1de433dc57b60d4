//! The provider's change-notification payload, round-tripped faithfully.
//!
//! `BTreeMap` keeps table/record iteration deterministic; the engine imposes
//! its own ordering guarantees (created, then changed, then destroyed) per
//! table regardless of payload order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use airform_core::AnswerMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    /// Base descriptor echoed by the provider; carried, not interpreted.
    #[serde(default)]
    pub base: Value,
    pub webhook: WebhookBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookBody {
    #[serde(default)]
    pub changed_tables_by_id: BTreeMap<String, TableChanges>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChanges {
    #[serde(default)]
    pub created_records_by_id: BTreeMap<String, CreatedRecordPayload>,
    #[serde(default)]
    pub changed_records_by_id: BTreeMap<String, ChangedRecordPayload>,
    #[serde(default)]
    pub destroyed_record_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecordPayload {
    #[serde(default)]
    pub cell_values_by_field_id: AnswerMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangedRecordPayload {
    /// Current cell state after the change; absent for notifications that
    /// carry no cell data.
    #[serde(default)]
    pub current: Option<RecordSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    #[serde(default)]
    pub cell_values_by_field_id: AnswerMap,
}

// ── Tests ────────────────────────────────────────────────────────────────────

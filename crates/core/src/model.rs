use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Answers keyed by `fieldKey` (or, after projection, by the provider's
/// field id).  `serde_json::Map` keeps insertion order and round-trips the
/// provider's JSON faithfully.
pub type AnswerMap = serde_json::Map<String, Value>;

// ── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(
    /// Local identifier of a [`Form`].
    FormId
);
id_newtype!(
    /// Local identifier of a form owner (the credential holder).
    UserId
);
id_newtype!(
    /// Local identifier of a stored [`FormResponse`].
    ResponseId
);

// ── Field types ──────────────────────────────────────────────────────────────

/// The provider field types a form may bind to.
///
/// `MultipleAttachments` is accepted as a type so an attachment column can be
/// listed on a form, but no answer transformation exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "singleLineText")]
    SingleLineText,
    #[serde(rename = "multilineText")]
    MultilineText,
    #[serde(rename = "singleSelect")]
    SingleSelect,
    #[serde(rename = "multipleSelects")]
    MultipleSelects,
    #[serde(rename = "multipleAttachments")]
    MultipleAttachments,
}

impl FieldType {
    /// Wire names of every supported type, used to filter provider table
    /// schemas down to columns a form can bind.
    pub const SUPPORTED: &'static [&'static str] = &[
        "singleLineText",
        "multilineText",
        "singleSelect",
        "multipleSelects",
        "multipleAttachments",
    ];

    pub fn is_supported(wire_name: &str) -> bool {
        Self::SUPPORTED.contains(&wire_name)
    }
}

// ── Visibility rules ─────────────────────────────────────────────────────────

/// How a condition inspects a prior answer.
///
/// `Unknown` absorbs any unrecognized wire value so a rule authored against a
/// newer comparator set still deserializes; evaluation treats it as
/// never-satisfied and logs a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    IsEqual,
    NotEqual,
    ContainsText,
    #[serde(other)]
    Unknown,
}

/// Logical combinator over a rule's conditions.  Unknown wire values fold
/// into `And`, the default-safe reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleOperator {
    Or,
    #[default]
    #[serde(other)]
    And,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field_key: String,
    pub comparison_type: ComparisonType,
    #[serde(default)]
    pub expected_value: Value,
}

/// Conditional-display rule gating one field on earlier answers.
/// An empty condition list is vacuously "always visible".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisibilityRule {
    #[serde(default)]
    pub operator: RuleOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ── Form and fields ──────────────────────────────────────────────────────────

/// One question on a form, bound to one provider column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub field_key: String,
    pub airtable_field_id: String,
    #[serde(alias = "label")]
    pub display_label: String,
    #[serde(alias = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    /// Only meaningful for the select types; an empty list means "no
    /// restriction" for validation purposes.
    #[serde(default)]
    pub select_options: Vec<String>,
    #[serde(default)]
    pub visibility_rules: Option<VisibilityRule>,
    /// Display ordering only; the engine relies on the vector order.
    #[serde(default)]
    pub field_order: i32,
}

/// A published form bound to exactly one provider table.
///
/// The serde aliases accept the legacy creation-payload shape
/// (`name`/`description`/`airtableBaseId`/`airtableTableId`/`questions`)
/// as a one-time normalization on deserialize; serialization always emits
/// the canonical names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(default)]
    pub id: FormId,
    #[serde(alias = "name")]
    pub form_title: String,
    #[serde(default, alias = "description")]
    pub form_description: String,
    /// Immutable after creation.
    pub form_owner: UserId,
    #[serde(alias = "airtableBaseId")]
    pub connected_base_id: String,
    #[serde(alias = "airtableTableId")]
    pub connected_table_id: String,
    #[serde(default, alias = "questions")]
    pub form_fields: Vec<FormField>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub submission_count: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum FormDefinitionError {
    #[error("duplicate field key: {0}")]
    DuplicateFieldKey(String),
    #[error("field {field_key} has empty provider field id")]
    MissingAirtableFieldId { field_key: String },
}

impl Form {
    pub fn new(
        form_title: impl Into<String>,
        form_owner: UserId,
        connected_base_id: impl Into<String>,
        connected_table_id: impl Into<String>,
        form_fields: Vec<FormField>,
    ) -> Self {
        Self {
            id: FormId::new(),
            form_title: form_title.into(),
            form_description: String::new(),
            form_owner,
            connected_base_id: connected_base_id.into(),
            connected_table_id: connected_table_id.into(),
            form_fields,
            is_active: true,
            submission_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Structural checks applied when a form definition crosses the boundary:
    /// field keys must be unique within the form and every field needs a
    /// provider column to write to.
    pub fn validate_definition(&self) -> Result<(), FormDefinitionError> {
        let mut seen = HashSet::new();
        for field in &self.form_fields {
            if !seen.insert(field.field_key.as_str()) {
                return Err(FormDefinitionError::DuplicateFieldKey(
                    field.field_key.clone(),
                ));
            }
            if field.airtable_field_id.is_empty() {
                return Err(FormDefinitionError::MissingAirtableFieldId {
                    field_key: field.field_key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Look up the field bound to a provider column id, used when
    /// reverse-mapping webhook cell values.
    pub fn field_by_airtable_id(&self, airtable_field_id: &str) -> Option<&FormField> {
        self.form_fields
            .iter()
            .find(|f| f.airtable_field_id == airtable_field_id)
    }
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Synced,
    Pending,
    Failed,
}

/// One respondent's locally stored answer set, mirrored to/from one provider
/// record.  Never hard-deleted: a provider-side destroy only tombstones it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    #[serde(default)]
    pub id: ResponseId,
    pub parent_form: FormId,
    /// Globally unique per provider record; the store enforces uniqueness.
    pub airtable_record_id: String,
    pub field_responses: AnswerMap,
    #[serde(default = "default_submission_source")]
    pub submission_source: String,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub is_deleted_in_airtable: bool,
    #[serde(default = "default_true")]
    pub is_valid_submission: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_submission_source() -> String {
    "web_form".to_string()
}

impl FormResponse {
    pub fn new(
        parent_form: FormId,
        airtable_record_id: impl Into<String>,
        field_responses: AnswerMap,
        submission_source: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ResponseId::new(),
            parent_form,
            airtable_record_id: airtable_record_id.into(),
            field_responses,
            submission_source: submission_source.into(),
            sync_status: SyncStatus::Synced,
            is_deleted_in_airtable: false,
            is_valid_submission: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tombstone after a provider-side destroy.  Answer data is retained.
    pub fn mark_deleted(&mut self) {
        self.is_deleted_in_airtable = true;
        self.sync_status = SyncStatus::Synced;
        self.updated_at = Utc::now();
    }

    /// Merge externally-changed cells into the stored answers, leaving keys
    /// absent from `updates` untouched.
    pub fn merge_answers(&mut self, updates: AnswerMap) {
        for (key, value) in updates {
            self.field_responses.insert(key, value);
        }
        self.sync_status = SyncStatus::Synced;
        self.updated_at = Utc::now();
    }
}

// ── Credentials ──────────────────────────────────────────────────────────────

/// A user's provider OAuth token state plus a profile snapshot.
///
/// `token_expiry` is the sole staleness signal: the access token must never
/// be sent past it without a refresh attempt first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub user_id: UserId,
    pub airtable_user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
    #[serde(default)]
    pub airtable_profile: Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_active_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry < now
    }

    /// Atomically swap in the result of a token exchange.  A grant that
    /// omits `refresh_token` keeps the current one (the provider rotates
    /// refresh tokens only sometimes).
    pub fn apply_tokens(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) {
        self.access_token = access_token;
        if let Some(refresh) = refresh_token {
            self.refresh_token = refresh;
        }
        self.token_expiry = now + chrono::Duration::seconds(expires_in_secs);
        self.last_active_at = now;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_field(key: &str) -> FormField {
        FormField {
            field_key: key.to_string(),
            airtable_field_id: format!("fld_{key}"),
            display_label: key.to_uppercase(),
            field_type: FieldType::SingleLineText,
            is_required: false,
            select_options: Vec::new(),
            visibility_rules: None,
            field_order: 0,
        }
    }

    #[test]
    fn comparison_type_unknown_catch_all() {
        let parsed: ComparisonType = serde_json::from_value(json!("starts_with")).unwrap();
        assert_eq!(parsed, ComparisonType::Unknown);
        let parsed: ComparisonType = serde_json::from_value(json!("contains_text")).unwrap();
        assert_eq!(parsed, ComparisonType::ContainsText);
    }

    #[test]
    fn rule_operator_unknown_folds_to_and() {
        let parsed: RuleOperator = serde_json::from_value(json!("XOR")).unwrap();
        assert_eq!(parsed, RuleOperator::And);
        let parsed: RuleOperator = serde_json::from_value(json!("OR")).unwrap();
        assert_eq!(parsed, RuleOperator::Or);
    }

    #[test]
    fn form_accepts_legacy_creation_shape() {
        let form: Form = serde_json::from_value(json!({
            "name": "Survey",
            "description": "legacy payload",
            "formOwner": UserId::new(),
            "airtableBaseId": "appX",
            "airtableTableId": "tblY",
            "questions": [
                {
                    "fieldKey": "q1",
                    "airtableFieldId": "fld1",
                    "label": "Question one",
                    "type": "singleLineText"
                }
            ]
        }))
        .unwrap();

        assert_eq!(form.form_title, "Survey");
        assert_eq!(form.connected_base_id, "appX");
        assert_eq!(form.connected_table_id, "tblY");
        assert_eq!(form.form_fields.len(), 1);
        assert_eq!(form.form_fields[0].display_label, "Question one");
        assert!(form.is_active);

        // Serialization emits only the canonical shape.
        let out = serde_json::to_value(&form).unwrap();
        assert!(out.get("formTitle").is_some());
        assert!(out.get("name").is_none());
        assert!(out.get("questions").is_none());
    }

    #[test]
    fn duplicate_field_keys_rejected() {
        let mut form = Form::new(
            "t",
            UserId::new(),
            "app1",
            "tbl1",
            vec![text_field("q1"), text_field("q1")],
        );
        assert!(matches!(
            form.validate_definition(),
            Err(FormDefinitionError::DuplicateFieldKey(key)) if key == "q1"
        ));
        form.form_fields[1].field_key = "q2".to_string();
        assert!(form.validate_definition().is_ok());
    }

    #[test]
    fn tombstone_retains_answers() {
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), json!("hello"));
        let mut response = FormResponse::new(FormId::new(), "rec1", answers, "web_form");

        response.mark_deleted();
        assert!(response.is_deleted_in_airtable);
        assert_eq!(response.sync_status, SyncStatus::Synced);
        assert_eq!(response.field_responses["q1"], json!("hello"));
    }

    #[test]
    fn merge_answers_leaves_other_keys_untouched() {
        let mut answers = AnswerMap::new();
        answers.insert("q1".to_string(), json!("keep"));
        answers.insert("q2".to_string(), json!("replace"));
        let mut response = FormResponse::new(FormId::new(), "rec1", answers, "web_form");

        let mut updates = AnswerMap::new();
        updates.insert("q2".to_string(), json!("replaced"));
        response.merge_answers(updates);

        assert_eq!(response.field_responses["q1"], json!("keep"));
        assert_eq!(response.field_responses["q2"], json!("replaced"));
    }

    #[test]
    fn credential_expiry_and_token_swap() {
        let now = Utc::now();
        let mut cred = Credential {
            user_id: UserId::new(),
            airtable_user_id: "usrX".to_string(),
            email: None,
            display_name: None,
            access_token: "old".to_string(),
            refresh_token: "refresh-old".to_string(),
            token_expiry: now - chrono::Duration::minutes(1),
            airtable_profile: Value::Null,
            created_at: now,
            last_active_at: now,
        };
        assert!(cred.is_expired(now));

        cred.apply_tokens("new".to_string(), None, 3600, now);
        assert!(!cred.is_expired(now));
        assert_eq!(cred.access_token, "new");
        // Grant without a rotated refresh token keeps the old one.
        assert_eq!(cred.refresh_token, "refresh-old");

        cred.apply_tokens("new2".to_string(), Some("refresh-new".to_string()), 3600, now);
        assert_eq!(cred.refresh_token, "refresh-new");
    }
}

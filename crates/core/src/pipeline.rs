//! The answer pipeline: validate a submission against a form's fields and
//! visibility rules, then project it into the provider's field-id space.
//!
//! Both steps are pure. Persisting a response, and deciding *whether* to
//! persist, stays with the caller: nothing is stored on validation failure,
//! and a response is stored only once the external write has succeeded.

use serde_json::Value;

use crate::model::{AnswerMap, FieldType, Form};
use crate::visibility::{is_empty_answer, visible_fields};

/// A user-correctable problem with one submitted answer. Returned as a list,
/// never raised past the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field_key: String,
    pub message: String,
}

impl ValidationError {
    fn new(field_key: &str, message: String) -> Self {
        Self {
            field_key: field_key.to_string(),
            message,
        }
    }
}

/// Validate `answers` against the form, walking fields in declared order.
///
/// Hidden fields are skipped entirely: their required flag is not enforced,
/// their options are not checked, and any value the caller supplied for them
/// never enters the visibility accumulator.
pub fn validate_answers(form: &Form, answers: &AnswerMap) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for field in visible_fields(&form.form_fields, answers) {
        let label = if field.display_label.is_empty() {
            &field.field_key
        } else {
            &field.display_label
        };
        let answer = answers.get(&field.field_key);

        if field.is_required && is_empty_answer(answer) {
            errors.push(ValidationError::new(
                &field.field_key,
                format!("{label} is required"),
            ));
            continue;
        }

        let Some(answer) = answer else { continue };
        if is_empty_answer(Some(answer)) {
            continue;
        }

        match field.field_type {
            FieldType::SingleSelect if !field.select_options.is_empty() => {
                if !option_matches(&field.select_options, answer) {
                    errors.push(ValidationError::new(
                        &field.field_key,
                        format!("Invalid option for {label}"),
                    ));
                }
            }
            FieldType::MultipleSelects if !field.select_options.is_empty() => {
                match answer {
                    Value::Array(items) => {
                        let invalid: Vec<String> = items
                            .iter()
                            .filter(|item| !option_matches(&field.select_options, item))
                            .map(display_value)
                            .collect();
                        if !invalid.is_empty() {
                            errors.push(ValidationError::new(
                                &field.field_key,
                                format!("Invalid options for {label}: {}", invalid.join(", ")),
                            ));
                        }
                    }
                    _ => errors.push(ValidationError::new(
                        &field.field_key,
                        format!("{label} must be an array"),
                    )),
                }
            }
            _ => {}
        }
    }

    errors
}

/// Project a submission into the provider's field-id space: one entry per
/// live field with a non-empty answer, keyed by the field's provider column
/// id.
///
/// Visibility is re-applied here, not just at validation time: a stale value
/// for a field the current answers hide would otherwise reach the external
/// table without ever having been validated.
pub fn project_answers(form: &Form, answers: &AnswerMap) -> AnswerMap {
    let mut fields = AnswerMap::new();

    for field in visible_fields(&form.form_fields, answers) {
        let answer = answers.get(&field.field_key);
        if is_empty_answer(answer) {
            continue;
        }
        if let Some(value) = answer {
            fields.insert(field.airtable_field_id.clone(), value.clone());
        }
    }

    fields
}

/// The subset of a submission that is actually live: visible fields with
/// non-empty answers, keyed by `fieldKey`. This is what gets persisted
/// locally, mirroring what [`project_answers`] sends outbound.
pub fn live_answers(form: &Form, answers: &AnswerMap) -> AnswerMap {
    let mut live = AnswerMap::new();

    for field in visible_fields(&form.form_fields, answers) {
        let answer = answers.get(&field.field_key);
        if is_empty_answer(answer) {
            continue;
        }
        if let Some(value) = answer {
            live.insert(field.field_key.clone(), value.clone());
        }
    }

    live
}

fn option_matches(options: &[String], answer: &Value) -> bool {
    match answer {
        Value::String(s) => options.iter().any(|opt| opt == s),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

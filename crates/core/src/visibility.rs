//! The shared conditional-visibility evaluator.
//!
//! Both the submission-validation path and any "what should the respondent
//! see next" path evaluate rules through this one module, so the two can
//! never drift. The evaluator is a pure function of `(rule, known answers)`:
//! no state, no I/O.

use serde_json::Value;
use tracing::warn;

use crate::model::{AnswerMap, ComparisonType, Condition, FormField, RuleOperator, VisibilityRule};

/// An answer counts as empty when it is absent, JSON null, or the empty
/// string. Empty answers never satisfy a condition and are never projected.
pub fn is_empty_answer(answer: Option<&Value>) -> bool {
    match answer {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Case-fold the string form of an answer the way the comparison semantics
/// require: strings compare by content, other scalars by their JSON display.
fn folded_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn equals(answer: &Value, expected: &Value) -> bool {
    match answer {
        // A sequence answer matches when the expected value is a member.
        Value::Array(items) => items.iter().any(|item| item == expected),
        other => other == expected,
    }
}

/// Evaluate a single condition against the answers known so far.
///
/// A missing or null prior answer can never satisfy a condition, whatever
/// the comparator — this is also what makes a forward or self reference
/// harmless: the referenced answer is simply "not yet known".
pub fn check_condition(condition: &Condition, known: &AnswerMap) -> bool {
    let Some(answer) = known.get(&condition.field_key) else {
        return false;
    };
    if answer.is_null() {
        return false;
    }

    match condition.comparison_type {
        ComparisonType::IsEqual => equals(answer, &condition.expected_value),
        ComparisonType::NotEqual => !equals(answer, &condition.expected_value),
        ComparisonType::ContainsText => {
            let needle = folded_text(&condition.expected_value);
            match answer {
                Value::Array(items) => items.iter().any(|item| folded_text(item).contains(&needle)),
                other => folded_text(other).contains(&needle),
            }
        }
        ComparisonType::Unknown => {
            // Non-fatal: report and treat the condition as unsatisfied.
            warn!(field_key = %condition.field_key, "unknown comparison type in visibility rule");
            false
        }
    }
}

/// `is_visible(rule, known answers)`: no rule, or a rule with no conditions,
/// means always visible.
pub fn is_visible(rule: Option<&VisibilityRule>, known: &AnswerMap) -> bool {
    let Some(rule) = rule else {
        return true;
    };
    if rule.conditions.is_empty() {
        return true;
    }

    match rule.operator {
        RuleOperator::And => rule.conditions.iter().all(|c| check_condition(c, known)),
        RuleOperator::Or => rule.conditions.iter().any(|c| check_condition(c, known)),
    }
}

/// Walk `fields` in declared order and return the ones that are live for
/// `answers`.
///
/// Visibility is decided incrementally: each field sees only answers from
/// earlier fields that were themselves visible and non-empty. A value the
/// caller supplied for a hidden field never influences downstream decisions.
pub fn visible_fields<'a>(fields: &'a [FormField], answers: &AnswerMap) -> Vec<&'a FormField> {
    let mut known = AnswerMap::new();
    let mut visible = Vec::new();

    for field in fields {
        if !is_visible(field.visibility_rules.as_ref(), &known) {
            continue;
        }
        visible.push(field);
        let answer = answers.get(&field.field_key);
        if !is_empty_answer(answer) {
            if let Some(value) = answer {
                known.insert(field.field_key.clone(), value.clone());
            }
        }
    }

    visible
}

// ── Tests ────────────────────────────────────────────────────────────────────

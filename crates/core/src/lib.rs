pub mod model;
pub mod pipeline;
pub mod visibility;

pub use model::{
    AnswerMap, ComparisonType, Condition, Credential, FieldType, Form, FormDefinitionError,
    FormField, FormId, FormResponse, ResponseId, RuleOperator, SyncStatus, UserId,
    VisibilityRule,
};
pub use pipeline::{ValidationError, live_answers, project_answers, validate_answers};
pub use visibility::{check_condition, is_empty_answer, is_visible, visible_fields};

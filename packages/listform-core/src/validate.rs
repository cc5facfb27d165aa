//! Pre-submit validation. Read-only: produces a report, never mutates.

use serde::{Deserialize, Serialize};

use crate::model::FormModel;
use crate::schema::ValidationResult;

/// Problem label contributed by the attachment requirement.
pub const ATTACHMENTS_LABEL: &str = "Attachments";

/// Form-level rules beyond per-field `required` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRules {
    /// At least one attachment must be present.
    pub attachments_required: bool,
}

/// Validates `model` against descriptor flags and `rules`.
///
/// A required field is missing when its value is absent, null, an empty
/// list, or whitespace-only text. Fields flagged invalid by the binding
/// layer are reported with their reason. Labels appear in field-key order,
/// followed by the attachment problem.
#[must_use]
pub fn validate(model: &FormModel, rules: ValidationRules) -> ValidationResult {
    let mut problems = Vec::new();
    for field in model.fields() {
        let descriptor = field.descriptor();
        if let Some(reason) = field.invalid_reason() {
            problems.push(format!("{}: {reason}", descriptor.label()));
            continue;
        }
        let missing = field.value().is_none_or(|value| value.is_blank());
        if descriptor.required && missing {
            problems.push(descriptor.label().to_string());
        }
    }
    if rules.attachments_required && model.attachments().is_empty() {
        problems.push(ATTACHMENTS_LABEL.to_string());
    }
    ValidationResult::from_problems(problems)
}

use serde::{Deserialize, Serialize};

use crate::types::FieldValue;

/// Closed set of semantic field types discovered from remote schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SemanticType {
    /// Single line of text.
    Text,
    /// Multiline rich text.
    Note,
    /// Plain number.
    Number,
    /// Currency amount.
    Currency,
    /// Yes/No flag.
    Boolean,
    /// Date or date-and-time.
    DateTime,
    /// Single choice from an option list.
    Choice,
    /// Multiple choices from an option list.
    MultiChoice,
    /// Single person.
    Person,
    /// Multiple people.
    MultiPerson,
}

impl SemanticType {
    /// Maps a remote column type string onto the closed set.
    ///
    /// Unrecognized type strings fall back to [`SemanticType::Text`].
    /// `allow_multiple` upgrades `User` to [`SemanticType::MultiPerson`].
    #[must_use]
    pub fn from_type_name(type_name: &str, allow_multiple: bool) -> Self {
        match type_name.trim() {
            "Note" => Self::Note,
            "Number" | "Integer" | "Counter" => Self::Number,
            "Currency" => Self::Currency,
            "Boolean" => Self::Boolean,
            "DateTime" => Self::DateTime,
            "Choice" => Self::Choice,
            "MultiChoice" => Self::MultiChoice,
            "User" if allow_multiple => Self::MultiPerson,
            "User" => Self::Person,
            "UserMulti" => Self::MultiPerson,
            _ => Self::Text,
        }
    }

    /// Whether the kind carries a list of values.
    #[must_use]
    pub fn is_multi(self) -> bool {
        matches!(self, Self::MultiChoice | Self::MultiPerson)
    }

    /// Whether the kind carries an option list.
    #[must_use]
    pub fn has_choices(self) -> bool {
        matches!(self, Self::Choice | Self::MultiChoice)
    }
}

/// One column definition as reported by the list store.
///
/// Adapters translate their backend's wire format into this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDef {
    /// Stable internal column name (may contain `_xHHHH_` escapes).
    pub internal_name: String,
    /// Human-readable title.
    pub display_name: String,
    /// Remote type string, e.g. `"Text"`, `"UserMulti"`.
    pub type_name: String,
    /// Hidden from forms by the server.
    pub hidden: bool,
    /// Server-declared read-only.
    pub read_only: bool,
    /// Server-declared required.
    pub required: bool,
    /// Whether a person column accepts several people.
    pub allow_multiple: bool,
    /// Raw declared default, if any.
    pub default_value: Option<String>,
    /// Format hint (e.g. `"DateOnly"`).
    pub format: Option<String>,
    /// Field description shown as help text.
    pub description: Option<String>,
    /// Ordered options for choice columns.
    pub choices: Vec<String>,
    /// Whether free-text fill-in values are allowed for choice columns.
    pub fill_in: bool,
}

/// Discovered, immutable metadata for one form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Identifier-safe key the field is exposed under.
    pub key: String,
    /// Internal column name used on the wire.
    pub internal_name: String,
    /// Human-readable label.
    pub display_name: String,
    /// Semantic type; fixed once discovered.
    pub kind: SemanticType,
    /// Server-declared required flag.
    pub required: bool,
    /// Server-declared read-only flag.
    pub read_only: bool,
    /// Format hint.
    pub format: Option<String>,
    /// Help text.
    pub description: Option<String>,
    /// Parsed default value.
    pub default_value: FieldValue,
    /// Option list for choice kinds, empty otherwise.
    pub choices: Vec<String>,
    /// Fill-in flag for choice kinds.
    pub fill_in: bool,
}

impl FieldDescriptor {
    /// Label used in validation reports and rendered forms.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.internal_name
        } else {
            &self.display_name
        }
    }
}

/// Result of validating a form model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Every required field is filled and no field is flagged invalid.
    Valid,
    /// The model violates one or more constraints.
    Invalid {
        /// Human-readable labels of each problem, in field order.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    /// Builds a result from a list of problems.
    #[must_use]
    pub fn from_problems(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }

    /// Whether validation passed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Problem labels; empty when valid.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid { errors } => errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_map_onto_closed_set() {
        assert_eq!(SemanticType::from_type_name("Note", false), SemanticType::Note);
        assert_eq!(SemanticType::from_type_name("Counter", false), SemanticType::Number);
        assert_eq!(SemanticType::from_type_name("User", true), SemanticType::MultiPerson);
        assert_eq!(SemanticType::from_type_name("UserMulti", false), SemanticType::MultiPerson);
        assert_eq!(SemanticType::from_type_name("Lookup", false), SemanticType::Text);
        assert_eq!(SemanticType::from_type_name("", false), SemanticType::Text);
    }

    #[test]
    fn validation_result_accessors() {
        assert!(ValidationResult::from_problems(Vec::new()).is_ok());
        let invalid = ValidationResult::from_problems(vec!["Title".into()]);
        assert!(!invalid.is_ok());
        assert_eq!(invalid.problems(), ["Title".to_string()]);
    }

    #[test]
    fn column_def_deserializes_with_defaults() {
        let col: ColumnDef =
            serde_json::from_str(r#"{"internalName":"Title","typeName":"Text","required":true}"#)
                .unwrap();
        assert_eq!(col.internal_name, "Title");
        assert!(col.required);
        assert!(!col.hidden);
        assert!(col.choices.is_empty());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::SemanticType;

/// Typed in-memory value held by a reactive field.
///
/// Each variant corresponds to one or more [`SemanticType`]s. The shape a
/// field may hold is fixed by its descriptor; see [`FieldValue::conforms_to`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    /// Explicitly cleared value. Only valid for scalar types.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Number or currency amount.
    Number(f64),
    /// Text, multiline note, or a single choice.
    Text(String),
    /// Date and time, normalized to UTC.
    DateTime(DateTime<Utc>),
    /// Ordered list of selected options for multi-choice fields.
    Choices(Vec<String>),
    /// Single person reference.
    Person(PersonRef),
    /// Ordered list of person references.
    People(Vec<PersonRef>),
}

impl FieldValue {
    /// Whether this value has the runtime shape required by `kind`.
    ///
    /// Multi-valued kinds always hold a list and never accept `Null`.
    #[must_use]
    pub fn conforms_to(&self, kind: SemanticType) -> bool {
        match (kind, self) {
            (SemanticType::MultiChoice, Self::Choices(_))
            | (SemanticType::MultiPerson, Self::People(_)) => true,
            (SemanticType::MultiChoice | SemanticType::MultiPerson, _) => false,
            (_, Self::Null) => true,
            (SemanticType::Text | SemanticType::Note | SemanticType::Choice, Self::Text(_))
            | (SemanticType::Number | SemanticType::Currency, Self::Number(_))
            | (SemanticType::Boolean, Self::Bool(_))
            | (SemanticType::DateTime, Self::DateTime(_))
            | (SemanticType::Person, Self::Person(_)) => true,
            _ => false,
        }
    }

    /// The "empty" value for a kind: `false`, an empty list, or `Null`.
    #[must_use]
    pub fn empty_for(kind: SemanticType) -> Self {
        match kind {
            SemanticType::Boolean => Self::Bool(false),
            SemanticType::MultiChoice => Self::Choices(Vec::new()),
            SemanticType::MultiPerson => Self::People(Vec::new()),
            _ => Self::Null,
        }
    }

    /// Whether the value counts as blank for required-field checks.
    ///
    /// Text is trimmed before the check. Booleans and numbers are never blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Choices(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::People(people) => people.is_empty(),
            Self::Bool(_) | Self::Number(_) | Self::DateTime(_) | Self::Person(_) => false,
        }
    }

    /// Returns the boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Reference to a person stored in a person-typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRef {
    /// Numeric site user id.
    pub id: u64,
    /// Display name, when the wire value carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// E-mail address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl PersonRef {
    /// Creates a bare reference carrying only the id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            display_name: None,
            email: None,
        }
    }
}

/// User profile as resolved by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Numeric site user id.
    pub id: u64,
    /// Human-readable name.
    pub display_name: String,
    /// Login / account name.
    #[serde(default)]
    pub login: String,
    /// E-mail address.
    #[serde(default)]
    pub email: Option<String>,
    /// Photo URL, if the provider exposes one.
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Group memberships (titles). Populated for the current user only.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserProfile {
    /// Whether the user belongs to any of `groups` (case-insensitive).
    #[must_use]
    pub fn in_any_group(&self, groups: &[String]) -> bool {
        self.groups
            .iter()
            .any(|g| groups.iter().any(|wanted| wanted.eq_ignore_ascii_case(g)))
    }
}

/// Actor reference in an audit stamp.
///
/// Raw items only carry the numeric id; resolution against the identity
/// provider upgrades it to a full profile. A failed lookup leaves the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorRef {
    /// Unresolved numeric user id.
    Id(u64),
    /// Profile returned by the identity provider.
    Resolved(UserProfile),
}

impl ActorRef {
    /// Numeric user id, regardless of resolution state.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Id(id) => *id,
            Self::Resolved(profile) => profile.id,
        }
    }

    /// Display name if resolved.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Resolved(profile) => Some(&profile.display_name),
        }
    }
}

//! Schema mapper: remote column definitions into field descriptors.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::ClockSource;
use crate::dates::parse_date;
use crate::model::FormModel;
use crate::naming::to_identifier;
use crate::schema::{ColumnDef, FieldDescriptor, SemanticType};
use crate::types::FieldValue;

/// Structural and system columns that never become form fields.
///
/// Audit and identity columns (`ID`, `Created`, `Author`, ...) are excluded
/// here because record-level binding handles them separately.
pub const SYSTEM_COLUMN_DENYLIST: &[&str] = &[
    "ContentType",
    "ContentTypeId",
    "_ModerationComments",
    "_ModerationStatus",
    "_UIVersion",
    "_UIVersionString",
    "_Level",
    "_IsCurrentVersion",
    "_HasCopyDestinations",
    "_CopySource",
    "_ComplianceFlags",
    "_ComplianceTag",
    "_ComplianceTagWrittenTime",
    "_ComplianceTagUserId",
    "_IsRecord",
    "ComplianceAssetId",
    "owshiddenversion",
    "Version",
    "Attachments",
    "Edit",
    "LinkTitle",
    "LinkTitleNoMenu",
    "LinkTitle2",
    "SelectTitle",
    "DocIcon",
    "FolderChildCount",
    "ItemChildCount",
    "AppAuthor",
    "AppEditor",
    "GUID",
    "ID",
    "Id",
    "Created",
    "Modified",
    "Author",
    "Editor",
];

/// Date default sentinel meaning "the current date at mapping time".
pub const TODAY_SENTINEL: &str = "[today]";

/// Which column name the exposed key is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeySource {
    #[default]
    InternalName,
    DisplayName,
}

/// A column whose default could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub key: String,
    pub reason: String,
}

/// What one call to [`SchemaMapper::apply`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    /// Keys of fields added to the model.
    pub added: Vec<String>,
    /// Keys already present on the model.
    pub skipped_existing: Vec<String>,
    /// Internal names of hidden or denylisted columns.
    pub excluded: Vec<String>,
    /// Default-value conversion failures. The field is still added.
    pub failures: Vec<MappingFailure>,
}

/// Turns remote schema into field descriptors.
pub struct SchemaMapper<'a> {
    key_source: KeySource,
    clock: &'a dyn ClockSource,
}

impl<'a> SchemaMapper<'a> {
    #[must_use]
    pub fn new(key_source: KeySource, clock: &'a dyn ClockSource) -> Self {
        Self { key_source, clock }
    }

    /// Whether `column` is hidden or on the system denylist.
    #[must_use]
    pub fn is_excluded(column: &ColumnDef) -> bool {
        column.hidden || SYSTEM_COLUMN_DENYLIST.contains(&column.internal_name.as_str())
    }

    /// Exposed key for `column`.
    #[must_use]
    pub fn key_for(&self, column: &ColumnDef) -> String {
        let source = match self.key_source {
            KeySource::DisplayName if !column.display_name.trim().is_empty() => {
                &column.display_name
            }
            _ => &column.internal_name,
        };
        to_identifier(source)
    }

    /// Maps columns to descriptors keyed by exposed key, dropping excluded
    /// columns. The first column wins when two derive the same key.
    #[must_use]
    pub fn describe(&self, columns: &[ColumnDef]) -> BTreeMap<String, FieldDescriptor> {
        let mut out = BTreeMap::new();
        for column in columns.iter().filter(|c| !Self::is_excluded(c)) {
            let (descriptor, _) = self.descriptor_for(column);
            out.entry(descriptor.key.clone()).or_insert(descriptor);
        }
        out
    }

    /// Maps columns onto `model`, skipping keys it already holds.
    pub fn apply(&self, model: &mut FormModel, columns: &[ColumnDef]) -> MappingReport {
        let mut report = MappingReport::default();
        for column in columns {
            if Self::is_excluded(column) {
                report.excluded.push(column.internal_name.clone());
                continue;
            }
            let (descriptor, failure) = self.descriptor_for(column);
            let key = descriptor.key.clone();
            if key.is_empty() {
                report.failures.push(MappingFailure {
                    key: column.internal_name.clone(),
                    reason: "column name yields an empty key".to_string(),
                });
                continue;
            }
            if let Some(reason) = failure {
                report.failures.push(MappingFailure {
                    key: key.clone(),
                    reason,
                });
            }
            if model.insert_field(descriptor) {
                debug!(key = %key, internal = %column.internal_name, "field mapped");
                report.added.push(key);
            } else {
                report.skipped_existing.push(key);
            }
        }
        report
    }

    fn descriptor_for(&self, column: &ColumnDef) -> (FieldDescriptor, Option<String>) {
        let kind = SemanticType::from_type_name(&column.type_name, column.allow_multiple);
        let (default_value, failure) = match column.default_value.as_deref() {
            None => (FieldValue::empty_for(kind), None),
            Some(raw) => match parse_default(kind, raw, self.clock.today()) {
                Ok(value) => (value, None),
                Err(reason) => (FieldValue::empty_for(kind), Some(reason)),
            },
        };
        let (choices, fill_in) = if kind.has_choices() {
            (column.choices.clone(), column.fill_in)
        } else {
            (Vec::new(), false)
        };
        let descriptor = FieldDescriptor {
            key: self.key_for(column),
            internal_name: column.internal_name.clone(),
            display_name: column.display_name.clone(),
            kind,
            required: column.required,
            read_only: column.read_only,
            format: column.format.clone(),
            description: column.description.clone(),
            default_value,
            choices,
            fill_in,
        };
        (descriptor, failure)
    }
}

/// Parses a declared default according to the field kind.
fn parse_default(kind: SemanticType, raw: &str, today: NaiveDate) -> Result<FieldValue, String> {
    match kind {
        SemanticType::Boolean => Ok(FieldValue::Bool(raw.trim() != "0")),
        SemanticType::Number | SemanticType::Currency => raw
            .trim()
            .parse::<f64>()
            .map(FieldValue::Number)
            .map_err(|e| format!("default `{raw}` is not a number: {e}")),
        SemanticType::DateTime => {
            if raw.trim().eq_ignore_ascii_case(TODAY_SENTINEL) {
                let midnight = today
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| naive.and_utc())
                    .ok_or_else(|| "today is not representable".to_string())?;
                Ok(FieldValue::DateTime(midnight))
            } else {
                parse_date(raw)
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| format!("default `{raw}` is not a recognized date"))
            }
        }
        SemanticType::MultiChoice => Ok(FieldValue::Choices(split_multi(raw))),
        // People cannot be expressed as a literal default.
        SemanticType::Person | SemanticType::MultiPerson => Ok(FieldValue::empty_for(kind)),
        SemanticType::Text | SemanticType::Note | SemanticType::Choice => {
            Ok(FieldValue::Text(raw.to_string()))
        }
    }
}

/// Splits a legacy `;#A;#B;#` multi-value string.
pub(crate) fn split_multi(raw: &str) -> Vec<String> {
    raw.split(";#")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

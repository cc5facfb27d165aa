//! Binding remote item values into a form model.
//!
//! Raw items are JSON objects keyed by internal column name. Both backend
//! generations are accepted: collections may arrive wrapped as
//! `{ "results": [...] }`, as plain arrays, or as legacy `;#`-delimited
//! strings.

use serde_json::{Map, Value};

use crate::dates::parse_date;
use crate::mapper::split_multi;
use crate::model::{Attachment, AuditBlock, FormModel, ModelError};
use crate::schema::SemanticType;
use crate::types::{ActorRef, FieldValue, PersonRef};

/// Read-only metadata keys never bound into fields.
pub const BIND_EXCLUDED_KEYS: &[&str] = &[
    "__metadata",
    "odata.type",
    "odata.id",
    "odata.etag",
    "odata.editLink",
    "FileSystemObjectType",
    "ServerRedirectedEmbedUri",
    "ServerRedirectedEmbedUrl",
    "ContentTypeId",
    "GUID",
    "ID",
    "Id",
    "Created",
    "Modified",
    "Author",
    "Editor",
    "AuthorId",
    "EditorId",
    "Attachments",
    "AttachmentFiles",
];

/// One field whose wire value could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot bind `{key}`: {reason}")]
pub struct ConversionError {
    pub key: String,
    pub reason: String,
}

/// Outcome of [`FormModel::bind_values`]. Partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Keys of fields that received a value.
    pub bound: Vec<String>,
    /// Fields left untouched because conversion failed.
    pub failures: Vec<ConversionError>,
}

impl FormModel {
    /// Loads `raw` into the model. The item is authoritative: a field whose
    /// column `raw` does not carry is unset, so a later save omits it
    /// instead of writing a schema default over the stored value.
    ///
    /// Never fails as a whole: a field that cannot be converted is reported
    /// in [`BindReport::failures`] and keeps its previous value.
    pub fn bind_values(&mut self, raw: &Map<String, Value>) -> BindReport {
        let mut report = BindReport::default();
        for field in self.fields_mut() {
            let descriptor = field.descriptor().clone();
            let internal = descriptor.internal_name.as_str();
            if BIND_EXCLUDED_KEYS.contains(&internal) {
                continue;
            }
            let source = match descriptor.kind {
                SemanticType::Person | SemanticType::MultiPerson => person_source(raw, internal),
                _ => raw.get(internal),
            };
            let Some(wire) = source else {
                field.unset();
                continue;
            };
            let converted = convert(descriptor.kind, wire).and_then(|value| {
                field.load(value).map_err(|e| e.to_string())
            });
            match converted {
                Ok(()) => report.bound.push(descriptor.key.clone()),
                Err(reason) => report.failures.push(ConversionError {
                    key: descriptor.key.clone(),
                    reason,
                }),
            }
        }
        report
    }

    /// Loads record-level state from `raw`: identity, audit block and
    /// attachments. Keys that are absent leave the current state untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::IdentityAlreadyAssigned`] when `raw` belongs to
    /// a different record than the model.
    pub fn bind_record_state(&mut self, raw: &Map<String, Value>) -> Result<(), ModelError> {
        if let Some(id) = ["Id", "ID"].iter().find_map(|k| raw.get(*k).and_then(as_u64)) {
            self.assign_id(id)?;
        }

        let stamp_at = |key: &str| raw.get(key).and_then(Value::as_str).and_then(parse_date);
        self.set_audit(AuditBlock::from_parts(
            stamp_at("Created"),
            actor(raw, "Author"),
            stamp_at("Modified"),
            actor(raw, "Editor"),
        ));

        if let Some(files) = raw.get("AttachmentFiles") {
            let attachments = unwrap_collection(files)
                .map(|items| items.iter().filter_map(attachment).collect())
                .unwrap_or_default();
            self.set_attachments(attachments);
        }
        Ok(())
    }
}

/// Parses an attachment entry `{ "FileName", "ServerRelativeUrl" }`.
#[must_use]
pub fn attachment(value: &Value) -> Option<Attachment> {
    let obj = value.as_object()?;
    let file_name = obj.get("FileName")?.as_str()?.to_string();
    let url = obj
        .get("ServerRelativeUrl")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    Some(Attachment { file_name, url })
}

/// Converts one wire value into the in-memory shape for `kind`.
///
/// # Errors
///
/// Returns a human-readable reason when the value cannot take that shape.
pub fn convert(kind: SemanticType, wire: &Value) -> Result<FieldValue, String> {
    match kind {
        SemanticType::Text | SemanticType::Note | SemanticType::Choice => match wire {
            Value::Null => Ok(FieldValue::Null),
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(format!("expected text, got {}", type_name(other))),
        },
        SemanticType::Number | SemanticType::Currency => match wire {
            Value::Null => Ok(FieldValue::Null),
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .ok_or_else(|| format!("number {n} out of range")),
            Value::String(s) if s.trim().is_empty() => Ok(FieldValue::Null),
            Value::String(s) => s
                .trim()
                .parse()
                .map(FieldValue::Number)
                .map_err(|_| format!("`{s}` is not a number")),
            other => Err(format!("expected number, got {}", type_name(other))),
        },
        SemanticType::Boolean => match wire {
            Value::Null => Ok(FieldValue::Bool(false)),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) => Ok(FieldValue::Bool(n.as_f64() != Some(0.0))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(FieldValue::Bool(true)),
                "" | "0" | "false" | "no" => Ok(FieldValue::Bool(false)),
                _ => Err(format!("`{s}` is not a boolean")),
            },
            other => Err(format!("expected boolean, got {}", type_name(other))),
        },
        SemanticType::DateTime => match wire {
            Value::Null => Ok(FieldValue::Null),
            Value::String(s) if s.trim().is_empty() => Ok(FieldValue::Null),
            Value::String(s) => parse_date(s)
                .map(FieldValue::DateTime)
                .ok_or_else(|| format!("`{s}` is not a recognized date")),
            other => Err(format!("expected date string, got {}", type_name(other))),
        },
        SemanticType::MultiChoice => match wire {
            Value::Null => Ok(FieldValue::Choices(Vec::new())),
            Value::String(s) => Ok(FieldValue::Choices(split_multi(s))),
            other => {
                let items = unwrap_collection(other)
                    .ok_or_else(|| format!("expected choice list, got {}", type_name(other)))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(ToString::to_string)
                            .ok_or_else(|| format!("choice {item} is not a string"))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::Choices)
            }
        },
        SemanticType::Person => match wire {
            Value::Null => Ok(FieldValue::Null),
            other => person(other)
                .map(FieldValue::Person)
                .ok_or_else(|| format!("unrecognized person value {other}")),
        },
        SemanticType::MultiPerson => match wire {
            Value::Null => Ok(FieldValue::People(Vec::new())),
            Value::String(s) => legacy_people(s)
                .map(FieldValue::People)
                .ok_or_else(|| format!("unrecognized people value `{s}`")),
            other => {
                let items = unwrap_collection(other)
                    .ok_or_else(|| format!("expected people list, got {}", type_name(other)))?;
                items
                    .iter()
                    .map(|item| person(item).ok_or_else(|| format!("unrecognized person {item}")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(FieldValue::People)
            }
        },
    }
}

/// Inner list of a `{ "results": [...] }` wrapper or a plain array.
#[must_use]
pub fn unwrap_collection(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj.get("results").and_then(Value::as_array),
        _ => None,
    }
}

/// Person value as a numeric id, `{ "Id", "Title", "EMail" }` object, or a
/// legacy `12;#Name` string.
#[must_use]
pub fn person(value: &Value) -> Option<PersonRef> {
    match value {
        Value::Number(_) => as_u64(value).map(PersonRef::new),
        Value::String(s) => {
            let mut parts = s.splitn(2, ";#");
            let id = parts.next()?.trim().parse().ok()?;
            let display_name = parts
                .next()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(ToString::to_string);
            Some(PersonRef {
                id,
                display_name,
                email: None,
            })
        }
        Value::Object(obj) => {
            let id = ["Id", "ID", "id"].iter().find_map(|k| obj.get(*k).and_then(as_u64))?;
            let text = |k: &str| obj.get(k).and_then(Value::as_str).map(ToString::to_string);
            Some(PersonRef {
                id,
                display_name: text("Title"),
                email: text("EMail"),
            })
        }
        _ => None,
    }
}

/// Legacy multi-person string `1;#Ann;#2;#Bob`.
fn legacy_people(raw: &str) -> Option<Vec<PersonRef>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    let parts: Vec<&str> = raw.split(";#").collect();
    parts
        .chunks(2)
        .map(|pair| {
            let id = pair[0].trim().parse().ok()?;
            Some(PersonRef {
                id,
                display_name: pair.get(1).map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                email: None,
            })
        })
        .collect()
}

/// Expanded person object if present, else the `<internal>Id` companion key.
fn person_source<'a>(raw: &'a Map<String, Value>, internal: &str) -> Option<&'a Value> {
    let deferred = |v: &&Value| v.get("__deferred").is_some();
    raw.get(internal)
        .filter(|v| !deferred(v))
        .or_else(|| raw.get(&format!("{internal}Id")))
}

fn actor(raw: &Map<String, Value>, base: &str) -> Option<ActorRef> {
    person_source(raw, base)
        .and_then(person)
        .map(|p| ActorRef::Id(p.id))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

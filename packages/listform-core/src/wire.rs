//! Outbound serialization of field values for the list store.

use std::collections::BTreeSet;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::model::FormModel;
use crate::sanitize::sanitize_html;
use crate::schema::{FieldDescriptor, SemanticType};
use crate::types::{FieldValue, PersonRef};

/// Backend API generation a list store speaks. Chosen once per store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreCapability {
    /// SOAP-era service: `;#`-delimited collections, space-separated dates.
    Legacy,
    /// REST/OData service: `{ "results": [...] }` collections, `<Field>Id`
    /// person keys, RFC 3339 dates.
    #[default]
    Modern,
}

/// Prefixes marking locally synthesized pseudo-fields.
pub const RESERVED_PREFIXES: &[char] = &['_', '$'];

/// Filters `names` down to fields the user may legitimately write.
///
/// A name survives when it has no reserved prefix, is in the model's
/// schema-derived registry, and its descriptor is not read-only. The result
/// is sorted and free of duplicates.
#[must_use]
pub fn compute_editable_fields<I, S>(model: &FormModel, names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().to_string())
        .filter(|name| !name.starts_with(RESERVED_PREFIXES))
        .filter(|name| model.registry().contains(name))
        .filter(|name| model.descriptor(name).is_some_and(|d| !d.read_only))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Serializes one field to its wire key and value.
///
/// Returns `None` when the field has never been set: "not being updated"
/// is distinct from an explicit clear, which serializes as `null`.
#[must_use]
pub fn serialize(
    value: Option<&FieldValue>,
    descriptor: &FieldDescriptor,
    capability: StoreCapability,
) -> Option<(String, Value)> {
    let value = value?;
    let is_person = matches!(
        descriptor.kind,
        SemanticType::Person | SemanticType::MultiPerson
    );
    let key = if is_person && capability == StoreCapability::Modern {
        format!("{}Id", descriptor.internal_name)
    } else {
        descriptor.internal_name.clone()
    };
    let wire = match (value, capability) {
        (FieldValue::Null, _) => Value::Null,
        (FieldValue::Bool(b), StoreCapability::Modern) => Value::Bool(*b),
        (FieldValue::Bool(b), StoreCapability::Legacy) => Value::String(if *b { "1" } else { "0" }.into()),
        (FieldValue::Number(n), _) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        (FieldValue::Text(text), _) if descriptor.kind == SemanticType::Note => {
            Value::String(sanitize_html(text))
        }
        (FieldValue::Text(text), _) => Value::String(text.clone()),
        (FieldValue::DateTime(at), StoreCapability::Modern) => {
            Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        (FieldValue::DateTime(at), StoreCapability::Legacy) => {
            Value::String(at.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        (FieldValue::Choices(items), StoreCapability::Modern) => json!({ "results": items }),
        (FieldValue::Choices(items), StoreCapability::Legacy) => Value::String(join_legacy(items)),
        (FieldValue::Person(person), StoreCapability::Modern) => json!(person.id),
        (FieldValue::Person(person), StoreCapability::Legacy) => {
            Value::String(legacy_person(person))
        }
        (FieldValue::People(people), StoreCapability::Modern) => {
            json!({ "results": people.iter().map(|p| p.id).collect::<Vec<_>>() })
        }
        (FieldValue::People(people), StoreCapability::Legacy) => Value::String(
            people
                .iter()
                .map(legacy_person)
                .collect::<Vec<_>>()
                .join(";#"),
        ),
    };
    Some((key, wire))
}

/// Builds the write payload for `editable` keys.
#[must_use]
pub fn build_payload(
    model: &FormModel,
    editable: &[String],
    capability: StoreCapability,
) -> Map<String, Value> {
    editable
        .iter()
        .filter_map(|key| {
            let field = model.field(key)?;
            serialize(field.value(), field.descriptor(), capability)
        })
        .collect()
}

fn join_legacy(items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!(";#{};#", items.join(";#"))
    }
}

fn legacy_person(person: &PersonRef) -> String {
    format!("{};#{}", person.id, person.display_name.as_deref().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::clock::FixedClock;
    use crate::mapper::{KeySource, SchemaMapper};
    use crate::schema::ColumnDef;
    use crate::test_support::column;

    fn model() -> FormModel {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        let mut model = FormModel::new("Requests");
        let columns = vec![
            column("Title", "Text"),
            column("Amount", "Number"),
            ColumnDef {
                read_only: true,
                ..column("Total", "Currency")
            },
            column("Notes", "Note"),
            column("Due", "DateTime"),
            column("Tags", "MultiChoice"),
            column("Manager", "User"),
            column("Reviewers", "UserMulti"),
        ];
        SchemaMapper::new(KeySource::InternalName, &clock).apply(&mut model, &columns);
        model
    }

    #[test]
    fn editable_fields_filter_prefix_registry_and_read_only() {
        let model = model();
        let names = ["title", "_local", "$computed", "total", "ghost", "amount", "title"];
        assert_eq!(compute_editable_fields(&model, names), ["amount", "title"]);
    }

    #[test]
    fn modern_serialization() {
        let mut model = model();
        let due = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        model.set("due", FieldValue::DateTime(due)).unwrap();
        model.set("notes", FieldValue::Text("<b>hi</b><script>x</script>".into())).unwrap();
        model.set("tags", FieldValue::Choices(vec!["A".into(), "B".into()])).unwrap();
        model.set("manager", FieldValue::Person(PersonRef::new(12))).unwrap();
        model
            .set("reviewers", FieldValue::People(vec![PersonRef::new(3), PersonRef::new(4)]))
            .unwrap();
        model.set("amount", FieldValue::Number(12.5)).unwrap();

        let keys: Vec<String> = model.registry().iter().cloned().collect();
        let editable = compute_editable_fields(&model, &keys);
        let payload = build_payload(&model, &editable, StoreCapability::Modern);

        assert_eq!(payload["Due"], json!("2024-03-05T10:00:00Z"));
        assert_eq!(payload["Notes"], json!("<b>hi</b>"));
        assert_eq!(payload["Tags"], json!({ "results": ["A", "B"] }));
        assert_eq!(payload["ManagerId"], json!(12));
        assert_eq!(payload["ReviewersId"], json!({ "results": [3, 4] }));
        assert_eq!(payload["Amount"], json!(12.5));
        assert_eq!(payload["Title"], Value::Null);
        assert!(!payload.contains_key("Total"));
        assert!(!payload.contains_key("Manager"));
    }

    #[test]
    fn legacy_serialization() {
        let mut model = model();
        let due = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        model.set("due", FieldValue::DateTime(due)).unwrap();
        model.set("tags", FieldValue::Choices(vec!["A".into(), "B".into()])).unwrap();
        model
            .set(
                "manager",
                FieldValue::Person(PersonRef {
                    id: 12,
                    display_name: Some("Pat".into()),
                    email: None,
                }),
            )
            .unwrap();

        let editable = vec!["due".to_string(), "tags".to_string(), "manager".to_string()];
        let payload = build_payload(&model, &editable, StoreCapability::Legacy);
        assert_eq!(payload["Due"], json!("2024-03-05 10:00:00"));
        assert_eq!(payload["Tags"], json!(";#A;#B;#"));
        assert_eq!(payload["Manager"], json!("12;#Pat"));
    }

    #[test]
    fn unset_values_are_omitted_but_null_is_sent() {
        let model = model();
        let descriptor = model.descriptor("title").unwrap();
        assert_eq!(serialize(None, descriptor, StoreCapability::Modern), None);
        assert_eq!(
            serialize(Some(&FieldValue::Null), descriptor, StoreCapability::Modern),
            Some(("Title".to_string(), Value::Null))
        );
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            prop::sample::select(vec!["title", "amount", "total", "notes", "_title", "$amount", "ghost"])
                .prop_map(String::from),
            "[_$]?[a-z]{0,8}",
        ]
    }

    proptest! {
        #[test]
        fn editable_fields_never_leak(names in prop::collection::vec(name_strategy(), 0..12)) {
            let model = model();
            let editable = compute_editable_fields(&model, &names);
            for name in &editable {
                prop_assert!(!name.starts_with(RESERVED_PREFIXES));
                prop_assert!(model.registry().contains(name));
                prop_assert!(!model.descriptor(name).unwrap().read_only);
                prop_assert!(names.contains(name));
            }
            prop_assert!(editable.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

//! Widget registry: one presenter per semantic type, resolved once per form.
//!
//! A [`FieldWidget`] knows how to show a value as text and how to turn user
//! input back into a [`FieldValue`]. The [`WidgetRegistry`] maps each
//! [`SemanticType`] to a widget, and a [`RenderPlan`] is the per-model
//! resolution of that mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::dates::parse_date;
use crate::field::FieldError;
use crate::model::FormModel;
use crate::schema::{FieldDescriptor, SemanticType};
use crate::types::{FieldValue, PersonRef};

// ---------------------------------------------------------------------------
// FieldWidget trait
// ---------------------------------------------------------------------------

/// Presenter for one family of semantic types.
pub trait FieldWidget: Send + Sync {
    /// Stable widget name, e.g. `"text"` or `"date"`.
    fn name(&self) -> &'static str;

    /// Display text for `value`. Unset and null values render as empty.
    fn display(&self, descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String;

    /// Parses raw user input into a value of the descriptor's kind.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when `input` is not acceptable.
    fn parse_input(&self, descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String>;
}

// ---------------------------------------------------------------------------
// Built-in widgets
// ---------------------------------------------------------------------------

/// Single-line text, rich text and single choice.
#[derive(Debug, Default)]
pub struct TextWidget;

impl FieldWidget for TextWidget {
    fn name(&self) -> &'static str {
        "text"
    }

    fn display(&self, _descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        match value {
            Some(FieldValue::Text(text)) => text.clone(),
            _ => String::new(),
        }
    }

    fn parse_input(&self, descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        if input.trim().is_empty() {
            return Ok(FieldValue::Null);
        }
        if descriptor.kind == SemanticType::Choice {
            check_choice(descriptor, input.trim())?;
            return Ok(FieldValue::Text(input.trim().to_string()));
        }
        Ok(FieldValue::Text(input.to_string()))
    }
}

/// Numbers and currency amounts.
#[derive(Debug, Default)]
pub struct NumberWidget;

impl FieldWidget for NumberWidget {
    fn name(&self) -> &'static str {
        "number"
    }

    fn display(&self, descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        match value {
            Some(FieldValue::Number(n)) if descriptor.kind == SemanticType::Currency => {
                format!("{n:.2}")
            }
            Some(FieldValue::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn parse_input(&self, _descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '$'))
            .collect();
        if cleaned.is_empty() {
            return Ok(FieldValue::Null);
        }
        cleaned
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FieldValue::Number)
            .ok_or_else(|| format!("`{}` is not a number", input.trim()))
    }
}

/// Yes/no checkbox.
#[derive(Debug, Default)]
pub struct CheckboxWidget;

impl FieldWidget for CheckboxWidget {
    fn name(&self) -> &'static str {
        "checkbox"
    }

    fn display(&self, _descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        match value {
            Some(FieldValue::Bool(true)) => "Yes".to_string(),
            Some(FieldValue::Bool(false)) => "No".to_string(),
            _ => String::new(),
        }
    }

    fn parse_input(&self, _descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        match input.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(FieldValue::Bool(true)),
            "" | "0" | "false" | "no" | "off" => Ok(FieldValue::Bool(false)),
            other => Err(format!("`{other}` is not yes or no")),
        }
    }
}

/// Date or date-time picker. The `DateTime` format hint shows the time.
#[derive(Debug, Default)]
pub struct DateWidget;

impl FieldWidget for DateWidget {
    fn name(&self) -> &'static str {
        "date"
    }

    fn display(&self, descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        let Some(FieldValue::DateTime(at)) = value else {
            return String::new();
        };
        if descriptor.format.as_deref() == Some("DateTime") {
            at.format("%m/%d/%Y %H:%M").to_string()
        } else {
            at.format("%m/%d/%Y").to_string()
        }
    }

    fn parse_input(&self, _descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        if input.trim().is_empty() {
            return Ok(FieldValue::Null);
        }
        parse_date(input)
            .map(FieldValue::DateTime)
            .ok_or_else(|| format!("`{}` is not a recognized date", input.trim()))
    }
}

/// Multi-select list. Input items are separated by `;` or `,`.
#[derive(Debug, Default)]
pub struct MultiChoiceWidget;

impl FieldWidget for MultiChoiceWidget {
    fn name(&self) -> &'static str {
        "multi-choice"
    }

    fn display(&self, _descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        match value {
            Some(FieldValue::Choices(items)) => items.join("; "),
            _ => String::new(),
        }
    }

    fn parse_input(&self, descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        let items: Vec<String> = input
            .split([';', ','])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect();
        for item in &items {
            check_choice(descriptor, item)?;
        }
        Ok(FieldValue::Choices(items))
    }
}

/// People picker. Input is a list of numeric user ids.
#[derive(Debug, Default)]
pub struct PersonWidget;

impl FieldWidget for PersonWidget {
    fn name(&self) -> &'static str {
        "person"
    }

    fn display(&self, _descriptor: &FieldDescriptor, value: Option<&FieldValue>) -> String {
        match value {
            Some(FieldValue::Person(person)) => person_label(person),
            Some(FieldValue::People(people)) => people
                .iter()
                .map(person_label)
                .collect::<Vec<_>>()
                .join("; "),
            _ => String::new(),
        }
    }

    fn parse_input(&self, descriptor: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
        let ids = input
            .split([';', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| format!("`{part}` is not a user id"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if descriptor.kind == SemanticType::MultiPerson {
            return Ok(FieldValue::People(ids.into_iter().map(PersonRef::new).collect()));
        }
        match ids.as_slice() {
            [] => Ok(FieldValue::Null),
            [id] => Ok(FieldValue::Person(PersonRef::new(*id))),
            _ => Err("only one person may be selected".to_string()),
        }
    }
}

fn check_choice(descriptor: &FieldDescriptor, item: &str) -> Result<(), String> {
    if descriptor.fill_in
        || descriptor.choices.is_empty()
        || descriptor.choices.iter().any(|c| c == item)
    {
        Ok(())
    } else {
        Err(format!("`{item}` is not one of the allowed choices"))
    }
}

fn person_label(person: &PersonRef) -> String {
    person
        .display_name
        .clone()
        .unwrap_or_else(|| format!("#{}", person.id))
}

// ---------------------------------------------------------------------------
// WidgetRegistry
// ---------------------------------------------------------------------------

/// Maps semantic types to widgets.
#[derive(Clone, Default)]
pub struct WidgetRegistry {
    by_kind: BTreeMap<SemanticType, Arc<dyn FieldWidget>>,
}

impl WidgetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a built-in widget for every semantic type.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text: Arc<dyn FieldWidget> = Arc::new(TextWidget);
        let number: Arc<dyn FieldWidget> = Arc::new(NumberWidget);
        let person: Arc<dyn FieldWidget> = Arc::new(PersonWidget);
        for kind in [SemanticType::Text, SemanticType::Note, SemanticType::Choice] {
            registry.register(kind, Arc::clone(&text));
        }
        registry.register(SemanticType::Number, Arc::clone(&number));
        registry.register(SemanticType::Currency, number);
        registry.register(SemanticType::Boolean, Arc::new(CheckboxWidget));
        registry.register(SemanticType::DateTime, Arc::new(DateWidget));
        registry.register(SemanticType::MultiChoice, Arc::new(MultiChoiceWidget));
        registry.register(SemanticType::Person, Arc::clone(&person));
        registry.register(SemanticType::MultiPerson, person);
        registry
    }

    /// Registers `widget` for `kind`, returning the widget it replaces.
    pub fn register(
        &mut self,
        kind: SemanticType,
        widget: Arc<dyn FieldWidget>,
    ) -> Option<Arc<dyn FieldWidget>> {
        self.by_kind.insert(kind, widget)
    }

    /// Widget registered for `kind`.
    #[must_use]
    pub fn resolve(&self, kind: SemanticType) -> Option<Arc<dyn FieldWidget>> {
        self.by_kind.get(&kind).cloned()
    }
}

impl std::fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_kind.iter().map(|(kind, w)| (kind, w.name())))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RenderPlan
// ---------------------------------------------------------------------------

/// One field's rendered state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedField {
    pub key: String,
    pub label: String,
    pub widget: &'static str,
    pub text: String,
    pub editable: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<String>,
}

struct PlanEntry {
    key: String,
    widget: Arc<dyn FieldWidget>,
}

/// Widgets resolved for every field of one model, in key order.
pub struct RenderPlan {
    entries: Vec<PlanEntry>,
}

impl RenderPlan {
    /// Resolves a widget for each field of `model`. Fields whose kind has no
    /// registered widget are left out of the plan.
    #[must_use]
    pub fn resolve(registry: &WidgetRegistry, model: &FormModel) -> Self {
        let entries = model
            .fields()
            .filter_map(|field| {
                let descriptor = field.descriptor();
                let Some(widget) = registry.resolve(descriptor.kind) else {
                    warn!(key = %descriptor.key, kind = ?descriptor.kind, "no widget registered");
                    return None;
                };
                Some(PlanEntry {
                    key: descriptor.key.clone(),
                    widget,
                })
            })
            .collect();
        Self { entries }
    }

    /// Number of fields in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the widget resolved for `key`.
    #[must_use]
    pub fn widget_for(&self, key: &str) -> Option<&'static str> {
        self.entry(key).map(|entry| entry.widget.name())
    }

    /// Renders the current state of `model`.
    #[must_use]
    pub fn render(&self, model: &FormModel) -> Vec<RenderedField> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let field = model.field(&entry.key)?;
                let descriptor = field.descriptor();
                Some(RenderedField {
                    key: entry.key.clone(),
                    label: descriptor.label().to_string(),
                    widget: entry.widget.name(),
                    text: entry.widget.display(descriptor, field.value()),
                    editable: field.is_editable(),
                    required: descriptor.required,
                    invalid: field.invalid_reason().map(ToString::to_string),
                })
            })
            .collect()
    }

    /// Parses `input` through the field's widget and writes it as a user
    /// edit. Unparseable input flags the field invalid and leaves its value.
    ///
    /// # Errors
    ///
    /// [`FieldError::Unknown`] for a key outside the plan,
    /// [`FieldError::InvalidInput`] when parsing fails, or any error of
    /// [`FormModel::set`].
    pub fn apply_input(&self, model: &mut FormModel, key: &str, input: &str) -> Result<(), FieldError> {
        let entry = self.entry(key).ok_or_else(|| FieldError::Unknown {
            key: key.to_string(),
        })?;
        let descriptor = model
            .descriptor(key)
            .cloned()
            .ok_or_else(|| FieldError::Unknown {
                key: key.to_string(),
            })?;
        if descriptor.read_only {
            return Err(FieldError::ReadOnly {
                key: key.to_string(),
            });
        }
        match entry.widget.parse_input(&descriptor, input) {
            Ok(value) => model.set(key, value),
            Err(reason) => {
                model.flag_invalid(key, Some(reason.clone()))?;
                Err(FieldError::InvalidInput {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    fn entry(&self, key: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }
}

impl std::fmt::Debug for RenderPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (&e.key, e.widget.name())))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::FixedClock;
    use crate::mapper::{KeySource, SchemaMapper};
    use crate::schema::ColumnDef;
    use crate::test_support::column;

    fn model() -> FormModel {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
        let mut model = FormModel::new("Requests");
        let columns = vec![
            ColumnDef {
                required: true,
                ..column("Title", "Text")
            },
            column("Amount", "Currency"),
            column("Urgent", "Boolean"),
            column("Due", "DateTime"),
            ColumnDef {
                choices: vec!["A".into(), "B".into(), "C".into()],
                ..column("Tags", "MultiChoice")
            },
            column("Manager", "User"),
            ColumnDef {
                read_only: true,
                ..column("Code", "Text")
            },
        ];
        SchemaMapper::new(KeySource::InternalName, &clock).apply(&mut model, &columns);
        model
    }

    #[test]
    fn every_kind_has_a_default_widget() {
        let registry = WidgetRegistry::with_defaults();
        for kind in [
            SemanticType::Text,
            SemanticType::Note,
            SemanticType::Number,
            SemanticType::Currency,
            SemanticType::Boolean,
            SemanticType::DateTime,
            SemanticType::Choice,
            SemanticType::MultiChoice,
            SemanticType::Person,
            SemanticType::MultiPerson,
        ] {
            assert!(registry.resolve(kind).is_some(), "{kind:?}");
        }
    }

    #[test]
    fn plan_resolves_once_and_renders() {
        let mut model = model();
        let plan = RenderPlan::resolve(&WidgetRegistry::with_defaults(), &model);
        assert_eq!(plan.len(), model.len());
        assert_eq!(plan.widget_for("due"), Some("date"));
        assert_eq!(plan.widget_for("urgent"), Some("checkbox"));

        plan.apply_input(&mut model, "amount", "$1,250.5").unwrap();
        plan.apply_input(&mut model, "due", "3/5/2024").unwrap();
        plan.apply_input(&mut model, "tags", "A; C").unwrap();

        let rendered = plan.render(&model);
        let text = |key: &str| rendered.iter().find(|r| r.key == key).unwrap().text.clone();
        assert_eq!(text("amount"), "1250.50");
        assert_eq!(text("due"), "03/05/2024");
        assert_eq!(text("tags"), "A; C");
        assert_eq!(text("urgent"), "No");
        assert_eq!(text("title"), "");
    }

    #[test]
    fn bad_input_flags_the_field_and_keeps_value() {
        let mut model = model();
        let plan = RenderPlan::resolve(&WidgetRegistry::with_defaults(), &model);
        plan.apply_input(&mut model, "amount", "12").unwrap();

        let err = plan.apply_input(&mut model, "amount", "twelve").unwrap_err();
        assert!(matches!(err, FieldError::InvalidInput { .. }));
        assert_eq!(model.value("amount"), Some(&FieldValue::Number(12.0)));
        assert!(model.field("amount").unwrap().invalid_reason().is_some());

        plan.apply_input(&mut model, "amount", "13").unwrap();
        assert!(model.field("amount").unwrap().invalid_reason().is_none());
    }

    #[test]
    fn choices_are_enforced_without_fill_in() {
        let mut model = model();
        let plan = RenderPlan::resolve(&WidgetRegistry::with_defaults(), &model);
        assert!(plan.apply_input(&mut model, "tags", "A; Z").is_err());
    }

    #[test]
    fn read_only_and_unknown_fields_are_rejected() {
        let mut model = model();
        let plan = RenderPlan::resolve(&WidgetRegistry::with_defaults(), &model);
        assert!(matches!(
            plan.apply_input(&mut model, "code", "x"),
            Err(FieldError::ReadOnly { .. })
        ));
        assert!(matches!(
            plan.apply_input(&mut model, "ghost", "x"),
            Err(FieldError::Unknown { .. })
        ));
    }

    #[test]
    fn person_input_takes_ids() {
        let mut model = model();
        let plan = RenderPlan::resolve(&WidgetRegistry::with_defaults(), &model);
        plan.apply_input(&mut model, "manager", "12").unwrap();
        assert_eq!(
            model.value("manager"),
            Some(&FieldValue::Person(PersonRef::new(12)))
        );
        assert!(plan.apply_input(&mut model, "manager", "12;13").is_err());
    }

    #[test]
    fn custom_widget_replaces_default() {
        struct Shouty;
        impl FieldWidget for Shouty {
            fn name(&self) -> &'static str {
                "shouty"
            }
            fn display(&self, _: &FieldDescriptor, value: Option<&FieldValue>) -> String {
                match value {
                    Some(FieldValue::Text(t)) => t.to_uppercase(),
                    _ => String::new(),
                }
            }
            fn parse_input(&self, _: &FieldDescriptor, input: &str) -> Result<FieldValue, String> {
                Ok(FieldValue::Text(input.to_string()))
            }
        }

        let mut registry = WidgetRegistry::with_defaults();
        let previous = registry.register(SemanticType::Text, Arc::new(Shouty));
        assert_eq!(previous.map(|w| w.name()), Some("text"));

        let mut model = model();
        let plan = RenderPlan::resolve(&registry, &model);
        plan.apply_input(&mut model, "title", "hello").unwrap();
        let rendered = plan.render(&model);
        assert_eq!(rendered.iter().find(|r| r.key == "title").unwrap().text, "HELLO");
    }
}

use std::time::Duration;

use listform_core::{KeySource, PermissionPolicy, ValidationRules};
use serde::{Deserialize, Serialize};

/// Per-form configuration.
///
/// Carried by the session context; nothing here is global. Every field has
/// a default so a partial JSON document deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormConfig {
    /// List whose items the form edits.
    pub list_name: String,
    /// Column name the exposed field keys derive from.
    pub key_source: KeySource,
    /// Field keys the presentation layer binds. Empty means every mapped field.
    pub bound_fields: Vec<String>,
    /// Internal name of the boolean "submitted" column, if the list has one.
    pub submitted_field: Option<String>,
    /// Submitting requires at least one attachment.
    pub attachments_required: bool,
    /// Group rules for the save/print/delete flags.
    pub permissions: PermissionPolicy,
    /// List system errors are written to. `None` keeps them in the log only.
    pub error_log_list: Option<String>,
    /// Workflow history list. `None` disables the history feature.
    pub history_list: Option<String>,
    /// Column of the history list holding the parent record id.
    pub history_record_field: String,
    /// Return conversion failures to the caller instead of logging them.
    pub debug: bool,
    /// Per-step timeout in milliseconds. `None` disables the timeout.
    pub step_timeout_ms: Option<u64>,
    /// Delay before the status line is hidden after initialization.
    pub status_hide_delay_ms: u64,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            list_name: String::new(),
            key_source: KeySource::InternalName,
            bound_fields: Vec::new(),
            submitted_field: Some("Submitted".to_string()),
            attachments_required: false,
            permissions: PermissionPolicy::default(),
            error_log_list: Some("ErrorLog".to_string()),
            history_list: None,
            history_record_field: "RecordId".to_string(),
            debug: false,
            step_timeout_ms: Some(30_000),
            status_hide_delay_ms: 1_500,
        }
    }
}

impl FormConfig {
    /// Config for `list_name` with every other setting at its default.
    pub fn for_list(list_name: impl Into<String>) -> Self {
        Self {
            list_name: list_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            attachments_required: self.attachments_required,
        }
    }
}

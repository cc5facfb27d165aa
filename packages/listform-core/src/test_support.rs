//! Shared fixtures for unit tests.

use std::sync::Mutex;

use crate::schema::ColumnDef;
use crate::traits::{ChangeOrigin, FieldObserver};
use crate::types::FieldValue;

/// Observer that records every notification.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<(String, Option<FieldValue>, FieldValue, ChangeOrigin)>>,
}

impl FieldObserver for Recorder {
    fn on_change(&self, key: &str, old: Option<&FieldValue>, new: &FieldValue, origin: ChangeOrigin) {
        self.seen
            .lock()
            .unwrap()
            .push((key.to_string(), old.cloned(), new.clone(), origin));
    }
}

/// Column with the given internal name and type; display name mirrors it.
pub fn column(internal: &str, type_name: &str) -> ColumnDef {
    ColumnDef {
        internal_name: internal.to_string(),
        display_name: internal.to_string(),
        type_name: type_name.to_string(),
        ..ColumnDef::default()
    }
}

/// The two-field request schema: required `Title`, optional `Amount`.
pub fn request_schema() -> Vec<ColumnDef> {
    vec![
        ColumnDef {
            required: true,
            ..column("Title", "Text")
        },
        column("Amount", "Number"),
    ]
}

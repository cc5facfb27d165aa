//! [`ErrorSink`] implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::traits::{ErrorEntry, ErrorSink, ListStore, RawItem};

/// Writes each error as an item of an error-log list.
pub struct ListErrorSink {
    store: Arc<dyn ListStore>,
    list: String,
}

impl ListErrorSink {
    pub fn new(store: Arc<dyn ListStore>, list: impl Into<String>) -> Self {
        Self {
            store,
            list: list.into(),
        }
    }

    fn item(entry: &ErrorEntry) -> RawItem {
        let item = json!({
            "Title": entry.operation,
            "Message": entry.message,
            "ListName": entry.list,
            "RecordId": entry.record_id,
            "UserName": entry.user,
            "Occurred": entry.at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        match item {
            Value::Object(map) => map,
            _ => RawItem::new(),
        }
    }
}

#[async_trait]
impl ErrorSink for ListErrorSink {
    async fn log_error(&self, entry: ErrorEntry) {
        error!(operation = %entry.operation, list = %entry.list, record_id = ?entry.record_id, "{}", entry.message);
        if let Err(e) = self.store.create_item(&self.list, Self::item(&entry)).await {
            warn!(error = %e, log_list = %self.list, "could not write to the error log");
        }
    }
}

/// Logs errors through `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

#[async_trait]
impl ErrorSink for TracingErrorSink {
    async fn log_error(&self, entry: ErrorEntry) {
        error!(operation = %entry.operation, list = %entry.list, record_id = ?entry.record_id, "{}", entry.message);
    }
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct MemoryErrorSink {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl MemoryErrorSink {
    #[must_use]
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn log_error(&self, entry: ErrorEntry) {
        self.entries.lock().push(entry);
    }
}

use std::sync::Arc;

use crate::types::FieldValue;

/// Where a field write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Edit written back by the binding layer.
    User,
    /// Value loaded from the list store or a schema default.
    Load,
}

/// Write-path notification for reactive fields.
///
/// The binding layer implements this to re-render when a cell changes.
/// Used as `Arc<dyn FieldObserver>`.
pub trait FieldObserver: Send + Sync {
    /// Called after every accepted write. `old` is `None` when the field had
    /// never been set.
    fn on_change(
        &self,
        key: &str,
        old: Option<&FieldValue>,
        new: &FieldValue,
        origin: ChangeOrigin,
    );

    /// Called when a load leaves the field unset. `old` is the value that
    /// was discarded.
    fn on_unset(&self, _key: &str, _old: &FieldValue) {}
}

/// Observer that fans out to multiple observers.
#[derive(Default, Clone)]
pub struct CompositeFieldObserver {
    observers: Vec<Arc<dyn FieldObserver>>,
}

impl CompositeFieldObserver {
    /// Creates a composite observer with the given list of observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn FieldObserver>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn FieldObserver>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for CompositeFieldObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFieldObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl FieldObserver for CompositeFieldObserver {
    fn on_change(
        &self,
        key: &str,
        old: Option<&FieldValue>,
        new: &FieldValue,
        origin: ChangeOrigin,
    ) {
        for observer in &self.observers {
            observer.on_change(key, old, new, origin);
        }
    }

    fn on_unset(&self, key: &str, old: &FieldValue) {
        for observer in &self.observers {
            observer.on_unset(key, old);
        }
    }
}

//! Reactive field: one observable value cell paired with its descriptor.

use std::sync::Arc;

use crate::schema::{FieldDescriptor, SemanticType};
use crate::traits::{ChangeOrigin, CompositeFieldObserver, FieldObserver};
use crate::types::FieldValue;

/// Errors from writing to a reactive field or addressing a missing one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("field `{key}` expects a {expected:?} value")]
    ShapeMismatch { key: String, expected: SemanticType },
    #[error("field `{key}` is read-only")]
    ReadOnly { key: String },
    #[error("unknown field `{key}`")]
    Unknown { key: String },
    #[error("field `{key}` cannot parse input: {reason}")]
    InvalidInput { key: String, reason: String },
}

/// Observable value cell bound to a [`FieldDescriptor`].
///
/// The value's shape always conforms to the descriptor's semantic type:
/// writes that do not conform are rejected rather than coerced.
#[derive(Debug, Clone)]
pub struct ReactiveField {
    descriptor: Arc<FieldDescriptor>,
    value: Option<FieldValue>,
    dirty: bool,
    invalid: Option<String>,
    observers: CompositeFieldObserver,
}

impl ReactiveField {
    /// Creates a field holding the descriptor's default value.
    #[must_use]
    pub fn new(descriptor: Arc<FieldDescriptor>) -> Self {
        let value = Some(descriptor.default_value.clone());
        Self {
            descriptor,
            value,
            dirty: false,
            invalid: None,
            observers: CompositeFieldObserver::default(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<FieldDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    /// Current value. `None` means the field was never set.
    #[must_use]
    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    /// Whether the binding layer may write to this field.
    #[must_use]
    pub fn is_editable(&self) -> bool {
        !self.descriptor.read_only
    }

    /// Whether a user edit happened since the last load.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Message attached by the binding layer when the user's input was rejected.
    #[must_use]
    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    /// Flags (or clears, with `None`) the field as holding invalid input.
    pub fn flag_invalid(&mut self, reason: Option<String>) {
        self.invalid = reason;
    }

    pub fn subscribe(&mut self, observer: Arc<dyn FieldObserver>) {
        self.observers.add(observer);
    }

    /// User edit. Rejected for read-only fields; marks the field dirty and
    /// clears any invalid flag.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ReadOnly`] or [`FieldError::ShapeMismatch`].
    pub fn set(&mut self, value: FieldValue) -> Result<(), FieldError> {
        if self.descriptor.read_only {
            return Err(FieldError::ReadOnly {
                key: self.descriptor.key.clone(),
            });
        }
        self.write(value, ChangeOrigin::User)?;
        self.dirty = true;
        self.invalid = None;
        Ok(())
    }

    /// Data-load write. Bypasses the read-only check and resets dirtiness.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ShapeMismatch`] when `value` does not conform.
    pub fn load(&mut self, value: FieldValue) -> Result<(), FieldError> {
        self.write(value, ChangeOrigin::Load)?;
        self.dirty = false;
        Ok(())
    }

    /// Data-load reset to the never-set state. The field is then omitted
    /// from save payloads until written again.
    pub fn unset(&mut self) {
        self.dirty = false;
        self.invalid = None;
        if let Some(old) = self.value.take() {
            self.observers.on_unset(&self.descriptor.key, &old);
        }
    }

    fn write(&mut self, value: FieldValue, origin: ChangeOrigin) -> Result<(), FieldError> {
        if !value.conforms_to(self.descriptor.kind) {
            return Err(FieldError::ShapeMismatch {
                key: self.descriptor.key.clone(),
                expected: self.descriptor.kind,
            });
        }
        let old = self.value.replace(value);
        if let Some(new) = &self.value {
            self.observers
                .on_change(&self.descriptor.key, old.as_ref(), new, origin);
        }
        Ok(())
    }
}

//! Form model: the aggregate root for one record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::{FieldError, ReactiveField};
use crate::schema::FieldDescriptor;
use crate::traits::{CompositeFieldObserver, FieldObserver};
use crate::types::{ActorRef, FieldValue, UserProfile};

/// Errors from record-level model operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("record identity already assigned ({current}); refusing to change it to {attempted}")]
    IdentityAlreadyAssigned { current: u64, attempted: u64 },
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// One half of the audit block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub by: ActorRef,
}

/// Created/modified audit information. Both stamps are always present together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditBlock {
    pub created: Stamp,
    pub modified: Stamp,
}

impl AuditBlock {
    /// Builds the block only when all four parts are available.
    #[must_use]
    pub fn from_parts(
        created_at: Option<DateTime<Utc>>,
        created_by: Option<ActorRef>,
        modified_at: Option<DateTime<Utc>>,
        modified_by: Option<ActorRef>,
    ) -> Option<Self> {
        Some(Self {
            created: Stamp {
                at: created_at?,
                by: created_by?,
            },
            modified: Stamp {
                at: modified_at?,
                by: modified_by?,
            },
        })
    }

    /// Mutable access to both actor references, for identity resolution.
    pub fn actors_mut(&mut self) -> [&mut ActorRef; 2] {
        [&mut self.created.by, &mut self.modified.by]
    }
}

/// File attached to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Workflow/history log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub actor: Option<String>,
    pub action: String,
    pub comment: Option<String>,
}

/// Actions the current user may take on the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_save: bool,
    pub can_print: bool,
    pub can_delete: bool,
}

/// Group-based rules for computing [`Permissions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionPolicy {
    /// Members may save any record and delete existing ones.
    pub admin_groups: Vec<String>,
    /// Members may save existing records. Empty means everyone may.
    pub editor_groups: Vec<String>,
}

impl PermissionPolicy {
    /// Evaluates the policy for `user` against the model's current state.
    ///
    /// Without a known user only new records can be saved.
    #[must_use]
    pub fn evaluate(&self, user: Option<&UserProfile>, model: &FormModel) -> Permissions {
        if model.is_deleted() {
            return Permissions::default();
        }
        let is_new = model.is_new();
        let Some(user) = user else {
            return Permissions {
                can_save: is_new,
                can_print: !is_new,
                can_delete: false,
            };
        };
        let admin = user.in_any_group(&self.admin_groups);
        let author = model
            .audit()
            .is_some_and(|audit| audit.created.by.id() == user.id);
        let editor = self.editor_groups.is_empty() || user.in_any_group(&self.editor_groups);
        Permissions {
            can_save: is_new || admin || editor || author,
            can_print: !is_new,
            can_delete: !is_new && admin,
        }
    }
}

/// Aggregate of all reactive fields plus record-level state for one record.
#[derive(Debug, Clone)]
pub struct FormModel {
    list_name: String,
    id: Option<u64>,
    fields: BTreeMap<String, ReactiveField>,
    registry: BTreeSet<String>,
    audit: Option<AuditBlock>,
    attachments: Vec<Attachment>,
    permissions: Permissions,
    history: Vec<HistoryEntry>,
    deleted: bool,
    observers: CompositeFieldObserver,
}

impl FormModel {
    #[must_use]
    pub fn new(list_name: impl Into<String>) -> Self {
        Self {
            list_name: list_name.into(),
            id: None,
            fields: BTreeMap::new(),
            registry: BTreeSet::new(),
            audit: None,
            attachments: Vec::new(),
            permissions: Permissions::default(),
            history: Vec::new(),
            deleted: false,
            observers: CompositeFieldObserver::default(),
        }
    }

    #[must_use]
    pub fn list_name(&self) -> &str {
        &self.list_name
    }

    /// Record identity; `None` until the first successful create.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Assigns the record identity. Returns `true` if it was previously unset.
    ///
    /// Re-assigning the same id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::IdentityAlreadyAssigned`] for a different id.
    pub fn assign_id(&mut self, id: u64) -> Result<bool, ModelError> {
        match self.id {
            None => {
                self.id = Some(id);
                Ok(true)
            }
            Some(current) if current == id => Ok(false),
            Some(current) => Err(ModelError::IdentityAlreadyAssigned {
                current,
                attempted: id,
            }),
        }
    }

    /// Adds a field for `descriptor` unless its key already exists.
    ///
    /// The key is also recorded in the sorted field registry. Returns whether
    /// a field was added.
    pub fn insert_field(&mut self, descriptor: FieldDescriptor) -> bool {
        if self.fields.contains_key(&descriptor.key) {
            return false;
        }
        let key = descriptor.key.clone();
        let mut field = ReactiveField::new(Arc::new(descriptor));
        if !self.observers.is_empty() {
            field.subscribe(Arc::new(self.observers.clone()));
        }
        self.registry.insert(key.clone());
        self.fields.insert(key, field);
        true
    }

    /// Subscribes `observer` to every current and future field.
    pub fn subscribe(&mut self, observer: Arc<dyn FieldObserver>) {
        for field in self.fields.values_mut() {
            field.subscribe(Arc::clone(&observer));
        }
        self.observers.add(observer);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&ReactiveField> {
        self.fields.get(key)
    }

    /// Fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = &ReactiveField> {
        self.fields.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sorted registry of schema-derived field keys.
    #[must_use]
    pub fn registry(&self) -> &BTreeSet<String> {
        &self.registry
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).and_then(ReactiveField::value)
    }

    #[must_use]
    pub fn descriptor(&self, key: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(key).map(ReactiveField::descriptor)
    }

    /// User edit of one field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown, read-only, or mis-shaped writes.
    pub fn set(&mut self, key: &str, value: FieldValue) -> Result<(), FieldError> {
        self.field_mut(key)?.set(value)
    }

    /// Data-load write of one field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for unknown or mis-shaped writes.
    pub fn load(&mut self, key: &str, value: FieldValue) -> Result<(), FieldError> {
        self.field_mut(key)?.load(value)
    }

    /// Flags or clears the invalid marker the binding layer maintains.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Unknown`] for a missing key.
    pub fn flag_invalid(&mut self, key: &str, reason: Option<String>) -> Result<(), FieldError> {
        self.field_mut(key)?.flag_invalid(reason);
        Ok(())
    }

    fn field_mut(&mut self, key: &str) -> Result<&mut ReactiveField, FieldError> {
        self.fields.get_mut(key).ok_or_else(|| FieldError::Unknown {
            key: key.to_string(),
        })
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = &mut ReactiveField> {
        self.fields.values_mut()
    }

    /// Snapshot of all set values keyed by field key.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, FieldValue> {
        self.fields
            .iter()
            .filter_map(|(k, f)| f.value().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    #[must_use]
    pub fn audit(&self) -> Option<&AuditBlock> {
        self.audit.as_ref()
    }

    pub fn audit_mut(&mut self) -> Option<&mut AuditBlock> {
        self.audit.as_mut()
    }

    /// Replaces the audit block. `None` leaves the current block untouched,
    /// so a partial reload never blanks known audit data.
    pub fn set_audit(&mut self, audit: Option<AuditBlock>) {
        if audit.is_some() {
            self.audit = audit;
        }
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn set_attachments(&mut self, attachments: Vec<Attachment>) {
        self.attachments = attachments;
    }

    #[must_use]
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Replaces the history log with the entries of a fresh load.
    pub fn replace_history(&mut self, entries: Vec<HistoryEntry>) {
        self.history = entries;
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Marks the record as deleted. Identity is retained.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.permissions = Permissions::default();
    }
}

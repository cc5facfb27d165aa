//! listform core: field descriptors, reactive fields, the form model, schema
//! mapping, value binding, validation and wire serialization.
//!
//! Everything here is synchronous and I/O-free. Remote collaborators and the
//! step sequencer live in `listform-runtime`.

pub mod bind;
pub mod clock;
pub mod dates;
pub mod field;
pub mod fragment;
pub mod mapper;
pub mod model;
pub mod naming;
pub mod sanitize;
pub mod schema;
pub mod traits;
pub mod types;
pub mod validate;
pub mod widget;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use bind::{BindReport, ConversionError};
pub use clock::{ClockSource, FixedClock, SystemClock};
pub use dates::parse_date;
pub use field::{FieldError, ReactiveField};
pub use fragment::{format_fragment, parse_fragment};
pub use mapper::{KeySource, MappingReport, SchemaMapper};
pub use model::{
    Attachment, AuditBlock, FormModel, HistoryEntry, ModelError, PermissionPolicy, Permissions,
};
pub use naming::to_identifier;
pub use schema::{ColumnDef, FieldDescriptor, SemanticType, ValidationResult};
pub use traits::{ChangeOrigin, CompositeFieldObserver, FieldObserver};
pub use types::{ActorRef, FieldValue, PersonRef, UserProfile};
pub use validate::{validate, ValidationRules};
pub use widget::{FieldWidget, RenderPlan, RenderedField, WidgetRegistry};
pub use wire::{build_payload, compute_editable_fields, serialize, StoreCapability};

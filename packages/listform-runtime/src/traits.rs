use async_trait::async_trait;
use chrono::{DateTime, Utc};
use listform_core::{Attachment, ColumnDef, StoreCapability, UserProfile};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw list item as returned by the store, keyed by internal column name.
pub type RawItem = Map<String, Value>;

/// Failures reported by remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Simple item query: equality filters, optional ordering and a row cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub list: String,
    /// `(internal name, value)` pairs that must all match.
    pub equals: Vec<(String, Value)>,
    pub order_by: Option<String>,
    pub descending: bool,
    pub top: Option<usize>,
}

impl ItemQuery {
    #[must_use]
    pub fn new(list: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.equals.push((field.into(), value));
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(field.into());
        self.descending = descending;
        self
    }

    #[must_use]
    pub fn top(mut self, n: usize) -> Self {
        self.top = Some(n);
        self
    }
}

/// File content handed to [`ListStore::add_attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// One system error as written to the error sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    /// Operation that failed, e.g. `"save"` or `"bind"`.
    pub operation: String,
    pub message: String,
    pub list: String,
    pub record_id: Option<u64>,
    pub user: Option<String>,
}

/// Remote document-list service.
///
/// Implementations translate their backend generation's wire format into
/// [`ColumnDef`] and [`RawItem`] and report failures as [`RemoteError`].
#[async_trait]
pub trait ListStore: Send + Sync {
    /// API generation this store speaks. Fixed for the store's lifetime.
    fn capability(&self) -> StoreCapability;

    /// Column definitions of `list`.
    async fn get_schema(&self, list: &str) -> Result<Vec<ColumnDef>, RemoteError>;

    /// A single item. `Ok(None)` means the item does not exist.
    async fn get_item(&self, list: &str, id: u64) -> Result<Option<RawItem>, RemoteError>;

    async fn query_items(&self, query: &ItemQuery) -> Result<Vec<RawItem>, RemoteError>;

    /// Creates an item and returns its new identity.
    async fn create_item(&self, list: &str, payload: RawItem) -> Result<u64, RemoteError>;

    async fn update_item(&self, list: &str, id: u64, payload: RawItem) -> Result<(), RemoteError>;

    async fn delete_item(&self, list: &str, id: u64) -> Result<(), RemoteError>;

    async fn add_attachment(
        &self,
        list: &str,
        id: u64,
        file: &FileUpload,
    ) -> Result<Attachment, RemoteError>;

    async fn delete_attachment(&self, list: &str, id: u64, file_name: &str) -> Result<(), RemoteError>;
}

/// Remote identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Profile of the signed-in user.
    async fn current_user(&self) -> Result<UserProfile, RemoteError>;

    /// Profile for a site user id. `Ok(None)` when the id is unknown.
    async fn user_by_id(&self, id: u64) -> Result<Option<UserProfile>, RemoteError>;
}

/// Destination for system errors. Never fails: implementations swallow
/// their own write errors.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn log_error(&self, entry: ErrorEntry);
}

/// User-facing status surface.
pub trait StatusDisplay: Send + Sync {
    /// Transient status line. `success == false` renders as an error.
    fn show(&self, success: bool, message: &str);

    fn hide(&self);

    /// Modal message the user must acknowledge.
    fn alert(&self, message: &str);
}

/// Holder of the URL fragment that persists the record identity.
pub trait FragmentStore: Send + Sync {
    fn read(&self) -> Option<String>;

    fn write(&self, fragment: &str);
}

//! In-memory collaborators for tests, fixtures and the inspect CLI.
//!
//! [`MemoryListStore`] keeps lists in a [`DashMap`], records every call in a
//! journal and can be told to fail the next call of a given operation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use dashmap::{DashMap, DashSet};
use listform_core::{Attachment, ClockSource, ColumnDef, StoreCapability, SystemClock, UserProfile};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::traits::{
    FileUpload, FragmentStore, IdentityProvider, ItemQuery, ListStore, RawItem, RemoteError,
};

// ---------------------------------------------------------------------------
// MemoryListStore
// ---------------------------------------------------------------------------

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    GetSchema { list: String },
    GetItem { list: String, id: u64 },
    QueryItems { list: String },
    CreateItem { list: String },
    UpdateItem { list: String, id: u64 },
    DeleteItem { list: String, id: u64 },
    AddAttachment { list: String, id: u64, file_name: String },
    DeleteAttachment { list: String, id: u64, file_name: String },
}

impl StoreCall {
    /// Operation name, as accepted by [`MemoryListStore::fail_next`].
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::GetSchema { .. } => "get_schema",
            Self::GetItem { .. } => "get_item",
            Self::QueryItems { .. } => "query_items",
            Self::CreateItem { .. } => "create_item",
            Self::UpdateItem { .. } => "update_item",
            Self::DeleteItem { .. } => "delete_item",
            Self::AddAttachment { .. } => "add_attachment",
            Self::DeleteAttachment { .. } => "delete_attachment",
        }
    }
}

#[derive(Debug, Default)]
struct ListData {
    columns: Vec<ColumnDef>,
    items: BTreeMap<u64, RawItem>,
    attachments: BTreeMap<u64, Vec<Attachment>>,
    next_id: u64,
}

/// [`ListStore`] held entirely in memory.
///
/// Created and updated items get `Id`, `Created`/`Modified` and, when an
/// acting user is set, `AuthorId`/`EditorId` stamps. Reads include the
/// item's attachments as `AttachmentFiles`.
pub struct MemoryListStore {
    capability: StoreCapability,
    lists: DashMap<String, ListData>,
    journal: Mutex<Vec<StoreCall>>,
    failures: DashMap<&'static str, RemoteError>,
    stalls: DashSet<&'static str>,
    acting_user: RwLock<Option<u64>>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryListStore {
    #[must_use]
    pub fn new(capability: StoreCapability) -> Self {
        Self {
            capability,
            lists: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            stalls: DashSet::new(),
            acting_user: RwLock::new(None),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates (or resets) `list` with the given columns.
    pub fn add_list(&self, list: &str, columns: Vec<ColumnDef>) {
        self.lists.insert(
            list.to_string(),
            ListData {
                columns,
                next_id: 1,
                ..ListData::default()
            },
        );
    }

    /// Seeds an item. Uses its `Id`/`ID` when present, else the next free id.
    pub fn insert_item(&self, list: &str, mut item: RawItem) -> u64 {
        let mut data = self.lists.entry(list.to_string()).or_insert_with(|| ListData {
            next_id: 1,
            ..ListData::default()
        });
        let id = ["Id", "ID"]
            .iter()
            .find_map(|k| item.get(*k).and_then(Value::as_u64))
            .unwrap_or(data.next_id);
        data.next_id = data.next_id.max(id + 1);
        if let Some(files) = item.remove("AttachmentFiles") {
            let attachments = listform_core::bind::unwrap_collection(&files)
                .map(|items| items.iter().filter_map(listform_core::bind::attachment).collect())
                .unwrap_or_default();
            data.attachments.insert(id, attachments);
        }
        item.insert("Id".to_string(), json!(id));
        data.items.insert(id, item);
        id
    }

    /// Stored items of `list` in id order, without attachment expansion.
    #[must_use]
    pub fn items(&self, list: &str) -> Vec<RawItem> {
        self.lists
            .get(list)
            .map(|data| data.items.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stamps subsequent writes with this user as author/editor.
    pub fn act_as(&self, user_id: Option<u64>) {
        *self.acting_user.write() = user_id;
    }

    /// Makes the next call of `operation` (e.g. `"create_item"`) fail.
    pub fn fail_next(&self, operation: &'static str, error: RemoteError) {
        self.failures.insert(operation, error);
    }

    /// Makes the next call of `operation` never complete.
    pub fn stall_next(&self, operation: &'static str) {
        self.stalls.insert(operation);
    }

    #[must_use]
    pub fn journal(&self) -> Vec<StoreCall> {
        self.journal.lock().clone()
    }

    /// Operation names of the journal, in call order.
    #[must_use]
    pub fn operations(&self) -> Vec<&'static str> {
        self.journal.lock().iter().map(StoreCall::operation).collect()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    async fn record(&self, call: StoreCall) -> Result<(), RemoteError> {
        let operation = call.operation();
        self.journal.lock().push(call);
        if self.stalls.remove(operation).is_some() {
            std::future::pending::<()>().await;
        }
        match self.failures.remove(operation) {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }

    fn now(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn missing_list(list: &str) -> RemoteError {
        RemoteError::not_found(format!("list `{list}`"))
    }

    fn missing_item(list: &str, id: u64) -> RemoteError {
        RemoteError::not_found(format!("item {id} of `{list}`"))
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    fn capability(&self) -> StoreCapability {
        self.capability
    }

    async fn get_schema(&self, list: &str) -> Result<Vec<ColumnDef>, RemoteError> {
        self.record(StoreCall::GetSchema {
            list: list.to_string(),
        })
        .await?;
        self.lists
            .get(list)
            .map(|data| data.columns.clone())
            .ok_or_else(|| Self::missing_list(list))
    }

    async fn get_item(&self, list: &str, id: u64) -> Result<Option<RawItem>, RemoteError> {
        self.record(StoreCall::GetItem {
            list: list.to_string(),
            id,
        })
        .await?;
        let data = self.lists.get(list).ok_or_else(|| Self::missing_list(list))?;
        Ok(data.items.get(&id).map(|item| {
            let mut item = item.clone();
            let files = data.attachments.get(&id).cloned().unwrap_or_default();
            let files: Vec<Value> = files
                .iter()
                .map(|a| json!({ "FileName": a.file_name, "ServerRelativeUrl": a.url }))
                .collect();
            item.insert("AttachmentFiles".to_string(), json!({ "results": files }));
            item
        }))
    }

    async fn query_items(&self, query: &ItemQuery) -> Result<Vec<RawItem>, RemoteError> {
        self.record(StoreCall::QueryItems {
            list: query.list.clone(),
        })
        .await?;
        let data = self
            .lists
            .get(&query.list)
            .ok_or_else(|| Self::missing_list(&query.list))?;
        let mut rows: Vec<RawItem> = data
            .items
            .values()
            .filter(|item| {
                query
                    .equals
                    .iter()
                    .all(|(field, value)| item.get(field) == Some(value))
            })
            .cloned()
            .collect();
        if let Some(field) = &query.order_by {
            rows.sort_by(|a, b| compare(a.get(field), b.get(field)));
            if query.descending {
                rows.reverse();
            }
        }
        if let Some(top) = query.top {
            rows.truncate(top);
        }
        Ok(rows)
    }

    async fn create_item(&self, list: &str, mut payload: RawItem) -> Result<u64, RemoteError> {
        self.record(StoreCall::CreateItem {
            list: list.to_string(),
        })
        .await?;
        let now = self.now();
        let actor = *self.acting_user.read();
        let mut data = self
            .lists
            .get_mut(list)
            .ok_or_else(|| Self::missing_list(list))?;
        let id = data.next_id;
        data.next_id += 1;
        payload.insert("Id".to_string(), json!(id));
        payload.insert("Created".to_string(), json!(now));
        payload.insert("Modified".to_string(), json!(now));
        if let Some(actor) = actor {
            payload.insert("AuthorId".to_string(), json!(actor));
            payload.insert("EditorId".to_string(), json!(actor));
        }
        data.items.insert(id, payload);
        Ok(id)
    }

    async fn update_item(&self, list: &str, id: u64, payload: RawItem) -> Result<(), RemoteError> {
        self.record(StoreCall::UpdateItem {
            list: list.to_string(),
            id,
        })
        .await?;
        let now = self.now();
        let actor = *self.acting_user.read();
        let mut data = self
            .lists
            .get_mut(list)
            .ok_or_else(|| Self::missing_list(list))?;
        let item = data
            .items
            .get_mut(&id)
            .ok_or_else(|| Self::missing_item(list, id))?;
        item.extend(payload);
        item.insert("Modified".to_string(), json!(now));
        if let Some(actor) = actor {
            item.insert("EditorId".to_string(), json!(actor));
        }
        Ok(())
    }

    async fn delete_item(&self, list: &str, id: u64) -> Result<(), RemoteError> {
        self.record(StoreCall::DeleteItem {
            list: list.to_string(),
            id,
        })
        .await?;
        let mut data = self
            .lists
            .get_mut(list)
            .ok_or_else(|| Self::missing_list(list))?;
        data.attachments.remove(&id);
        data.items
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Self::missing_item(list, id))
    }

    async fn add_attachment(
        &self,
        list: &str,
        id: u64,
        file: &FileUpload,
    ) -> Result<Attachment, RemoteError> {
        self.record(StoreCall::AddAttachment {
            list: list.to_string(),
            id,
            file_name: file.file_name.clone(),
        })
        .await?;
        let mut data = self
            .lists
            .get_mut(list)
            .ok_or_else(|| Self::missing_list(list))?;
        if !data.items.contains_key(&id) {
            return Err(Self::missing_item(list, id));
        }
        let files = data.attachments.entry(id).or_default();
        if files.iter().any(|a| a.file_name == file.file_name) {
            return Err(RemoteError::Conflict(format!(
                "attachment `{}` already exists",
                file.file_name
            )));
        }
        let attachment = Attachment {
            file_name: file.file_name.clone(),
            url: Some(format!("/Lists/{list}/Attachments/{id}/{}", file.file_name)),
        };
        files.push(attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachment(&self, list: &str, id: u64, file_name: &str) -> Result<(), RemoteError> {
        self.record(StoreCall::DeleteAttachment {
            list: list.to_string(),
            id,
            file_name: file_name.to_string(),
        })
        .await?;
        let mut data = self
            .lists
            .get_mut(list)
            .ok_or_else(|| Self::missing_list(list))?;
        let files = data
            .attachments
            .get_mut(&id)
            .ok_or_else(|| Self::missing_item(list, id))?;
        let before = files.len();
        files.retain(|a| a.file_name != file_name);
        if files.len() == before {
            return Err(RemoteError::not_found(format!("attachment `{file_name}`")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryIdentity
// ---------------------------------------------------------------------------

/// [`IdentityProvider`] over a fixed user table.
#[derive(Debug, Default)]
pub struct MemoryIdentity {
    users: DashMap<u64, UserProfile>,
    current: RwLock<Option<u64>>,
    lookups: Mutex<Vec<u64>>,
}

impl MemoryIdentity {
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = UserProfile>) -> Self {
        let identity = Self::default();
        for user in users {
            identity.users.insert(user.id, user);
        }
        identity
    }

    /// Signs in `id`. `None` signs out.
    pub fn sign_in(&self, id: Option<u64>) {
        *self.current.write() = id;
    }

    /// Ids passed to `user_by_id`, in call order.
    #[must_use]
    pub fn lookups(&self) -> Vec<u64> {
        self.lookups.lock().clone()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn current_user(&self) -> Result<UserProfile, RemoteError> {
        let id = (*self.current.read()).ok_or_else(|| RemoteError::not_found("signed-in user"))?;
        self.users
            .get(&id)
            .map(|u| u.clone())
            .ok_or_else(|| RemoteError::not_found(format!("user {id}")))
    }

    async fn user_by_id(&self, id: u64) -> Result<Option<UserProfile>, RemoteError> {
        self.lookups.lock().push(id);
        Ok(self.users.get(&id).map(|u| u.clone()))
    }
}

// ---------------------------------------------------------------------------
// MemoryFragment
// ---------------------------------------------------------------------------

/// [`FragmentStore`] holding the fragment in memory.
#[derive(Debug, Default)]
pub struct MemoryFragment {
    fragment: RwLock<Option<String>>,
}

impl MemoryFragment {
    #[must_use]
    pub fn new(initial: Option<&str>) -> Self {
        Self {
            fragment: RwLock::new(initial.map(ToString::to_string)),
        }
    }
}

impl FragmentStore for MemoryFragment {
    fn read(&self) -> Option<String> {
        self.fragment.read().clone()
    }

    fn write(&self, fragment: &str) {
        *self.fragment.write() = Some(fragment.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryListStore {
        let store = MemoryListStore::new(StoreCapability::Modern);
        store.add_list("Requests", Vec::new());
        store
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let store = store();
        store.act_as(Some(7));
        let id = store
            .create_item("Requests", RawItem::from_iter([("Title".to_string(), json!("A"))]))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let item = store.get_item("Requests", id).await.unwrap().unwrap();
        assert_eq!(item["Title"], json!("A"));
        assert_eq!(item["AuthorId"], json!(7));
        assert_eq!(item["AttachmentFiles"], json!({ "results": [] }));
        assert_eq!(store.get_item("Requests", 99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failure_injection_is_one_shot() {
        let store = store();
        store.fail_next("create_item", RemoteError::Unavailable("down".into()));
        assert!(store.create_item("Requests", RawItem::new()).await.is_err());
        assert!(store.create_item("Requests", RawItem::new()).await.is_ok());
        assert_eq!(store.operations(), ["create_item", "create_item"]);
    }

    #[tokio::test]
    async fn query_filters_orders_and_caps() {
        let store = store();
        for (record, step) in [(1, "b"), (2, "x"), (1, "a"), (1, "c")] {
            store.insert_item(
                "Requests",
                RawItem::from_iter([
                    ("RecordId".to_string(), json!(record)),
                    ("Step".to_string(), json!(step)),
                ]),
            );
        }
        let rows = store
            .query_items(&ItemQuery::new("Requests").filter("RecordId", json!(1)).order_by("Step", true).top(2))
            .await
            .unwrap();
        let steps: Vec<&Value> = rows.iter().map(|r| &r["Step"]).collect();
        assert_eq!(steps, [&json!("c"), &json!("b")]);
    }

    #[tokio::test]
    async fn attachments_need_an_existing_item_and_unique_names() {
        let store = store();
        let file = FileUpload::new("a.pdf", b"%PDF".to_vec());
        assert!(matches!(
            store.add_attachment("Requests", 1, &file).await,
            Err(RemoteError::NotFound { .. })
        ));

        let id = store.insert_item("Requests", RawItem::new());
        store.add_attachment("Requests", id, &file).await.unwrap();
        assert!(matches!(
            store.add_attachment("Requests", id, &file).await,
            Err(RemoteError::Conflict(_))
        ));
        store.delete_attachment("Requests", id, "a.pdf").await.unwrap();
        assert!(store.delete_attachment("Requests", id, "a.pdf").await.is_err());
    }

    #[tokio::test]
    async fn identity_lookup() {
        let identity = MemoryIdentity::new([UserProfile {
            id: 7,
            display_name: "Pat".into(),
            ..UserProfile::default()
        }]);
        assert!(identity.current_user().await.is_err());
        identity.sign_in(Some(7));
        assert_eq!(identity.current_user().await.unwrap().display_name, "Pat");
        assert_eq!(identity.user_by_id(8).await.unwrap(), None);
        assert_eq!(identity.lookups(), [8]);
    }

    #[test]
    fn fragment_round_trip() {
        let fragment = MemoryFragment::new(Some("#/id/3"));
        assert_eq!(fragment.read().as_deref(), Some("#/id/3"));
        fragment.write("#/id/4");
        assert_eq!(fragment.read().as_deref(), Some("#/id/4"));
    }
}

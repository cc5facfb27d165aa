//! Binding raw items into the session's model and resolving audit actors.

use std::collections::BTreeMap;

use listform_core::bind::person;
use listform_core::{parse_date, ActorRef, BindReport, ConversionError, FormModel, HistoryEntry, ModelError, UserProfile};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::SessionContext;
use crate::traits::{IdentityProvider, RawItem};

/// Binding failures surfaced to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    /// Debug mode only: field conversions that failed.
    #[error("could not bind {} field(s): {}", .failures.len(), join(.failures))]
    Conversion { failures: Vec<ConversionError> },
    #[error(transparent)]
    Model(#[from] ModelError),
}

fn join(failures: &[ConversionError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Binds record state and field values of `raw` into the session model.
///
/// Conversion failures leave the affected fields untouched. They are written
/// to the error sink, or, with `debug` set, returned as
/// [`BindError::Conversion`] after the rest of the item has been bound.
///
/// # Errors
///
/// [`BindError::Model`] when `raw` belongs to another record, and
/// [`BindError::Conversion`] in debug mode.
pub async fn bind_item(session: &mut SessionContext, raw: &RawItem) -> Result<BindReport, BindError> {
    session.model.bind_record_state(raw)?;
    let report = session.model.bind_values(raw);
    debug!(bound = report.bound.len(), failed = report.failures.len(), "item bound");
    if report.failures.is_empty() {
        return Ok(report);
    }
    if session.config.debug {
        return Err(BindError::Conversion {
            failures: report.failures,
        });
    }
    for failure in &report.failures {
        warn!(key = %failure.key, reason = %failure.reason, "field conversion failed");
        session.report("bind", failure.to_string()).await;
    }
    Ok(report)
}

/// Upgrades each unresolved audit actor through `identity`.
///
/// A failed or empty lookup leaves the bare id. Returns the number of
/// actors resolved.
pub async fn resolve_audit(model: &mut FormModel, identity: &dyn IdentityProvider) -> usize {
    let Some(audit) = model.audit_mut() else {
        return 0;
    };
    let mut seen: BTreeMap<u64, Option<UserProfile>> = BTreeMap::new();
    let mut resolved = 0;
    for actor in audit.actors_mut() {
        let ActorRef::Id(id) = *actor else {
            continue;
        };
        if !seen.contains_key(&id) {
            let profile = match identity.user_by_id(id).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(user_id = id, error = %e, "audit actor lookup failed");
                    None
                }
            };
            seen.insert(id, profile);
        }
        if let Some(Some(profile)) = seen.get(&id) {
            *actor = ActorRef::Resolved(profile.clone());
            resolved += 1;
        }
    }
    resolved
}

/// Parses one history-list row. Rows without a parseable `Created` are
/// skipped.
#[must_use]
pub fn history_entry(raw: &RawItem) -> Option<HistoryEntry> {
    let at = raw.get("Created").and_then(Value::as_str).and_then(parse_date)?;
    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    let actor = raw
        .get("Author")
        .and_then(person)
        .and_then(|p| p.display_name)
        .or_else(|| text("ActorName"));
    Some(HistoryEntry {
        at,
        actor,
        action: text("Title").unwrap_or_default(),
        comment: text("Comment"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use listform_core::{AuditBlock, StoreCapability};
    use serde_json::json;

    use super::*;
    use crate::config::FormConfig;
    use crate::memory::{MemoryIdentity, MemoryListStore};
    use crate::session::Collaborators;
    use crate::sink::MemoryErrorSink;
    use crate::traits::RemoteError;

    fn user(id: u64, name: &str) -> UserProfile {
        UserProfile {
            id,
            display_name: name.into(),
            ..UserProfile::default()
        }
    }

    fn audited_model(author: u64, editor: u64) -> FormModel {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let mut model = FormModel::new("Requests");
        model.set_audit(AuditBlock::from_parts(
            Some(at),
            Some(ActorRef::Id(author)),
            Some(at),
            Some(ActorRef::Id(editor)),
        ));
        model
    }

    #[tokio::test]
    async fn resolves_known_actors_and_keeps_unknown_ids() {
        let identity = MemoryIdentity::new([user(7, "Pat")]);
        let mut model = audited_model(7, 9);

        assert_eq!(resolve_audit(&mut model, &identity).await, 1);
        let audit = model.audit().unwrap();
        assert_eq!(audit.created.by.display_name(), Some("Pat"));
        assert_eq!(audit.modified.by, ActorRef::Id(9));
    }

    #[tokio::test]
    async fn same_actor_is_looked_up_once() {
        let identity = MemoryIdentity::new([user(7, "Pat")]);
        let mut model = audited_model(7, 7);
        assert_eq!(resolve_audit(&mut model, &identity).await, 2);
        assert_eq!(identity.lookups(), [7]);
    }

    struct Offline;

    #[async_trait]
    impl IdentityProvider for Offline {
        async fn current_user(&self) -> Result<UserProfile, RemoteError> {
            Err(RemoteError::Unavailable("offline".into()))
        }

        async fn user_by_id(&self, _id: u64) -> Result<Option<UserProfile>, RemoteError> {
            Err(RemoteError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn failed_lookup_leaves_bare_id() {
        let mut model = audited_model(7, 7);
        assert_eq!(resolve_audit(&mut model, &Offline).await, 0);
        assert_eq!(model.audit().unwrap().created.by, ActorRef::Id(7));
    }

    fn session(debug: bool, sink: Arc<MemoryErrorSink>) -> SessionContext {
        let config = FormConfig {
            debug,
            ..FormConfig::for_list("Requests")
        };
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        let identity = Arc::new(MemoryIdentity::default());
        let services = Collaborators::for_config(&config, store, identity).with_errors(sink);
        let mut session = SessionContext::new(config, services);
        let descriptor = listform_core::FieldDescriptor {
            key: "amount".into(),
            internal_name: "Amount".into(),
            display_name: "Amount".into(),
            kind: listform_core::SemanticType::Number,
            required: false,
            read_only: false,
            format: None,
            description: None,
            default_value: listform_core::FieldValue::Null,
            choices: Vec::new(),
            fill_in: false,
        };
        session.model.insert_field(descriptor);
        session
    }

    fn bad_item() -> RawItem {
        RawItem::from_iter([
            ("Id".to_string(), json!(3)),
            ("Amount".to_string(), json!("twelve")),
        ])
    }

    #[tokio::test]
    async fn conversion_failures_go_to_the_sink() {
        let sink = Arc::new(MemoryErrorSink::default());
        let mut session = session(false, sink.clone());

        let report = bind_item(&mut session, &bad_item()).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(session.model.id(), Some(3));
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "bind");
        assert_eq!(entries[0].record_id, Some(3));
    }

    #[tokio::test]
    async fn debug_mode_returns_failures_instead() {
        let sink = Arc::new(MemoryErrorSink::default());
        let mut session = session(true, sink.clone());

        let err = bind_item(&mut session, &bad_item()).await.unwrap_err();
        assert!(matches!(err, BindError::Conversion { ref failures } if failures.len() == 1));
        assert!(sink.is_empty());
    }

    #[test]
    fn history_rows() {
        let row = RawItem::from_iter([
            ("Created".to_string(), json!("2024-03-05T10:00:00Z")),
            ("Title".to_string(), json!("Approved")),
            ("Comment".to_string(), json!("  ")),
            ("Author".to_string(), json!({ "Id": 7, "Title": "Pat" })),
        ]);
        let entry = history_entry(&row).unwrap();
        assert_eq!(entry.action, "Approved");
        assert_eq!(entry.actor.as_deref(), Some("Pat"));
        assert_eq!(entry.comment, None);

        assert!(history_entry(&RawItem::new()).is_none());
    }
}

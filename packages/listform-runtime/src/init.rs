//! Initialization pipeline: from an empty session to a bound form.
//!
//! Steps, in order: load the current user, load and map the schema, probe
//! the history list, resolve the record id, load the item, resolve audit
//! actors, load history. A new record halts after the id step.

use std::time::Duration;

use async_trait::async_trait;
use listform_core::{parse_fragment, SchemaMapper};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bind::{bind_item, history_entry, resolve_audit};
use crate::sequencer::{Advance, PipelineHooks, PipelineOutcome, Sequencer, SequencerError, Step};
use crate::session::SessionContext;
use crate::traits::{ItemQuery, RemoteError};

/// Status line shown while the form loads.
pub const LOADING_MESSAGE: &str = "Loading form...";

/// Runs the initialization pipeline on `session`.
///
/// # Errors
///
/// A [`SequencerError`] when a step breaks the advance contract.
pub async fn initialize(session: &mut SessionContext) -> Result<PipelineOutcome, SequencerError> {
    let mut sequencer = Sequencer::new("init", session.services.status.clone())
        .with_timeout(session.config.step_timeout())
        .with_hooks(InitHooks);
    sequencer.enqueue(init_steps());
    sequencer.start(session, LOADING_MESSAGE).await
}

/// The initialization steps in execution order.
#[must_use]
pub fn init_steps() -> Vec<Box<dyn Step<SessionContext>>> {
    vec![
        Box::new(LoadCurrentUser),
        Box::new(LoadSchema),
        Box::new(ProbeHistoryList),
        Box::new(ResolveRecordId),
        Box::new(LoadItem),
        Box::new(ResolveAudit),
        Box::new(LoadHistory),
    ]
}

/// Steps that refresh a saved record: reload, audit, history.
#[must_use]
pub fn refresh_steps() -> Vec<Box<dyn Step<SessionContext>>> {
    vec![Box::new(LoadItem), Box::new(ResolveAudit), Box::new(LoadHistory)]
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Alerts on failure; recomputes permissions when the run ends and hides
/// the status line after the configured delay without holding the run.
pub struct InitHooks;

#[async_trait]
impl PipelineHooks<SessionContext> for InitHooks {
    async fn on_complete(&self, session: &mut SessionContext) {
        info!(list = %session.model.list_name(), id = ?session.model.id(), fields = session.model.len(), "form ready");
    }

    async fn on_fail(&self, session: &mut SessionContext, message: Option<&str>) {
        session
            .services
            .status
            .alert(message.unwrap_or("The form could not be loaded."));
    }

    async fn on_finally(&self, session: &mut SessionContext) {
        session.refresh_permissions();
        let status = session.services.status.clone();
        match session.config.status_hide_delay_ms {
            0 => status.hide(),
            delay => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    status.hide();
                });
            }
        }
    }
}

/// Recomputes permissions when a refresh ends; alerts on failure.
pub struct RefreshHooks;

#[async_trait]
impl PipelineHooks<SessionContext> for RefreshHooks {
    async fn on_fail(&self, session: &mut SessionContext, message: Option<&str>) {
        session
            .services
            .status
            .alert(message.unwrap_or("The record could not be refreshed."));
    }

    async fn on_finally(&self, session: &mut SessionContext) {
        session.refresh_permissions();
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Loads the signed-in user. Without one the form still loads, read-mostly.
pub struct LoadCurrentUser;

#[async_trait]
impl Step<SessionContext> for LoadCurrentUser {
    fn name(&self) -> &'static str {
        "load-current-user"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        match session.services.identity.current_user().await {
            Ok(user) => {
                debug!(user_id = user.id, "current user loaded");
                session.user = Some(user);
                next.ok();
            }
            Err(e) => {
                warn!(error = %e, "current user unavailable");
                session.report("load-current-user", e.to_string()).await;
                next.recover("Could not identify the current user.");
            }
        }
    }
}

/// Loads the list schema and maps it onto the model.
pub struct LoadSchema;

#[async_trait]
impl Step<SessionContext> for LoadSchema {
    fn name(&self) -> &'static str {
        "load-schema"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let list = session.model.list_name().to_string();
        let columns = match session.services.store.get_schema(&list).await {
            Ok(columns) => columns,
            Err(e) => {
                session.report("load-schema", e.to_string()).await;
                next.fail(format!("Could not load the form definition: {e}"));
                return;
            }
        };

        let clock = session.services.clock.clone();
        let report = SchemaMapper::new(session.config.key_source, clock.as_ref())
            .apply(&mut session.model, &columns);
        info!(
            list = %list,
            added = report.added.len(),
            excluded = report.excluded.len(),
            failures = report.failures.len(),
            "schema mapped"
        );
        if !report.failures.is_empty() && session.config.debug {
            let detail = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.key, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            next.fail(format!("Schema mapping failed: {detail}"));
            return;
        }
        for failure in &report.failures {
            session
                .report("map-schema", format!("{}: {}", failure.key, failure.reason))
                .await;
        }
        session.resolve_plan();
        next.ok();
    }
}

/// Checks the history list exists. A failure disables history only.
pub struct ProbeHistoryList;

#[async_trait]
impl Step<SessionContext> for ProbeHistoryList {
    fn name(&self) -> &'static str {
        "probe-history-list"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let Some(list) = session.history_list().map(ToString::to_string) else {
            next.ok();
            return;
        };
        match session.services.store.get_schema(&list).await {
            Ok(_) => next.ok(),
            Err(e) => {
                warn!(history_list = %list, error = %e, "history list unavailable, history disabled");
                session.features.history = false;
                next.recover("History is not available for this form.");
            }
        }
    }
}

/// Takes the record id from the model or the URL fragment. A new record
/// halts the pipeline here.
pub struct ResolveRecordId;

#[async_trait]
impl Step<SessionContext> for ResolveRecordId {
    fn name(&self) -> &'static str {
        "resolve-record-id"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let id = session.model.id().or_else(|| {
            session
                .services
                .fragment
                .read()
                .as_deref()
                .and_then(parse_fragment)
        });
        match id {
            Some(id) => next.ok_payload(json!(id)),
            None => {
                debug!("new record, nothing to load");
                next.halt(None);
            }
        }
    }
}

/// Loads the record and binds it. The id comes from the payload or the
/// model.
pub struct LoadItem;

#[async_trait]
impl Step<SessionContext> for LoadItem {
    fn name(&self) -> &'static str {
        "load-item"
    }

    async fn run(&self, session: &mut SessionContext, payload: Option<Value>, next: Advance) {
        let Some(id) = payload
            .as_ref()
            .and_then(Value::as_u64)
            .or_else(|| session.model.id())
        else {
            next.fail("No record to load.");
            return;
        };
        let list = session.model.list_name().to_string();
        let raw = match session.services.store.get_item(&list, id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                next.fail(format!("Record {id} was not found."));
                return;
            }
            Err(e @ RemoteError::NotFound { .. }) => {
                next.fail(format!("Record {id} could not be loaded: {e}"));
                return;
            }
            Err(e) => {
                session.report("load-item", e.to_string()).await;
                next.fail(format!("Record {id} could not be loaded: {e}"));
                return;
            }
        };
        match bind_item(session, &raw).await {
            Ok(_) => next.ok(),
            Err(e) => next.fail(e.to_string()),
        }
    }
}

/// Resolves the audit actors to profiles.
pub struct ResolveAudit;

#[async_trait]
impl Step<SessionContext> for ResolveAudit {
    fn name(&self) -> &'static str {
        "resolve-audit"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let identity = session.services.identity.clone();
        let resolved = resolve_audit(&mut session.model, identity.as_ref()).await;
        debug!(resolved, "audit actors resolved");
        next.ok();
    }
}

/// Loads the record's history entries when history is enabled.
pub struct LoadHistory;

#[async_trait]
impl Step<SessionContext> for LoadHistory {
    fn name(&self) -> &'static str {
        "load-history"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let (Some(list), Some(id)) = (session.history_list().map(ToString::to_string), session.model.id())
        else {
            next.ok();
            return;
        };
        let query = ItemQuery::new(list)
            .filter(session.config.history_record_field.clone(), json!(id))
            .order_by("Created", false);
        match session.services.store.query_items(&query).await {
            Ok(rows) => {
                let entries = rows.iter().filter_map(history_entry).collect::<Vec<_>>();
                debug!(entries = entries.len(), "history loaded");
                session.model.replace_history(entries);
                next.ok();
            }
            Err(e) => {
                warn!(error = %e, "history could not be loaded");
                next.recover("History could not be loaded.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use listform_core::{ColumnDef, StoreCapability};

    use super::*;
    use crate::config::FormConfig;
    use crate::memory::{MemoryIdentity, MemoryListStore};
    use crate::session::Collaborators;
    use crate::sink::MemoryErrorSink;
    use crate::status::MemoryStatus;

    #[tokio::test(start_paused = true)]
    async fn status_hides_after_the_delay_without_holding_initialization() {
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        store.add_list(
            "Requests",
            vec![ColumnDef {
                internal_name: "Title".into(),
                display_name: "Title".into(),
                type_name: "Text".into(),
                ..ColumnDef::default()
            }],
        );
        let config = FormConfig::for_list("Requests");
        let delay = Duration::from_millis(config.status_hide_delay_ms);
        let status = Arc::new(MemoryStatus::default());
        let services = Collaborators::for_config(&config, store, Arc::new(MemoryIdentity::default()))
            .with_status(status.clone())
            .with_errors(Arc::new(MemoryErrorSink::default()));
        let mut session = SessionContext::new(config, services);

        let started = tokio::time::Instant::now();
        initialize(&mut session).await.unwrap();
        assert!(started.elapsed() < delay);
        assert!(!status.hidden());

        tokio::time::sleep(delay + Duration::from_millis(10)).await;
        assert!(status.hidden());
    }
}

//! Attachment sub-pipeline.
//!
//! Attaching requires a record, so a batch first saves a new record, then
//! uploads one file per step. An upload failure is surfaced and the batch
//! moves on. The attachment list is refreshed once when the batch ends.
//! Batches borrow the session mutably, so two can never overlap.

use std::sync::Arc;

use async_trait::async_trait;
use listform_core::{bind, Attachment};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::coordinator::{alert, save, SaveError, SaveOutcome};
use crate::sequencer::{Advance, PipelineHooks, PipelineOutcome, Sequencer, Step};
use crate::session::SessionContext;
use crate::traits::FileUpload;

/// Result of one [`attach_files`] batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachReport {
    pub uploaded: Vec<Attachment>,
    /// `(file name, reason)` of each failed upload.
    pub failed: Vec<(String, String)>,
    pub outcome: PipelineOutcome,
}

#[derive(Debug, Default)]
struct BatchLog {
    uploaded: Vec<Attachment>,
    failed: Vec<(String, String)>,
}

/// Uploads `files` to the record, saving it first when it is new.
///
/// # Errors
///
/// [`SaveError::Forbidden`] when the user may not save, or
/// [`SaveError::Pipeline`] when a step breaks the advance contract. Upload
/// and implicit-save failures are reported in [`AttachReport`].
pub async fn attach_files(
    session: &mut SessionContext,
    files: Vec<FileUpload>,
) -> Result<AttachReport, SaveError> {
    if !session.model.permissions().can_save {
        return Err(alert(session, SaveError::Forbidden));
    }
    let log = Arc::new(Mutex::new(BatchLog::default()));
    let mut steps: Vec<Box<dyn Step<SessionContext>>> = vec![Box::new(EnsureRecordSaved)];
    steps.extend(files.into_iter().map(|file| {
        Box::new(UploadAttachment {
            file,
            log: Arc::clone(&log),
        }) as Box<dyn Step<SessionContext>>
    }));

    let mut sequencer = Sequencer::new("attachments", session.services.status.clone())
        .with_timeout(session.config.step_timeout())
        .with_hooks(AttachHooks);
    sequencer.enqueue(steps);
    let outcome = sequencer.run(session, None).await?;

    let log = std::mem::take(&mut *log.lock());
    info!(uploaded = log.uploaded.len(), failed = log.failed.len(), "attachment batch finished");
    Ok(AttachReport {
        uploaded: log.uploaded,
        failed: log.failed,
        outcome,
    })
}

/// Removes one attachment from the saved record.
///
/// # Errors
///
/// [`SaveError::NotSaved`] for a new record, [`SaveError::Forbidden`]
/// without save permission, or the remote failure.
pub async fn remove_attachment(session: &mut SessionContext, file_name: &str) -> Result<(), SaveError> {
    let Some(id) = session.model.id() else {
        return Err(alert(session, SaveError::NotSaved));
    };
    if !session.model.permissions().can_save {
        return Err(alert(session, SaveError::Forbidden));
    }
    let list = session.model.list_name().to_string();
    let store = session.services.store.clone();
    if let Err(e) = store.delete_attachment(&list, id, file_name).await {
        session.report("remove-attachment", e.to_string()).await;
        session
            .services
            .status
            .alert(&format!("Could not remove {file_name}: {e}"));
        return Err(e.into());
    }
    let remaining = session
        .model
        .attachments()
        .iter()
        .filter(|a| a.file_name != file_name)
        .cloned()
        .collect();
    session.model.set_attachments(remaining);
    Ok(())
}

/// Reloads the attachment list of the saved record.
pub async fn refresh_attachments(session: &mut SessionContext) {
    let Some(id) = session.model.id() else {
        return;
    };
    let list = session.model.list_name().to_string();
    let store = session.services.store.clone();
    match store.get_item(&list, id).await {
        Ok(Some(raw)) => {
            let attachments = raw
                .get("AttachmentFiles")
                .and_then(bind::unwrap_collection)
                .map(|items| items.iter().filter_map(bind::attachment).collect())
                .unwrap_or_default();
            session.model.set_attachments(attachments);
        }
        Ok(None) => warn!(id, "record vanished while refreshing attachments"),
        Err(e) => {
            warn!(id, error = %e, "attachment refresh failed");
            session.report("refresh-attachments", e.to_string()).await;
        }
    }
}

struct AttachHooks;

#[async_trait]
impl PipelineHooks<SessionContext> for AttachHooks {
    async fn on_fail(&self, session: &mut SessionContext, message: Option<&str>) {
        session
            .services
            .status
            .alert(message.unwrap_or("The files could not be attached."));
    }

    async fn on_finally(&self, session: &mut SessionContext) {
        refresh_attachments(session).await;
    }
}

/// Saves a new record so attachments have somewhere to go.
struct EnsureRecordSaved;

#[async_trait]
impl Step<SessionContext> for EnsureRecordSaved {
    fn name(&self) -> &'static str {
        "ensure-record-saved"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        if session.model.id().is_some() {
            next.ok();
            return;
        }
        match save(session, false).await {
            Ok(SaveOutcome::Saved { .. }) => next.ok(),
            Ok(SaveOutcome::Aborted) => next.halt(Some("Attachments were not added.".to_string())),
            Err(e) => next.fail(format!("The record could not be saved: {e}")),
        }
    }
}

struct UploadAttachment {
    file: FileUpload,
    log: Arc<Mutex<BatchLog>>,
}

#[async_trait]
impl Step<SessionContext> for UploadAttachment {
    fn name(&self) -> &'static str {
        "upload-attachment"
    }

    async fn run(&self, session: &mut SessionContext, _payload: Option<Value>, next: Advance) {
        let name = self.file.file_name.clone();
        let Some(id) = session.model.id() else {
            next.fail(format!("Cannot attach {name} to an unsaved record."));
            return;
        };
        let list = session.model.list_name().to_string();
        let store = session.services.store.clone();
        match store.add_attachment(&list, id, &self.file).await {
            Ok(attachment) => {
                self.log.lock().uploaded.push(attachment);
                next.ok_with(format!("Attached {name}."));
            }
            Err(e) => {
                warn!(file = %name, error = %e, "upload failed");
                session.report("add-attachment", format!("{name}: {e}")).await;
                self.log.lock().failed.push((name.clone(), e.to_string()));
                next.recover(format!("Could not attach {name}: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use listform_core::{ColumnDef, FieldValue, StoreCapability, UserProfile};

    use super::*;
    use crate::config::FormConfig;
    use crate::init::initialize;
    use crate::memory::{MemoryIdentity, MemoryListStore};
    use crate::session::Collaborators;
    use crate::sink::MemoryErrorSink;
    use crate::status::MemoryStatus;
    use crate::traits::RemoteError;

    async fn session(store: Arc<MemoryListStore>) -> SessionContext {
        store.add_list(
            "Requests",
            vec![ColumnDef {
                internal_name: "Title".into(),
                display_name: "Title".into(),
                type_name: "Text".into(),
                ..ColumnDef::default()
            }],
        );
        let config = FormConfig {
            status_hide_delay_ms: 0,
            ..FormConfig::for_list("Requests")
        };
        let identity = Arc::new(MemoryIdentity::new([UserProfile {
            id: 1,
            display_name: "Sam".into(),
            ..UserProfile::default()
        }]));
        identity.sign_in(Some(1));
        let services = Collaborators::for_config(&config, store, identity)
            .with_status(Arc::new(MemoryStatus::default()))
            .with_errors(Arc::new(MemoryErrorSink::default()));
        let mut session = SessionContext::new(config, services);
        initialize(&mut session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn failed_upload_is_surfaced_and_batch_continues() {
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        let mut session = session(store.clone()).await;
        session.model.set("title", FieldValue::Text("A".into())).unwrap();
        save(&mut session, false).await.unwrap();
        store.clear_journal();
        store.fail_next("add_attachment", RemoteError::Rejected("too large".into()));

        let report = attach_files(
            &mut session,
            vec![FileUpload::new("big.bin", vec![0; 4]), FileUpload::new("ok.txt", b"ok".to_vec())],
        )
        .await
        .unwrap();

        assert_eq!(report.outcome, PipelineOutcome::Completed { steps_run: 3 });
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.uploaded[0].file_name, "ok.txt");
        assert_eq!(store.operations(), ["add_attachment", "add_attachment", "get_item"]);
        assert_eq!(session.model.attachments().len(), 1);
    }

    #[tokio::test]
    async fn failed_implicit_save_stops_the_batch() {
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        let mut session = session(store.clone()).await;
        store.clear_journal();
        store.fail_next("create_item", RemoteError::Unavailable("down".into()));

        let report = attach_files(&mut session, vec![FileUpload::new("a.txt", b"a".to_vec())])
            .await
            .unwrap();
        assert!(matches!(report.outcome, PipelineOutcome::Failed { .. }));
        assert!(report.uploaded.is_empty());
        assert_eq!(session.model.id(), None);
        assert_eq!(store.operations(), ["create_item"]);
    }

    #[tokio::test]
    async fn remove_attachment_updates_the_list() {
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        let mut session = session(store.clone()).await;
        attach_files(&mut session, vec![FileUpload::new("a.txt", b"a".to_vec())])
            .await
            .unwrap();
        assert_eq!(session.model.attachments().len(), 1);

        remove_attachment(&mut session, "a.txt").await.unwrap();
        assert!(session.model.attachments().is_empty());
        assert!(remove_attachment(&mut session, "a.txt").await.is_err());
    }

    #[tokio::test]
    async fn refused_removal_is_alerted() {
        let store = Arc::new(MemoryListStore::new(StoreCapability::Modern));
        let mut session = session(store).await;
        let status = Arc::new(MemoryStatus::default());
        session.services = session.services.clone().with_status(status.clone());

        let err = remove_attachment(&mut session, "a.txt").await.unwrap_err();
        assert!(matches!(err, SaveError::NotSaved));
        assert_eq!(status.alerts(), [SaveError::NotSaved.to_string()]);
    }
}

//! Persistence coordinator: save, submit and delete.
//!
//! A save writes only the editable subset of the model. The first
//! successful create assigns the record identity, after which every save is
//! an update. Each successful write is followed by a refresh pipeline that
//! reloads the item, resolves audit actors and reloads history.

use listform_core::{build_payload, format_fragment, serialize, validate, FieldValue, ModelError};
use tracing::{info, warn};

use crate::init::{refresh_steps, RefreshHooks};
use crate::sequencer::{PipelineOutcome, Sequencer, SequencerError};
use crate::session::SessionContext;
use crate::traits::{RawItem, RemoteError};

/// Result of a save that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The pre-save hook declined. Nothing was sent.
    Aborted,
    Saved { id: u64, created: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Submit validation failed. Carries the problem labels.
    #[error("please complete: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("the current user may not perform this action")]
    Forbidden,
    #[error("the record has not been saved yet")]
    NotSaved,
    #[error("the record has been deleted")]
    Deleted,
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Pipeline(#[from] SequencerError),
}

/// Saves the record. `is_submit` adds validation and raises the submitted
/// flag.
///
/// # Errors
///
/// See [`SaveError`]. Validation problems and remote failures are also
/// alerted; remote failures are written to the error sink. On any error the
/// model is left as it was. Once the write succeeds the save succeeds: a
/// post-save refresh that breaks down is logged and written to the error
/// sink instead.
pub async fn save(session: &mut SessionContext, is_submit: bool) -> Result<SaveOutcome, SaveError> {
    if session.model.is_deleted() {
        return Err(alert(session, SaveError::Deleted));
    }
    if !session.pre_save_allows() {
        info!("save declined by pre-save hook");
        return Ok(SaveOutcome::Aborted);
    }
    if !session.model.permissions().can_save {
        return Err(alert(session, SaveError::Forbidden));
    }
    if is_submit {
        let result = validate(&session.model, session.config.validation_rules());
        if !result.is_ok() {
            return Err(alert(session, SaveError::Validation(result.problems().to_vec())));
        }
    }

    let payload = payload(session, is_submit);
    let list = session.model.list_name().to_string();
    let store = session.services.store.clone();
    let written = match session.model.id() {
        None => store.create_item(&list, payload).await.map(|id| (id, true)),
        Some(id) => store.update_item(&list, id, payload).await.map(|()| (id, false)),
    };
    let (id, created) = match written {
        Ok(written) => written,
        Err(e) => {
            session.report("save", e.to_string()).await;
            return Err(alert(session, e.into()));
        }
    };

    session.model.assign_id(id)?;
    session.services.fragment.write(&format_fragment(id));
    info!(list = %list, id, created, submit = is_submit, "record saved");

    match refresh(session).await {
        Ok(outcome) if !outcome.is_completed() => {
            warn!(id, outcome = ?outcome, "post-save refresh did not complete");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(id, error = %e, "post-save refresh broke down");
            session.report("refresh", e.to_string()).await;
        }
    }
    session
        .services
        .status
        .show(true, if is_submit { "Submitted." } else { "Saved." });
    Ok(SaveOutcome::Saved { id, created })
}

/// Deletes the record and marks the model deleted.
///
/// # Errors
///
/// [`SaveError::NotSaved`] for a new record, [`SaveError::Forbidden`]
/// without delete permission, or the remote failure.
pub async fn delete(session: &mut SessionContext) -> Result<(), SaveError> {
    let Some(id) = session.model.id() else {
        return Err(alert(session, SaveError::NotSaved));
    };
    if !session.model.permissions().can_delete {
        return Err(alert(session, SaveError::Forbidden));
    }
    let list = session.model.list_name().to_string();
    let store = session.services.store.clone();
    if let Err(e) = store.delete_item(&list, id).await {
        session.report("delete", e.to_string()).await;
        return Err(alert(session, e.into()));
    }
    session.model.mark_deleted();
    session.refresh_permissions();
    info!(list = %list, id, "record deleted");
    session.services.status.show(true, "Deleted.");
    Ok(())
}

/// Runs the post-save refresh pipeline.
///
/// # Errors
///
/// A [`SequencerError`] when a refresh step breaks the advance contract.
pub async fn refresh(session: &mut SessionContext) -> Result<PipelineOutcome, SequencerError> {
    let mut sequencer = Sequencer::new("refresh", session.services.status.clone())
        .with_timeout(session.config.step_timeout())
        .with_hooks(RefreshHooks);
    sequencer.enqueue(refresh_steps());
    sequencer.run(session, None).await
}

/// Editable fields serialized for the store, with the submitted flag
/// handled: it is only ever sent as `true`, on submit, and only when not
/// already set.
fn payload(session: &SessionContext, is_submit: bool) -> RawItem {
    let capability = session.capability();
    let mut payload = build_payload(&session.model, &session.editable_fields(), capability);

    let submitted = session.config.submitted_field.as_deref().and_then(|internal| {
        session
            .model
            .fields()
            .find(|f| f.descriptor().internal_name == internal)
    });
    if let Some(field) = submitted {
        let descriptor = field.descriptor();
        payload.remove(&descriptor.internal_name);
        let already = field.value().and_then(FieldValue::as_bool).unwrap_or(false);
        if is_submit && !already {
            if let Some((key, value)) = serialize(Some(&FieldValue::Bool(true)), descriptor, capability) {
                payload.insert(key, value);
            }
        }
    }
    payload
}

/// Surfaces `error` on the status display and hands it back.
pub(crate) fn alert(session: &SessionContext, error: SaveError) -> SaveError {
    session.services.status.alert(&error.to_string());
    error
}

//! Explicit per-form context passed to every step and coordinator call.

use std::sync::Arc;

use listform_core::{
    compute_editable_fields, ClockSource, FieldError, FormModel, RenderPlan, RenderedField,
    StoreCapability, SystemClock, UserProfile, WidgetRegistry,
};

use crate::config::FormConfig;
use crate::memory::MemoryFragment;
use crate::sink::{ListErrorSink, TracingErrorSink};
use crate::status::TracingStatus;
use crate::traits::{ErrorEntry, ErrorSink, FragmentStore, IdentityProvider, ListStore, StatusDisplay};

/// Decides whether a save may proceed. Returning `false` aborts silently.
pub type PreSaveHook = Box<dyn Fn(&FormModel) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ListStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub errors: Arc<dyn ErrorSink>,
    pub status: Arc<dyn StatusDisplay>,
    pub fragment: Arc<dyn FragmentStore>,
    pub clock: Arc<dyn ClockSource>,
}

impl Collaborators {
    /// Store and identity from the caller; errors go to the configured
    /// error-log list (or the log when none is configured), status to the
    /// log, the fragment is held in memory.
    pub fn for_config(
        config: &FormConfig,
        store: Arc<dyn ListStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let errors: Arc<dyn ErrorSink> = match &config.error_log_list {
            Some(list) => Arc::new(ListErrorSink::new(Arc::clone(&store), list.clone())),
            None => Arc::new(TracingErrorSink),
        };
        Self {
            store,
            identity,
            errors,
            status: Arc::new(TracingStatus),
            fragment: Arc::new(MemoryFragment::default()),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Arc<dyn StatusDisplay>) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_fragment(mut self, fragment: Arc<dyn FragmentStore>) -> Self {
        self.fragment = fragment;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// Feature switches decided during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Workflow history is loaded and shown.
    pub history: bool,
}

/// State of one open form.
pub struct SessionContext {
    pub config: Arc<FormConfig>,
    pub services: Collaborators,
    pub model: FormModel,
    /// Signed-in user, once loaded.
    pub user: Option<UserProfile>,
    pub features: Features,
    pub widgets: WidgetRegistry,
    plan: Option<RenderPlan>,
    pre_save: Option<PreSaveHook>,
}

impl SessionContext {
    pub fn new(config: FormConfig, services: Collaborators) -> Self {
        let model = FormModel::new(config.list_name.clone());
        let features = Features {
            history: config.history_list.is_some(),
        };
        Self {
            config: Arc::new(config),
            services,
            model,
            user: None,
            features,
            widgets: WidgetRegistry::with_defaults(),
            plan: None,
            pre_save: None,
        }
    }

    /// Installs the pre-save hook, replacing any previous one.
    pub fn set_pre_save(&mut self, hook: impl Fn(&FormModel) -> bool + Send + Sync + 'static) {
        self.pre_save = Some(Box::new(hook));
    }

    pub(crate) fn pre_save_allows(&self) -> bool {
        self.pre_save.as_ref().is_none_or(|hook| hook(&self.model))
    }

    #[must_use]
    pub fn capability(&self) -> StoreCapability {
        self.services.store.capability()
    }

    /// History list name while the history feature is enabled.
    #[must_use]
    pub fn history_list(&self) -> Option<&str> {
        self.config
            .history_list
            .as_deref()
            .filter(|_| self.features.history)
    }

    /// Keys the presentation binds: the configured list, or every field.
    #[must_use]
    pub fn bound_fields(&self) -> Vec<String> {
        if self.config.bound_fields.is_empty() {
            self.model.registry().iter().cloned().collect()
        } else {
            self.config.bound_fields.clone()
        }
    }

    /// Bound keys the user may write.
    #[must_use]
    pub fn editable_fields(&self) -> Vec<String> {
        compute_editable_fields(&self.model, self.bound_fields())
    }

    /// Recomputes the permission flags from the policy, user and model.
    pub fn refresh_permissions(&mut self) {
        let permissions = self
            .config
            .permissions
            .evaluate(self.user.as_ref(), &self.model);
        self.model.set_permissions(permissions);
    }

    /// Resolves the widget plan for the current field set.
    pub fn resolve_plan(&mut self) {
        self.plan = Some(RenderPlan::resolve(&self.widgets, &self.model));
    }

    #[must_use]
    pub fn render_plan(&self) -> Option<&RenderPlan> {
        self.plan.as_ref()
    }

    /// Rendered fields. Empty until the schema has been loaded.
    #[must_use]
    pub fn render(&self) -> Vec<RenderedField> {
        self.plan
            .as_ref()
            .map(|plan| plan.render(&self.model))
            .unwrap_or_default()
    }

    /// Applies raw user input to `key` through its widget.
    ///
    /// # Errors
    ///
    /// See [`RenderPlan::apply_input`]. Before the schema is loaded every
    /// key is unknown.
    pub fn apply_input(&mut self, key: &str, input: &str) -> Result<(), FieldError> {
        let plan = self.plan.as_ref().ok_or_else(|| FieldError::Unknown {
            key: key.to_string(),
        })?;
        plan.apply_input(&mut self.model, key, input)
    }

    /// Writes a system error to the error sink.
    pub async fn report(&self, operation: &str, message: impl Into<String>) {
        let entry = ErrorEntry {
            at: self.services.clock.now(),
            operation: operation.to_string(),
            message: message.into(),
            list: self.model.list_name().to_string(),
            record_id: self.model.id(),
            user: self.user.as_ref().map(|u| u.login.clone()),
        };
        self.services.errors.log_error(entry).await;
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("list", &self.model.list_name())
            .field("id", &self.model.id())
            .field("fields", &self.model.len())
            .field("user", &self.user.as_ref().map(|u| u.id))
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

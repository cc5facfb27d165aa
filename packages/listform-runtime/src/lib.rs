//! listform runtime: the step sequencer, the initialization pipeline, the
//! persistence coordinator and the collaborator seams they drive.

pub mod attachments;
pub mod bind;
pub mod config;
pub mod coordinator;
pub mod init;
pub mod memory;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod status;
pub mod traits;

pub use attachments::{attach_files, remove_attachment, AttachReport};
pub use bind::{bind_item, resolve_audit, BindError};
pub use config::FormConfig;
pub use coordinator::{delete, save, SaveError, SaveOutcome};
pub use init::initialize;
pub use memory::{MemoryFragment, MemoryIdentity, MemoryListStore, StoreCall};
pub use sequencer::{Advance, PipelineHooks, PipelineOutcome, Sequencer, SequencerError, Step};
pub use session::{Collaborators, SessionContext};
pub use sink::{ListErrorSink, MemoryErrorSink, TracingErrorSink};
pub use status::{MemoryStatus, TracingStatus};
pub use traits::{
    ErrorEntry, ErrorSink, FileUpload, FragmentStore, IdentityProvider, ItemQuery, ListStore,
    RawItem, RemoteError, StatusDisplay,
};

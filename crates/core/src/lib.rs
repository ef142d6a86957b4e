pub mod config;
pub mod domain;
pub mod errors;
pub mod sources;

pub use domain::classification::{Classification, ConflictLabel};
pub use domain::conversation::{Message, SearchResult, UserProfile};
pub use domain::evidence::{Action, EvidenceLog, EvidenceRecord, Observation};
pub use domain::invocation::{ConversationScope, Invocation, InvocationId};
pub use domain::response::{Section, SectionDraft, StructuredResponse};
pub use errors::{MediationError, ResourceKind, ToolError, ToolErrorKind};
pub use sources::{ConversationSource, SearchBackend};

//! Storage types
//!
//! Shared types used by storage traits and implementations.

pub mod content_block;
pub mod edit;
pub mod event;
pub mod relation;
pub mod spawn;
pub mod stored;
pub mod structure;
pub mod transcript;
pub mod view;

pub use content_block::{
    ContentBlock, ContentOrigin, ContentType, OriginKind, PutResult, StoredContentBlock,
};
pub use edit::{is_edit_fork, EditPlan, EditedTurn};
pub use event::{EntityKind, MutationEvent, MutationOp};
pub use relation::{EntityRelation, RelationType};
pub use spawn::{SpawnPlan, SpawnTurn, SpawnedThread};
pub use stored::{stored, stored_editable, Editable, Stored, StoredEditable, Written};
pub use structure::{
    NewUsage, OwnerKind, Role, Span, SpanStatus, SpanWithUsages, StoredSpan, StoredThread,
    StoredTurn, StoredUsage, Thread, Turn, TurnWithSpans, Usage, UsageRole,
};
pub use transcript::{ResolvedTurn, ResolvedUsage, ThreadSnapshot, Transcript};
pub use view::{SelectedSpan, Selection, SelectionRecord, StoredView, View, ViewUpdate};

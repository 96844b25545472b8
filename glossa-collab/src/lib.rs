//! # glossa-collab — polling reconciliation engine for Glossa
//!
//! Keeps each client's local project state consistent with a
//! multi-writer remote store without a dedicated realtime transport:
//! local state is authoritative and optimistic, reconciliation happens
//! on a fixed polling cadence.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   wrapped mutations    ┌───────────────────┐
//! │ UI / caller  │ ─────────────────────► │ CollabSession     │
//! └──────────────┘                        │ (orchestrator)    │
//!                                         └───┬──────────┬────┘
//!                        SessionStore ◄───────┘          │
//!                        (local truth)                   │
//!                                            ┌───────────┴───────────┐
//!                                            ▼                       ▼
//!                                 ┌──────────────────┐    ┌──────────────────┐
//!                                 │ AnnotationSync   │    │ FileSync         │
//!                                 │ push/pull/merge  │    │ staleness, trash,│
//!                                 │ synced-id sets   │    │ negotiated delete│
//!                                 └────────┬─────────┘    └─────────┬────────┘
//!                                          │      RemoteStore       │
//!                                          └───────────┬────────────┘
//!                                                      ▼
//!                                         shared multi-writer store
//! ```
//!
//! ## Modules
//!
//! - [`store`] — typed remote store boundary + in-process reference
//!   implementation
//! - [`context`] — injected client context (profile, project,
//!   collaboration switch)
//! - [`annotations`] — annotation sync engine with the merge partition
//! - [`files`] — artefact sync engine: staleness gate, deletion
//!   negotiation, trash
//! - [`schedule`] — poll/debounce timers as testable state machines
//! - [`session`] — the orchestrator callers actually use
//!
//! ## Consistency model
//!
//! Eventually consistent, field-level last-writer-wins. No ordering
//! across clients; within one client local mutation always precedes the
//! network attempt. Identity and deletion conflicts are resolved (id
//! upserts, staleness skips, negotiated deletion, tombstone by
//! absence); content-level merge is out of scope.

pub mod annotations;
pub mod context;
pub mod files;
pub mod schedule;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use annotations::{AnnotationSyncEngine, MergeOutcome, PushOutcome};
pub use context::ClientContext;
pub use files::{
    DeletionRequests, FileSyncEngine, SaveOutcome, TrashEntry, DELETION_REQUEST_TTL_MS,
};
pub use schedule::{
    DebounceQueue, SyncSchedule, Tick, VisibilityEvent, EDIT_DEBOUNCE, NEW_FILE_DEBOUNCE,
    POLL_INTERVAL, WRITE_SUPPRESS_WINDOW,
};
pub use session::{CollabSession, RemovalOutcome, SessionConfig, SyncEvent};
pub use store::{
    AnnotationRecord, DeletionOutcome, FileRecord, FileUpsert, MemoryStore, RemoteStore,
    ReplyRecord, StoreError, StoreStats,
};

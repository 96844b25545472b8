//! # glossa-core — data model and client-local state for Glossa
//!
//! Glossa lets multiple users jointly annotate shared code artefacts
//! without a dedicated realtime transport: each client keeps a local,
//! reducer-driven copy of project state and reconciles it against a
//! remote shared store on a fixed cadence.
//!
//! This crate is the synchronous half: the model types, the content
//! fingerprint used for change detection, and the reducer-managed
//! session store. The async sync engines live in `glossa-collab`.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

pub mod fingerprint;
pub mod session;

pub use fingerprint::{content_fingerprint, FileFingerprint};
pub use session::{SessionAction, SessionSettings, SessionState, SessionStore};

/// Milliseconds since the Unix epoch.
///
/// All model timestamps use millisecond precision so that the staleness
/// comparison in the file sync engine can distinguish writes landing
/// within the same second.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Authenticated user identity with display metadata.
///
/// Reply author attributes are denormalized from this at creation time,
/// since the profile may change later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: String,
}

impl UserProfile {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Create with explicit user_id (for testing)
    pub fn with_id(user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// The fixed set of annotation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Observation,
    Question,
    Metaphor,
    Pattern,
    Context,
    Critique,
}

/// A threaded reply under one annotation.
///
/// Append-only from the model's perspective: replies can be deleted but
/// never edited. `author_label` is captured at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationReply {
    pub id: Uuid,
    pub annotation_id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_label: Option<String>,
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AnnotationReply {
    pub fn new(annotation_id: Uuid, content: impl Into<String>) -> Self {
        let now = unix_ms();
        Self {
            id: Uuid::new_v4(),
            annotation_id,
            author_id: None,
            author_label: None,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach author identity captured from the active profile.
    pub fn by(mut self, author: &UserProfile) -> Self {
        self.author_id = Some(author.user_id);
        self.author_label = Some(author.display_name.clone());
        self
    }
}

/// An annotation attached to one code artefact at a specific line.
///
/// The id is assigned by the creating client, not the store — pushing
/// the same annotation twice upserts one record, which is what makes
/// the sync engine's push idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    /// The artefact this annotation is anchored to. Must reference a
    /// file present in the same project at creation time.
    pub file_id: Uuid,
    pub author_id: Option<Uuid>,
    pub line_number: u32,
    /// End line for range annotations.
    pub end_line_number: Option<u32>,
    /// Snapshot of the anchored line's text at creation time.
    pub line_content: Option<String>,
    pub kind: AnnotationKind,
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// Threaded replies, nested locally; stored flat remotely.
    #[serde(default)]
    pub replies: Vec<AnnotationReply>,
}

impl Annotation {
    pub fn new(
        file_id: Uuid,
        line_number: u32,
        kind: AnnotationKind,
        content: impl Into<String>,
    ) -> Self {
        let now = unix_ms();
        Self {
            id: Uuid::new_v4(),
            file_id,
            author_id: None,
            line_number,
            end_line_number: None,
            line_content: None,
            kind,
            content: content.into(),
            created_at: now,
            updated_at: now,
            replies: Vec::new(),
        }
    }

    /// Extend to a line range.
    pub fn spanning(mut self, end_line: u32) -> Self {
        self.end_line_number = Some(end_line);
        self
    }

    pub fn by(mut self, author: &UserProfile) -> Self {
        self.author_id = Some(author.user_id);
        self
    }
}

/// A named code artefact: content blob with language tag and display
/// order. `original_content` preserves the upload for revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    pub id: Uuid,
    pub name: String,
    pub language: Option<String>,
    pub content: String,
    pub original_content: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub display_order: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl CodeFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let now = unix_ms();
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            language: None,
            content: content.clone(),
            original_content: Some(content),
            uploaded_by: None,
            display_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Revert to the originally uploaded content, if preserved.
    pub fn revert(&mut self) -> bool {
        match &self.original_content {
            Some(original) => {
                self.content = original.clone();
                self.updated_at = unix_ms();
                true
            }
            None => false,
        }
    }
}

/// A request to remove a code artefact, pending a second party's
/// confirmation.
///
/// Distributed two-phase intent: created by a requester, resolved by any
/// *other* member via confirm (executes deletion) or reject (cancels).
/// Expiry counts as a reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub id: Uuid,
    pub file_id: Uuid,
    pub project_id: Uuid,
    pub requested_by: Option<Uuid>,
    pub filename: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl PendingDeletion {
    pub fn new(project_id: Uuid, file_id: Uuid, filename: impl Into<String>, ttl_ms: u64) -> Self {
        let now = unix_ms();
        Self {
            id: Uuid::new_v4(),
            file_id,
            project_id,
            requested_by: None,
            filename: filename.into(),
            created_at: now,
            expires_at: now + ttl_ms,
        }
    }

    pub fn requested_by(mut self, user_id: Uuid) -> Self {
        self.requested_by = Some(user_id);
        self
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

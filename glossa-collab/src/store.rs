//! Remote store adapter: typed request/response operations against
//! project-scoped collections.
//!
//! The core assumes a generic queryable object store — it does not care
//! whether that is an HTTP API, an IPC bridge, or a test double. The
//! [`RemoteStore`] trait is that boundary:
//!
//! ```text
//! ┌──────────────────┐   upsert/fetch/delete   ┌──────────────────┐
//! │ Sync engines     │ ──────────────────────► │ RemoteStore impl │
//! │ (glossa-collab)  │ ◄────────────────────── │ (shared, remote) │
//! └──────────────────┘   typed records/errors  └──────────────────┘
//! ```
//!
//! All writes are upserts keyed by client-generated id — pushing the
//! same record twice stores one row. Reads are filtered by project id
//! (and a file-id set for annotations/replies). Errors are typed and
//! returned to the caller; the engines never auto-retry an individual
//! operation — the next poll cycle re-attempts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use glossa_core::{unix_ms, Annotation, AnnotationKind, AnnotationReply, CodeFile, PendingDeletion};

/// Store operation errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Transport failure (network unreachable, connection reset)
    Network(String),
    /// The operation did not complete in time
    Timeout,
    /// The store rejected the caller's credentials
    Unauthorized,
    /// Store-side validation or constraint failure
    Constraint(String),
    /// Record could not be encoded/decoded at the boundary
    Serialization(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Network(e) => write!(f, "Network error: {e}"),
            StoreError::Timeout => write!(f, "Operation timed out"),
            StoreError::Unauthorized => write!(f, "Unauthorized"),
            StoreError::Constraint(e) => write!(f, "Constraint violation: {e}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// How a deletion request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionOutcome {
    Confirmed,
    Rejected,
}

/// Annotation row as stored remotely (replies live in their own
/// collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: Uuid,
    pub file_id: Uuid,
    pub project_id: Uuid,
    pub author_id: Option<Uuid>,
    pub line_number: u32,
    pub end_line_number: Option<u32>,
    pub line_content: Option<String>,
    pub kind: AnnotationKind,
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AnnotationRecord {
    pub fn from_model(a: &Annotation, project_id: Uuid) -> Self {
        Self {
            id: a.id,
            file_id: a.file_id,
            project_id,
            author_id: a.author_id,
            line_number: a.line_number,
            end_line_number: a.end_line_number,
            line_content: a.line_content.clone(),
            kind: a.kind,
            content: a.content.clone(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }

    /// Reassemble the local model, attaching this annotation's replies.
    pub fn into_model(self, replies: Vec<AnnotationReply>) -> Annotation {
        Annotation {
            id: self.id,
            file_id: self.file_id,
            author_id: self.author_id,
            line_number: self.line_number,
            end_line_number: self.end_line_number,
            line_content: self.line_content,
            kind: self.kind,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            replies,
        }
    }
}

/// Reply row as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub id: Uuid,
    pub annotation_id: Uuid,
    pub project_id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_label: Option<String>,
    pub content: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ReplyRecord {
    pub fn from_model(r: &AnnotationReply, project_id: Uuid) -> Self {
        Self {
            id: r.id,
            annotation_id: r.annotation_id,
            project_id,
            author_id: r.author_id,
            author_label: r.author_label.clone(),
            content: r.content.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }

    pub fn into_model(self) -> AnnotationReply {
        AnnotationReply {
            id: self.id,
            annotation_id: self.annotation_id,
            author_id: self.author_id,
            author_label: self.author_label,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Code artefact row as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub language: Option<String>,
    pub content: String,
    pub original_content: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub display_order: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl FileRecord {
    pub fn from_model(f: &CodeFile, project_id: Uuid) -> Self {
        Self {
            id: f.id,
            project_id,
            filename: f.name.clone(),
            language: f.language.clone(),
            content: f.content.clone(),
            original_content: f.original_content.clone(),
            uploaded_by: f.uploaded_by,
            display_order: f.display_order,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }

    pub fn into_model(self) -> CodeFile {
        CodeFile {
            id: self.id,
            name: self.filename,
            language: self.language,
            content: self.content,
            original_content: self.original_content,
            uploaded_by: self.uploaded_by,
            display_order: self.display_order,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Result of a staleness-checked file upsert.
///
/// `skipped = true` means the remote row was newer than the caller's
/// `expected_updated_at` baseline; `record` then carries the winning
/// remote row so the caller can re-fetch-free rebase on it.
#[derive(Debug, Clone)]
pub struct FileUpsert {
    pub record: FileRecord,
    pub skipped: bool,
}

/// The remote store boundary.
///
/// Every operation is scoped by project id and idempotent on record id
/// (upsert semantics). Implementations must cascade annotation and
/// reply deletion when a file is deleted.
#[allow(async_fn_in_trait)]
pub trait RemoteStore: Send + Sync {
    async fn fetch_annotations(
        &self,
        project_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<Vec<AnnotationRecord>, StoreError>;

    async fn upsert_annotation(
        &self,
        record: AnnotationRecord,
    ) -> Result<AnnotationRecord, StoreError>;

    async fn delete_annotation(&self, project_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    async fn fetch_replies(
        &self,
        project_id: Uuid,
        annotation_ids: &[Uuid],
    ) -> Result<Vec<ReplyRecord>, StoreError>;

    async fn upsert_reply(&self, record: ReplyRecord) -> Result<ReplyRecord, StoreError>;

    async fn delete_reply(&self, project_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    async fn fetch_files(&self, project_id: Uuid) -> Result<Vec<FileRecord>, StoreError>;

    /// Staleness-checked upsert. When `expected_updated_at` is given
    /// and the stored row is newer, the write is skipped and the
    /// current row returned instead. `None` writes unconditionally.
    async fn upsert_file(
        &self,
        record: FileRecord,
        expected_updated_at: Option<u64>,
    ) -> Result<FileUpsert, StoreError>;

    /// Delete a file and cascade its annotations/replies. Deleting an
    /// absent id is a no-op, not an error.
    async fn delete_file(&self, project_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    async fn create_deletion_request(
        &self,
        record: PendingDeletion,
    ) -> Result<PendingDeletion, StoreError>;

    async fn list_deletion_requests(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PendingDeletion>, StoreError>;

    /// Remove a deletion request. Resolving an absent id is a no-op.
    async fn resolve_deletion_request(
        &self,
        project_id: Uuid,
        id: Uuid,
        outcome: DeletionOutcome,
    ) -> Result<(), StoreError>;
}

/// Store operation counters.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub fetches: u64,
    pub upserts: u64,
    pub deletes: u64,
    pub skipped_writes: u64,
}

/// Atomic counters — snapshot via [`MemoryStore::stats`].
#[derive(Default)]
struct AtomicStoreStats {
    fetches: AtomicU64,
    upserts: AtomicU64,
    deletes: AtomicU64,
    skipped_writes: AtomicU64,
}

/// In-process implementation of [`RemoteStore`].
///
/// Each collection is a map of id → JSON value; records are serialized
/// through `serde_json` at the boundary, the way they would be over a
/// wire. `updated_at` is stamped monotonically per record on upsert so
/// staleness comparisons between concurrent writers are deterministic.
///
/// Shared between simulated clients via `Arc` in tests; an offline
/// switch turns every operation into a transport error.
pub struct MemoryStore {
    annotations: RwLock<HashMap<Uuid, serde_json::Value>>,
    replies: RwLock<HashMap<Uuid, serde_json::Value>>,
    files: RwLock<HashMap<Uuid, serde_json::Value>>,
    deletion_requests: RwLock<HashMap<Uuid, serde_json::Value>>,
    stats: AtomicStoreStats,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            annotations: RwLock::new(HashMap::new()),
            replies: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            deletion_requests: RwLock::new(HashMap::new()),
            stats: AtomicStoreStats::default(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate transport failure: while offline, every operation
    /// returns `StoreError::Network`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            upserts: self.stats.upserts.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            skipped_writes: self.stats.skipped_writes.load(Ordering::Relaxed),
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Network("store offline".to_string()));
        }
        Ok(())
    }

    fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(value: &serde_json::Value) -> Result<T, StoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Next monotonic last-modified stamp for a record.
    fn stamp(previous: Option<u64>) -> u64 {
        let now = unix_ms();
        match previous {
            Some(prev) if prev >= now => prev + 1,
            _ => now,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    async fn fetch_annotations(
        &self,
        project_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<Vec<AnnotationRecord>, StoreError> {
        self.check_online()?;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let rows = self.annotations.read().await;
        let mut out = Vec::new();
        for value in rows.values() {
            let record: AnnotationRecord = Self::decode(value)?;
            if record.project_id == project_id && file_ids.contains(&record.file_id) {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn upsert_annotation(
        &self,
        mut record: AnnotationRecord,
    ) -> Result<AnnotationRecord, StoreError> {
        self.check_online()?;
        self.stats.upserts.fetch_add(1, Ordering::Relaxed);

        let mut rows = self.annotations.write().await;
        let previous = rows
            .get(&record.id)
            .and_then(|v| Self::decode::<AnnotationRecord>(v).ok());
        record.updated_at = Self::stamp(previous.map(|p| p.updated_at));
        rows.insert(record.id, Self::encode(&record)?);
        Ok(record)
    }

    async fn delete_annotation(&self, _project_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        self.check_online()?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);

        self.annotations.write().await.remove(&id);
        // Orphaned replies go with their annotation.
        let mut replies = self.replies.write().await;
        let mut orphaned = Vec::new();
        for (reply_id, value) in replies.iter() {
            let record: ReplyRecord = Self::decode(value)?;
            if record.annotation_id == id {
                orphaned.push(*reply_id);
            }
        }
        for reply_id in orphaned {
            replies.remove(&reply_id);
        }
        Ok(())
    }

    async fn fetch_replies(
        &self,
        project_id: Uuid,
        annotation_ids: &[Uuid],
    ) -> Result<Vec<ReplyRecord>, StoreError> {
        self.check_online()?;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let rows = self.replies.read().await;
        let mut out = Vec::new();
        for value in rows.values() {
            let record: ReplyRecord = Self::decode(value)?;
            if record.project_id == project_id && annotation_ids.contains(&record.annotation_id) {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn upsert_reply(&self, mut record: ReplyRecord) -> Result<ReplyRecord, StoreError> {
        self.check_online()?;
        self.stats.upserts.fetch_add(1, Ordering::Relaxed);

        let mut rows = self.replies.write().await;
        let previous = rows
            .get(&record.id)
            .and_then(|v| Self::decode::<ReplyRecord>(v).ok());
        record.updated_at = Self::stamp(previous.map(|p| p.updated_at));
        rows.insert(record.id, Self::encode(&record)?);
        Ok(record)
    }

    async fn delete_reply(&self, _project_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        self.check_online()?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.replies.write().await.remove(&id);
        Ok(())
    }

    async fn fetch_files(&self, project_id: Uuid) -> Result<Vec<FileRecord>, StoreError> {
        self.check_online()?;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let rows = self.files.read().await;
        let mut out = Vec::new();
        for value in rows.values() {
            let record: FileRecord = Self::decode(value)?;
            if record.project_id == project_id {
                out.push(record);
            }
        }
        out.sort_by_key(|r| (r.display_order, r.created_at));
        Ok(out)
    }

    async fn upsert_file(
        &self,
        mut record: FileRecord,
        expected_updated_at: Option<u64>,
    ) -> Result<FileUpsert, StoreError> {
        self.check_online()?;

        let mut rows = self.files.write().await;
        let previous = rows
            .get(&record.id)
            .map(|v| Self::decode::<FileRecord>(v))
            .transpose()?;

        // Staleness gate: the write lands only if the caller's baseline
        // is at least as new as the stored row.
        if let (Some(expected), Some(current)) = (expected_updated_at, previous.as_ref()) {
            if current.updated_at > expected {
                self.stats.skipped_writes.fetch_add(1, Ordering::Relaxed);
                return Ok(FileUpsert {
                    record: current.clone(),
                    skipped: true,
                });
            }
        }

        self.stats.upserts.fetch_add(1, Ordering::Relaxed);
        record.updated_at = Self::stamp(previous.map(|p| p.updated_at));
        rows.insert(record.id, Self::encode(&record)?);
        Ok(FileUpsert {
            record,
            skipped: false,
        })
    }

    async fn delete_file(&self, project_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        self.check_online()?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);

        self.files.write().await.remove(&id);

        // Cascade: a file takes its annotations (and their replies).
        let mut annotations = self.annotations.write().await;
        let mut removed_annotations = Vec::new();
        for (ann_id, value) in annotations.iter() {
            let record: AnnotationRecord = Self::decode(value)?;
            if record.file_id == id && record.project_id == project_id {
                removed_annotations.push(*ann_id);
            }
        }
        for ann_id in &removed_annotations {
            annotations.remove(ann_id);
        }

        let mut replies = self.replies.write().await;
        let mut orphaned = Vec::new();
        for (reply_id, value) in replies.iter() {
            let record: ReplyRecord = Self::decode(value)?;
            if removed_annotations.contains(&record.annotation_id) {
                orphaned.push(*reply_id);
            }
        }
        for reply_id in orphaned {
            replies.remove(&reply_id);
        }
        Ok(())
    }

    async fn create_deletion_request(
        &self,
        record: PendingDeletion,
    ) -> Result<PendingDeletion, StoreError> {
        self.check_online()?;
        self.stats.upserts.fetch_add(1, Ordering::Relaxed);

        self.deletion_requests
            .write()
            .await
            .insert(record.id, Self::encode(&record)?);
        Ok(record)
    }

    async fn list_deletion_requests(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<PendingDeletion>, StoreError> {
        self.check_online()?;
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let rows = self.deletion_requests.read().await;
        let mut out = Vec::new();
        for value in rows.values() {
            let record: PendingDeletion = Self::decode(value)?;
            if record.project_id == project_id {
                out.push(record);
            }
        }
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn resolve_deletion_request(
        &self,
        _project_id: Uuid,
        id: Uuid,
        outcome: DeletionOutcome,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);

        if self.deletion_requests.write().await.remove(&id).is_some() {
            log::debug!("Deletion request {id} resolved: {outcome:?}");
        }
        Ok(())
    }
}

//! Annotation sync engine: reconciles the local annotation set against
//! the remote store.
//!
//! The engine pushes unsynced local annotations and replies, pulls and
//! merges remote snapshots, and tracks synced-id membership. Its core
//! correctness property is the merge partition:
//!
//! - a local annotation whose id was previously synced but is absent
//!   from the remote snapshot was deleted elsewhere — drop it
//!   (tombstone by absence);
//! - a local annotation never pushed yet must survive every merge, no
//!   matter how the push/poll race interleaves;
//! - everything in the remote snapshot is kept, remote values winning
//!   on id collision (field-level last-writer-wins).
//!
//! Every push/delete is guarded: when collaboration is disabled, the
//! user is unauthenticated, or no project is active, the operation is
//! a silent no-op — these are expected states, not failures.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use glossa_core::{Annotation, AnnotationReply};

use crate::context::ClientContext;
use crate::store::{AnnotationRecord, RemoteStore, ReplyRecord, StoreError};

/// Whether a guarded operation actually reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Precondition not met (no project, signed out, collaboration
    /// off); nothing was sent.
    Skipped,
}

/// Result of merging a remote snapshot into local state.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The reconciled annotation set to install locally.
    pub annotations: Vec<Annotation>,
    /// Ids present remotely but not locally before the merge — a
    /// read-only signal for transient UI emphasis.
    pub new_remote_ids: Vec<Uuid>,
}

pub struct AnnotationSyncEngine<S> {
    store: Arc<S>,
    ctx: Arc<ClientContext>,
    /// Ids the client believes the remote store already reflects.
    synced: HashSet<Uuid>,
    synced_replies: HashSet<Uuid>,
    /// Most recent push/delete, read by the poll schedule for
    /// self-write suppression.
    last_local_write: Option<Instant>,
}

impl<S: RemoteStore> AnnotationSyncEngine<S> {
    pub fn new(store: Arc<S>, ctx: Arc<ClientContext>) -> Self {
        Self {
            store,
            ctx,
            synced: HashSet::new(),
            synced_replies: HashSet::new(),
            last_local_write: None,
        }
    }

    fn mark_write(&mut self) {
        self.last_local_write = Some(Instant::now());
    }

    pub fn last_local_write(&self) -> Option<Instant> {
        self.last_local_write
    }

    pub fn is_synced(&self, id: Uuid) -> bool {
        self.synced.contains(&id)
    }

    pub fn is_reply_synced(&self, id: Uuid) -> bool {
        self.synced_replies.contains(&id)
    }

    /// Fetch a fresh snapshot of all annotations (with replies) for the
    /// given artefacts.
    pub async fn pull(&self, file_ids: &[Uuid]) -> Result<Vec<Annotation>, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(Vec::new());
        };
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.fetch_annotations(project, file_ids).await?;
        let annotation_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let reply_records = self.store.fetch_replies(project, &annotation_ids).await?;

        let mut replies_by_annotation: HashMap<Uuid, Vec<AnnotationReply>> = HashMap::new();
        for record in reply_records {
            replies_by_annotation
                .entry(record.annotation_id)
                .or_default()
                .push(record.into_model());
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let replies = replies_by_annotation.remove(&record.id).unwrap_or_default();
                record.into_model(replies)
            })
            .collect())
    }

    /// Upsert one annotation remotely.
    pub async fn push(&mut self, annotation: &Annotation) -> Result<PushOutcome, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(PushOutcome::Skipped);
        };

        let record = AnnotationRecord::from_model(annotation, project);
        self.store.upsert_annotation(record).await?;
        self.synced.insert(annotation.id);
        self.mark_write();
        log::debug!("Pushed annotation {}", annotation.id);
        Ok(PushOutcome::Pushed)
    }

    pub async fn push_reply(&mut self, reply: &AnnotationReply) -> Result<PushOutcome, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(PushOutcome::Skipped);
        };

        let record = ReplyRecord::from_model(reply, project);
        self.store.upsert_reply(record).await?;
        self.synced_replies.insert(reply.id);
        self.mark_write();
        Ok(PushOutcome::Pushed)
    }

    pub async fn delete_annotation(&mut self, id: Uuid) -> Result<PushOutcome, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(PushOutcome::Skipped);
        };

        self.store.delete_annotation(project, id).await?;
        self.synced.remove(&id);
        self.mark_write();
        Ok(PushOutcome::Pushed)
    }

    pub async fn delete_reply(&mut self, id: Uuid) -> Result<PushOutcome, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(PushOutcome::Skipped);
        };

        self.store.delete_reply(project, id).await?;
        self.synced_replies.remove(&id);
        self.mark_write();
        Ok(PushOutcome::Pushed)
    }

    /// Merge a remote snapshot with the local annotation set.
    ///
    /// Re-baselines the synced-id sets to the snapshot: after a merge,
    /// exactly the remotely-present ids are considered synced.
    pub fn merge(&mut self, remote: Vec<Annotation>, local: &[Annotation]) -> MergeOutcome {
        let remote_ids: HashSet<Uuid> = remote.iter().map(|a| a.id).collect();
        let local_ids: HashSet<Uuid> = local.iter().map(|a| a.id).collect();

        let new_remote_ids: Vec<Uuid> = remote
            .iter()
            .map(|a| a.id)
            .filter(|id| !local_ids.contains(id))
            .collect();

        // Local-only annotations survive only if they were never
        // synced; a synced id missing remotely was deleted elsewhere.
        let mut merged: Vec<Annotation> = remote;
        for annotation in local {
            if !remote_ids.contains(&annotation.id) && !self.synced.contains(&annotation.id) {
                merged.push(annotation.clone());
            }
        }

        self.synced = remote_ids;
        self.synced_replies = merged
            .iter()
            .filter(|a| self.synced.contains(&a.id))
            .flat_map(|a| a.replies.iter().map(|r| r.id))
            .collect();

        MergeOutcome {
            annotations: merged,
            new_remote_ids,
        }
    }

    /// Treat a freshly loaded snapshot as fully synced (project join,
    /// hard refresh).
    pub fn rebaseline(&mut self, annotations: &[Annotation]) {
        self.synced = annotations.iter().map(|a| a.id).collect();
        self.synced_replies = annotations
            .iter()
            .flat_map(|a| a.replies.iter().map(|r| r.id))
            .collect();
        self.last_local_write = None;
    }

    /// Drop all membership state (project leave).
    pub fn clear(&mut self) {
        self.synced.clear();
        self.synced_replies.clear();
        self.last_local_write = None;
    }
}

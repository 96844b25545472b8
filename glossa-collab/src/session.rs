//! Collaborative session orchestrator.
//!
//! `CollabSession` composes the two sync engines over the local session
//! store and exposes the wrapped mutation API callers use instead of
//! the raw store. Every wrapped operation applies its mutation locally
//! first — the UI never blocks on the network — and then, when a
//! project is active, makes the corresponding push or negotiation
//! call:
//!
//! ```text
//!        UI / caller
//!             │
//!             ▼
//!      CollabSession ──► SessionStore (local truth, reducer)
//!        │        │
//!        ▼        ▼
//!  AnnotationSync FileSync ──► RemoteStore (shared, multi-writer)
//!        ▲        ▲
//!        └── poll ┘   SyncSchedule × 2 + DebounceQueue
//! ```
//!
//! Failed pushes never roll back the optimistic local edit: the local
//! copy stays the source of truth until the next successful
//! reconciliation, and the poll loop retries on its own cadence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use glossa_core::{
    Annotation, AnnotationReply, CodeFile, PendingDeletion, SessionAction, SessionState,
    SessionStore,
};

use crate::annotations::AnnotationSyncEngine;
use crate::context::ClientContext;
use crate::files::{FileSyncEngine, SaveOutcome, TrashEntry};
use crate::schedule::{
    DebounceQueue, SyncSchedule, Tick, VisibilityEvent, EDIT_DEBOUNCE, NEW_FILE_DEBOUNCE,
    POLL_INTERVAL, WRITE_SUPPRESS_WINDOW,
};
use crate::store::{RemoteStore, StoreError};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub suppress_window: Duration,
    pub new_file_debounce: Duration,
    pub edit_debounce: Duration,
    /// Event channel capacity; events beyond it are dropped.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            suppress_window: WRITE_SUPPRESS_WINDOW,
            new_file_debounce: NEW_FILE_DEBOUNCE,
            edit_debounce: EDIT_DEBOUNCE,
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create config for testing (tiny intervals, no suppression).
    pub fn for_testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            suppress_window: Duration::ZERO,
            new_file_debounce: Duration::from_millis(1),
            edit_debounce: Duration::from_millis(5),
            event_capacity: 64,
        }
    }
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ProjectJoined { project_id: Uuid },
    ProjectLeft,
    /// A poll merged remote annotations; `new_remote_ids` arrived from
    /// other members and may deserve transient UI emphasis.
    AnnotationsMerged { new_remote_ids: Vec<Uuid> },
    /// A poll changed the artefact list or contents.
    FilesChanged { changed: Vec<Uuid>, removed: Vec<Uuid> },
    /// Another member asks to delete an artefact.
    DeletionRequested(PendingDeletion),
    DeletionResolved { file_id: Uuid, deleted: bool },
    /// A save lost the staleness race; the winning value has been
    /// adopted locally.
    SaveSkipped { file_id: Uuid },
    SyncError { context: &'static str, message: String },
}

/// What `remove_file` did.
#[derive(Debug, Clone)]
pub enum RemovalOutcome {
    /// Deleted directly (solo context or never-synced file).
    Removed,
    /// A deletion negotiation is open; the artefact stays until a
    /// second party confirms.
    Requested(PendingDeletion),
    NotFound,
}

pub struct CollabSession<S> {
    ctx: Arc<ClientContext>,
    session: SessionStore,
    annotations: AnnotationSyncEngine<S>,
    files: FileSyncEngine<S>,
    annotation_schedule: SyncSchedule,
    file_schedule: SyncSchedule,
    debounce: DebounceQueue,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl<S: RemoteStore> CollabSession<S> {
    pub fn new(store: Arc<S>, ctx: Arc<ClientContext>) -> Self {
        Self::with_config(store, ctx, SessionConfig::default())
    }

    pub fn with_config(store: Arc<S>, ctx: Arc<ClientContext>, config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        Self {
            annotations: AnnotationSyncEngine::new(store.clone(), ctx.clone()),
            files: FileSyncEngine::new(store, ctx.clone()),
            annotation_schedule: SyncSchedule::with_intervals(
                config.poll_interval,
                config.suppress_window,
            ),
            file_schedule: SyncSchedule::with_intervals(
                config.poll_interval,
                config.suppress_window,
            ),
            debounce: DebounceQueue::with_delays(config.new_file_debounce, config.edit_debounce),
            ctx,
            session: SessionStore::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// The local session state — the canonical local truth.
    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    fn emit(&self, event: SyncEvent) {
        if self.event_tx.try_send(event).is_err() {
            log::debug!("Sync event dropped: channel full or closed");
        }
    }

    // ── Project lifecycle ──────────────────────────────────────────

    /// Join a project: load the remote snapshot, install it locally,
    /// and re-baseline the membership sets so nothing just pulled is
    /// re-pushed on the next tick.
    pub async fn join_project(&mut self, project_id: Uuid) -> Result<(), StoreError> {
        self.ctx.set_active_project(Some(project_id));

        if let Err(e) = self.load_snapshot().await {
            self.ctx.set_active_project(None);
            return Err(e);
        }

        let now = Instant::now();
        self.annotation_schedule.mark_polled(now);
        self.file_schedule.mark_polled(now);
        log::info!(
            "Joined project {project_id}: {} files, {} annotations",
            self.session.state().files.len(),
            self.session.state().annotations.len()
        );
        self.emit(SyncEvent::ProjectJoined { project_id });
        Ok(())
    }

    /// Leave the current project, clearing local state and membership
    /// sets.
    pub fn leave_project(&mut self) {
        self.annotations.clear();
        self.files.clear();
        self.debounce.clear();
        self.ctx.set_active_project(None);
        self.session.dispatch(SessionAction::Reset);
        self.emit(SyncEvent::ProjectLeft);
    }

    /// Hard resync: discard local annotation/file state and replace it
    /// wholesale with a fresh remote snapshot. Manual recovery from a
    /// suspected desync.
    pub async fn refresh_from_cloud(&mut self) -> Result<(), StoreError> {
        if self.ctx.sync_project().is_none() {
            return Ok(());
        }

        self.debounce.clear();
        self.load_snapshot().await?;
        let now = Instant::now();
        self.annotation_schedule.mark_polled(now);
        self.file_schedule.mark_polled(now);
        log::info!("Refreshed session from cloud");
        Ok(())
    }

    async fn load_snapshot(&mut self) -> Result<(), StoreError> {
        let files = self.files.fetch().await?;
        self.files.rebaseline(&files);
        self.session.dispatch(SessionAction::SetFiles(files));

        let file_ids = self.session.file_ids();
        let annotations = self.annotations.pull(&file_ids).await?;
        self.annotations.rebaseline(&annotations);
        self.session
            .dispatch(SessionAction::SetAnnotations(annotations));
        Ok(())
    }

    // ── Annotations ────────────────────────────────────────────────

    /// Create an annotation: applied locally at once, pushed in the
    /// background of this call. A push failure is surfaced as an event
    /// and healed by the next poll.
    pub async fn add_annotation(&mut self, mut annotation: Annotation) {
        if annotation.author_id.is_none() {
            annotation.author_id = self.ctx.user_id();
        }
        if self.session.file(annotation.file_id).is_none() {
            log::warn!(
                "Refusing annotation {} for unknown file {}",
                annotation.id,
                annotation.file_id
            );
            return;
        }

        self.session
            .dispatch(SessionAction::AddAnnotation(annotation.clone()));

        if let Err(e) = self.annotations.push(&annotation).await {
            log::warn!("Annotation push failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "push annotation",
                message: e.to_string(),
            });
        }
    }

    pub async fn update_annotation(&mut self, annotation_id: Uuid, content: String) {
        self.session.dispatch(SessionAction::UpdateAnnotation {
            annotation_id,
            content,
        });

        let Some(updated) = self.session.annotation(annotation_id).cloned() else {
            return;
        };
        if let Err(e) = self.annotations.push(&updated).await {
            log::warn!("Annotation push failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "push annotation",
                message: e.to_string(),
            });
        }
    }

    pub async fn remove_annotation(&mut self, annotation_id: Uuid) {
        self.session
            .dispatch(SessionAction::RemoveAnnotation { annotation_id });

        if let Err(e) = self.annotations.delete_annotation(annotation_id).await {
            log::warn!("Annotation delete failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "delete annotation",
                message: e.to_string(),
            });
        }
    }

    /// Reply under an annotation, author attributes captured from the
    /// current profile. Returns the reply id, or `None` if the
    /// annotation is unknown.
    pub async fn add_reply(
        &mut self,
        annotation_id: Uuid,
        content: impl Into<String>,
    ) -> Option<Uuid> {
        self.session.annotation(annotation_id)?;

        let mut reply = AnnotationReply::new(annotation_id, content);
        if let Some(profile) = self.ctx.profile() {
            reply = reply.by(&profile);
        }
        let reply_id = reply.id;

        self.session.dispatch(SessionAction::AddReply {
            annotation_id,
            reply: reply.clone(),
        });

        if let Err(e) = self.annotations.push_reply(&reply).await {
            log::warn!("Reply push failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "push reply",
                message: e.to_string(),
            });
        }
        Some(reply_id)
    }

    pub async fn remove_reply(&mut self, annotation_id: Uuid, reply_id: Uuid) {
        self.session.dispatch(SessionAction::RemoveReply {
            annotation_id,
            reply_id,
        });

        if let Err(e) = self.annotations.delete_reply(reply_id).await {
            log::warn!("Reply delete failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "delete reply",
                message: e.to_string(),
            });
        }
    }

    // ── Files ──────────────────────────────────────────────────────

    /// Add an artefact. The first push fires after the short
    /// new-file debounce so it becomes visible to other members
    /// quickly.
    pub fn add_file(&mut self, mut file: CodeFile) {
        if file.uploaded_by.is_none() {
            file.uploaded_by = self.ctx.user_id();
        }

        self.files.note_created(file.id);
        self.debounce.note(file.id, true, Instant::now());
        self.session.dispatch(SessionAction::AddFile(file));
    }

    /// Edit an artefact's content. Pushes are debounced so the store
    /// is not flooded with every keystroke.
    pub fn set_file_content(&mut self, file_id: Uuid, content: String) {
        if self.session.file(file_id).is_none() {
            return;
        }
        self.session
            .dispatch(SessionAction::SetFileContent { file_id, content });
        self.debounce
            .note(file_id, self.files.is_pending_new(file_id), Instant::now());
    }

    pub fn rename_file(&mut self, file_id: Uuid, name: String) {
        if self.session.file(file_id).is_none() {
            return;
        }
        self.session
            .dispatch(SessionAction::RenameFile { file_id, name });
        self.debounce
            .note(file_id, self.files.is_pending_new(file_id), Instant::now());
    }

    /// Remove an artefact.
    ///
    /// In a collaborative session this opens a deletion negotiation
    /// and leaves the artefact untouched until a second party
    /// confirms. Solo sessions, and files no other member has seen
    /// yet, delete directly.
    pub async fn remove_file(&mut self, file_id: Uuid) -> Result<RemovalOutcome, StoreError> {
        let Some(file) = self.session.file(file_id).cloned() else {
            return Ok(RemovalOutcome::NotFound);
        };

        let negotiate =
            self.ctx.sync_project().is_some() && !self.files.is_pending_new(file_id);
        if !negotiate {
            return self.remove_direct(file).await;
        }

        if let Some(existing) = self.files.open_request_for(file_id).cloned() {
            log::debug!("Deletion of {} already requested", file.name);
            return Ok(RemovalOutcome::Requested(existing));
        }

        match self.files.request_deletion(file_id, &file.name).await? {
            Some(request) => {
                self.emit(SyncEvent::DeletionRequested(request.clone()));
                Ok(RemovalOutcome::Requested(request))
            }
            // The sync gate dropped mid-call (sign-out, project leave);
            // fall back to the direct path.
            None => self.remove_direct(file).await,
        }
    }

    async fn remove_direct(&mut self, file: CodeFile) -> Result<RemovalOutcome, StoreError> {
        self.debounce.remove(file.id);
        self.session
            .dispatch(SessionAction::RemoveFile { file_id: file.id });

        if let Err(e) = self.files.delete(&file).await {
            // Local state is already updated; the remote row survives
            // and the next poll will resurrect it until a retry lands.
            log::warn!("File delete failed: {e}");
            self.emit(SyncEvent::SyncError {
                context: "delete file",
                message: e.to_string(),
            });
            return Err(e);
        }
        Ok(RemovalOutcome::Removed)
    }

    /// Confirm another member's deletion request, executing the
    /// deletion. Confirming after the artefact is already gone is a
    /// no-op.
    pub async fn confirm_deletion(&mut self, request: &PendingDeletion) -> Result<(), StoreError> {
        self.files
            .confirm_deletion(request.id, request.file_id)
            .await?;

        self.debounce.remove(request.file_id);
        self.session.dispatch(SessionAction::RemoveFile {
            file_id: request.file_id,
        });
        self.emit(SyncEvent::DeletionResolved {
            file_id: request.file_id,
            deleted: true,
        });
        Ok(())
    }

    /// Reject a deletion request; the artefact is unaffected.
    pub async fn reject_deletion(&mut self, request: &PendingDeletion) -> Result<(), StoreError> {
        self.files.reject_deletion(request.id).await?;
        self.emit(SyncEvent::DeletionResolved {
            file_id: request.file_id,
            deleted: false,
        });
        Ok(())
    }

    // ── Trash ──────────────────────────────────────────────────────

    pub fn trashed(&self) -> &[TrashEntry] {
        self.files.trashed()
    }

    pub async fn restore_file(&mut self, file_id: Uuid) -> Result<Option<CodeFile>, StoreError> {
        let Some(file) = self.files.restore(file_id).await? else {
            return Ok(None);
        };
        self.session.dispatch(SessionAction::AddFile(file.clone()));
        Ok(Some(file))
    }

    pub fn purge_trashed(&mut self, file_id: Uuid) -> bool {
        self.files.purge(file_id)
    }

    pub fn empty_trash(&mut self) -> usize {
        self.files.empty_trash()
    }

    // ── Sync driving ───────────────────────────────────────────────

    /// Flush everything unsynced now: debounced file edits, plus any
    /// annotations and replies that never made it out. Best-effort;
    /// failures are logged and retried by the next poll.
    pub async fn save_all(&mut self) {
        for file_id in self.debounce.take_all() {
            self.flush_file(file_id).await;
        }

        let unsynced: Vec<Annotation> = self
            .session
            .state()
            .annotations
            .iter()
            .filter(|a| !self.annotations.is_synced(a.id))
            .cloned()
            .collect();
        for annotation in &unsynced {
            if let Err(e) = self.annotations.push(annotation).await {
                log::warn!("save_all: annotation push failed: {e}");
            }
        }

        let unsynced_replies: Vec<AnnotationReply> = self
            .session
            .state()
            .annotations
            .iter()
            .flat_map(|a| a.replies.iter())
            .filter(|r| !self.annotations.is_reply_synced(r.id))
            .cloned()
            .collect();
        for reply in &unsynced_replies {
            if let Err(e) = self.annotations.push_reply(reply).await {
                log::warn!("save_all: reply push failed: {e}");
            }
        }
    }

    /// Feed foreground/background transitions to the schedules; a
    /// foreground transition polls immediately on the next tick.
    pub fn handle_visibility(&mut self, event: VisibilityEvent) {
        self.annotation_schedule.handle_visibility(event);
        self.file_schedule.handle_visibility(event);
    }

    /// Advance both poll loops and the debounce queue to `now`.
    ///
    /// One failed fetch never aborts the cadence: errors are logged,
    /// surfaced as events, and retried next interval.
    pub async fn tick(&mut self, now: Instant) {
        if self
            .annotation_schedule
            .tick(now, self.annotations.last_local_write())
            == Tick::Poll
        {
            if let Err(e) = self.poll_annotations().await {
                log::warn!("Annotation poll failed: {e}");
                self.emit(SyncEvent::SyncError {
                    context: "poll annotations",
                    message: e.to_string(),
                });
            }
        }

        if self.file_schedule.tick(now, self.files.last_local_write()) == Tick::Poll {
            if let Err(e) = self.poll_files().await {
                log::warn!("File poll failed: {e}");
                self.emit(SyncEvent::SyncError {
                    context: "poll files",
                    message: e.to_string(),
                });
            }
        }

        for file_id in self.debounce.take_due(now) {
            self.flush_file(file_id).await;
        }
    }

    /// Drive the session on a coarse cadence. Never returns; run it
    /// under `select!` or abort the task to stop.
    pub async fn run(&mut self) {
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            self.tick(Instant::now()).await;
        }
    }

    async fn flush_file(&mut self, file_id: Uuid) {
        let Some(file) = self.session.file(file_id).cloned() else {
            return;
        };

        match self.files.save(&file).await {
            Ok(SaveOutcome::Saved | SaveOutcome::Unchanged | SaveOutcome::NotSynced) => {}
            Ok(SaveOutcome::Skipped) => {
                self.emit(SyncEvent::SaveSkipped { file_id });
                self.adopt_remote_file(file_id).await;
            }
            Err(e) => {
                log::warn!("File save failed: {e}");
                self.emit(SyncEvent::SyncError {
                    context: "save file",
                    message: e.to_string(),
                });
                // Retry on the next natural sync opportunity.
                self.debounce.note(file_id, false, Instant::now());
            }
        }
    }

    /// After a skipped save, adopt the winning remote value so the
    /// next local edit builds on it.
    async fn adopt_remote_file(&mut self, file_id: Uuid) {
        match self.files.fetch().await {
            Ok(remote) => match remote.into_iter().find(|f| f.id == file_id) {
                Some(winner) => {
                    self.files.note_remote(&winner);
                    self.session.dispatch(SessionAction::AddFile(winner));
                }
                None => {
                    // Deleted remotely while we were editing.
                    self.session.dispatch(SessionAction::RemoveFile { file_id });
                }
            },
            Err(e) => log::warn!("Re-fetch after skipped save failed: {e}"),
        }
    }

    async fn poll_annotations(&mut self) -> Result<(), StoreError> {
        if self.ctx.sync_project().is_none() {
            return Ok(());
        }

        // Push unsynced local work first so this poll's snapshot
        // already reflects it.
        let unsynced: Vec<Annotation> = self
            .session
            .state()
            .annotations
            .iter()
            .filter(|a| !self.annotations.is_synced(a.id))
            .cloned()
            .collect();
        for annotation in &unsynced {
            if let Err(e) = self.annotations.push(annotation).await {
                log::warn!("Unsynced annotation push failed: {e}");
            }
        }
        let unsynced_replies: Vec<AnnotationReply> = self
            .session
            .state()
            .annotations
            .iter()
            .flat_map(|a| a.replies.iter())
            .filter(|r| !self.annotations.is_reply_synced(r.id))
            .cloned()
            .collect();
        for reply in &unsynced_replies {
            if let Err(e) = self.annotations.push_reply(reply).await {
                log::warn!("Unsynced reply push failed: {e}");
            }
        }

        let file_ids = self.session.file_ids();
        let remote = self.annotations.pull(&file_ids).await?;
        let local = self.session.state().annotations.clone();
        let outcome = self.annotations.merge(remote, &local);

        self.session
            .dispatch(SessionAction::SetAnnotations(outcome.annotations));
        if !outcome.new_remote_ids.is_empty() {
            self.emit(SyncEvent::AnnotationsMerged {
                new_remote_ids: outcome.new_remote_ids,
            });
        }
        Ok(())
    }

    async fn poll_files(&mut self) -> Result<(), StoreError> {
        if self.ctx.sync_project().is_none() {
            return Ok(());
        }

        let remote = self.files.fetch().await?;
        let local = self.session.state().files.clone();
        let dirty: HashSet<Uuid> = self.debounce.pending_ids().into_iter().collect();
        let remote_ids: HashSet<Uuid> = remote.iter().map(|f| f.id).collect();

        let mut next: Vec<CodeFile> = Vec::with_capacity(remote.len());
        let mut changed: Vec<Uuid> = Vec::new();
        let mut removed: Vec<Uuid> = Vec::new();

        for remote_file in remote {
            match local.iter().find(|f| f.id == remote_file.id) {
                Some(local_file) if dirty.contains(&remote_file.id) => {
                    // An in-flight local edit is about to save; leave
                    // the content and the staleness baseline alone and
                    // let the save win or skip.
                    next.push(local_file.clone());
                }
                Some(local_file) => {
                    if remote_file.content != local_file.content
                        || remote_file.name != local_file.name
                    {
                        changed.push(remote_file.id);
                    }
                    self.files.note_remote(&remote_file);
                    next.push(remote_file);
                }
                None => {
                    changed.push(remote_file.id);
                    self.files.note_remote(&remote_file);
                    next.push(remote_file);
                }
            }
        }

        for local_file in &local {
            if remote_ids.contains(&local_file.id) {
                continue;
            }
            if self.files.is_pending_new(local_file.id) {
                // Created here moments ago; its first push has not
                // landed. Never evict it.
                next.push(local_file.clone());
            } else if self.files.is_synced(local_file.id) {
                // Previously synced and now absent remotely: deleted
                // elsewhere.
                removed.push(local_file.id);
                self.files.discard(local_file.id);
            } else {
                next.push(local_file.clone());
            }
        }

        self.session.dispatch(SessionAction::SetFiles(next));
        for file_id in &removed {
            // Cascade local annotations of tombstoned files.
            self.session
                .dispatch(SessionAction::RemoveFile { file_id: *file_id });
            self.debounce.remove(*file_id);
        }

        if !changed.is_empty() || !removed.is_empty() {
            self.emit(SyncEvent::FilesChanged { changed, removed });
        }

        let requests = self.files.pull_requests().await?;
        for request in requests.newly_seen {
            self.emit(SyncEvent::DeletionRequested(request));
        }
        Ok(())
    }
}

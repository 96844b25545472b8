//! Code artefact sync engine: staleness-aware file reconciliation plus
//! the deletion negotiation protocol.
//!
//! Saves are double-gated. First a fingerprint check: a file whose
//! name+content hash matches the last synced value has nothing to
//! push. Then the staleness check at the store: the write carries the
//! last remote timestamp this engine observed for the file, and the
//! store skips the write if its row is newer — a slow client must not
//! clobber a faster collaborator's edit. A skipped save is a soft
//! success; the caller re-fetches to pick up the winning value.
//!
//! Deletion is negotiated when the session is collaborative:
//!
//! ```text
//!              request_deletion
//!   Active ───────────────────────► DeletionPending
//!     ▲                                   │
//!     │  reject / expiry                  │ confirm (other member)
//!     └───────────────────────────────────┤
//!                                         ▼
//!                                      Deleted
//! ```
//!
//! Solo sessions (no project, collaboration off, or a file nobody else
//! has seen yet) skip the negotiation — there is no one to ask.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use glossa_core::fingerprint::FileFingerprint;
use glossa_core::{unix_ms, CodeFile, PendingDeletion};

use crate::context::ClientContext;
use crate::store::{DeletionOutcome, FileRecord, RemoteStore, StoreError};

/// How long a deletion request stays open before expiry counts as a
/// reject.
pub const DELETION_REQUEST_TTL_MS: u64 = 120_000;

/// Result of a staleness-checked save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The write landed.
    Saved,
    /// The remote row was newer; nothing written. Re-fetch to pick up
    /// the winning value.
    Skipped,
    /// Fingerprint unchanged since the last sync; nothing to push.
    Unchanged,
    /// Precondition not met (no project, signed out, collaboration
    /// off).
    NotSynced,
}

/// A removed artefact kept for restore.
#[derive(Debug, Clone)]
pub struct TrashEntry {
    pub file: CodeFile,
    /// Whether the artefact was deleted from a remote project (restore
    /// must re-push) or only ever existed locally.
    pub remote: bool,
    pub deleted_at: u64,
}

/// Result of polling the deletion-request collection.
#[derive(Debug, Clone, Default)]
pub struct DeletionRequests {
    /// All live (unexpired) requests for the project.
    pub open: Vec<PendingDeletion>,
    /// The subset this client had not seen before — surfaced to the UI
    /// exactly once.
    pub newly_seen: Vec<PendingDeletion>,
}

pub struct FileSyncEngine<S> {
    store: Arc<S>,
    ctx: Arc<ClientContext>,
    /// file id → last-known-synced name + content hash.
    fingerprints: HashMap<Uuid, FileFingerprint>,
    /// file id → last observed remote `updated_at`. Only advanced when
    /// the corresponding content was actually applied locally, so the
    /// staleness baseline always matches the content an edit builds on.
    observed: HashMap<Uuid, u64>,
    /// Created locally, first push not yet confirmed.
    pending_new: HashSet<Uuid>,
    seen_requests: HashSet<Uuid>,
    open_requests: Vec<PendingDeletion>,
    trash: Vec<TrashEntry>,
    last_local_write: Option<Instant>,
}

impl<S: RemoteStore> FileSyncEngine<S> {
    pub fn new(store: Arc<S>, ctx: Arc<ClientContext>) -> Self {
        Self {
            store,
            ctx,
            fingerprints: HashMap::new(),
            observed: HashMap::new(),
            pending_new: HashSet::new(),
            seen_requests: HashSet::new(),
            open_requests: Vec::new(),
            trash: Vec::new(),
            last_local_write: None,
        }
    }

    fn mark_write(&mut self) {
        self.last_local_write = Some(Instant::now());
    }

    pub fn last_local_write(&self) -> Option<Instant> {
        self.last_local_write
    }

    /// Record a locally created file whose first push is still pending.
    pub fn note_created(&mut self, file_id: Uuid) {
        self.pending_new.insert(file_id);
    }

    pub fn is_pending_new(&self, file_id: Uuid) -> bool {
        self.pending_new.contains(&file_id)
    }

    pub fn is_synced(&self, file_id: Uuid) -> bool {
        self.fingerprints.contains_key(&file_id)
    }

    pub fn observed_stamp(&self, file_id: Uuid) -> Option<u64> {
        self.observed.get(&file_id).copied()
    }

    /// Record a remote file whose value has been applied locally: both
    /// the fingerprint and the observed timestamp move to it.
    pub fn note_remote(&mut self, file: &CodeFile) {
        self.fingerprints
            .insert(file.id, FileFingerprint::of(&file.name, &file.content));
        self.observed.insert(file.id, file.updated_at);
        self.pending_new.remove(&file.id);
    }

    /// Drop all per-file bookkeeping, e.g. after a tombstone-by-absence.
    pub(crate) fn discard(&mut self, file_id: Uuid) {
        self.fingerprints.remove(&file_id);
        self.observed.remove(&file_id);
        self.pending_new.remove(&file_id);
    }

    /// Fetch the project's artefacts. Does not touch the observed
    /// timestamps — reconciliation decides which remote values are
    /// actually applied.
    pub async fn fetch(&self) -> Result<Vec<CodeFile>, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(Vec::new());
        };

        let records = self.store.fetch_files(project).await?;
        Ok(records.into_iter().map(FileRecord::into_model).collect())
    }

    /// Staleness-checked upsert of one file.
    pub async fn save(&mut self, file: &CodeFile) -> Result<SaveOutcome, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(SaveOutcome::NotSynced);
        };

        if let Some(fp) = self.fingerprints.get(&file.id) {
            if fp.matches(&file.name, &file.content) {
                return Ok(SaveOutcome::Unchanged);
            }
        }

        // A brand-new file writes unconditionally; anything else
        // carries the timestamp its content is based on.
        let expected = if self.pending_new.contains(&file.id) {
            None
        } else {
            self.observed.get(&file.id).copied()
        };

        let record = FileRecord::from_model(file, project);
        let result = self.store.upsert_file(record, expected).await?;

        if result.skipped {
            log::info!(
                "Save of {} skipped: remote is newer (observed {:?}, remote {})",
                file.name,
                expected,
                result.record.updated_at
            );
            return Ok(SaveOutcome::Skipped);
        }

        self.note_remote(&result.record.into_model());
        self.mark_write();
        Ok(SaveOutcome::Saved)
    }

    /// Immediate deletion — the non-negotiated path, used when no other
    /// member could be affected. The file lands in the trash either
    /// way; `remote` records whether a project deletion happened.
    pub async fn delete(&mut self, file: &CodeFile) -> Result<bool, StoreError> {
        let remote = match self.ctx.sync_project() {
            Some(project) => {
                self.store.delete_file(project, file.id).await?;
                self.mark_write();
                true
            }
            None => false,
        };

        self.discard(file.id);
        self.trash.push(TrashEntry {
            file: file.clone(),
            remote,
            deleted_at: unix_ms(),
        });
        Ok(remote)
    }

    /// Open a deletion negotiation for an artefact.
    ///
    /// Returns `None` when the session is non-collaborative — the
    /// caller should delete directly instead.
    pub async fn request_deletion(
        &mut self,
        file_id: Uuid,
        filename: &str,
    ) -> Result<Option<PendingDeletion>, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(None);
        };

        let mut request = PendingDeletion::new(project, file_id, filename, DELETION_REQUEST_TTL_MS);
        if let Some(user_id) = self.ctx.user_id() {
            request = request.requested_by(user_id);
        }

        let created = self.store.create_deletion_request(request).await?;
        self.seen_requests.insert(created.id);
        self.open_requests.push(created.clone());
        self.mark_write();
        log::info!("Requested deletion of {} ({})", filename, file_id);
        Ok(Some(created))
    }

    /// Poll the deletion-request collection.
    ///
    /// Expired requests count as rejected: they are filtered out and
    /// best-effort resolved by whichever client sees them first
    /// (resolution is idempotent, so racing clients are harmless).
    pub async fn pull_requests(&mut self) -> Result<DeletionRequests, StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(DeletionRequests::default());
        };

        let all = self.store.list_deletion_requests(project).await?;
        let now = unix_ms();

        let mut open = Vec::new();
        for request in all {
            if request.is_expired(now) {
                if let Err(e) = self
                    .store
                    .resolve_deletion_request(project, request.id, DeletionOutcome::Rejected)
                    .await
                {
                    log::warn!("Failed to expire deletion request {}: {e}", request.id);
                }
                self.seen_requests.remove(&request.id);
                continue;
            }
            open.push(request);
        }

        let newly_seen: Vec<PendingDeletion> = open
            .iter()
            .filter(|r| !self.seen_requests.contains(&r.id))
            .cloned()
            .collect();
        for request in &newly_seen {
            self.seen_requests.insert(request.id);
        }

        self.open_requests = open.clone();
        Ok(DeletionRequests { open, newly_seen })
    }

    /// The last-seen open request targeting a file, if any.
    pub fn open_request_for(&self, file_id: Uuid) -> Option<&PendingDeletion> {
        self.open_requests.iter().find(|r| r.file_id == file_id)
    }

    /// Execute a negotiated deletion: remove the artefact (a no-op if
    /// another member already removed it) and settle the request.
    pub async fn confirm_deletion(
        &mut self,
        request_id: Uuid,
        file_id: Uuid,
    ) -> Result<(), StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(());
        };

        self.store.delete_file(project, file_id).await?;
        self.store
            .resolve_deletion_request(project, request_id, DeletionOutcome::Confirmed)
            .await?;

        self.discard(file_id);
        self.seen_requests.remove(&request_id);
        self.open_requests.retain(|r| r.id != request_id);
        self.mark_write();
        Ok(())
    }

    /// Cancel a negotiation; the artefact is untouched.
    pub async fn reject_deletion(&mut self, request_id: Uuid) -> Result<(), StoreError> {
        let Some(project) = self.ctx.sync_project() else {
            return Ok(());
        };

        self.store
            .resolve_deletion_request(project, request_id, DeletionOutcome::Rejected)
            .await?;

        self.seen_requests.remove(&request_id);
        self.open_requests.retain(|r| r.id != request_id);
        self.mark_write();
        Ok(())
    }

    // ── Trash ──────────────────────────────────────────────────────

    pub fn trashed(&self) -> &[TrashEntry] {
        &self.trash
    }

    /// Pull a file back out of the trash. Remote-backed entries are
    /// re-pushed to the active project; the returned file carries the
    /// re-pushed stamp and should be re-added to the session.
    pub async fn restore(&mut self, file_id: Uuid) -> Result<Option<CodeFile>, StoreError> {
        let Some(index) = self.trash.iter().position(|e| e.file.id == file_id) else {
            return Ok(None);
        };
        let entry = self.trash.remove(index);

        let file = if entry.remote {
            if let Some(project) = self.ctx.sync_project() {
                let record = FileRecord::from_model(&entry.file, project);
                match self.store.upsert_file(record, None).await {
                    Ok(result) => {
                        let restored = result.record.into_model();
                        self.note_remote(&restored);
                        self.mark_write();
                        restored
                    }
                    Err(e) => {
                        // Keep the entry so the restore can be retried.
                        self.trash.insert(index, entry);
                        return Err(e);
                    }
                }
            } else {
                entry.file
            }
        } else {
            entry.file
        };

        Ok(Some(file))
    }

    /// Drop one trash entry permanently.
    pub fn purge(&mut self, file_id: Uuid) -> bool {
        let before = self.trash.len();
        self.trash.retain(|e| e.file.id != file_id);
        self.trash.len() < before
    }

    /// Drop all trash entries; returns how many were removed.
    pub fn empty_trash(&mut self) -> usize {
        let count = self.trash.len();
        self.trash.clear();
        count
    }

    // ── Membership lifecycle ───────────────────────────────────────

    /// Treat a freshly loaded snapshot as fully synced (project join,
    /// hard refresh).
    pub fn rebaseline(&mut self, files: &[CodeFile]) {
        self.fingerprints = files
            .iter()
            .map(|f| (f.id, FileFingerprint::of(&f.name, &f.content)))
            .collect();
        self.observed = files.iter().map(|f| (f.id, f.updated_at)).collect();
        self.pending_new.clear();
        self.seen_requests.clear();
        self.open_requests.clear();
        self.last_local_write = None;
    }

    /// Drop all membership state (project leave). Trash survives — its
    /// local-only entries have no other home.
    pub fn clear(&mut self) {
        self.fingerprints.clear();
        self.observed.clear();
        self.pending_new.clear();
        self.seen_requests.clear();
        self.open_requests.clear();
        self.last_local_write = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use glossa_core::UserProfile;

    fn engine_with_project() -> (FileSyncEngine<MemoryStore>, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ClientContext::new());
        ctx.sign_in(UserProfile::new("Ada"));
        let project = Uuid::new_v4();
        ctx.set_active_project(Some(project));
        (FileSyncEngine::new(store.clone(), ctx), store, project)
    }

    #[tokio::test]
    async fn test_save_without_project_noops() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ClientContext::new());
        let mut engine = FileSyncEngine::new(store.clone(), ctx);

        let outcome = engine.save(&CodeFile::new("main.py", "pass")).await.unwrap();

        assert_eq!(outcome, SaveOutcome::NotSynced);
        assert_eq!(store.stats().upserts, 0);
    }

    #[tokio::test]
    async fn test_save_then_unchanged() {
        let (mut engine, store, _) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);

        assert_eq!(engine.save(&file).await.unwrap(), SaveOutcome::Saved);
        assert!(!engine.is_pending_new(file.id));
        assert!(engine.is_synced(file.id));

        // Same content again: fingerprint short-circuits, no upsert.
        assert_eq!(engine.save(&file).await.unwrap(), SaveOutcome::Unchanged);
        assert_eq!(store.stats().upserts, 1);
    }

    #[tokio::test]
    async fn test_save_skipped_when_remote_newer() {
        let (mut engine, store, project) = engine_with_project();
        let mut file = CodeFile::new("main.py", "v1");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        // Another client lands a newer write.
        let mut winning = FileRecord::from_model(&file, project);
        winning.content = "winner".to_string();
        store.upsert_file(winning, None).await.unwrap();

        file.content = "loser".to_string();
        let outcome = engine.save(&file).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Skipped);
        // Remote content is untouched by the losing write.
        let remote = store.fetch_files(project).await.unwrap();
        assert_eq!(remote[0].content, "winner");
        // The engine's baseline did not advance: a later save of stale
        // content would still be gated.
        let again = engine.save(&file).await.unwrap();
        assert_eq!(again, SaveOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_save_after_refetch_succeeds() {
        let (mut engine, store, project) = engine_with_project();
        let mut file = CodeFile::new("main.py", "v1");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        let mut winning = FileRecord::from_model(&file, project);
        winning.content = "winner".to_string();
        store.upsert_file(winning, None).await.unwrap();

        file.content = "loser".to_string();
        assert_eq!(engine.save(&file).await.unwrap(), SaveOutcome::Skipped);

        // Re-fetch and rebase the edit on the winning value.
        let fetched = engine.fetch().await.unwrap();
        let won = fetched.into_iter().find(|f| f.id == file.id).unwrap();
        engine.note_remote(&won);
        let mut rebased = won;
        rebased.content = "winner + edit".to_string();

        assert_eq!(engine.save(&rebased).await.unwrap(), SaveOutcome::Saved);
        let remote = store.fetch_files(project).await.unwrap();
        assert_eq!(remote[0].content, "winner + edit");
    }

    #[tokio::test]
    async fn test_delete_with_project_is_remote_trash() {
        let (mut engine, store, project) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        let remote = engine.delete(&file).await.unwrap();

        assert!(remote);
        assert!(store.fetch_files(project).await.unwrap().is_empty());
        assert_eq!(engine.trashed().len(), 1);
        assert!(engine.trashed()[0].remote);
        assert!(!engine.is_synced(file.id));
    }

    #[tokio::test]
    async fn test_delete_without_project_is_local_trash() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ClientContext::new());
        let mut engine = FileSyncEngine::new(store, ctx);
        let file = CodeFile::new("scratch.py", "pass");

        let remote = engine.delete(&file).await.unwrap();

        assert!(!remote);
        assert_eq!(engine.trashed().len(), 1);
        assert!(!engine.trashed()[0].remote);
    }

    #[tokio::test]
    async fn test_restore_remote_entry_repushes() {
        let (mut engine, store, project) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();
        engine.delete(&file).await.unwrap();

        let restored = engine.restore(file.id).await.unwrap().unwrap();

        assert_eq!(restored.id, file.id);
        assert_eq!(store.fetch_files(project).await.unwrap().len(), 1);
        assert!(engine.trashed().is_empty());
        assert!(engine.is_synced(file.id));
    }

    #[tokio::test]
    async fn test_restore_failure_keeps_entry() {
        let (mut engine, store, _) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();
        engine.delete(&file).await.unwrap();

        store.set_offline(true);
        assert!(engine.restore(file.id).await.is_err());
        assert_eq!(engine.trashed().len(), 1);

        store.set_offline(false);
        assert!(engine.restore(file.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_and_empty_trash() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ClientContext::new());
        let mut engine = FileSyncEngine::new(store, ctx);

        let a = CodeFile::new("a.py", "a");
        let b = CodeFile::new("b.py", "b");
        engine.delete(&a).await.unwrap();
        engine.delete(&b).await.unwrap();

        assert!(engine.purge(a.id));
        assert!(!engine.purge(a.id));
        assert_eq!(engine.empty_trash(), 1);
        assert!(engine.trashed().is_empty());
    }

    #[tokio::test]
    async fn test_request_deletion_solo_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(ClientContext::new());
        let mut engine = FileSyncEngine::new(store, ctx);

        let request = engine
            .request_deletion(Uuid::new_v4(), "main.py")
            .await
            .unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_negotiation_confirm_round_trip() {
        let (mut engine, store, project) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        let request = engine
            .request_deletion(file.id, &file.name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.list_deletion_requests(project).await.unwrap().len(),
            1
        );

        engine.confirm_deletion(request.id, file.id).await.unwrap();

        assert!(store.fetch_files(project).await.unwrap().is_empty());
        assert!(store
            .list_deletion_requests(project)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_negotiation_reject_leaves_file() {
        let (mut engine, store, project) = engine_with_project();
        let file = CodeFile::new("main.py", "original");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        let request = engine
            .request_deletion(file.id, &file.name)
            .await
            .unwrap()
            .unwrap();
        engine.reject_deletion(request.id).await.unwrap();

        let remote = store.fetch_files(project).await.unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].content, "original");
        assert!(store
            .list_deletion_requests(project)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_confirm_already_deleted_noops() {
        let (mut engine, store, project) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        let request = engine
            .request_deletion(file.id, &file.name)
            .await
            .unwrap()
            .unwrap();

        // Another member already deleted the file.
        store.delete_file(project, file.id).await.unwrap();

        engine.confirm_deletion(request.id, file.id).await.unwrap();
        assert!(store
            .list_deletion_requests(project)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_pull_requests_marks_newly_seen_once() {
        let (mut engine, store, project) = engine_with_project();
        let request = PendingDeletion::new(project, Uuid::new_v4(), "main.py", 120_000);
        store.create_deletion_request(request.clone()).await.unwrap();

        let first = engine.pull_requests().await.unwrap();
        assert_eq!(first.open.len(), 1);
        assert_eq!(first.newly_seen.len(), 1);

        let second = engine.pull_requests().await.unwrap();
        assert_eq!(second.open.len(), 1);
        assert!(second.newly_seen.is_empty());
    }

    #[tokio::test]
    async fn test_pull_requests_expires_stale() {
        let (mut engine, store, project) = engine_with_project();
        let mut request = PendingDeletion::new(project, Uuid::new_v4(), "main.py", 120_000);
        request.expires_at = request.created_at; // already expired
        store.create_deletion_request(request).await.unwrap();

        let polled = engine.pull_requests().await.unwrap();

        assert!(polled.open.is_empty());
        // Expired request was resolved away store-side.
        assert!(store
            .list_deletion_requests(project)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_own_request_not_newly_seen() {
        let (mut engine, _, _) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();

        engine
            .request_deletion(file.id, &file.name)
            .await
            .unwrap()
            .unwrap();

        let polled = engine.pull_requests().await.unwrap();
        assert_eq!(polled.open.len(), 1);
        assert!(polled.newly_seen.is_empty());
        assert!(engine.open_request_for(file.id).is_some());
    }

    #[tokio::test]
    async fn test_rebaseline_marks_everything_synced() {
        let (mut engine, _, _) = engine_with_project();
        let files = vec![CodeFile::new("a.py", "a"), CodeFile::new("b.py", "b")];

        engine.rebaseline(&files);

        for file in &files {
            assert!(engine.is_synced(file.id));
            assert_eq!(engine.observed_stamp(file.id), Some(file.updated_at));
            assert_eq!(engine.save(file).await.unwrap(), SaveOutcome::Unchanged);
        }
    }

    #[tokio::test]
    async fn test_clear_keeps_trash() {
        let (mut engine, _, _) = engine_with_project();
        let file = CodeFile::new("main.py", "pass");
        engine.note_created(file.id);
        engine.save(&file).await.unwrap();
        engine.delete(&file).await.unwrap();

        engine.clear();

        assert_eq!(engine.trashed().len(), 1);
        assert!(!engine.is_synced(file.id));
    }
}

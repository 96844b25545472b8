//! The local session store: one reducer-managed, in-memory document of
//! project state.
//!
//! This is the canonical local truth — the UI reads and writes it, and
//! the sync engines reconcile it against the remote store. All mutation
//! goes through [`reduce`], applied synchronously; actions are plain
//! data, so the whole store is trivially replayable in tests.
//!
//! The sync engines never mutate this store directly; the orchestrator
//! in `glossa-collab` dispatches actions on their behalf.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{unix_ms, Annotation, AnnotationReply, CodeFile};

/// Per-session display settings carried in the session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Whether annotation markers are rendered in the gutter.
    pub annotations_visible: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            annotations_visible: true,
        }
    }
}

/// The full local project state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub files: Vec<CodeFile>,
    pub annotations: Vec<Annotation>,
    pub active_file: Option<Uuid>,
    pub settings: SessionSettings,
}

/// All mutations of the session state.
///
/// Each action is idempotent where the model allows it: adds upsert by
/// id, removes of absent ids are no-ops.
#[derive(Debug, Clone)]
pub enum SessionAction {
    AddFile(CodeFile),
    SetFileContent { file_id: Uuid, content: String },
    RenameFile { file_id: Uuid, name: String },
    RemoveFile { file_id: Uuid },
    /// Replace the whole artefact list (poll merge, project load).
    SetFiles(Vec<CodeFile>),
    SetActiveFile(Option<Uuid>),
    AddAnnotation(Annotation),
    UpdateAnnotation { annotation_id: Uuid, content: String },
    RemoveAnnotation { annotation_id: Uuid },
    /// Replace the whole annotation set (poll merge, project load).
    SetAnnotations(Vec<Annotation>),
    AddReply { annotation_id: Uuid, reply: AnnotationReply },
    RemoveReply { annotation_id: Uuid, reply_id: Uuid },
    UpdateSettings(SessionSettings),
    /// Clear everything (project leave, sign-out).
    Reset,
}

/// Apply one action to the state.
pub fn reduce(state: &mut SessionState, action: SessionAction) {
    match action {
        SessionAction::AddFile(file) => {
            match state.files.iter_mut().find(|f| f.id == file.id) {
                Some(existing) => *existing = file,
                None => state.files.push(file),
            }
        }

        SessionAction::SetFileContent { file_id, content } => {
            if let Some(file) = state.files.iter_mut().find(|f| f.id == file_id) {
                file.content = content;
                file.updated_at = unix_ms();
            }
        }

        SessionAction::RenameFile { file_id, name } => {
            if let Some(file) = state.files.iter_mut().find(|f| f.id == file_id) {
                file.name = name;
                file.updated_at = unix_ms();
            }
        }

        SessionAction::RemoveFile { file_id } => {
            state.files.retain(|f| f.id != file_id);
            // An artefact takes its annotations with it.
            state.annotations.retain(|a| a.file_id != file_id);
            if state.active_file == Some(file_id) {
                state.active_file = state.files.first().map(|f| f.id);
            }
        }

        SessionAction::SetFiles(files) => {
            state.files = files;
            if let Some(active) = state.active_file {
                if !state.files.iter().any(|f| f.id == active) {
                    state.active_file = state.files.first().map(|f| f.id);
                }
            }
        }

        SessionAction::SetActiveFile(file_id) => {
            state.active_file = file_id;
        }

        SessionAction::AddAnnotation(annotation) => {
            // An annotation must anchor to an artefact present in the
            // session; otherwise the gutter marker would dangle.
            if !state.files.iter().any(|f| f.id == annotation.file_id) {
                log::warn!(
                    "Dropping annotation {} for unknown file {}",
                    annotation.id,
                    annotation.file_id
                );
                return;
            }
            match state
                .annotations
                .iter_mut()
                .find(|a| a.id == annotation.id)
            {
                Some(existing) => *existing = annotation,
                None => state.annotations.push(annotation),
            }
        }

        SessionAction::UpdateAnnotation {
            annotation_id,
            content,
        } => {
            if let Some(ann) = state
                .annotations
                .iter_mut()
                .find(|a| a.id == annotation_id)
            {
                ann.content = content;
                ann.updated_at = unix_ms();
            }
        }

        SessionAction::RemoveAnnotation { annotation_id } => {
            state.annotations.retain(|a| a.id != annotation_id);
        }

        SessionAction::SetAnnotations(annotations) => {
            state.annotations = annotations;
        }

        SessionAction::AddReply {
            annotation_id,
            reply,
        } => {
            if let Some(ann) = state
                .annotations
                .iter_mut()
                .find(|a| a.id == annotation_id)
            {
                if !ann.replies.iter().any(|r| r.id == reply.id) {
                    ann.replies.push(reply);
                }
            }
        }

        SessionAction::RemoveReply {
            annotation_id,
            reply_id,
        } => {
            if let Some(ann) = state
                .annotations
                .iter_mut()
                .find(|a| a.id == annotation_id)
            {
                ann.replies.retain(|r| r.id != reply_id);
            }
        }

        SessionAction::UpdateSettings(settings) => {
            state.settings = settings;
        }

        SessionAction::Reset => {
            *state = SessionState::default();
        }
    }
}

/// Owning wrapper around the session state.
pub struct SessionStore {
    state: SessionState,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            state: SessionState::default(),
        }
    }

    /// Apply one action.
    pub fn dispatch(&mut self, action: SessionAction) {
        reduce(&mut self.state, action);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn file(&self, file_id: Uuid) -> Option<&CodeFile> {
        self.state.files.iter().find(|f| f.id == file_id)
    }

    pub fn annotation(&self, annotation_id: Uuid) -> Option<&Annotation> {
        self.state.annotations.iter().find(|a| a.id == annotation_id)
    }

    /// Ids of every artefact currently in the session.
    pub fn file_ids(&self) -> Vec<Uuid> {
        self.state.files.iter().map(|f| f.id).collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Process-wide client context.
//!
//! One of these is constructed at startup and injected (as an `Arc`)
//! into the sync engines — never reached for as an ambient global. It
//! holds the pieces of client state every engine guards on: the
//! authenticated profile, the active project, and the collaboration
//! switch. `sign_out` is the explicit teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

use glossa_core::UserProfile;

pub struct ClientContext {
    /// Authenticated user, `None` when signed out.
    profile: RwLock<Option<UserProfile>>,
    /// Currently joined project, `None` outside any project.
    active_project: RwLock<Option<Uuid>>,
    /// Master switch for cloud sync; off means fully local operation.
    collaboration_enabled: AtomicBool,
}

impl ClientContext {
    pub fn new() -> Self {
        Self {
            profile: RwLock::new(None),
            active_project: RwLock::new(None),
            collaboration_enabled: AtomicBool::new(true),
        }
    }

    pub fn sign_in(&self, profile: UserProfile) {
        log::info!("Signed in as {}", profile.display_name);
        *self.profile.write().unwrap_or_else(|e| e.into_inner()) = Some(profile);
    }

    /// Teardown on logout: clears the profile and leaves any project.
    pub fn sign_out(&self) {
        *self.profile.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self
            .active_project
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
        log::info!("Signed out");
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.profile().map(|p| p.user_id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.profile().is_some()
    }

    pub fn set_collaboration_enabled(&self, enabled: bool) {
        self.collaboration_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn collaboration_enabled(&self) -> bool {
        self.collaboration_enabled.load(Ordering::Relaxed)
    }

    pub fn set_active_project(&self, project_id: Option<Uuid>) {
        *self
            .active_project
            .write()
            .unwrap_or_else(|e| e.into_inner()) = project_id;
    }

    pub fn active_project(&self) -> Option<Uuid> {
        *self
            .active_project
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// The project to sync against, if syncing is possible at all.
    ///
    /// `None` when collaboration is disabled, the user is
    /// unauthenticated, or no project is active — the three expected
    /// states in which every engine operation silently no-ops.
    pub fn sync_project(&self) -> Option<Uuid> {
        if !self.collaboration_enabled() || !self.is_authenticated() {
            return None;
        }
        self.active_project()
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

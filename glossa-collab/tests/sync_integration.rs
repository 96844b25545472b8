//! Integration tests for two-client reconciliation over one shared
//! store.
//!
//! Each test drives two `CollabSession`s against the same `MemoryStore`
//! by advancing their poll schedules with fabricated instants — no
//! wall-clock waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glossa_collab::session::{CollabSession, SessionConfig, SyncEvent};
use glossa_collab::store::{MemoryStore, RemoteStore};
use glossa_collab::ClientContext;
use glossa_core::{Annotation, AnnotationKind, CodeFile, UserProfile};
use uuid::Uuid;

fn client(store: &Arc<MemoryStore>, name: &str) -> CollabSession<MemoryStore> {
    let ctx = Arc::new(ClientContext::new());
    ctx.sign_in(UserProfile::new(name));
    CollabSession::with_config(store.clone(), ctx, SessionConfig::for_testing())
}

/// Join both clients to one project seeded with a single file.
async fn two_clients_with_file() -> (
    CollabSession<MemoryStore>,
    CollabSession<MemoryStore>,
    Arc<MemoryStore>,
    Uuid,
) {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();

    let mut alice = client(&store, "Alice");
    alice.join_project(project).await.unwrap();
    let file = CodeFile::new("main.py", "print('hi')");
    let file_id = file.id;
    alice.add_file(file);
    alice.save_all().await;

    let mut bob = client(&store, "Bob");
    bob.join_project(project).await.unwrap();
    assert_eq!(bob.state().files.len(), 1);

    (alice, bob, store, file_id)
}

#[tokio::test]
async fn test_annotation_invisible_until_pushed_then_propagates() {
    let (mut alice, mut bob, store, file_id) = two_clients_with_file().await;

    // Alice creates ann-1 while her push cannot land.
    store.set_offline(true);
    let ann = Annotation::new(file_id, 12, AnnotationKind::Question, "why a dict here?");
    alice.add_annotation(ann.clone()).await;
    store.set_offline(false);

    // Bob polls before Alice's push is sent: ann-1 must not be there.
    bob.tick(Instant::now() + Duration::from_secs(1)).await;
    assert!(
        bob.state().annotations.is_empty(),
        "annotation must not appear before the push lands"
    );

    // Alice's deferred flush fires, then Bob's next poll.
    alice.tick(Instant::now() + Duration::from_secs(2)).await;
    bob.tick(Instant::now() + Duration::from_secs(3)).await;

    let seen = &bob.state().annotations;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, ann.id);
    assert_eq!(seen[0].line_number, 12);
    assert_eq!(seen[0].kind, AnnotationKind::Question);
    assert_eq!(seen[0].content, "why a dict here?");
}

#[tokio::test]
async fn test_new_remote_ids_surface_on_receiver() {
    let (mut alice, mut bob, _store, file_id) = two_clients_with_file().await;
    let mut bob_events = bob.take_event_rx().unwrap();

    let ann = Annotation::new(file_id, 3, AnnotationKind::Metaphor, "assembly line");
    alice.add_annotation(ann.clone()).await;

    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    let merged = loop {
        match bob_events.try_recv() {
            Ok(SyncEvent::AnnotationsMerged { new_remote_ids }) => break new_remote_ids,
            Ok(_) => continue,
            Err(_) => panic!("expected AnnotationsMerged event"),
        }
    };
    assert_eq!(merged, vec![ann.id]);
}

#[tokio::test]
async fn test_remote_annotation_deletion_tombstones() {
    let (mut alice, mut bob, _store, file_id) = two_clients_with_file().await;

    let ann = Annotation::new(file_id, 5, AnnotationKind::Context, "legacy API shim");
    alice.add_annotation(ann.clone()).await;
    bob.tick(Instant::now() + Duration::from_secs(1)).await;
    assert_eq!(bob.state().annotations.len(), 1);

    // Any member may delete an annotation directly.
    bob.remove_annotation(ann.id).await;

    alice.tick(Instant::now() + Duration::from_secs(2)).await;
    assert!(
        alice.state().annotations.is_empty(),
        "previously-synced id absent from remote must be dropped"
    );
}

#[tokio::test]
async fn test_replies_propagate_with_author_label() {
    let (mut alice, mut bob, _store, file_id) = two_clients_with_file().await;

    let ann = Annotation::new(file_id, 8, AnnotationKind::Critique, "dead branch");
    alice.add_annotation(ann.clone()).await;
    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    let reply_id = bob.add_reply(ann.id, "agreed, remove it").await.unwrap();

    alice.tick(Instant::now() + Duration::from_secs(2)).await;
    let seen = alice
        .state()
        .annotations
        .iter()
        .find(|a| a.id == ann.id)
        .unwrap();
    assert_eq!(seen.replies.len(), 1);
    assert_eq!(seen.replies[0].id, reply_id);
    assert_eq!(seen.replies[0].author_label.as_deref(), Some("Bob"));
}

#[tokio::test]
async fn test_concurrent_edit_staleness_loser_adopts_winner() {
    let (mut alice, mut bob, store, file_id) = two_clients_with_file().await;
    let mut bob_events = bob.take_event_rx().unwrap();

    // Both edit within the same debounce window.
    alice.set_file_content(file_id, "alice wins".to_string());
    bob.set_file_content(file_id, "bob loses".to_string());

    // Alice's save lands first.
    alice.save_all().await;
    // Bob's save observes a newer remote stamp and skips.
    bob.save_all().await;

    let skipped = loop {
        match bob_events.try_recv() {
            Ok(SyncEvent::SaveSkipped { file_id: id }) => break id,
            Ok(_) => continue,
            Err(_) => panic!("expected SaveSkipped event"),
        }
    };
    assert_eq!(skipped, file_id);

    // No silent clobber: the store still holds the winning write.
    let project = alice.context().active_project().unwrap();
    let remote = store.fetch_files(project).await.unwrap();
    assert_eq!(remote[0].content, "alice wins");

    // Bob adopted the winner and his next edit builds on it.
    let local = bob.state().files.iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(local.content, "alice wins");

    bob.set_file_content(file_id, "alice wins\n# bob's addendum".to_string());
    bob.save_all().await;

    let remote = store.fetch_files(project).await.unwrap();
    assert_eq!(remote[0].content, "alice wins\n# bob's addendum");
}

#[tokio::test]
async fn test_remote_content_edit_propagates() {
    let (mut alice, mut bob, _store, file_id) = two_clients_with_file().await;

    alice.set_file_content(file_id, "v2".to_string());
    alice.save_all().await;

    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    let local = bob.state().files.iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(local.content, "v2");
}

#[tokio::test]
async fn test_local_dirty_file_not_clobbered_by_poll() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    let mut alice = client(&store, "Alice");
    alice.join_project(project).await.unwrap();
    let file = CodeFile::new("main.py", "print('hi')");
    let file_id = file.id;
    alice.add_file(file);
    alice.save_all().await;

    // Bob types slowly: his edit debounce outlasts the whole test, so
    // the file stays dirty across the poll.
    let ctx = Arc::new(ClientContext::new());
    ctx.sign_in(UserProfile::new("Bob"));
    let mut config = SessionConfig::for_testing();
    config.edit_debounce = Duration::from_secs(60);
    let mut bob = CollabSession::with_config(store.clone(), ctx, config);
    bob.join_project(project).await.unwrap();

    alice.set_file_content(file_id, "remote edit".to_string());
    alice.save_all().await;

    bob.set_file_content(file_id, "bob typing...".to_string());
    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    let local = bob.state().files.iter().find(|f| f.id == file_id).unwrap();
    assert_eq!(
        local.content, "bob typing...",
        "in-flight local edit must not be overwritten by a poll"
    );
}

#[tokio::test]
async fn test_new_file_propagates_between_clients() {
    let (mut alice, mut bob, _store, _file_id) = two_clients_with_file().await;

    let file = CodeFile::new("util.py", "def helper(): pass").with_language("python");
    let new_id = file.id;
    alice.add_file(file);
    alice.save_all().await;

    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    let seen = bob.state().files.iter().find(|f| f.id == new_id).unwrap();
    assert_eq!(seen.name, "util.py");
    assert_eq!(seen.language.as_deref(), Some("python"));
}

#[tokio::test]
async fn test_pending_new_file_survives_poll() {
    let (_alice, mut bob, store, _file_id) = two_clients_with_file().await;

    // Bob creates a file; before its first push, a poll runs against a
    // snapshot that does not contain it.
    store.set_offline(true);
    let draft = CodeFile::new("draft.py", "wip");
    let draft_id = draft.id;
    bob.add_file(draft);
    store.set_offline(false);

    bob.tick(Instant::now() + Duration::from_secs(1)).await;

    assert!(
        bob.state().files.iter().any(|f| f.id == draft_id),
        "locally-created unsynced file must never be evicted by a poll"
    );
}

#[tokio::test]
async fn test_refresh_from_cloud_recovers_desync() {
    let (mut alice, mut bob, _store, file_id) = two_clients_with_file().await;

    let ann = Annotation::new(file_id, 2, AnnotationKind::Observation, "O(n^2)");
    alice.add_annotation(ann.clone()).await;

    // Bob resyncs wholesale instead of waiting for polls.
    bob.refresh_from_cloud().await.unwrap();

    assert_eq!(bob.state().annotations.len(), 1);
    assert_eq!(bob.state().annotations[0].id, ann.id);
}

#[tokio::test]
async fn test_save_all_flushes_everything() {
    let store = Arc::new(MemoryStore::new());
    let project = Uuid::new_v4();
    let mut alice = client(&store, "Alice");
    alice.join_project(project).await.unwrap();

    let file = CodeFile::new("main.py", "pass");
    let file_id = file.id;
    alice.add_file(file);
    let ann = Annotation::new(file_id, 1, AnnotationKind::Pattern, "singleton");

    store.set_offline(true);
    alice.add_annotation(ann).await;
    store.set_offline(false);

    alice.save_all().await;

    assert_eq!(store.fetch_files(project).await.unwrap().len(), 1);
    assert_eq!(
        store
            .fetch_annotations(project, &[file_id])
            .await
            .unwrap()
            .len(),
        1
    );
}

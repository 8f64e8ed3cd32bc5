//! History store routing by identity

use chrono::{DateTime, Duration, Utc};
use mwl_common::events::{EventBus, MwlEvent};
use mwl_common::time::local_day;
use mwl_common::{Error, Session, SessionPatch};
use mwl_history::db::connect_in_memory;
use mwl_history::{
    BackendKind, HistoryFilter, HistoryStore, IdentityHandle, IdentityProvider, LocalStore, User,
};
use std::sync::{Arc, Mutex as StdMutex};

fn finished(script: &str, elapsed: u32, nominal: u32) -> Session {
    let start = "2025-02-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
    let mut s = Session::begin(script, start);
    s.finalize(start + Duration::seconds(elapsed as i64), elapsed, nominal)
        .unwrap();
    s
}

async fn setup(initial: Option<User>) -> (tempfile::TempDir, Arc<IdentityHandle>, HistoryStore) {
    let dir = tempfile::tempdir().unwrap();
    let identity = Arc::new(IdentityHandle::new(initial));
    let store = HistoryStore::new(
        LocalStore::new(dir.path().join("history.json")),
        connect_in_memory().await.unwrap(),
        identity.clone(),
    );
    (dir, identity, store)
}

#[tokio::test]
async fn test_anonymous_writes_go_local() {
    let (_dir, _identity, store) = setup(Some(User::anonymous("anon"))).await;
    let session = finished("breath", 60, 60);

    assert_eq!(store.save(&session).await.unwrap(), BackendKind::Local);
    assert_eq!(store.current_backend(), BackendKind::Local);
    assert_eq!(store.local().all_sessions().await.unwrap(), vec![session]);
}

#[tokio::test]
async fn test_authenticated_writes_go_cloud() {
    let (_dir, _identity, store) = setup(Some(User::authenticated("user-1"))).await;
    let session = finished("breath", 60, 60);

    assert_eq!(store.save(&session).await.unwrap(), BackendKind::Cloud);
    assert!(store.local().all_sessions().await.unwrap().is_empty());
    assert_eq!(store.get(session.id).await.unwrap(), Some(session));
}

#[tokio::test]
async fn test_invalid_session_rejected() {
    let (_dir, _identity, store) = setup(None).await;
    let mut session = finished("breath", 60, 60);
    session.rating = Some(7);
    assert!(matches!(
        store.save(&session).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_total_sessions_counts_completed_only() {
    let (_dir, _identity, store) = setup(None).await;
    store.save(&finished("breath", 60, 60)).await.unwrap();
    store.save(&finished("breath", 20, 60)).await.unwrap();
    store.save(&finished("scan", 90, 60)).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.total_duration, 150);
}

#[tokio::test]
async fn test_stats_follow_writes_and_identity() {
    let (_dir, identity, store) = setup(None).await;
    let session = finished("breath", 60, 60);
    store.save(&session).await.unwrap();
    assert_eq!(store.stats().await.unwrap().total_sessions, 1);

    store
        .update(
            session.id,
            &SessionPatch {
                completed: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(store.stats().await.unwrap().total_sessions, 0);

    identity.set_user(Some(User::authenticated("user-1")));
    assert_eq!(store.stats().await.unwrap(), Default::default());
}

#[tokio::test]
async fn test_update_rejects_end_before_start() {
    for user in [None, Some(User::authenticated("user-1"))] {
        let (_dir, _identity, store) = setup(user).await;
        let session = finished("scan", 30, 600);
        store.save(&session).await.unwrap();

        let patch = SessionPatch {
            completed: Some(true),
            end_time: Some(session.start_time - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(
            store.update(session.id, &patch).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(store.get(session.id).await.unwrap(), Some(session));
    }
}

#[tokio::test]
async fn test_export_reimports_after_update() {
    let (_dir, _identity, store) = setup(None).await;
    let session = finished("scan", 30, 600);
    store.save(&session).await.unwrap();
    store
        .update(
            session.id,
            &SessionPatch {
                rating: Some(3),
                notes: Some("restless".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let exported = store.local().export_json().await.unwrap();
    let other = tempfile::tempdir().unwrap();
    let target = LocalStore::new(other.path().join("history.json"));
    assert_eq!(target.import_json(&exported).await.unwrap(), 1);
}

#[tokio::test]
async fn test_streaks_recomputed_on_a_new_day() {
    let (_dir, _identity, store) = setup(None).await;
    let session = finished("breath", 60, 60);
    let day = local_day(session.start_time);
    let today = Arc::new(StdMutex::new(day));
    let store = {
        let today = today.clone();
        store.with_today(move || *today.lock().unwrap())
    };

    store.save(&session).await.unwrap();
    assert_eq!(store.stats().await.unwrap().current_streak, 1);

    // Still 1 the next day: the walk starts at yesterday
    *today.lock().unwrap() = day + Duration::days(1);
    assert_eq!(store.stats().await.unwrap().current_streak, 1);

    *today.lock().unwrap() = day + Duration::days(2);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.current_streak, 0);
    assert_eq!(stats.longest_streak, 1);
}

#[tokio::test]
async fn test_unknown_ids_are_reported() {
    let (_dir, _identity, store) = setup(Some(User::authenticated("u"))).await;
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(store.delete(missing).await, Err(Error::NotFound(_))));
    assert!(matches!(
        store.update(missing, &SessionPatch::default()).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sync_requires_authenticated_identity() {
    let (_dir, _identity, store) = setup(Some(User::anonymous("anon"))).await;
    assert!(matches!(
        store.sync_local_to_cloud().await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_conversion_triggers_sync() {
    let (_dir, identity, store) = setup(Some(User::anonymous("anon"))).await;
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let store = Arc::new(store.with_events(bus));

    let a = finished("breath", 60, 60);
    let b = finished("scan", 30, 60);
    store.save(&a).await.unwrap();
    store.save(&b).await.unwrap();

    let watcher = store.clone().spawn_identity_watcher();
    identity.set_user(Some(User::authenticated("user-1")));

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(MwlEvent::SyncCompleted { inserted, .. }) => break inserted,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .expect("sync should run after conversion");
    assert_eq!(report, 2);

    assert_eq!(identity.authenticated_user().unwrap().id, "user-1");
    assert_eq!(store.list(&HistoryFilter::all()).await.unwrap().len(), 2);
    assert!(store.local().all_sessions().await.unwrap().is_empty());

    identity.sign_out();
    assert!(store.list(&HistoryFilter::all()).await.unwrap().is_empty());
    watcher.abort();
}

// tests/registry.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{settings, RecordingChannel, ScriptedSource};
use listing_watch_bot::commands::{handle_command, Command};
use listing_watch_bot::registry::SubscribeError;
use listing_watch_bot::sources::SourceRegistry;
use listing_watch_bot::store::{MemoryStore, SubscriptionRecord};
use listing_watch_bot::{Notifier, TaskRegistry, UserId};

const USER: UserId = UserId(7);

struct Fixture {
    a: Arc<ScriptedSource>,
    b: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    ch: Arc<RecordingChannel>,
    registry: TaskRegistry,
}

fn fixture() -> Fixture {
    let a = ScriptedSource::returning("site-a.example", &["a1", "a2"]);
    let b = ScriptedSource::returning("site-b.example", &["b1"]);
    let store = Arc::new(MemoryStore::new());
    let ch = RecordingChannel::new();
    let registry = TaskRegistry::new(
        SourceRegistry::new().with_source(a.clone()).with_source(b.clone()),
        store.clone(),
        Notifier::new(ch.clone()),
        settings(),
    );
    Fixture {
        a,
        b,
        store,
        ch,
        registry,
    }
}

/// Lets spawned tasks run until they park on their next timer.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn resubscribe_replaces_the_old_task() {
    let f = fixture();

    let first = f.registry.subscribe(USER, vec![f.a.url()]).await.unwrap();
    assert!(!first.replaced);
    settle().await;
    assert_eq!(f.a.calls(), 1);

    let second = f.registry.subscribe(USER, vec![f.b.url()]).await.unwrap();
    assert!(second.replaced);
    assert_eq!(f.registry.running().await, 1);
    assert_eq!(f.registry.subscription(USER).await, Some(vec![f.b.url()]));

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(f.a.calls(), 1, "old task kept polling after replacement");
    assert!(f.b.calls() >= 3);

    let rec = f.store.get(USER).await.unwrap();
    assert_eq!(rec.query_urls, vec![f.b.url()]);
    // Seen ids survive the replacement.
    assert!(rec.seen_ids.contains("a1"));
    assert!(rec.seen_ids.contains("b1"));

    f.registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unsupported_links_leave_current_subscription_untouched() {
    let f = fixture();
    f.registry.subscribe(USER, vec![f.a.url()]).await.unwrap();
    settle().await;

    let err = f
        .registry
        .subscribe(USER, vec!["https://elsewhere.example/q".into()])
        .await
        .unwrap_err();
    match err {
        SubscribeError::NoSupportedUrls { ignored } => {
            assert_eq!(ignored, vec!["https://elsewhere.example/q".to_string()])
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(f.registry.subscription(USER).await, Some(vec![f.a.url()]));
    assert_eq!(f.store.get(USER).await.unwrap().query_urls, vec![f.a.url()]);
    f.registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unrecognised_links_are_reported_and_not_stored() {
    let f = fixture();
    let out = f
        .registry
        .subscribe(
            USER,
            vec![
                f.a.url(),
                "ftp://site-a.example/x".into(),
                f.a.url(),
                "https://elsewhere.example/q".into(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(out.accepted.len(), 1);
    assert_eq!(
        out.ignored,
        vec![
            "ftp://site-a.example/x".to_string(),
            "https://elsewhere.example/q".to_string()
        ]
    );
    assert_eq!(f.store.get(USER).await.unwrap().query_urls, vec![f.a.url()]);
    f.registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_polling_and_forgets_the_user() {
    let f = fixture();
    f.registry.subscribe(USER, vec![f.a.url()]).await.unwrap();
    settle().await;

    assert!(f.registry.unsubscribe(USER).await.unwrap());
    assert!(!f.registry.is_running(USER).await);
    assert!(f.store.get(USER).await.is_none());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(f.a.calls(), 1);

    assert!(!f.registry.unsubscribe(USER).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn startup_restores_stored_subscriptions() {
    let f = fixture();
    f.store
        .insert(SubscriptionRecord::new(UserId(1), vec![f.a.url()]))
        .await;
    f.store
        .insert(SubscriptionRecord::new(UserId(2), vec![f.b.url()]))
        .await;
    f.store
        .insert(SubscriptionRecord::new(
            UserId(3),
            vec!["https://gone.example/q".into()],
        ))
        .await;

    assert_eq!(f.registry.on_startup().await.unwrap(), 2);
    settle().await;

    assert!(f.registry.is_running(UserId(1)).await);
    assert!(f.registry.is_running(UserId(2)).await);
    assert!(!f.registry.is_running(UserId(3)).await);
    assert_eq!((f.a.calls(), f.b.calls()), (1, 1));

    // Users get their own listings only.
    let delivered = f.ch.delivered();
    assert!(delivered
        .iter()
        .filter(|s| s.body().contains("b1"))
        .all(|s| matches!(s, common::Sent::Text { user, .. } if *user == UserId(2))));

    f.registry.shutdown().await;
    assert_eq!(f.registry.running().await, 0);
}

#[tokio::test(start_paused = true)]
async fn chat_commands_drive_the_registry() {
    let f = fixture();

    let reply = handle_command(
        &f.registry,
        USER,
        Command::Subscribe(vec![f.a.url(), "https://elsewhere.example/q".into()]),
    )
    .await;
    assert!(reply.starts_with("Got it, tracking 1 link(s)."));
    assert!(reply.contains("https://elsewhere.example/q"));

    let status = handle_command(&f.registry, USER, Command::Status).await;
    assert_eq!(status, format!("Tracking:\n{}", f.a.url()));

    let reply = handle_command(
        &f.registry,
        USER,
        Command::Subscribe(vec!["https://elsewhere.example/q".into()]),
    )
    .await;
    assert!(reply.contains("Your current tracking was not changed"));

    let stop = handle_command(&f.registry, USER, Command::Stop).await;
    assert!(stop.starts_with("Stopped."));
    let stop = handle_command(&f.registry, USER, Command::Stop).await;
    assert_eq!(stop, "You are not tracking anything.");
}

#[tokio::test(start_paused = true)]
async fn crashed_task_is_reported_and_no_longer_running() {
    let broken = ScriptedSource::panicking("site-a.example");
    let ch = RecordingChannel::new();
    let registry = TaskRegistry::new(
        SourceRegistry::new().with_source(broken.clone()),
        Arc::new(MemoryStore::new()),
        Notifier::new(ch.clone()),
        settings(),
    );

    registry.subscribe(USER, vec![broken.url()]).await.unwrap();
    settle().await;

    assert_eq!(broken.calls(), 1);
    assert!(!registry.is_running(USER).await);
    assert_eq!(registry.running().await, 0);
    let texts = ch.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Tracking stopped"), "{texts:?}");

    // Sending the links again starts a fresh task.
    registry.subscribe(USER, vec![broken.url()]).await.unwrap();
    settle().await;
    assert_eq!(broken.calls(), 2);
}

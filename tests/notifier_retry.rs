// tests/notifier_retry.rs
mod common;

use std::time::Duration;

use common::{listing, RecordingChannel, Sent};
use listing_watch_bot::notify::{ChannelError, Delivery, Notifier, NotifyError};
use listing_watch_bot::UserId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const USER: UserId = UserId(1);

fn rate_limited(secs: u64) -> Result<(), ChannelError> {
    Err(ChannelError::RateLimited {
        retry_after: Duration::from_secs(secs),
    })
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_exactly_once_then_delivers() {
    let ch = RecordingChannel::scripted(vec![rate_limited(5), Ok(())]);
    let notifier = Notifier::new(ch.clone());

    let t0 = Instant::now();
    let out = notifier
        .notify(USER, &listing("x1"), &CancellationToken::new())
        .await
        .expect("second attempt succeeds");

    assert_eq!(out, Delivery::Text);
    assert_eq!(t0.elapsed(), Duration::from_secs(5));
    assert_eq!(ch.attempts().len(), 2);
    assert_eq!(ch.delivered().len(), 1);
    assert_eq!(ch.announced(), vec!["x1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn second_rate_limit_is_returned_without_third_attempt() {
    let ch = RecordingChannel::scripted(vec![rate_limited(2), rate_limited(2)]);
    let notifier = Notifier::new(ch.clone());

    let t0 = Instant::now();
    let err = notifier
        .notify(USER, &listing("x1"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, NotifyError::Channel(ChannelError::RateLimited { .. })));
    assert_eq!(t0.elapsed(), Duration::from_secs(2));
    assert_eq!(ch.attempts().len(), 2);
    assert!(ch.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn other_errors_are_not_retried() {
    let ch = RecordingChannel::scripted(vec![Err(ChannelError::Transport("reset".into()))]);
    let notifier = Notifier::new(ch.clone());

    let err = notifier
        .notify(USER, &listing("x1"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Channel(ChannelError::Transport(_))));
    assert_eq!(ch.attempts().len(), 1);
}

#[tokio::test]
async fn rejected_photo_falls_back_to_text() {
    let ch = RecordingChannel::scripted(vec![Err(ChannelError::Rejected(
        "wrong file identifier".into(),
    ))]);
    let notifier = Notifier::new(ch.clone());
    let l = listing("x1").with_image("https://img.example/dead.jpg");

    let out = notifier
        .notify(USER, &l, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out, Delivery::TextFallback);
    let attempts = ch.attempts();
    assert!(matches!(&attempts[0], Sent::Image { url, .. } if url == "https://img.example/dead.jpg"));
    assert!(matches!(&attempts[1], Sent::Text { .. }));
    assert_eq!(attempts[0].body(), attempts[1].body());
}

#[tokio::test(start_paused = true)]
async fn photo_rate_limited_twice_does_not_fall_back() {
    let ch = RecordingChannel::scripted(vec![rate_limited(1), rate_limited(1)]);
    let notifier = Notifier::new(ch.clone());
    let l = listing("x1").with_image("https://img.example/1.jpg");

    assert!(notifier.notify(USER, &l, &CancellationToken::new()).await.is_err());
    assert_eq!(ch.attempts().len(), 2);
    assert!(ch.attempts().iter().all(|s| matches!(s, Sent::Image { .. })));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_rate_limit_wait() {
    let ch = RecordingChannel::scripted(vec![rate_limited(600)]);
    let notifier = Notifier::new(ch.clone());
    let cancel = CancellationToken::new();

    let c = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        c.cancel();
    });

    let t0 = Instant::now();
    let err = notifier.notify(USER, &listing("x1"), &cancel).await.unwrap_err();
    assert!(matches!(err, NotifyError::Cancelled));
    assert!(t0.elapsed() < Duration::from_secs(600));
    assert_eq!(ch.attempts().len(), 1);
}

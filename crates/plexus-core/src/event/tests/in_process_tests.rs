use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::event::error::EventSystemError;
use crate::event::{Event, EventBus, InProcessBus, SubscriptionHandle, handler_fn, sync_handler};

fn event(topic: &str) -> Event {
    Event::new(topic, "test", b"payload".to_vec())
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Arc<dyn crate::event::EventHandler> {
    let log = Arc::clone(log);
    let label = label.to_string();
    sync_handler(move |_event: &Event| log.lock().unwrap().push(label.clone()))
}

#[tokio::test]
async fn test_handlers_run_in_subscription_order() {
    let bus = InProcessBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        bus.subscribe("metadata.created", recorder(&log, label)).await.unwrap();
    }

    bus.publish(event("metadata.created")).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    let stats = bus.stats();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.delivered, 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_does_not_block_the_others() {
    let bus = InProcessBus::with_handler_timeout(Duration::from_millis(100));
    let delivered = Arc::new(AtomicU32::new(0));

    for i in 0..5 {
        let delivered = Arc::clone(&delivered);
        bus.subscribe(
            "transcoding.started",
            handler_fn(move |_event: Arc<Event>| {
                let delivered = Arc::clone(&delivered);
                async move {
                    if i == 2 {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await
        .unwrap();
    }

    let begun = tokio::time::Instant::now();
    bus.publish(event("transcoding.started"))
        .await
        .expect("a handler timeout is not a publish error");

    assert!(begun.elapsed() < Duration::from_secs(1));
    assert_eq!(delivered.load(Ordering::SeqCst), 4);
    let stats = bus.stats();
    assert_eq!(stats.handler_timeouts, 1);
    assert_eq!(stats.delivered, 4);
}

#[tokio::test]
async fn test_no_replay_for_late_subscribers() {
    let bus = InProcessBus::new();
    let count = Arc::new(AtomicU32::new(0));

    bus.publish(event("job.submitted")).await.unwrap();

    let count_clone = Arc::clone(&count);
    bus.subscribe(
        "job.submitted",
        sync_handler(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .await
    .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0, "earlier events are never replayed");

    bus.publish(event("job.submitted")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = InProcessBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let keep = bus.subscribe("alert.triggered", recorder(&log, "keep")).await.unwrap();
    let drop = bus.subscribe("alert.triggered", recorder(&log, "drop")).await.unwrap();

    assert!(drop.unsubscribe());
    assert!(!drop.unsubscribe(), "second unsubscribe is a no-op");
    assert!(!drop.is_active());
    assert!(keep.is_active());

    bus.publish(event("alert.triggered")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    assert_eq!(bus.subscriber_count(), 1);
}

#[tokio::test]
async fn test_unsubscribe_during_dispatch_skips_later_handler() {
    let bus = InProcessBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let victim: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

    let victim_clone = Arc::clone(&victim);
    let log_clone = Arc::clone(&log);
    bus.subscribe(
        "streaming.stopped",
        sync_handler(move |_| {
            log_clone.lock().unwrap().push("remover".to_string());
            if let Some(handle) = victim_clone.lock().unwrap().take() {
                handle.unsubscribe();
            }
        }),
    )
    .await
    .unwrap();
    let handle = bus.subscribe("streaming.stopped", recorder(&log, "victim")).await.unwrap();
    *victim.lock().unwrap() = Some(handle);

    bus.publish(event("streaming.stopped")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["remover"]);
}

#[tokio::test]
async fn test_publish_without_subscribers_is_a_no_op() {
    let bus = InProcessBus::new();
    bus.publish(event("nobody.listens")).await.unwrap();
    assert_eq!(bus.stats().delivered, 0);
}

#[tokio::test]
async fn test_any_topic_string_is_accepted() {
    let bus = InProcessBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("file uploaded", recorder(&log, "spaced")).await.unwrap();
    bus.subscribe("", recorder(&log, "empty")).await.unwrap();

    bus.publish(event("file uploaded")).await.unwrap();
    bus.publish(event("")).await.unwrap();
    bus.publish(event("no such topic")).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["spaced", "empty"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_sync_handler_is_bounded_by_timeout() {
    let bus = InProcessBus::with_handler_timeout(Duration::from_millis(100));
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(
        "transcoding.failed",
        sync_handler(|_| std::thread::sleep(Duration::from_secs(3))),
    )
    .await
    .unwrap();
    bus.subscribe("transcoding.failed", recorder(&log, "after")).await.unwrap();

    for _ in 0..3 {
        let begun = std::time::Instant::now();
        bus.publish(event("transcoding.failed")).await.unwrap();
        assert!(
            begun.elapsed() < Duration::from_secs(1),
            "publish took {:?}",
            begun.elapsed()
        );
    }

    assert_eq!(*log.lock().unwrap(), vec!["after", "after", "after"]);
    assert_eq!(bus.stats().handler_timeouts, 3);
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let bus = InProcessBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("job.failed", sync_handler(|_| panic!("handler bug"))).await.unwrap();
    bus.subscribe("job.failed", recorder(&log, "after")).await.unwrap();

    bus.publish(event("job.failed")).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["after"]);
    assert_eq!(bus.stats().handler_panics, 1);
}

#[tokio::test]
async fn test_closed_bus_refuses_work() {
    let bus = InProcessBus::new();
    let handle = bus.subscribe("file.uploaded", sync_handler(|_| {})).await.unwrap();

    bus.close().await.unwrap();
    bus.close().await.unwrap();

    assert!(bus.is_closed());
    assert!(!handle.is_active());
    assert!(matches!(bus.publish(event("file.uploaded")).await, Err(EventSystemError::Closed)));
    assert!(matches!(
        bus.subscribe("file.uploaded", sync_handler(|_| {})).await,
        Err(EventSystemError::Closed)
    ));
}

#[tokio::test]
async fn test_handle_outliving_bus() {
    let bus = InProcessBus::new();
    let handle = bus.subscribe("file.uploaded", sync_handler(|_| {})).await.unwrap();
    drop(bus);
    assert!(!handle.is_active());
    assert!(!handle.unsubscribe());
}

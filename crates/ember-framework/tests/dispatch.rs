use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use ember_core::{Attribute, BoxError, BoxedEvent, Event, EventKind, EventResult, Reactive, Scope};
use ember_framework::{
    DispatchError, EventListenerManager, FnListener, FnListenerInterceptor,
    FnProcessingInterceptor, ListenerContext, ListenerError, ListenerInvocation, ListenerPoint,
    ProcessingInvocation, RegistrationError, ServiceListener,
};

struct Kinds {
    message: EventKind,
    friend: EventKind,
    notice: EventKind,
}

fn kinds() -> Kinds {
    let root = EventKind::root("Event");
    let message = EventKind::new("MessageEvent", [&root]);
    let friend = EventKind::new("FriendMessageEvent", [&message]);
    let notice = EventKind::new("NoticeEvent", [&root]);
    Kinds {
        message,
        friend,
        notice,
    }
}

struct TestEvent {
    kind: EventKind,
    text: String,
}

impl Event for TestEvent {
    fn kind(&self) -> &EventKind {
        &self.kind
    }

    fn plain_text(&self) -> Option<&str> {
        Some(&self.text)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn event(kind: &EventKind, text: &str) -> BoxedEvent {
    BoxedEvent::new(TestEvent {
        kind: kind.clone(),
        text: text.to_string(),
    })
}

/// A sync listener that records its ID and replies with it.
fn recording(id: &'static str, priority: i32, log: &Arc<Mutex<Vec<&'static str>>>) -> FnListener {
    let log = Arc::clone(log);
    FnListener::builder(id).priority(priority).handle(move |_| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(id);
            EventResult::of(id.to_string())
        }
    })
}

fn counting(id: &'static str, priority: i32, hits: &Arc<AtomicUsize>) -> FnListener {
    let hits = Arc::clone(hits);
    FnListener::builder(id).priority(priority).handle(move |_| {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test]
async fn test_listeners_run_in_priority_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = EventListenerManager::builder()
        .listener(recording("third", 30, &log))
        .listener(recording("first", -5, &log))
        .listener(recording("second", 10, &log))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();

    assert_eq!(*log.lock(), ["first", "second", "third"]);
    assert_eq!(result.contents::<String>(), ["first", "second", "third"]);
}

#[tokio::test]
async fn test_equal_priority_keeps_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = EventListenerManager::builder().build().unwrap();
    for id in ["a", "b", "c"] {
        manager.register(recording(id, 1, &log)).unwrap();
    }

    manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert_eq!(*log.lock(), ["a", "b", "c"]);
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = EventListenerManager::builder()
        .listener(recording("dup", 0, &log))
        .build()
        .unwrap();

    let err = manager.register(recording("dup", 1, &log)).unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateId { ref id } if id == "dup"));
    assert_eq!(manager.registry().len(), 1);

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_duplicate_initial_listener_fails_build() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let built = EventListenerManager::builder()
        .listener(recording("same", 0, &log))
        .listener(recording("same", 0, &log))
        .build();
    assert!(built.is_err());
}

#[tokio::test]
async fn test_empty_targets_receive_every_kind() {
    let k = kinds();
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .listener(counting("all", 0, &hits))
        .build()
        .unwrap();

    manager.push(event(&k.message, "a")).await.unwrap();
    manager.push(event(&k.notice, "b")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_target_kinds_follow_hierarchy() {
    let k = kinds();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("messages").on(k.message.clone()).handle(
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .build()
        .unwrap();

    manager.push(event(&k.friend, "sub")).await.unwrap();
    manager.push(event(&k.message, "exact")).await.unwrap();
    manager.push(event(&k.notice, "other")).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(manager.contains(&k.friend));
    assert!(!manager.contains(&k.notice));
}

#[tokio::test]
async fn test_resolution_is_cached_until_registration_changes() {
    let k = kinds();
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .listener(counting("one", 0, &hits))
        .build()
        .unwrap();
    let registry = manager.registry();

    manager.push(event(&k.friend, "a")).await.unwrap();
    manager.push(event(&k.friend, "b")).await.unwrap();
    assert_eq!(registry.scan_count(), 1);

    let handle = manager.register(counting("two", 1, &hits)).unwrap();
    manager.push(event(&k.friend, "c")).await.unwrap();
    assert_eq!(registry.scan_count(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    handle.dispose();
    manager.push(event(&k.friend, "d")).await.unwrap();
    assert_eq!(registry.scan_count(), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_truncated_result_stops_the_loop() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .listener(
            FnListener::builder("stop")
                .priority(0)
                .handle(|_| async { EventResult::of("done").truncated() }),
        )
        .listener(counting("after", 1, &hits))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(result.len(), 1);
    assert!(result.results()[0].is_truncated());
    assert_eq!(result.contents::<&'static str>(), ["done"]);
}

#[tokio::test]
async fn test_invalid_results_are_not_appended() {
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("skip").handle(|_| async { EventResult::invalid() }))
        .listener(
            FnListener::builder("no-match")
                .matcher(|_| async { false })
                .handle(|_| async { EventResult::of(1u8) }),
        )
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_listener_fault_does_not_stop_dispatch() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("boom").priority(0).handle(|_| async {
            Err::<EventResult, BoxError>("boom".into())
        }))
        .listener(counting("after", 1, &hits))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_exception_handler_substitutes_result() {
    let manager = EventListenerManager::builder()
        .exception_handler(|e: &ListenerError| {
            Ok::<_, BoxError>(Some(EventResult::of(format!("recovered {}", e.id))))
        })
        .listener(FnListener::builder("flaky").handle(|_| async {
            Err::<EventResult, BoxError>("flaky".into())
        }))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert_eq!(result.contents::<String>(), ["recovered flaky"]);
}

#[tokio::test]
async fn test_failing_exception_handler_aborts_event() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .exception_handler(|_: &ListenerError| {
            Err::<Option<EventResult>, BoxError>("handler failed".into())
        })
        .listener(FnListener::builder("flaky").priority(0).handle(|_| async {
            Err::<EventResult, BoxError>("flaky".into())
        }))
        .listener(counting("after", 1, &hits))
        .build()
        .unwrap();

    let err = manager.push(event(&kinds().message, "hi")).await.unwrap_err();

    match err {
        DispatchError::Handler { source, original } => {
            assert_eq!(source.to_string(), "handler failed");
            assert_eq!(original.id, "flaky");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_async_result_appears_after_completion() {
    let gate = Arc::new(Notify::new());
    let waiting = Arc::clone(&gate);
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = EventListenerManager::builder()
        .listener(
            FnListener::builder("slow")
                .priority(-100)
                .is_async(true)
                .handle(move |_| {
                    let gate = Arc::clone(&waiting);
                    async move {
                        gate.notified().await;
                        EventResult::of("late".to_string())
                    }
                }),
        )
        .listener(recording("sync", 100, &log))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();

    // Sync listeners run first regardless of priority.
    assert_eq!(result.contents::<String>(), ["sync"]);
    assert_eq!(result.pending_async(), 1);

    gate.notify_one();
    result.wait_async().await;

    assert_eq!(result.pending_async(), 0);
    assert_eq!(result.contents::<String>(), ["sync", "late"]);
}

#[tokio::test]
async fn test_async_listener_fault_is_recovered_in_task() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("bad").is_async(true).priority(-10).handle(|_| async {
            Err::<EventResult, BoxError>("bad".into())
        }))
        .listener(recording("sibling", 10, &log))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    result.wait_async().await;

    assert_eq!(*log.lock(), ["sibling"]);
    assert_eq!(result.contents::<String>(), ["sibling"]);
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn test_reactive_results_are_materialized() {
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("deferred").handle(|_| async {
            Reactive::future(async { 7u32 })
        }))
        .listener(FnListener::builder("stream").priority(1).handle(|_| async {
            Reactive::stream(futures::stream::iter([1u32, 2, 3]))
        }))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    let results = result.results();

    assert_eq!(results[0].content_as::<u32>(), Some(&7));
    let items = results[1]
        .content_as::<Vec<ember_core::Content>>()
        .unwrap()
        .iter()
        .filter_map(|c| c.downcast_ref::<u32>().copied())
        .collect::<Vec<_>>();
    assert_eq!(items, [1, 2, 3]);
}

#[tokio::test]
async fn test_processing_interceptor_can_short_circuit() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .process_interceptor(
            "gate",
            FnProcessingInterceptor::new(0, |inv: ProcessingInvocation| async move {
                if inv.context().plain_text() == Some("blocked") {
                    return Ok(());
                }
                inv.proceed().await
            }),
        )
        .listener(counting("l", 0, &hits))
        .build()
        .unwrap();

    manager.push(event(&kinds().message, "blocked")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    manager.push(event(&kinds().message, "open")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_processing_interceptor_error_fails_push() {
    let manager = EventListenerManager::builder()
        .process_interceptor(
            "reject",
            FnProcessingInterceptor::new(0, |_: ProcessingInvocation| async {
                Err::<(), BoxError>("rejected".into())
            }),
        )
        .listener(FnListener::builder("l").handle(|_| async {}))
        .build()
        .unwrap();

    let err = manager.push(event(&kinds().message, "hi")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Interceptor(ref e) if e.to_string() == "rejected"));
}

#[tokio::test]
async fn test_after_match_interceptor_skipped_on_mismatch() {
    let around = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let (around_hits, after_hits) = (Arc::clone(&around), Arc::clone(&after));

    let manager = EventListenerManager::builder()
        .listener_interceptor(
            "around",
            FnListenerInterceptor::new(ListenerPoint::Default, 0, move |inv: ListenerInvocation| {
                let hits = Arc::clone(&around_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    inv.proceed().await
                }
            }),
        )
        .listener_interceptor(
            "after",
            FnListenerInterceptor::new(ListenerPoint::AfterMatch, 0, move |inv: ListenerInvocation| {
                let hits = Arc::clone(&after_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    inv.proceed().await
                }
            }),
        )
        .listener(
            FnListener::builder("picky")
                .matcher(|ctx: Arc<ListenerContext>| async move { ctx.plain_text() == Some("go") })
                .handle(|_| async {}),
        )
        .build()
        .unwrap();

    manager.push(event(&kinds().message, "skip")).await.unwrap();
    assert_eq!((around.load(Ordering::SeqCst), after.load(Ordering::SeqCst)), (1, 0));

    manager.push(event(&kinds().message, "go")).await.unwrap();
    assert_eq!((around.load(Ordering::SeqCst), after.load(Ordering::SeqCst)), (2, 1));
}

#[tokio::test]
async fn test_listener_interceptor_can_replace_result() {
    let manager = EventListenerManager::builder()
        .listener_interceptor(
            "override",
            FnListenerInterceptor::new(ListenerPoint::AfterMatch, 0, |inv: ListenerInvocation| async move {
                let id = inv.context().listener().id().to_string();
                inv.proceed().await?;
                Ok::<_, BoxError>(EventResult::of(format!("{id} intercepted")))
            }),
        )
        .listener(FnListener::builder("l").handle(|_| async { EventResult::of(0u8) }))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert_eq!(result.contents::<String>(), ["l intercepted"]);
}

#[tokio::test]
async fn test_instant_scope_lives_for_one_event() {
    fn step() -> Attribute<u32> {
        Attribute::new("step")
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("writer").priority(0).handle(
            |ctx: Arc<ListenerContext>| async move {
                if ctx.plain_text() == Some("a") {
                    ctx.scope().put(Scope::Instant, &step(), 1)?;
                }
                Ok::<_, BoxError>(EventResult::empty())
            },
        ))
        .listener(FnListener::builder("reader").priority(1).handle(
            move |ctx: Arc<ListenerContext>| {
                let sink = Arc::clone(&sink);
                async move {
                    let value = ctx.scope().get(Scope::Instant, &step());
                    sink.lock().push(value.ok().flatten().map(|v| *v));
                }
            },
        ))
        .build()
        .unwrap();

    manager.push(event(&kinds().message, "a")).await.unwrap();
    manager.push(event(&kinds().message, "b")).await.unwrap();
    assert_eq!(*seen.lock(), [Some(1), None]);
}

#[tokio::test]
async fn test_disposed_listener_stops_receiving() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder().build().unwrap();
    let handle = manager.register(counting("temp", 0, &hits)).unwrap();
    assert!(handle.is_active());

    manager.push(event(&kinds().message, "a")).await.unwrap();
    assert!(handle.dispose().is_some());
    assert!(!handle.is_active());
    assert!(handle.dispose().is_none());

    let result = manager.push(event(&kinds().message, "b")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_stale_handle_leaves_reused_id_alone() {
    let manager = EventListenerManager::builder().build().unwrap();
    let first = manager
        .register(FnListener::builder("x").handle(|_| async { EventResult::of(1u8) }))
        .unwrap();
    assert!(first.dispose().is_some());

    let second = manager
        .register(FnListener::builder("x").handle(|_| async { EventResult::of(2u8) }))
        .unwrap();

    assert!(!first.is_active());
    assert!(first.dispose().is_none());
    assert!(second.is_active());

    let result = manager.push(event(&kinds().message, "hi")).await.unwrap();
    assert_eq!(result.contents::<u8>(), [2]);
}

#[tokio::test]
async fn test_unregister_by_predicate() {
    let hits = Arc::new(AtomicUsize::new(0));
    let manager = EventListenerManager::builder()
        .listener(counting("tmp-1", 0, &hits))
        .listener(counting("tmp-2", 0, &hits))
        .listener(counting("keep", 0, &hits))
        .build()
        .unwrap();

    let removed = manager.unregister_by(|l| l.id().starts_with("tmp-"));
    assert_eq!(removed.len(), 2);
    assert_eq!(manager.registry().ids(), ["keep"]);
}

#[tokio::test]
async fn test_service_listener() {
    let svc = tower::service_fn(|ctx: Arc<ListenerContext>| async move {
        let len = ctx.plain_text().map_or(0, str::len);
        Ok::<_, BoxError>(EventResult::of(len))
    });
    let manager = EventListenerManager::builder()
        .listener(ServiceListener::new("length", svc).on(kinds().message))
        .build()
        .unwrap();

    let result = manager.push(event(&kinds().friend, "hello")).await.unwrap();
    assert_eq!(result.contents::<usize>(), [5]);
}

#[tokio::test]
async fn test_push_after_shutdown_is_rejected() {
    let manager = EventListenerManager::builder()
        .listener(FnListener::builder("l").handle(|_| async {}))
        .build()
        .unwrap();

    manager.shutdown().await;
    assert!(manager.is_shut_down());
    let err = manager.push(event(&kinds().message, "hi")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Closed));
}

#[test]
fn test_build_without_runtime_fails() {
    assert!(EventListenerManager::builder().build().is_err());
}

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use clustervisor::{
    Bus, ClusterError, EventKind, EventMeta, FileEvent, FileEventKind, KillSignal, MASTER_STATUS,
    SYSTEM_RESTART_NEEDED, Sender, WORKER_RESTART_NEEDED, WorkerState, kill_worker,
};
use common::{Startup, config, eventually, harness, settle, within};

fn event_message(name: &str, sender: Sender, payload: Value) -> Value {
    json!({
        "type": "event",
        "args": [name, serde_json::to_value(EventMeta::now(sender)).unwrap(), payload],
    })
}

#[tokio::test]
async fn initialize_forks_every_worker_and_listens_once() {
    let h = harness(config(3));
    within(h.master.initialize(false)).await.unwrap();

    assert_eq!(h.spawner.spawn_count(), 3);
    assert_eq!(h.master.workers(), vec![1, 2, 3]);
    assert_eq!(h.hooks.listens.load(Ordering::SeqCst), 1);
    for id in h.master.workers() {
        assert_eq!(h.master.worker(id).unwrap().state(), WorkerState::Listening);
    }
}

#[tokio::test]
async fn exit_before_listening_rejects_and_is_not_retried() {
    let h = harness(config(1));
    h.spawner.script([Startup::ExitEarly(1)]);

    let err = within(h.master.initialize(false)).await.unwrap_err();
    assert!(matches!(err, ClusterError::StartupFailed { id: 1, code: Some(1), .. }));

    settle().await;
    assert_eq!(h.spawner.spawn_count(), 1);
    assert_eq!(h.master.worker_count(), 0);
    assert_eq!(h.hooks.listens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn crash_after_listening_forks_exactly_one_replacement() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    h.spawner.worker(1).crash(1);
    eventually("replacement listening", || {
        h.master.workers() == vec![2, 3]
            && h.master.worker(3).is_some_and(|w| w.state() == WorkerState::Listening)
    })
    .await;

    settle().await;
    assert_eq!(h.spawner.spawn_count(), 3);
    assert_eq!(h.master.worker_count(), 2);
}

#[tokio::test]
async fn voluntary_exit_is_not_replaced() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    let worker = h.master.worker(2).unwrap();
    let timeouts = h.master.config().escalation_timeouts();
    within(kill_worker(&worker, timeouts, &Bus::new(8))).await.unwrap();
    assert!(worker.exited_after_disconnect());

    settle().await;
    assert_eq!(h.spawner.spawn_count(), 2);
    assert_eq!(h.master.workers(), vec![1]);
}

#[tokio::test]
async fn sigint_kills_everyone_and_exits_once() {
    let h = harness(config(3));
    within(h.master.initialize(false)).await.unwrap();

    within(h.master.handle_sigint()).await.unwrap();
    assert_eq!(h.hooks.exits(), vec![0]);
    assert_eq!(h.master.worker_count(), 0);
    for w in h.spawner.spawned() {
        assert_eq!(w.signals(), vec![KillSignal::Interrupt]);
        assert!(w.has_exited());
    }

    within(h.master.handle_sigint()).await.unwrap();
    settle().await;
    assert_eq!(h.hooks.exits(), vec![0], "on_exit runs exactly once");
    assert_eq!(h.spawner.spawn_count(), 3, "no refork during shutdown");
}

#[tokio::test(start_paused = true)]
async fn sigint_with_a_stuck_worker_exits_with_failure() {
    let h = harness(config(2));
    h.spawner.dies_on(None);
    within(h.master.initialize(false)).await.unwrap();

    let err = within(h.master.handle_sigint()).await.unwrap_err();
    assert!(matches!(err, ClusterError::KillExhausted { .. }));
    assert_eq!(h.hooks.exits(), vec![1]);
    for w in h.spawner.spawned() {
        assert_eq!(w.signals(), KillSignal::ESCALATION.to_vec());
    }
}

#[tokio::test(start_paused = true)]
async fn escalation_stops_at_sigterm_when_that_works() {
    let h = harness(config(1));
    h.spawner.dies_on(Some(KillSignal::Terminate));
    within(h.master.initialize(false)).await.unwrap();

    within(h.master.handle_sigint()).await.unwrap();
    assert_eq!(
        h.spawner.worker(1).signals(),
        vec![KillSignal::Interrupt, KillSignal::Terminate]
    );
    assert_eq!(h.hooks.exits(), vec![0]);
}

#[tokio::test]
async fn kill_all_with_no_workers_resolves_immediately() {
    let h = harness(config(0));
    within(h.master.kill_all_workers()).await.unwrap();
    within(h.master.handle_sigint()).await.unwrap();
    assert_eq!(h.hooks.exits(), vec![0]);
}

#[tokio::test]
async fn reload_all_replaces_every_worker_with_fresh_pids() {
    let h = harness(config(3));
    within(h.master.initialize(false)).await.unwrap();
    let old_pids: Vec<_> = h.spawner.spawned().iter().map(|w| w.pid).collect();

    within(h.master.reload_all_workers()).await.unwrap();

    assert_eq!(h.spawner.spawn_count(), 6);
    assert_eq!(h.master.workers(), vec![4, 5, 6]);
    for w in &h.spawner.spawned()[..3] {
        assert_eq!(w.signals(), vec![KillSignal::Interrupt]);
    }
    for w in &h.spawner.spawned()[3..] {
        assert!(!old_pids.contains(&w.pid));
    }
    settle().await;
    assert_eq!(h.spawner.spawn_count(), 6, "voluntary kills are not reforked");
}

#[tokio::test]
async fn reload_of_unknown_worker_fails() {
    let h = harness(config(1));
    within(h.master.initialize(false)).await.unwrap();
    let err = h.master.reload_worker(42).await.unwrap_err();
    assert!(matches!(err, ClusterError::UnknownWorker { id: 42 }));
}

#[tokio::test]
async fn worker_events_reach_the_master_bus_without_echo() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    h.master.bus().on("result.new", move |meta, payload| {
        s.lock().unwrap().push((meta.sender, payload.clone()));
    });

    h.spawner
        .worker(1)
        .message(event_message("result.new", Sender::Worker(99), json!({"id": 7})));
    eventually("event re-emitted on the master", || !seen.lock().unwrap().is_empty()).await;

    // The channel decides who sent it, not the message.
    assert_eq!(*seen.lock().unwrap(), vec![(Sender::Worker(1), json!({"id": 7}))]);
    settle().await;
    for w in h.spawner.spawned() {
        assert_eq!(w.received("result.new"), 0);
    }

    h.master.bus().emit("result.new", json!({"id": 8}));
    for w in h.spawner.spawned() {
        assert_eq!(w.received("result.new"), 1);
    }
}

#[tokio::test]
async fn malformed_messages_are_dropped() {
    let h = harness(config(1));
    let mut events = h.master.subscribe_events();
    within(h.master.initialize(false)).await.unwrap();

    let worker = h.spawner.worker(1);
    worker.message(json!({}));
    worker.message(json!({"type": "chuaange", "args": []}));
    worker.message(json!("plain text"));
    worker.message(json!({"type": "event"}));
    worker.message(json!({"type": "log", "level": "info", "args": ["still alive"]}));

    let mut malformed = 0;
    within(async {
        while malformed < 4 {
            let ev = events.recv().await.unwrap();
            if ev.kind == EventKind::MalformedMessage {
                assert_eq!(ev.worker, Some(1));
                malformed += 1;
            }
        }
    })
    .await;
    assert_eq!(h.master.worker(1).unwrap().state(), WorkerState::Listening);
}

#[tokio::test]
async fn status_request_from_a_worker_is_answered_to_workers() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    h.spawner.worker(2).message(event_message(
        MASTER_STATUS,
        Sender::Worker(2),
        json!({"id": "req-1"}),
    ));

    let response = "masterStatus.response";
    eventually("stats relayed", || h.spawner.worker(2).received(response) == 1).await;

    let (_, meta, stats) = h
        .spawner
        .worker(2)
        .inbox()
        .into_iter()
        .find(|(n, _, _)| n == response)
        .unwrap();
    assert_eq!(meta["correlationId"], json!("req-1"));
    assert_eq!(stats["master"]["coresUsed"], json!(2));
    assert_eq!(stats["workers"].as_object().unwrap().len(), 2);
    assert_eq!(h.spawner.worker(1).received(response), 1);
    // The request itself stays on the master.
    assert_eq!(h.spawner.worker(1).received(MASTER_STATUS), 0);
}

#[tokio::test]
async fn status_without_id_is_ignored() {
    let h = harness(config(1));
    within(h.master.initialize(false)).await.unwrap();

    h.master.bus().emit(MASTER_STATUS, json!({}));
    settle().await;
    assert_eq!(h.spawner.worker(1).received("masterStatus.response"), 0);
}

#[tokio::test]
async fn master_request_round_trip_uses_correlation() {
    let h = harness(config(1));
    within(h.master.initialize(false)).await.unwrap();

    let reply = within(h.master.bus().request(
        MASTER_STATUS,
        Value::Null,
        std::time::Duration::from_secs(1),
    ))
    .await
    .unwrap();
    assert!(reply.payload.get("osStats").is_some());
    assert_eq!(
        h.master.bus().subscriber_count("masterStatus.response"),
        1,
        "only the wildcard relay remains"
    );
}

#[tokio::test]
async fn worker_restart_needed_reloads_the_pool() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    h.master
        .bus()
        .emit(WORKER_RESTART_NEEDED, json!("file changed: lib/api.js"));
    eventually("pool reloaded", || h.master.workers() == vec![3, 4]).await;
    assert_eq!(h.spawner.worker(1).received(WORKER_RESTART_NEEDED), 0);
}

#[tokio::test]
async fn overlapping_restart_requests_keep_the_pool_at_target() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    // One save often arrives as two change events.
    h.master.bus().emit(WORKER_RESTART_NEEDED, json!("lib/api.js"));
    h.master.bus().emit(WORKER_RESTART_NEEDED, json!("lib/api.js"));
    eventually("pool reloaded", || h.master.workers() == vec![3, 4]).await;

    settle().await;
    assert_eq!(h.master.worker_count(), 2);
    assert_eq!(h.spawner.spawn_count(), 4);
    for w in &h.spawner.spawned()[..2] {
        assert_eq!(w.signals(), vec![KillSignal::Interrupt]);
    }
}

#[tokio::test]
async fn reload_of_an_exiting_worker_is_refused() {
    let h = harness(config(1));
    h.spawner.dies_on(None);
    within(h.master.initialize(false)).await.unwrap();

    let first = {
        let master = Arc::clone(&h.master);
        tokio::spawn(async move { master.reload_worker(1).await })
    };
    eventually("first reload signalled", || !h.spawner.worker(1).signals().is_empty()).await;

    let err = h.master.reload_worker(1).await.unwrap_err();
    assert!(matches!(err, ClusterError::AlreadyExiting { id: 1 }));
    within(h.master.reload_all_workers()).await.unwrap();

    h.spawner.worker(1).crash(0);
    assert_eq!(within(first).await.unwrap().unwrap(), 2);
    assert_eq!(h.master.workers(), vec![2]);
    assert_eq!(h.spawner.spawn_count(), 2);
}

#[tokio::test]
async fn reload_racing_shutdown_forks_nothing() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    h.master.bus().emit(WORKER_RESTART_NEEDED, json!("lib/api.js"));
    within(h.master.handle_sigint()).await.unwrap();
    settle().await;

    assert_eq!(h.hooks.exits(), vec![0]);
    assert_eq!(h.spawner.spawn_count(), 2);
    assert_eq!(h.master.worker_count(), 0);
    assert!(h.spawner.spawned().iter().all(|w| w.has_exited()));

    let err = h.master.fork_worker().await.unwrap_err();
    assert!(matches!(err, ClusterError::ShuttingDown));
    assert_eq!(h.spawner.spawn_count(), 2);
}

#[tokio::test]
async fn system_restart_needed_shuts_down_cleanly() {
    let h = harness(config(2));
    within(h.master.initialize(false)).await.unwrap();

    h.master
        .bus()
        .emit(SYSTEM_RESTART_NEEDED, json!("file changed: master.js"));
    eventually("on_exit called", || !h.hooks.exits().is_empty()).await;

    assert_eq!(h.hooks.exits(), vec![0]);
    assert_eq!(h.master.worker_count(), 0);
    assert!(h.master.is_shutting_down());
}

#[tokio::test]
async fn initialize_with_auto_reload_activates_a_file_listener() {
    let h = harness(config(1));
    within(h.master.initialize(true)).await.unwrap();
    assert!(h.master.is_file_listener_active());

    within(h.master.handle_sigint()).await.unwrap();
    assert!(!h.master.is_file_listener_active());
}

#[tokio::test]
async fn initialize_without_auto_reload_has_no_file_listener() {
    let h = harness(config(1));
    within(h.master.initialize(false)).await.unwrap();
    assert!(!h.master.is_file_listener_active());
}

#[tokio::test]
async fn file_listener_changes_drive_restarts() {
    let mut cfg = config(1);
    cfg.master_file = Some("master.js".into());
    let h = harness(cfg);
    within(h.master.initialize(false)).await.unwrap();

    let listener = h.master.create_file_listener();
    assert!(!listener.is_active());
    h.master.activate_file_listener(&listener).unwrap();
    assert!(h.master.is_file_listener_active());

    listener.emit(FileEvent::new(FileEventKind::Add, "lib/new.js"));
    settle().await;
    assert_eq!(h.spawner.spawn_count(), 1, "additions are ignored");

    listener.emit(FileEvent::new(FileEventKind::Change, "lib/api.js"));
    eventually("worker reloaded", || h.master.workers() == vec![2]).await;

    listener.emit(FileEvent::new(FileEventKind::Change, "master.js"));
    eventually("system restart", || h.hooks.exits() == vec![0]).await;
    assert!(!listener.is_active(), "dispose deactivates the listener");
}

#[tokio::test]
async fn dispose_drops_bus_subscriptions() {
    let h = harness(config(1));
    within(h.master.initialize(false)).await.unwrap();
    assert!(h.master.bus().subscriber_count(MASTER_STATUS) >= 2);

    h.master.dispose();
    assert!(h.master.bus().is_empty());

    within(h.master.shutdown()).await.unwrap();
    assert!(h.hooks.exits().is_empty(), "shutdown never calls on_exit");
    assert_eq!(h.master.worker_count(), 0);
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let h = harness(config(1));
    let mut events = h.master.subscribe_events();
    within(h.master.initialize(false)).await.unwrap();
    within(h.master.handle_sigint()).await.unwrap();

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    for expected in [
        EventKind::WorkerForked,
        EventKind::WorkerListening,
        EventKind::PoolReady,
        EventKind::ShutdownRequested,
        EventKind::KillSignalSent,
        EventKind::ShutdownCompleted,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
}

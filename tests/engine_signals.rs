// tests/engine_signals.rs

mod common;
use crate::common::builders::{GraphBuilder, test_config};
use crate::common::doubles::RecordingNotifier;
use crate::common::workers::{ExitWith, FailTimes, SleepThenSucceed};
use crate::common::{init_tracing, new_engine, read_log, with_timeout};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dagrun::checkpoint::CheckpointStore;
use dagrun::engine::{EngineHooks, HookPoint, TickOutcome};
use dagrun::errors::DagrunError;
use dagrun::exec::WorkerRegistry;
use dagrun::signal::SignalChannel;
use dagrun::types::{NodeStatus, RunOutcome, Signal};

fn registry() -> WorkerRegistry {
    let mut workers = WorkerRegistry::new();
    workers.register("ok", ExitWith(0));
    workers.register("hang", SleepThenSucceed(Duration::from_secs(3600)));
    workers
}

#[tokio::test]
async fn abort_signal_terminates_running_nodes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("abortable", dir.path());
    let signals = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());

    let register = GraphBuilder::new()
        .node("quick", "ok")
        .node("long", "hang")
        .node("after_long", "ok")
        .after("long")
        .build(dir.path());

    let fired = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let (a, b, c) = (fired.clone(), fired.clone(), fired.clone());
        EngineHooks::new()
            .on(HookPoint::Success, move |_: &dagrun::dag::Register| a.lock().unwrap().push("success"))
            .on(HookPoint::Fail, move |_: &dagrun::dag::Register| b.lock().unwrap().push("fail"))
            .on(HookPoint::Destroy, move |_: &dagrun::dag::Register| c.lock().unwrap().push("destroy"))
    };
    let notifier = RecordingNotifier::new();
    let mut engine = new_engine(config, register, registry())
        .with_hooks(hooks)
        .with_notifier(notifier.clone());

    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        signals.emit(Signal::Abort).unwrap();
    });

    let result = with_timeout(engine.run()).await.unwrap();
    sender.await.unwrap();

    assert_eq!(result, -1);
    let reg = engine.register();
    let long = reg.find_by_name("long").unwrap();
    assert_eq!(long.status(), NodeStatus::Aborted);
    assert_eq!(
        reg.find_by_name("after_long").unwrap().status(),
        NodeStatus::Defaulted
    );
    assert_eq!(reg.find_by_name("quick").unwrap().status(), NodeStatus::Completed);
    assert!(read_log(&long.logfile).contains("ABORT signal received"));

    // The signal is consumed and both checkpoints are written.
    assert!(!engine.signals().peek().contains(&Signal::Abort));
    assert!(engine.config().ctllog_file().is_file());
    assert!(engine.config().ctx_file().is_file());

    assert_eq!(*fired.lock().unwrap(), vec!["destroy"]);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.outcome, RunOutcome::Aborted);
    assert_eq!(sent[0].0.aborted, vec!["long".to_string()]);
}

#[tokio::test]
async fn aborted_graph_restarts_with_revive() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("abort_restart", dir.path());

    let register = GraphBuilder::new()
        .node("long", "hang")
        .node("after_long", "ok")
        .after("long")
        .build(dir.path());
    let mut engine = new_engine(config.clone(), register, registry());

    assert_eq!(engine.tick().await.unwrap(), TickOutcome::Continue);
    engine.signals().emit(Signal::Abort).unwrap();
    assert_eq!(engine.tick().await.unwrap(), TickOutcome::Aborted);

    let store = CheckpointStore::for_config(&config);
    let mut restored = store.load_graph().unwrap();
    assert_eq!(
        restored.find_by_name("long").unwrap().status(),
        NodeStatus::Aborted
    );

    // Without revive nothing is left to do.
    let mut plain = restored.clone();
    dagrun::dag::StateManager::new(&mut plain).prepare_restart(false);
    assert!(!plain.has_active());

    dagrun::dag::StateManager::new(&mut restored).prepare_restart(true);
    assert_eq!(restored.count(NodeStatus::Pending), 2);
    assert_eq!(restored.find_by_name("long").unwrap().attempts(), 0);
}

#[tokio::test]
async fn pulse_from_second_instance_is_detected() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("single", dir.path());
    let tick = config.tick_period().unwrap();
    let probe = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());
    let aborter = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());

    let register = GraphBuilder::new().node("long", "hang").build(dir.path());
    let mut engine = new_engine(config, register, registry());

    let second = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let verdict = probe.detect_duplicate(tick).await;
        aborter.emit(Signal::Abort).unwrap();
        verdict
    });

    assert_eq!(with_timeout(engine.run()).await.unwrap(), -1);
    let verdict = second.await.unwrap();
    assert!(matches!(verdict, Err(DagrunError::DuplicateRun(_))));
}

#[tokio::test]
async fn pulse_is_answered_within_one_tick_at_slow_rates() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config("slow_ticks", dir.path());
    config.launch.tickrate = 1;
    let tick = config.tick_period().unwrap();
    let probe = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());
    let aborter = SignalChannel::new(config.temp_dir.clone(), config.app_name.clone());

    let register = GraphBuilder::new().node("long", "hang").build(dir.path());
    let mut engine = new_engine(config, register, registry());

    // The second instance starts between two ticks of the first.
    let second = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let verdict = probe.detect_duplicate(tick).await;
        aborter.emit(Signal::Abort).unwrap();
        verdict
    });

    assert_eq!(with_timeout(engine.run()).await.unwrap(), -1);
    let verdict = second.await.unwrap();
    assert!(matches!(verdict, Err(DagrunError::DuplicateRun(_))));
}

#[tokio::test]
async fn pulse_without_running_instance_passes() {
    let dir = tempfile::tempdir().unwrap();
    let signals = SignalChannel::new(dir.path(), "lonely");
    signals
        .detect_duplicate(Duration::from_millis(5))
        .await
        .unwrap();
    assert!(signals.peek().is_empty());
}

#[tokio::test]
async fn revive_signal_reruns_failed_branch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let flaky = Arc::new(FailTimes::new(1, 2));
    let mut workers = registry();
    workers.register_arc("flaky", flaky.clone());

    let register = GraphBuilder::new()
        .node("a", "flaky")
        .node("b", "ok")
        .after("a")
        .build(dir.path());
    let mut engine = new_engine(test_config("revivable", dir.path()), register, workers);

    assert_eq!(with_timeout(engine.run()).await.unwrap(), 1);
    assert_eq!(engine.register().find_by_name("b").unwrap().status(), NodeStatus::Defaulted);

    engine.signals().emit(Signal::Revive).unwrap();
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);

    let reg = engine.register();
    assert_eq!(reg.count(NodeStatus::Completed), 2);
    assert_eq!(reg.find_by_name("a").unwrap().attempts(), 1);
    assert_eq!(flaky.calls("a"), 2);
    // Success removes the checkpoints the failed run left behind.
    assert!(!engine.config().ctllog_file().exists());
}

// tests/engine_scheduling.rs

mod common;
use crate::common::builders::{GraphBuilder, test_config};
use crate::common::doubles::{RecordingNotifier, ScriptedPrompter};
use crate::common::workers::{ConcurrencyProbe, EchoContext, ExitWith, FailTimes, SleepThenSucceed};
use crate::common::{init_tracing, new_engine, read_log, with_timeout};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use dagrun::context::{ContextHandle, ContextMap};
use dagrun::engine::{Engine, EngineHooks, HookPoint, RunReport};
use dagrun::exec::WorkerRegistry;
use dagrun::types::{NodeStatus, RunOutcome, exit_code};

fn registry() -> WorkerRegistry {
    let mut workers = WorkerRegistry::new();
    workers.register("ok", ExitWith(0));
    workers.register("fail", ExitWith(3));
    workers.register("slow", SleepThenSucceed(Duration::from_millis(50)));
    workers
}

#[tokio::test]
async fn chain_completes_in_dependency_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let probe = ConcurrencyProbe::new(Duration::from_millis(10));
    let mut workers = registry();
    workers.register_arc("probe", probe.clone());

    let register = GraphBuilder::new()
        .node("extract", "probe")
        .node("transform", "probe")
        .after("extract")
        .node("load", "probe")
        .after("transform")
        .build(dir.path());

    let mut engine = new_engine(test_config("chain", dir.path()), register, workers);
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 0);
    assert_eq!(probe.started(), vec!["extract", "transform", "load"]);
    assert_eq!(engine.register().count(NodeStatus::Completed), 3);
    // A successful run leaves no checkpoint behind.
    assert!(!engine.config().ctllog_file().exists());
}

#[tokio::test]
async fn retries_until_success_then_runs_children() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let flaky = Arc::new(FailTimes::new(2, 4));
    let mut workers = registry();
    workers.register_arc("flaky", flaky.clone());

    let register = GraphBuilder::new()
        .node("a", "flaky")
        .attempts(3)
        .retry_wait(Duration::from_millis(20))
        .node("b", "ok")
        .after("a")
        .node("c", "ok")
        .after("b")
        .build(dir.path());

    let mut engine = new_engine(test_config("retry", dir.path()), register, workers);
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 0);
    assert_eq!(flaky.calls("a"), 3);
    let reg = engine.register();
    let a = reg.find_by_name("a").unwrap();
    assert_eq!(a.attempts(), 3);
    assert_eq!(reg.find_by_name("b").unwrap().attempts(), 1);
    assert_eq!(reg.count(NodeStatus::Completed), 3);

    let log = read_log(&a.logfile);
    assert!(log.contains("attempt 1 of 3 started"));
    assert!(log.contains("retrying in"));
    assert!(log.contains("attempt 3 of 3 started"));
}

#[tokio::test]
async fn exhausted_retries_fail_and_default_descendants_only() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let register = GraphBuilder::new()
        .node("root", "ok")
        .node("bad", "fail")
        .after("root")
        .attempts(2)
        .node("child", "ok")
        .after("bad")
        .node("grandchild", "ok")
        .after("child")
        .node("sibling", "slow")
        .after("root")
        .build(dir.path());

    let mut engine = new_engine(test_config("cascade", dir.path()), register, registry());
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 1);
    let reg = engine.register();
    let status = |name: &str| reg.find_by_name(name).unwrap().status();
    assert_eq!(status("bad"), NodeStatus::Failed);
    assert_eq!(reg.find_by_name("bad").unwrap().attempts(), 2);
    assert_eq!(status("child"), NodeStatus::Defaulted);
    assert_eq!(status("grandchild"), NodeStatus::Defaulted);
    assert_eq!(status("sibling"), NodeStatus::Completed);
    assert_eq!(reg.find_by_name("child").unwrap().attempts(), 0);

    // A failed run stays restartable.
    assert!(engine.config().ctllog_file().is_file());
    assert!(engine.config().ctx_file().is_file());
}

#[tokio::test]
async fn max_procs_caps_concurrency() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let probe = ConcurrencyProbe::new(Duration::from_millis(30));
    let mut workers = WorkerRegistry::new();
    workers.register_arc("probe", probe.clone());

    let mut builder = GraphBuilder::new();
    for i in 0..5 {
        builder = builder.node(&format!("n{i}"), "probe");
    }
    let register = builder.build(dir.path());

    let mut config = test_config("capped", dir.path());
    config.launch.max_procs = 1;

    let mut engine = new_engine(config, register, workers);
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 0);
    assert_eq!(probe.peak(), 1);
    assert_eq!(probe.started().len(), 5);
}

#[tokio::test]
async fn unlimited_procs_start_independent_nodes_together() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let probe = ConcurrencyProbe::new(Duration::from_millis(100));
    let mut workers = WorkerRegistry::new();
    workers.register_arc("probe", probe.clone());

    let register = GraphBuilder::new()
        .node("a", "probe")
        .node("b", "probe")
        .node("c", "probe")
        .build(dir.path());

    let mut engine = new_engine(test_config("wide", dir.path()), register, workers);
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);
    assert_eq!(probe.peak(), 3);
}

#[tokio::test]
async fn ticks_follow_the_configured_rate() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut builder = GraphBuilder::new();
    for i in 0..5 {
        builder = builder.node(&format!("n{i}"), "ok");
    }
    let register = builder.build(dir.path());

    // One node per tick: launched on one tick, reaped and replaced on the next.
    let mut config = test_config("paced", dir.path());
    config.launch.tickrate = 10;
    config.launch.max_procs = 1;
    let period = config.tick_period().unwrap();

    let mut engine = new_engine(config, register, registry());
    let started = Instant::now();
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);
    let elapsed = started.elapsed();

    assert!(elapsed >= period * 4, "finished too early: {elapsed:?}");
    assert!(elapsed < period * 8, "5 serial nodes took {elapsed:?} at {period:?} per tick");
}

#[tokio::test]
async fn time_between_tasks_spaces_every_launch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let probe = ConcurrencyProbe::new(Duration::from_millis(10));
    let mut workers = WorkerRegistry::new();
    workers.register_arc("probe", probe.clone());

    let register = GraphBuilder::new()
        .node("a", "probe")
        .node("b", "probe")
        .node("c", "probe")
        .build(dir.path());

    let mut config = test_config("spaced", dir.path());
    config.launch.time_between_tasks = 0.1;
    let spacing = config.time_between_tasks();
    assert!(spacing > config.tick_period().unwrap());

    let mut engine = new_engine(config, register, workers);
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);

    // Three different nodes, all ready at once: the gap applies across nodes.
    assert_eq!(probe.started().len(), 3);
    assert_eq!(probe.peak(), 1);
    let slack = Duration::from_millis(10);
    for pair in probe.start_times().windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap + slack >= spacing, "launches only {gap:?} apart");
    }
}

#[tokio::test]
async fn unknown_worker_is_a_node_failure_not_a_crash() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let register = GraphBuilder::new()
        .node("ghost", "no_such_worker")
        .node("after_ghost", "ok")
        .after("ghost")
        .build(dir.path());

    let mut engine = new_engine(test_config("ghost", dir.path()), register, registry());
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 1);
    let reg = engine.register();
    assert_eq!(reg.find_by_name("ghost").unwrap().status(), NodeStatus::Failed);
    assert_eq!(
        reg.find_by_name("after_ghost").unwrap().status(),
        NodeStatus::Defaulted
    );
    let log = read_log(&reg.find_by_name("ghost").unwrap().logfile);
    assert!(log.contains("unknown worker 'no_such_worker'"));
}

#[tokio::test]
async fn timeout_kills_attempt_and_fails_node() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut workers = WorkerRegistry::new();
    workers.register("hang", SleepThenSucceed(Duration::from_secs(3600)));

    let register = GraphBuilder::new()
        .node("stuck", "hang")
        .timeout(Duration::from_millis(50))
        .build(dir.path());

    let mut engine = new_engine(test_config("timeout", dir.path()), register, workers);
    let result = with_timeout(engine.run()).await.unwrap();

    assert_eq!(result, 1);
    let stuck = engine.register().find_by_name("stuck").unwrap();
    assert_eq!(stuck.status(), NodeStatus::Failed);
    assert!(read_log(&stuck.logfile).contains("exceeded the timeout"));
}

#[tokio::test]
async fn reserved_codes_from_workers_are_clamped() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut workers = WorkerRegistry::new();
    workers.register("reserved", ExitWith(exit_code::TERMINATED));

    let register = GraphBuilder::new()
        .node("x", "reserved")
        .build(dir.path());
    let mut engine = new_engine(test_config("clamp", dir.path()), register, workers);
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 1);

    let x = engine.register().find_by_name("x").unwrap();
    assert!(read_log(&x.logfile).contains("reserved or negative exit code 907"));
}

#[tokio::test]
async fn hooks_fire_in_lifecycle_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fired = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str| {
        let fired = Arc::clone(&fired);
        move |_: &dagrun::dag::Register| fired.lock().unwrap().push(label)
    };
    let hooks = EngineHooks::new()
        .on(HookPoint::Create, record("create"))
        .on(HookPoint::Restart, record("restart"))
        .on(HookPoint::Start, record("start"))
        .on(HookPoint::Success, record("success"))
        .on(HookPoint::Fail, record("fail"))
        .on(HookPoint::Destroy, record("destroy"));

    let register = GraphBuilder::new().node("bad", "fail").build(dir.path());
    let mut engine = new_engine(test_config("hooks", dir.path()), register, registry()).with_hooks(hooks);
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 1);

    assert_eq!(
        *fired.lock().unwrap(),
        vec!["create", "start", "fail", "destroy"]
    );
}

#[tokio::test]
async fn notifications_follow_config_flags() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let register = GraphBuilder::new().node("bad", "fail").build(dir.path());
    let notifier = RecordingNotifier::new();
    let mut engine = new_engine(test_config("notify", dir.path()), register, registry())
        .with_notifier(notifier.clone());
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 1);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    let (report, attachments): &(RunReport, _) = &sent[0];
    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.failed, vec!["bad".to_string()]);
    assert_eq!(attachments.len(), 1);
    assert!(report.subject().ends_with("FAILURE"));

    // Suppressed on success.
    let dir = tempfile::tempdir().unwrap();
    let register = GraphBuilder::new().node("good", "ok").build(dir.path());
    let mut config = test_config("quiet", dir.path());
    config.launch.notify_on_success = false;
    let notifier = RecordingNotifier::new();
    let mut engine = new_engine(config, register, registry()).with_notifier(notifier.clone());
    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn interactive_requests_are_answered_by_prompter() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut workers = WorkerRegistry::new();
    workers.register("echo", EchoContext("run_date"));

    let register = GraphBuilder::new().node("reader", "echo").build(dir.path());
    let mut config = test_config("interactive", dir.path());
    config.launch.interactive = true;

    let prompter = ScriptedPrompter::new(&[("run_date", "2024-03-01")]);
    let context = ContextHandle::spawn(ContextMap::new(), true);
    let mut engine = Engine::new(config, register, context.clone(), workers)
        .with_prompter(prompter.clone());

    assert_eq!(with_timeout(engine.run()).await.unwrap(), 0);
    assert_eq!(prompter.asked(), vec!["run_date".to_string()]);
    assert_eq!(
        context.try_get("run_date_seen").await.unwrap(),
        Some(json!("2024-03-01"))
    );
}

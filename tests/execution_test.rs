mod common;

use std::{sync::Arc, time::Duration};

use chariot::{
    Value,
    eval::EvalError,
    execution::{ExecutionError, ExecutionManager, LogLevel},
    runtime::Runtime,
};
use chrono::Utc;
use pretty_assertions::assert_eq;

fn manager() -> ExecutionManager {
    ExecutionManager::new(Arc::new(Runtime::new(common::fast_config())))
}

#[tokio::test]
async fn test_logs_and_result_of_a_finished_run() {
    let manager = ExecutionManager::new(common::SHARED_RUNTIME.clone());
    let id = manager.create("user-1", "logPrint('a')\nlogPrint('b', 'warn')\nadd(1, 2)");
    let context = manager.get(&id).unwrap();
    context.wait().await;

    let report = context.get_result();
    assert!(report.done);
    assert_eq!(report.result, Some(serde_json::json!(3)));
    assert_eq!(report.error, None);

    let logs = context.logs().get_all();
    let lines: Vec<_> = logs.iter().map(|e| (e.sequence, e.level, e.message.as_str())).collect();
    assert_eq!(lines, vec![(1, LogLevel::Info, "a"), (2, LogLevel::Warn, "b")]);
}

#[tokio::test]
async fn test_streaming_sees_history_then_live_entries() {
    let manager = manager();
    let id = manager.create(
        "user-1",
        "logPrint('before')\nsleep(50)\nlogPrint('after')\n'ok'",
    );
    let context = manager.get(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut stream = context.stream_logs();
    let first = stream.next().await.unwrap();
    let second = stream.next().await.unwrap();
    assert_eq!(first.message, "before");
    assert_eq!(second.message, "after");
    assert!(second.sequence > first.sequence);

    context.wait().await;
    assert_eq!(context.result(), Some(Value::str("ok")));
}

#[tokio::test]
async fn test_log_buffer_keeps_only_the_newest_entries() {
    let manager = manager();
    let source = r#"
        declare(i, 'N', 0)
        while (smaller(i, 10)) {
            setq(i, add(i, 1))
            logPrint(concat('line ', i))
        }
    "#;
    let context = manager.get(&manager.create("user-1", source)).unwrap();
    context.wait().await;

    let logs = context.logs().get_all();
    assert_eq!(logs.len(), 8);
    assert_eq!(logs.first().map(|e| e.message.as_str()), Some("line 3"));
    assert_eq!(logs.last().map(|e| e.sequence), Some(10));
}

#[tokio::test]
async fn test_errors_are_recorded_with_logs_so_far() {
    let manager = manager();
    let id = manager.create("user-2", "logPrint('starting')\nraise('no fuel')");
    let context = manager.get(&id).unwrap();
    context.wait().await;

    assert_eq!(
        context.error().as_ref().map(EvalError::root),
        Some(&EvalError::UserScriptError("no fuel".into()))
    );
    assert!(context.get_result().error.unwrap().contains("no fuel"));
    assert_eq!(context.logs().len(), 1);
}

#[tokio::test]
async fn test_host_panic_becomes_an_error() {
    let mut runtime = Runtime::new(common::fast_config());
    runtime.register_sync("explode", |_ctx, _args| panic!("boom"));
    let manager = ExecutionManager::new(Arc::new(runtime));

    let context = manager.get(&manager.create("user-3", "explode()")).unwrap();
    context.wait().await;
    let error = context.error().unwrap();
    assert!(matches!(error.root(), EvalError::EvaluationPanic(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runaway_recursion_is_recorded() {
    let manager = manager();
    let source = r#"
        declare(down, 'F', func(n) { if (bigger(n, 0)) { down(sub(n, 1)) } else { 'bottom' } })
        logPrint('descending')
        down(1000)
    "#;
    let context = manager.get(&manager.create("user-3", source)).unwrap();
    context.wait().await;

    let error = context.error().unwrap();
    assert_eq!(error.root(), &EvalError::CallDepthExceeded(32));
    assert_eq!(context.logs().len(), 1);

    // the host keeps serving runs afterwards
    let next = manager.get(&manager.create("user-3", "'still here'")).unwrap();
    next.wait().await;
    assert_eq!(next.result(), Some(Value::str("still here")));
}

#[tokio::test]
async fn test_lookup_listing_and_sweep() {
    let manager = manager();
    let done = manager.create("owner", "1");
    let slow = manager.create("owner", "sleep(60000)");
    manager.create("someone-else", "2");
    manager.get(&done).unwrap().wait().await;

    let owned: Vec<_> = manager
        .list_for_owner("owner")
        .iter()
        .map(|c| c.id().to_string())
        .collect();
    assert_eq!(owned, vec![done.clone(), slow.clone()]);

    assert_eq!(
        manager.get("missing").unwrap_err(),
        ExecutionError::ExecutionNotFound("missing".into())
    );

    // well past retention: finished runs go, the sleeping one stays
    let later = Utc::now() + chrono::TimeDelta::hours(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.sweep_expired(later) >= 1);
    assert!(manager.get(&done).is_err());
    assert!(manager.get(&slow).is_ok());

    manager.remove(&slow).unwrap();
    assert!(manager.list_for_owner("owner").is_empty());
}

mod common;

use std::{sync::Arc, time::Duration};

use chariot::{
    Value,
    debugger::{DebugError, DebugEventKind, DebugState, Debugger},
    eval::EvalError,
    execution::ExecutionManager,
};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

const PROGRAM: &str = r#"declare(total, 'N', 0)
declare(bump, 'F', func(by) {
  setq(total, add(total, by))
})
bump(2)
bump(3)
logPrint(total)
total"#;

fn current_line(debugger: &Debugger) -> Option<usize> {
    debugger.get_current_position().map(|p| p.line)
}

#[tokio::test]
async fn test_debug_session_through_execution_manager() {
    let manager = ExecutionManager::new(common::SHARED_RUNTIME.clone());
    let debugger = Arc::new(Debugger::default());
    debugger.set_breakpoint("budget.ch", 5, None).unwrap();
    let mut events = debugger.subscribe();

    let id = manager.create_with_debugger("dev", PROGRAM, "budget.ch", debugger.clone());
    let context = manager.get(&id).unwrap();

    assert_eq!(debugger.wait_until_paused().await, DebugState::Paused);
    assert_eq!(current_line(&debugger), Some(5));
    assert_eq!(debugger.get_variables().get("total"), Some(&Value::Number(0.0)));
    assert!(!context.is_done());

    // into bump's body, then back out to the next call
    debugger.step_into().unwrap();
    debugger.wait_until_paused().await;
    assert_eq!(current_line(&debugger), Some(3));
    let stack = debugger.get_call_stack();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].function_name, "bump");
    assert_eq!(stack[0].file, "budget.ch");

    debugger.step_out().unwrap();
    debugger.wait_until_paused().await;
    assert_eq!(current_line(&debugger), Some(6));
    assert_eq!(debugger.get_variables().get("total"), Some(&Value::Number(2.0)));

    debugger.step_over().unwrap();
    debugger.wait_until_paused().await;
    assert_eq!(current_line(&debugger), Some(7));

    debugger.continue_execution().unwrap();
    context.wait().await;
    assert_eq!(context.result(), Some(Value::Number(5.0)));
    assert_eq!(debugger.get_state(), DebugState::Stopped);
    assert_eq!(debugger.step_over(), Err(DebugError::Stopped));

    let mut kinds = Vec::new();
    while let Some(event) = events.receiver.recv().await {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&DebugEventKind::BreakpointHit));
    assert_eq!(kinds.last(), Some(&DebugEventKind::Stopped));
    assert_eq!(
        kinds.iter().filter(|k| **k == DebugEventKind::Stepped).count(),
        3
    );
}

#[tokio::test]
async fn test_failing_program_stops_the_session_with_an_error() {
    let manager = ExecutionManager::new(common::SHARED_RUNTIME.clone());
    let debugger = Arc::new(Debugger::default());
    let mut events = debugger.subscribe();

    let id = manager.create_with_debugger("dev", "declare(a, 'N', 1)\nraise('halt')", "main.ch", debugger.clone());
    manager.get(&id).unwrap().wait().await;

    assert_eq!(debugger.get_state(), DebugState::Stopped);
    let error = events.receiver.recv().await.unwrap();
    assert_eq!(error.kind, DebugEventKind::Error);
    assert!(error.message.contains("halt"));
    assert_eq!(error.position.map(|p| p.line), Some(2));
    assert_eq!(
        events.receiver.recv().await.map(|e| e.kind),
        Some(DebugEventKind::Stopped)
    );
}

#[tokio::test]
async fn test_unparseable_program_stops_the_session() {
    let manager = ExecutionManager::new(common::SHARED_RUNTIME.clone());
    let debugger = Arc::new(Debugger::default());
    debugger.set_breakpoint("main.ch", 1, None).unwrap();
    let mut events = debugger.subscribe();

    let id = manager.create_with_debugger("dev", "logPrint('a'", "main.ch", debugger.clone());
    let context = manager.get(&id).unwrap();
    context.wait().await;
    assert!(matches!(context.error(), Some(EvalError::Parse(_))));

    let state = timeout(Duration::from_secs(1), debugger.wait_until_paused())
        .await
        .unwrap();
    assert_eq!(state, DebugState::Stopped);

    let kinds: Vec<_> = timeout(Duration::from_secs(1), async {
        let mut kinds = Vec::new();
        while let Some(event) = events.receiver.recv().await {
            kinds.push(event.kind);
        }
        kinds
    })
    .await
    .unwrap();
    assert_eq!(kinds, vec![DebugEventKind::Error, DebugEventKind::Stopped]);
}

#[test]
fn test_breakpoint_requests_are_validated() {
    let debugger = Debugger::default();
    assert!(matches!(
        debugger.set_breakpoint("", 1, None),
        Err(DebugError::InvalidBreakpointRequest(_))
    ));
    assert!(matches!(
        debugger.set_breakpoint("main.ch", 0, None),
        Err(DebugError::InvalidBreakpointRequest(_))
    ));
    assert!(matches!(
        debugger.set_breakpoint("main.ch", 3, Some("equal(x,")),
        Err(DebugError::InvalidBreakpointRequest(_))
    ));
    assert_eq!(debugger.step_over(), Err(DebugError::NotPaused));
    assert!(debugger.get_breakpoints().is_empty());
}

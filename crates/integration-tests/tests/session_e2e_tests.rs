// VTrace - JavaScript Value Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end tests of trace sessions against a scripted inspector
//!
//! Each test wires a real coordinator, transport and stepping engine to a
//! mock inspector served over a local websocket.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tempfile::TempDir;
use tracing::info;
use vtrace_engine::{
    EngineConfig, SessionCoordinator, SessionError, SourceRange, TraceRequest, TraceResult,
};
use vtrace_integration_tests::{
    mock_inspector::{Evaluation, MockInspector, Script, ScriptedPause},
    test_utils::{fixtures, init, test_engine_config, StaticLauncher, StaticParser},
};

/// Cursor line of the traces below: `return y;` (0-based)
const RETURN_LINE: u32 = 2;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        init::init_test_environment();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.js"), fixtures::FUNCTION_SOURCE).unwrap();
        Self { dir }
    }

    fn file(&self) -> PathBuf {
        self.dir.path().join("f.js")
    }

    fn request(&self) -> TraceRequest {
        TraceRequest::new(self.file(), RETURN_LINE)
    }
}

fn coordinator(
    endpoints: impl IntoIterator<Item = String>,
    config: EngineConfig,
) -> SessionCoordinator<StaticLauncher, StaticParser> {
    SessionCoordinator::new(
        StaticLauncher::new(endpoints),
        StaticParser::program(fixtures::function_program()),
        config,
    )
}

fn records(trace: &TraceResult) -> Vec<(&str, u32, u32)> {
    trace
        .records
        .iter()
        .map(|record| (record.message.as_str(), record.range.start_line, record.range.start_column))
        .collect()
}

fn function_pause(x: i64, y: i64) -> ScriptedPause {
    ScriptedPause::at_breakpoint(0, 10).with("x", Evaluation::number(x)).with("y", Evaluation::number(y))
}

#[tokio::test]
async fn test_trace_records_function_locals() {
    let workspace = Workspace::new();
    let inspector = MockInspector::start(Script::with_pauses([function_pause(1, 2)])).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();
    info!(?trace, "Trace finished");

    assert_eq!(records(&trace), [("1", 0, 11), ("2", 1, 6), ("1", 1, 10)]);
    assert_eq!(trace.pauses, 1);
    assert_eq!(trace.expressions.len(), 2);
    assert_eq!(
        trace.records[1].range,
        SourceRange { start_line: 1, start_column: 6, end_line: 1, end_column: 7 }
    );

    // Only the breakpoint pause is sampled, once per distinct expression
    let evaluations = inspector.params_of("Debugger.evaluateOnCallFrame");
    assert_eq!(evaluations.len(), 2);
    assert!(evaluations.iter().all(|params| params["callFrameId"] == "frame-2"));
    assert!(evaluations.iter().all(|params| params["throwOnSideEffect"] == true));

    let breakpoint = &inspector.params_of("Debugger.setBreakpointByUrl")[0];
    assert_eq!(breakpoint["lineNumber"], RETURN_LINE);
    assert_eq!(breakpoint["columnNumber"], 0);
    let url = breakpoint["url"].as_str().unwrap();
    assert!(url.starts_with("file://") && url.ends_with("/f.js"), "{url}");

    assert_eq!(inspector.params_of("Debugger.setPauseOnExceptions")[0]["state"], "uncaught");
    assert!(!coordinator.is_active());
}

#[tokio::test]
async fn test_every_pause_extends_the_histories() {
    let workspace = Workspace::new();
    let script = Script::with_pauses([function_pause(1, 2), function_pause(5, 6), function_pause(9, 10)]);
    let inspector = MockInspector::start(script).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();

    assert_eq!(trace.pauses, 3);
    // Three spans, each with one record per pause
    assert_eq!(trace.records.len(), 3 * trace.pauses);
    assert_eq!(
        records(&trace),
        [
            ("1", 0, 11),
            ("5", 0, 11),
            ("9", 0, 11),
            ("2", 1, 6),
            ("6", 1, 6),
            ("10", 1, 6),
            ("1", 1, 10),
            ("5", 1, 10),
            ("9", 1, 10),
        ]
    );
    let x = &trace.expressions[0];
    assert_eq!(x.expression, "x");
    assert_eq!(x.values.iter().map(|value| value.as_str()).collect::<Vec<_>>(), ["1", "5", "9"]);
}

#[tokio::test]
async fn test_failed_evaluations_are_undetermined() {
    let workspace = Workspace::new();
    let pause = ScriptedPause::at_breakpoint(0, 10)
        .with("x", Evaluation::Rejected("EvalError: Possible side-effect in debug-evaluate".into()))
        .with("y", Evaluation::Thrown("Error: getter failed".into()));
    let inspector = MockInspector::start(Script::with_pauses([pause])).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();

    assert_eq!(
        records(&trace),
        [("undetermined", 0, 11), ("undetermined", 1, 6), ("undetermined", 1, 10)]
    );
}

#[tokio::test]
async fn test_failed_evaluation_does_not_affect_later_pauses() {
    let workspace = Workspace::new();
    let failing = ScriptedPause::at_breakpoint(0, 10)
        .with("x", Evaluation::Rejected("EvalError: Possible side-effect in debug-evaluate".into()))
        .with("y", Evaluation::Thrown("Error: getter failed".into()));
    let inspector = MockInspector::start(Script::with_pauses([failing, function_pause(3, 4)])).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();

    assert_eq!(trace.pauses, 2);
    let histories: Vec<(&str, Vec<&str>)> = trace
        .expressions
        .iter()
        .map(|expression| {
            (expression.expression.as_str(), expression.values.iter().map(|value| value.as_str()).collect())
        })
        .collect();
    assert_eq!(histories, [("x", vec!["undetermined", "3"]), ("y", vec!["undetermined", "4"])]);
}

#[tokio::test]
async fn test_connection_lost_while_evaluating_fails_the_session() {
    let workspace = Workspace::new();
    let script = Script {
        hang_up_on: Some("Debugger.evaluateOnCallFrame".into()),
        ..Script::with_pauses([function_pause(1, 2)])
    };
    let inspector = MockInspector::start(script).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let result = coordinator.run(workspace.request()).await;
    assert!(matches!(result, Err(SessionError::Transport(_))), "{result:?}");
    assert!(inspector.received("Debugger.evaluateOnCallFrame"));
    assert!(!coordinator.is_active());
}

#[tokio::test]
async fn test_connection_lost_while_resuming_fails_the_session() {
    let workspace = Workspace::new();
    // The entry pause is resumed without evaluating, so the breakpoint pause is never reached
    let script = Script {
        hang_up_on: Some("Debugger.resume".into()),
        ..Script::with_pauses([function_pause(1, 2)])
    };
    let inspector = MockInspector::start(script).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let result = coordinator.run(workspace.request()).await;
    assert!(matches!(result, Err(SessionError::Transport(_))), "{result:?}");
    assert!(!inspector.received("Debugger.evaluateOnCallFrame"));
}

#[tokio::test]
async fn test_breakpoint_binds_in_a_directory_with_spaces() {
    let workspace = Workspace::new();
    let project = workspace.dir.path().join("my project #2");
    std::fs::create_dir(&project).unwrap();
    let file = project.join("f.js");
    std::fs::write(&file, fixtures::FUNCTION_SOURCE).unwrap();

    let inspector = MockInspector::start(Script::with_pauses([function_pause(1, 2)])).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());
    let trace = coordinator.run(TraceRequest::new(&file, RETURN_LINE)).await.unwrap();
    assert_eq!(trace.pauses, 1);

    let url = inspector.params_of("Debugger.setBreakpointByUrl")[0]["url"].as_str().unwrap().to_string();
    assert!(url.ends_with("/my%20project%20%232/f.js"), "{url}");
}

#[tokio::test]
async fn test_object_values_use_their_description() {
    let workspace = Workspace::new();
    let pause = ScriptedPause::at_breakpoint(0, 10)
        .with("x", Evaluation::object("Array", "Array(3)"))
        .with("y", Evaluation::string("hello"));
    let inspector = MockInspector::start(Script::with_pauses([pause])).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();
    assert_eq!(records(&trace)[0].0, "Array(3)");
    assert_eq!(records(&trace)[1].0, "hello");
}

#[tokio::test]
async fn test_breakpoint_failure_fails_the_session() {
    let workspace = Workspace::new();
    let script = Script {
        breakpoint_error: Some("Breakpoint at specified location already exists.".into()),
        ..Script::with_pauses([function_pause(1, 2)])
    };
    let inspector = MockInspector::start(script).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let result = coordinator.run(workspace.request()).await;
    match result {
        Err(SessionError::Configuration { step, .. }) => assert_eq!(step, "Debugger.setBreakpointByUrl"),
        other => panic!("Expected configuration failure, got {other:?}"),
    }
    assert!(!inspector.received("Runtime.runIfWaitingForDebugger"));
    assert!(!inspector.received("Debugger.evaluateOnCallFrame"));
}

#[tokio::test]
async fn test_program_ending_without_pause_gives_empty_trace() {
    let workspace = Workspace::new();
    let inspector = MockInspector::start(Script::default()).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();
    assert!(trace.is_empty());
    assert_eq!(trace.pauses, 0);
    assert!(!inspector.received("Debugger.evaluateOnCallFrame"));
}

#[tokio::test]
async fn test_entry_pause_is_sampled_when_not_skipped() {
    let workspace = Workspace::new();
    let inspector = MockInspector::start(Script::with_pauses([function_pause(1, 2)])).await.unwrap();
    let config = test_engine_config().with_skip_entry_pause(false);
    let coordinator = coordinator([inspector.endpoint().to_string()], config);

    let trace = coordinator.run(workspace.request()).await.unwrap();

    assert_eq!(trace.pauses, 2);
    // Discovery ran at the entry pause, from the start of the file
    let expressions: Vec<&str> = trace.expressions.iter().map(|trace| trace.expression.as_str()).collect();
    assert_eq!(expressions, ["f", "x", "y"]);
    assert_eq!(trace.expressions[0].values[0].as_str(), "undetermined");
    assert_eq!(trace.expressions[1].values.iter().map(|v| v.as_str()).collect::<Vec<_>>(), ["undetermined", "1"]);
}

#[tokio::test]
async fn test_syntax_error_gives_empty_trace_without_launching() {
    let workspace = Workspace::new();
    let coordinator = SessionCoordinator::new(
        StaticLauncher::new(Vec::new()),
        StaticParser::syntax_error("Unexpected token (2:10)"),
        test_engine_config(),
    );

    let trace = coordinator.run(workspace.request()).await.unwrap();
    assert_eq!(trace, TraceResult::empty());
    assert!(coordinator.launcher().launches().is_empty());
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    let workspace = Workspace::new();
    let coordinator = coordinator(Vec::new(), test_engine_config());
    assert!(matches!(coordinator.run(workspace.request()).await, Err(SessionError::Launch(_))));
    assert_eq!(coordinator.launcher().launches().len(), 1);
}

#[tokio::test]
async fn test_new_session_supersedes_the_active_one() {
    let workspace = Workspace::new();
    let stalled = MockInspector::start(Script::stalled()).await.unwrap();
    let healthy = MockInspector::start(Script::with_pauses([function_pause(3, 4)])).await.unwrap();
    let coordinator = Arc::new(coordinator(
        [stalled.endpoint().to_string(), healthy.endpoint().to_string()],
        test_engine_config(),
    ));

    let first = tokio::spawn({
        let coordinator = coordinator.clone();
        let request = workspace.request();
        async move { coordinator.run(request).await }
    });
    assert!(stalled.wait_for_request("Runtime.runIfWaitingForDebugger", Duration::from_secs(5)).await);
    assert!(coordinator.is_active());

    let second = coordinator.run(workspace.request()).await.unwrap();
    assert_eq!(records(&second)[0], ("3", 0, 11));

    assert!(matches!(first.await.unwrap(), Err(SessionError::Superseded)));
    assert!(!coordinator.is_active());
}

#[tokio::test]
async fn test_cancel_active_session() {
    let workspace = Workspace::new();
    let stalled = MockInspector::start(Script::stalled()).await.unwrap();
    let coordinator = Arc::new(coordinator([stalled.endpoint().to_string()], test_engine_config()));
    assert!(!coordinator.cancel_active());

    let run = tokio::spawn({
        let coordinator = coordinator.clone();
        let request = workspace.request();
        async move { coordinator.run(request).await }
    });
    assert!(stalled.wait_for_request("Runtime.runIfWaitingForDebugger", Duration::from_secs(5)).await);

    assert!(coordinator.cancel_active());
    assert!(matches!(run.await.unwrap(), Err(SessionError::Superseded)));
    assert!(!coordinator.cancel_active());
}

#[tokio::test]
async fn test_pause_timeout_fails_a_stalled_session() {
    let workspace = Workspace::new();
    let stalled = MockInspector::start(Script::stalled()).await.unwrap();
    let config = test_engine_config().with_pause_timeout(Some(Duration::from_millis(200)));
    let coordinator = coordinator([stalled.endpoint().to_string()], config);

    let result = coordinator.run(workspace.request()).await;
    assert!(matches!(result, Err(SessionError::PauseTimeout(timeout)) if timeout == Duration::from_millis(200)));
}

#[tokio::test]
async fn test_settle_ends_when_the_connection_closes() {
    let workspace = Workspace::new();
    let script = Script { close_after_end: true, ..Script::with_pauses([function_pause(1, 2)]) };
    let inspector = MockInspector::start(script).await.unwrap();
    let config = test_engine_config().with_settle_delay(Duration::from_secs(60));
    let coordinator = coordinator([inspector.endpoint().to_string()], config);

    let trace = tokio::time::timeout(Duration::from_secs(10), coordinator.run(workspace.request()))
        .await
        .expect("settling should stop once the inspector disconnects")
        .unwrap();
    assert_eq!(trace.pauses, 1);
}

#[tokio::test]
async fn test_console_output_does_not_disturb_the_trace() {
    let workspace = Workspace::new();
    let script = Script {
        console: vec!["starting".into(), "f called".into()],
        ..Script::with_pauses([function_pause(1, 2)])
    };
    let inspector = MockInspector::start(script).await.unwrap();
    let coordinator = coordinator([inspector.endpoint().to_string()], test_engine_config());

    let trace = coordinator.run(workspace.request()).await.unwrap();
    assert_eq!(records(&trace).len(), 3);
}

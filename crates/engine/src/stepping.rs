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

//! Stepping engine: drives the debuggee through pause, evaluate and resume
//! until its execution context ends.
//!
//! # State machine
//!
//! ```text
//! Idle -> Configuring -> WaitingForInitialPause -> Evaluating -> Resuming -> WaitingForPause
//!                                   |                  ^                          |
//!                                   +--(entry pause)---|------> Resuming          |
//!                                                      +-------(next pause)-------+
//!                                                                                 |
//!                                                             Terminated <--(context end)
//! ```
//!
//! Any error moves the engine to `Failed`. Discovery of the tracked
//! expressions happens once, at the first evaluated pause, and is reused for
//! every later pause.

use serde_json::Value;
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::{
    analysis::{ScopeAnalyzer, ScopeStart, ValueRecord},
    ast::Program,
    config::EngineConfig,
    error::{SessionError, TransportError},
    launcher::DEBUGGEE_LOG_TARGET,
    protocol::{
        cdp::{
            methods, ConsoleApiCalled, EvaluateOnCallFrameParams, EvaluateOnCallFrameResult,
            ExceptionThrown, ExecutionContextCreated, ExecutionContextDestroyed, PausedEvent,
            ScriptParsed, SetBreakpointByUrlParams, SetBreakpointByUrlResult,
            SetPauseOnExceptionsParams,
        },
        InboundMessage,
    },
    session::{Session, SessionPhase},
    transport::{EventWaiter, SubscriptionId, Transport},
};

/// States of the stepping engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Not started
    Idle,
    /// Enabling domains and installing the breakpoint
    Configuring,
    /// Debuggee released, waiting for its first pause
    WaitingForInitialPause,
    /// Sampling every tracked expression on the current frame
    Evaluating,
    /// Resume issued, waiting for the acknowledgement
    Resuming,
    /// Waiting for the next pause or the end of the execution context
    WaitingForPause,
    /// The execution context ended
    Terminated,
    /// An error ended the run
    Failed,
}

impl EngineState {
    /// Whether the engine may move from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use EngineState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Configuring)
                | (Configuring, WaitingForInitialPause)
                | (WaitingForInitialPause, Evaluating)
                | (WaitingForInitialPause, Resuming)
                | (WaitingForInitialPause, Terminated)
                | (Evaluating, Resuming)
                | (Resuming, WaitingForPause)
                | (WaitingForPause, Evaluating)
                | (WaitingForPause, Terminated)
        )
    }

    /// Whether the run is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Session phase entered together with this state, if any.
    fn session_phase(self) -> Option<SessionPhase> {
        match self {
            Self::Configuring => Some(SessionPhase::Configuring),
            Self::Evaluating => Some(SessionPhase::Tracing),
            Self::Terminated => Some(SessionPhase::Terminated),
            Self::Failed => Some(SessionPhase::Failed),
            _ => None,
        }
    }
}

/// The debuggee's halted state as of the most recent pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseState {
    /// Top call frame, valid until the next resume
    pub call_frame_id: String,
    /// Start of the top frame's innermost scope
    pub scope_start: ScopeStart,
    /// Why the debuggee halted
    pub reason: String,
    /// Breakpoints reported as hit
    pub hit_breakpoints: Vec<String>,
}

impl PauseState {
    /// Extract the pause state from a `Debugger.paused` payload.
    pub fn from_event(event: &PausedEvent) -> Result<Self, SessionError> {
        let frame = event
            .call_frames
            .first()
            .ok_or_else(|| SessionError::Internal("pause reported no call frames".into()))?;
        let scope_start = ScopeStart::from_location(
            frame.scope_chain.first().and_then(|scope| scope.start_location.as_ref()),
        );
        Ok(Self {
            call_frame_id: frame.call_frame_id.clone(),
            scope_start,
            reason: event.reason.clone(),
            hit_breakpoints: event.hit_breakpoints.clone(),
        })
    }

    /// Whether this pause was caused by `breakpoint_id`.
    pub fn hit(&self, breakpoint_id: Option<&str>) -> bool {
        breakpoint_id.is_some_and(|id| self.hit_breakpoints.iter().any(|hit| hit == id))
    }
}

/// Convert an evaluation result into the value recorded for it.
///
/// A thrown evaluation is undetermined; otherwise the description wins over
/// the primitive value, which wins over the unserializable form.
pub fn value_record(result: &EvaluateOnCallFrameResult) -> ValueRecord {
    if result.exception_details.is_some() {
        return ValueRecord::undetermined();
    }
    result.result.display_value().map(ValueRecord::new).unwrap_or_else(ValueRecord::undetermined)
}

/// What ended a wait in the pause loop.
enum LoopEvent {
    Paused(PausedEvent),
    ContextDestroyed,
}

enum Raced {
    Paused(Result<InboundMessage, TransportError>),
    Destroyed(Result<InboundMessage, TransportError>),
}

/// Drives one session's debuggee from configuration to context end.
pub struct SteppingEngine<'a> {
    transport: &'a Transport,
    session: &'a mut Session,
    program: &'a Program,
    config: &'a EngineConfig,
    state: EngineState,
    breakpoint_id: Option<String>,
    pauses: usize,
}

impl<'a> SteppingEngine<'a> {
    /// Create an engine for `session` over an open transport.
    pub fn new(
        transport: &'a Transport,
        session: &'a mut Session,
        program: &'a Program,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            transport,
            session,
            program,
            config,
            state: EngineState::Idle,
            breakpoint_id: None,
            pauses: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Identifier of the installed breakpoint, once configured.
    pub fn breakpoint_id(&self) -> Option<&str> {
        self.breakpoint_id.as_deref()
    }

    /// Run until the execution context ends. Returns the number of evaluated pauses.
    pub async fn run(&mut self) -> Result<usize, SessionError> {
        let observers = self.observe_debuggee();
        let outcome = self.drive().await;
        for id in observers {
            self.transport.off(id);
        }

        match outcome {
            Ok(pauses) => {
                info!(session = self.session.id(), pauses, "Execution context ended");
                Ok(pauses)
            }
            Err(error) => {
                warn!(session = self.session.id(), state = ?self.state, %error, "Stepping failed");
                if !self.state.is_terminal() {
                    self.state = EngineState::Failed;
                }
                self.session.fail();
                Err(error)
            }
        }
    }

    async fn drive(&mut self) -> Result<usize, SessionError> {
        self.transition(EngineState::Configuring)?;
        self.configure().await?;

        self.transition(EngineState::WaitingForInitialPause)?;
        let mut paused = self.transport.wait_for_method(methods::DEBUGGER_PAUSED);
        let mut destroyed = self.context_destroyed_waiter();
        self.transport
            .send(methods::RUNTIME_RUN_IF_WAITING_FOR_DEBUGGER, None)
            .await
            .map_err(|e| SessionError::configuration(methods::RUNTIME_RUN_IF_WAITING_FOR_DEBUGGER, e))?;

        let mut event = match self.next_event(&mut paused, &mut destroyed).await? {
            LoopEvent::Paused(event) => event,
            LoopEvent::ContextDestroyed => {
                info!("Execution context ended before the first pause");
                self.transition(EngineState::Terminated)?;
                return Ok(self.pauses);
            }
        };

        let mut initial = true;
        loop {
            let pause = PauseState::from_event(&event)?;
            info!(reason = %pause.reason, frame = %pause.call_frame_id, "Debuggee paused");

            let skip = initial
                && self.config.skip_entry_pause
                && !pause.hit(self.breakpoint_id.as_deref());
            initial = false;

            if skip {
                debug!("Resuming past the entry pause");
            } else {
                self.transition(EngineState::Evaluating)?;
                self.discover(&pause);
                self.evaluate_all(&pause).await?;
                self.pauses += 1;
            }

            self.transition(EngineState::Resuming)?;
            let (mut paused, mut destroyed) = self.resume().await?;

            self.transition(EngineState::WaitingForPause)?;
            match self.next_event(&mut paused, &mut destroyed).await? {
                LoopEvent::Paused(next) => event = next,
                LoopEvent::ContextDestroyed => {
                    self.transition(EngineState::Terminated)?;
                    return Ok(self.pauses);
                }
            }
        }
    }

    /// Enable domains, record the execution context and install the breakpoint.
    async fn configure(&mut self) -> Result<(), SessionError> {
        // Existing contexts are announced while `Runtime.enable` is processed
        let mut created = self.transport.wait_for_method(methods::RUNTIME_EXECUTION_CONTEXT_CREATED);

        self.configure_step(methods::DEBUGGER_ENABLE, None).await?;
        self.configure_step(methods::RUNTIME_ENABLE, None).await?;

        if let Some(notification) = created.try_recv().and_then(InboundMessage::into_notification) {
            match notification.params_as::<ExecutionContextCreated>() {
                Ok(created) => {
                    debug!(context = created.context.id, name = %created.context.name, "Execution context");
                    self.session.set_execution_context_id(created.context.id);
                }
                Err(e) => debug!(error = %e, "Unreadable execution context announcement"),
            }
        }
        drop(created);

        let _: Value = self
            .transport
            .send_typed(
                methods::DEBUGGER_SET_PAUSE_ON_EXCEPTIONS,
                &SetPauseOnExceptionsParams { state: self.config.pause_on_exceptions },
            )
            .await
            .map_err(|e| SessionError::configuration(methods::DEBUGGER_SET_PAUSE_ON_EXCEPTIONS, e))?;

        let breakpoint = self.session.breakpoint();
        let params = SetBreakpointByUrlParams {
            line_number: breakpoint.line,
            url: breakpoint.url.clone(),
            column_number: breakpoint.column,
        };
        let result: SetBreakpointByUrlResult = self
            .transport
            .send_typed(methods::DEBUGGER_SET_BREAKPOINT_BY_URL, &params)
            .await
            .map_err(|e| SessionError::configuration(methods::DEBUGGER_SET_BREAKPOINT_BY_URL, e))?;

        info!(
            id = %result.breakpoint_id,
            url = %params.url,
            line = params.line_number,
            resolved = result.locations.len(),
            "Breakpoint installed"
        );
        self.breakpoint_id = Some(result.breakpoint_id);
        Ok(())
    }

    async fn configure_step(&self, method: &'static str, params: Option<Value>) -> Result<Value, SessionError> {
        self.transport.send(method, params).await.map_err(|e| SessionError::configuration(method, e))
    }

    /// Run the scope analyzer once; later pauses reuse its result.
    fn discover(&mut self, pause: &PauseState) {
        if self.session.is_discovered() {
            return;
        }
        let cursor_line = self.session.breakpoint().line;
        let candidates = ScopeAnalyzer::new(self.program).analyze(pause.scope_start, cursor_line);
        self.session.set_candidates(candidates);
        info!(
            scope_line = pause.scope_start.line,
            scope_column = pause.scope_start.column,
            expressions = self.session.tracked().len(),
            "Tracking expressions"
        );
    }

    /// Evaluate every tracked expression on the top frame, one at a time, in discovery order.
    async fn evaluate_all(&mut self, pause: &PauseState) -> Result<(), SessionError> {
        let expressions: Vec<String> = self.session.tracked().expressions().map(str::to_string).collect();
        for expression in expressions {
            let record = self.evaluate(&pause.call_frame_id, &expression).await?;
            debug!(%expression, value = %record, "Evaluated");
            self.session.record(&expression, record);
        }
        Ok(())
    }

    async fn evaluate(&self, call_frame_id: &str, expression: &str) -> Result<ValueRecord, SessionError> {
        let params = EvaluateOnCallFrameParams {
            call_frame_id: call_frame_id.to_string(),
            expression: expression.to_string(),
            throw_on_side_effect: true,
            silent: true,
        };
        match self
            .transport
            .send_typed::<_, EvaluateOnCallFrameResult>(methods::DEBUGGER_EVALUATE_ON_CALL_FRAME, &params)
            .await
        {
            Ok(result) => Ok(value_record(&result)),
            // The debuggee refused this one evaluation; the loop goes on
            Err(error @ (TransportError::Protocol { .. } | TransportError::Decode { .. })) => {
                debug!(expression, %error, "Evaluation rejected");
                Ok(ValueRecord::undetermined())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Resume and wait for the acknowledgement.
    ///
    /// The waiters for what comes next are registered before the resume is
    /// sent so no event can slip in between.
    async fn resume(&mut self) -> Result<(EventWaiter, EventWaiter), SessionError> {
        let mut resumed = self.transport.wait_for_method(methods::DEBUGGER_RESUMED);
        let paused = self.transport.wait_for_method(methods::DEBUGGER_PAUSED);
        let destroyed = self.context_destroyed_waiter();

        self.transport.send(methods::DEBUGGER_RESUME, None).await?;
        resumed.recv().await?;
        trace!("Debuggee resumed");
        Ok((paused, destroyed))
    }

    /// Race the next pause against the end of the execution context.
    async fn next_event(
        &self,
        paused: &mut EventWaiter,
        destroyed: &mut EventWaiter,
    ) -> Result<LoopEvent, SessionError> {
        let race = async {
            let raced = tokio::select! {
                biased;
                message = paused.recv() => Raced::Paused(message),
                message = destroyed.recv() => Raced::Destroyed(message),
            };
            match raced {
                Raced::Paused(Ok(message)) => parse_paused(message),
                // An inspector may hang up right after reporting the context end
                Raced::Paused(Err(error)) => match destroyed.try_recv() {
                    Some(_) => Ok(LoopEvent::ContextDestroyed),
                    None => Err(error.into()),
                },
                Raced::Destroyed(message) => {
                    message.map(|_| LoopEvent::ContextDestroyed).map_err(SessionError::from)
                }
            }
        };
        match self.config.pause_timeout() {
            Some(timeout) => {
                time::timeout(timeout, race).await.map_err(|_| SessionError::PauseTimeout(timeout))?
            }
            None => race.await,
        }
    }

    /// One-shot waiter for the end of the session's execution context.
    fn context_destroyed_waiter(&self) -> EventWaiter {
        let context_id = self.session.execution_context_id();
        self.transport.subscribe(move |message| {
            let Some(notification) = message.as_notification() else {
                return false;
            };
            if notification.method != methods::RUNTIME_EXECUTION_CONTEXT_DESTROYED {
                return false;
            }
            match (context_id, notification.params_as::<ExecutionContextDestroyed>()) {
                (Some(expected), Ok(destroyed)) => destroyed.execution_context_id == expected,
                _ => true,
            }
        })
    }

    /// Forward debuggee chatter to the log while the engine runs.
    fn observe_debuggee(&self) -> Vec<SubscriptionId> {
        vec![
            self.transport.on(methods::DEBUGGER_SCRIPT_PARSED, |notification| {
                if let Ok(script) = notification.params_as::<ScriptParsed>() {
                    trace!(id = %script.script_id, url = %script.url, "Script parsed");
                }
            }),
            self.transport.on(methods::RUNTIME_CONSOLE_API_CALLED, |notification| {
                if let Ok(call) = notification.params_as::<ConsoleApiCalled>() {
                    debug!(target: DEBUGGEE_LOG_TARGET, kind = %call.kind, "{}", call.text());
                }
            }),
            self.transport.on(methods::RUNTIME_EXCEPTION_THROWN, |notification| {
                if let Ok(thrown) = notification.params_as::<ExceptionThrown>() {
                    let details = thrown.exception_details;
                    let description = details
                        .exception
                        .and_then(|exception| exception.description)
                        .unwrap_or(details.text);
                    warn!(target: DEBUGGEE_LOG_TARGET, line = details.line_number, "Uncaught exception: {description}");
                }
            }),
        ]
    }

    fn transition(&mut self, next: EngineState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from: self.state, to: next });
        }
        trace!(from = ?self.state, to = ?next, "Engine transition");
        self.state = next;
        if let Some(phase) = next.session_phase() {
            self.session.advance(phase)?;
        }
        Ok(())
    }
}

fn parse_paused(message: InboundMessage) -> Result<LoopEvent, SessionError> {
    let notification = message
        .into_notification()
        .ok_or_else(|| SessionError::Internal("pause waiter matched a response".into()))?;
    notification
        .params_as::<PausedEvent>()
        .map(LoopEvent::Paused)
        .map_err(|e| SessionError::Internal(format!("malformed pause notification: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluation(value: Value) -> EvaluateOnCallFrameResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_legal_transitions() {
        use EngineState::*;

        let path = [Idle, Configuring, WaitingForInitialPause, Evaluating, Resuming, WaitingForPause, Evaluating];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(WaitingForInitialPause.can_transition_to(Resuming));
        assert!(WaitingForPause.can_transition_to(Terminated));
        assert!(WaitingForInitialPause.can_transition_to(Terminated));
        for state in [Idle, Configuring, WaitingForInitialPause, Evaluating, Resuming, WaitingForPause] {
            assert!(state.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use EngineState::*;

        assert!(!Idle.can_transition_to(Evaluating));
        assert!(!Evaluating.can_transition_to(Terminated));
        assert!(!Resuming.can_transition_to(Evaluating));
        assert!(!Terminated.can_transition_to(Configuring));
        assert!(!Terminated.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Configuring.can_transition_to(Idle));
    }

    #[test]
    fn test_value_record_prefers_description() {
        let result = evaluation(json!({"result": {"type": "number", "value": 2, "description": "2"}}));
        assert_eq!(value_record(&result).as_str(), "2");

        let result = evaluation(json!({"result": {"type": "object", "className": "Object", "description": "Object"}}));
        assert_eq!(value_record(&result).as_str(), "Object");
    }

    #[test]
    fn test_value_record_falls_back_to_value() {
        let result = evaluation(json!({"result": {"type": "string", "value": "hello"}}));
        assert_eq!(value_record(&result).as_str(), "hello");

        let result = evaluation(json!({"result": {"type": "boolean", "value": false}}));
        assert_eq!(value_record(&result).as_str(), "false");

        let result = evaluation(json!({"result": {"type": "object", "subtype": "null", "value": null}}));
        assert_eq!(value_record(&result).as_str(), "null");

        let result = evaluation(json!({"result": {"type": "bigint", "unserializableValue": "10n"}}));
        assert_eq!(value_record(&result).as_str(), "10n");
    }

    #[test]
    fn test_value_record_undetermined() {
        let result = evaluation(json!({"result": {"type": "undefined"}}));
        assert!(value_record(&result).is_undetermined());

        let result = evaluation(json!({
            "result": {"type": "object", "subtype": "error", "description": "Error: getter failed"},
            "exceptionDetails": {"exceptionId": 1, "text": "Uncaught", "lineNumber": 0, "columnNumber": 0}
        }));
        assert!(value_record(&result).is_undetermined());
    }

    #[test]
    fn test_pause_state_from_event() {
        let event: PausedEvent = serde_json::from_value(json!({
            "reason": "other",
            "hitBreakpoints": ["1:2:0:file:///tmp/a.js"],
            "callFrames": [
                {
                    "callFrameId": "top",
                    "functionName": "f",
                    "location": {"scriptId": "1", "lineNumber": 2, "columnNumber": 2},
                    "scopeChain": [
                        {"type": "local", "object": {"type": "object"},
                         "startLocation": {"scriptId": "1", "lineNumber": 0, "columnNumber": 10}},
                        {"type": "global", "object": {"type": "object"}}
                    ]
                },
                {
                    "callFrameId": "caller",
                    "location": {"scriptId": "1", "lineNumber": 4, "columnNumber": 0},
                    "scopeChain": []
                }
            ]
        }))
        .unwrap();

        let pause = PauseState::from_event(&event).unwrap();
        assert_eq!(pause.call_frame_id, "top");
        assert_eq!(pause.scope_start, ScopeStart::new(0, 10));
        assert!(pause.hit(Some("1:2:0:file:///tmp/a.js")));
        assert!(!pause.hit(Some("other")));
        assert!(!pause.hit(None));
    }

    #[test]
    fn test_pause_without_frames_is_an_error() {
        let event: PausedEvent =
            serde_json::from_value(json!({"reason": "other", "callFrames": []})).unwrap();
        assert!(matches!(PauseState::from_event(&event), Err(SessionError::Internal(_))));
    }

    #[test]
    fn test_global_scope_pause_starts_at_origin() {
        let event: PausedEvent = serde_json::from_value(json!({
            "reason": "Break on start",
            "callFrames": [{
                "callFrameId": "top",
                "location": {"scriptId": "1", "lineNumber": 0, "columnNumber": 0},
                "scopeChain": [{"type": "global", "object": {"type": "object"}}]
            }]
        }))
        .unwrap();
        assert_eq!(PauseState::from_event(&event).unwrap().scope_start, ScopeStart::default());
    }
}

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

//! Trace sessions and their coordinator.
//!
//! A [`Session`] is one debug run: the file, the breakpoint line, the
//! execution context and the value histories collected so far. The
//! [`SessionCoordinator`] sequences the collaborators (parser, launcher)
//! and the engine components (transport, stepping engine) into one run,
//! and makes sure at most one run is active at a time.
//!
//! Trace delivery is all-or-nothing: a run that fails or is superseded
//! produces no records.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    analysis::{Candidate, SourceRange, TrackedExpressions, ValueRecord},
    ast::Program,
    config::EngineConfig,
    error::{ParseError, SessionError},
    launcher::{LaunchSpec, Launcher},
    parser::SourceParser,
    stepping::SteppingEngine,
    transport::Transport,
};

/// Lifecycle phase of a session. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Created, nothing sent yet
    Idle,
    /// Debugger being configured
    Configuring,
    /// At least one pause evaluated
    Tracing,
    /// Execution context ended normally
    Terminated,
    /// Ended by an error
    Failed,
}

impl SessionPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Configuring => 1,
            Self::Tracing => 2,
            Self::Terminated | Self::Failed => 3,
        }
    }

    /// Whether the session is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(self, next: Self) -> bool {
        self == next || (!self.is_terminal() && next.rank() >= self.rank())
    }
}

/// The session's single breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Script URL as the debuggee names it
    pub url: String,
    /// 0-based line
    pub line: u32,
    /// 0-based column, always 0
    pub column: u32,
}

impl Breakpoint {
    /// Breakpoint at the start of `line` (0-based) of `path`.
    pub fn at(path: &Path, line: u32) -> Self {
        Self { url: file_url(path), line, column: 0 }
    }
}

/// `file://` URL of a path, percent-encoded the way the debuggee names scripts.
///
/// A Windows path seen on another platform keeps its drive letter as the
/// first segment.
pub fn file_url(path: &Path) -> String {
    if let Ok(url) = Url::from_file_path(path) {
        return url.into();
    }
    let text = path.to_string_lossy().replace('\\', "/");
    let rooted = if text.starts_with('/') { text } else { format!("/{text}") };
    Url::from_file_path(&rooted).map(String::from).unwrap_or_else(|()| format!("file://{rooted}"))
}

/// What to trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    /// File holding the breakpoint and the analyzed source
    pub target_file: PathBuf,
    /// File handed to the interpreter
    pub entry_file: PathBuf,
    /// Working directory of the debuggee
    pub working_dir: PathBuf,
    /// 0-based cursor line
    pub line: u32,
}

impl TraceRequest {
    /// Trace `target_file` by running it directly from its own directory.
    pub fn new(target_file: impl Into<PathBuf>, line: u32) -> Self {
        let target_file = target_file.into();
        let working_dir = target_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { entry_file: target_file.clone(), target_file, working_dir, line }
    }

    /// Run `entry_file` instead of the target.
    pub fn with_entry(mut self, entry_file: impl Into<PathBuf>) -> Self {
        self.entry_file = entry_file.into();
        self
    }

    /// Run the debuggee from `working_dir`.
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }
}

/// State of one debug run.
#[derive(Debug)]
pub struct Session {
    id: u64,
    target_file: PathBuf,
    working_dir: PathBuf,
    breakpoint: Breakpoint,
    execution_context_id: Option<i64>,
    phase: SessionPhase,
    candidates: Option<Vec<Candidate>>,
    tracked: TrackedExpressions,
}

impl Session {
    /// Create an idle session with its breakpoint on `line` of `target_file`.
    pub fn new(id: u64, target_file: PathBuf, working_dir: PathBuf, line: u32) -> Self {
        let breakpoint = Breakpoint::at(&target_file, line);
        Self {
            id,
            target_file,
            working_dir,
            breakpoint,
            execution_context_id: None,
            phase: SessionPhase::Idle,
            candidates: None,
            tracked: TrackedExpressions::default(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Traced file.
    pub fn target_file(&self) -> &Path {
        &self.target_file
    }

    /// Working directory of the debuggee.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The session's breakpoint.
    pub fn breakpoint(&self) -> &Breakpoint {
        &self.breakpoint
    }

    /// Execution context reported by the debuggee, once known.
    pub fn execution_context_id(&self) -> Option<i64> {
        self.execution_context_id
    }

    pub(crate) fn set_execution_context_id(&mut self, id: i64) {
        self.execution_context_id = Some(id);
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move the lifecycle forward. Moving backwards, or out of a terminal phase, is an error.
    pub fn advance(&mut self, next: SessionPhase) -> Result<(), SessionError> {
        if !self.phase.can_advance_to(next) {
            return Err(SessionError::InvalidPhase { from: self.phase, to: next });
        }
        if self.phase != next {
            debug!(session = self.id, from = ?self.phase, to = ?next, "Session phase");
            self.phase = next;
        }
        Ok(())
    }

    /// Mark the session failed and discard what it collected. A terminated
    /// session stays terminated.
    pub fn fail(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = SessionPhase::Failed;
        self.candidates = None;
        self.tracked.clear();
    }

    /// Whether expression discovery already ran.
    pub fn is_discovered(&self) -> bool {
        self.candidates.is_some()
    }

    /// Discovered candidates, in discovery order.
    pub fn candidates(&self) -> &[Candidate] {
        self.candidates.as_deref().unwrap_or_default()
    }

    pub(crate) fn set_candidates(&mut self, candidates: Vec<Candidate>) {
        self.tracked = TrackedExpressions::from_candidates(&candidates);
        self.candidates = Some(candidates);
    }

    /// Value histories of the tracked expressions.
    pub fn tracked(&self) -> &TrackedExpressions {
        &self.tracked
    }

    pub(crate) fn record(&mut self, expression: &str, value: ValueRecord) {
        self.tracked.record(expression, value);
    }
}

/// One observed value at one source span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Rendered value
    pub message: String,
    /// Span of the expression the value belongs to
    pub range: SourceRange,
}

/// Full history of one expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionTrace {
    /// Expression text
    pub expression: String,
    /// Every span the expression was found at
    pub ranges: Vec<SourceRange>,
    /// Values in pause order
    pub values: Vec<ValueRecord>,
}

/// Outcome of a completed session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceResult {
    /// One record per (span, recorded value), spans in discovery order
    pub records: Vec<TraceRecord>,
    /// Histories grouped by expression
    pub expressions: Vec<ExpressionTrace>,
    /// Number of evaluated pauses
    pub pauses: usize,
}

impl TraceResult {
    /// A trace without any record.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the result of a finished session.
    pub fn from_session(session: &Session, pauses: usize) -> Self {
        let candidates = session.candidates();
        let tracked = session.tracked();

        let records = candidates
            .iter()
            .flat_map(|candidate| {
                tracked.history(&candidate.expression).unwrap_or_default().iter().map(|value| {
                    TraceRecord { message: value.to_string(), range: candidate.range }
                })
            })
            .collect();

        let expressions = tracked
            .iter()
            .map(|(expression, values)| ExpressionTrace {
                expression: expression.to_string(),
                ranges: candidates
                    .iter()
                    .filter(|candidate| candidate.expression == expression)
                    .map(|candidate| candidate.range)
                    .collect(),
                values: values.to_vec(),
            })
            .collect();

        Self { records, expressions, pauses }
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Handle on the run currently in flight.
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Clears the active slot and announces completion when a run ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
    id: u64,
    done: watch::Sender<bool>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|active| active.id == self.id) {
            *slot = None;
        }
        self.done.send_replace(true);
    }
}

/// Runs trace sessions, one at a time.
pub struct SessionCoordinator<L, P> {
    launcher: L,
    parser: P,
    config: EngineConfig,
    active: Mutex<Option<ActiveRun>>,
    next_id: AtomicU64,
}

impl<L: Launcher, P: SourceParser> SessionCoordinator<L, P> {
    /// Create a coordinator over the given collaborators.
    pub fn new(launcher: L, parser: P, config: EngineConfig) -> Self {
        Self { launcher, parser, config, active: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    /// The launcher sessions start their debuggee with.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a run is in flight.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Cancel the run in flight, if any. Returns whether there was one.
    pub fn cancel_active(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => {
                info!(session = active.id, "Cancelling active session");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Trace one request.
    ///
    /// A run already in flight is cancelled first, and this call waits
    /// until its debuggee and connection are gone.
    pub async fn run(&self, request: TraceRequest) -> Result<TraceResult, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let previous = self.active.lock().replace(ActiveRun { id, cancel: cancel.clone(), done: done_rx });
        let _guard = ActiveGuard { slot: &self.active, id, done: done_tx };

        if let Some(mut previous) = previous {
            info!(previous = previous.id, session = id, "Superseding active session");
            previous.cancel.cancel();
            let _ = previous.done.wait_for(|done| *done).await;
        }

        info!(
            session = id,
            target = %request.target_file.display(),
            entry = %request.entry_file.display(),
            line = request.line,
            "Starting trace session"
        );
        let result = self.execute(id, &request, &cancel).await;
        match &result {
            Ok(trace) => info!(session = id, records = trace.records.len(), pauses = trace.pauses, "Trace complete"),
            Err(error) => warn!(session = id, %error, "Trace failed"),
        }
        result
    }

    async fn execute(
        &self,
        id: u64,
        request: &TraceRequest,
        cancel: &CancellationToken,
    ) -> Result<TraceResult, SessionError> {
        let parsed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Superseded),
            parsed = self.parser.parse(&request.target_file) => parsed,
        };
        let program = match parsed {
            Ok(program) => program,
            Err(ParseError::Syntax { path, message }) => {
                warn!(file = %path.display(), %message, "Source does not parse, nothing to trace");
                return Ok(TraceResult::empty());
            }
            Err(error) => return Err(SessionError::Parser(error)),
        };

        let target_file = resolve(&request.target_file).await;
        let mut session = Session::new(id, target_file, request.working_dir.clone(), request.line);

        let spec = LaunchSpec {
            entry_file: request.entry_file.clone(),
            working_dir: request.working_dir.clone(),
        };
        let mut debuggee = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Superseded),
            launched = self.launcher.launch(&spec) => launched?,
        };

        let outcome = self.trace(&mut session, &program, debuggee.endpoint(), cancel).await;
        debuggee.shutdown(outcome.is_ok()).await;
        outcome
    }

    async fn trace(
        &self,
        session: &mut Session,
        program: &Program,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<TraceResult, SessionError> {
        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Superseded),
            connected = Transport::connect(endpoint, self.config.transport()) => connected?,
        };

        let outcome = async {
            let pauses = {
                let mut engine = SteppingEngine::new(&transport, session, program, &self.config);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(SessionError::Superseded),
                    pauses = engine.run() => pauses,
                }
            }?;
            self.settle(&transport, cancel).await?;
            Ok(TraceResult::from_session(session, pauses))
        }
        .await;

        if outcome.is_err() {
            session.fail();
        }
        transport.close().await;
        outcome
    }

    /// Give trailing notifications a chance to arrive before results are read.
    ///
    /// Best effort: ends after the settle delay or as soon as the connection closes.
    async fn settle(&self, transport: &Transport, cancel: &CancellationToken) -> Result<(), SessionError> {
        let delay = self.config.settle_delay();
        if delay.is_zero() {
            return Ok(());
        }
        debug!(?delay, "Settling before reading results");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Superseded),
            _ = transport.closed() => Ok(()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Absolute, symlink-free form of `path` as the debuggee reports script URLs.
async fn resolve(path: &Path) -> PathBuf {
    match tokio::fs::canonicalize(path).await {
        Ok(resolved) => resolved,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

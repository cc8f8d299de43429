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

//! A scripted V8 inspector.
//!
//! The mock answers the requests the stepping engine issues and replays a
//! fixed sequence of pauses. Every request it receives is kept so tests can
//! assert on what the engine sent.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<TcpStream>;

/// What `Debugger.evaluateOnCallFrame` answers for one expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// A result carrying this remote object
    Value(Value),
    /// The evaluation threw with this description
    Thrown(String),
    /// The request fails with a protocol error
    Rejected(String),
}

impl Evaluation {
    /// A number result.
    pub fn number(value: i64) -> Self {
        Self::Value(json!({"type": "number", "value": value, "description": value.to_string()}))
    }

    /// A string result.
    pub fn string(value: &str) -> Self {
        Self::Value(json!({"type": "string", "value": value}))
    }

    /// An object result.
    pub fn object(class_name: &str, description: &str) -> Self {
        Self::Value(json!({"type": "object", "className": class_name, "description": description}))
    }

    fn reply(&self) -> Result<Value, String> {
        match self {
            Self::Value(object) => Ok(json!({"result": object})),
            Self::Thrown(description) => Ok(json!({
                "result": {"type": "object", "subtype": "error", "className": "Error", "description": description},
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "lineNumber": 0,
                    "columnNumber": 0,
                    "exception": {"type": "object", "subtype": "error", "description": description}
                }
            })),
            Self::Rejected(message) => Err(message.clone()),
        }
    }
}

/// One pause the debuggee reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedPause {
    /// 0-based start of the innermost scope of the top frame
    pub scope_start: (u32, u32),
    /// Whether the pause reports the installed breakpoint as hit
    pub hit: bool,
    /// Answers by expression text; anything else evaluates to `undefined`
    pub values: Vec<(String, Evaluation)>,
}

impl ScriptedPause {
    /// A pause at the installed breakpoint.
    pub fn at_breakpoint(scope_line: u32, scope_column: u32) -> Self {
        Self { scope_start: (scope_line, scope_column), hit: true, values: Vec::new() }
    }

    /// The pause `--inspect-brk` makes on the first statement.
    pub fn entry() -> Self {
        Self::default()
    }

    /// Answer `expression` with `evaluation`.
    pub fn with(mut self, expression: &str, evaluation: Evaluation) -> Self {
        self.values.push((expression.to_string(), evaluation));
        self
    }

    fn evaluate(&self, expression: &str) -> Result<Value, String> {
        match self.values.iter().find(|(name, _)| name == expression) {
            Some((_, evaluation)) => evaluation.reply(),
            None => Ok(json!({"result": {"type": "undefined"}})),
        }
    }
}

/// Behaviour of a mock inspector session.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Id of the single execution context
    pub context_id: i64,
    /// Pauses in the order they happen
    pub pauses: Vec<ScriptedPause>,
    /// Fail `Debugger.setBreakpointByUrl` with this message
    pub breakpoint_error: Option<String>,
    /// Never pause and never end once started
    pub stall: bool,
    /// Close the socket right after the context is destroyed
    pub close_after_end: bool,
    /// Hang up without answering the first request for this method
    pub hang_up_on: Option<String>,
    /// Console output reported when the program starts
    pub console: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            context_id: 1,
            pauses: Vec::new(),
            breakpoint_error: None,
            stall: false,
            close_after_end: false,
            hang_up_on: None,
            console: Vec::new(),
        }
    }
}

impl Script {
    /// Entry pause followed by `pauses`.
    pub fn with_pauses(pauses: impl IntoIterator<Item = ScriptedPause>) -> Self {
        let mut script = Self { pauses: vec![ScriptedPause::entry()], ..Default::default() };
        script.pauses.extend(pauses);
        script
    }

    /// A debuggee that starts and then never reports anything.
    pub fn stalled() -> Self {
        Self { stall: true, ..Default::default() }
    }
}

/// A running mock inspector accepting one client.
pub struct MockInspector {
    endpoint: String,
    requests: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl MockInspector {
    /// Listen on a free local port and serve `script` to the first client.
    pub async fn start(script: Script) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let endpoint = format!("ws://{}/mock-inspector", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        let task = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            match tokio_tungstenite::accept_async(stream).await {
                Ok(socket) => Session::new(script, log).serve(socket).await,
                Err(e) => warn!(error = %e, "Mock inspector handshake failed"),
            }
        });

        Ok(Self { endpoint, requests, task })
    }

    /// Websocket URL to connect to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Params of every request for `method`.
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request["method"] == method)
            .map(|request| request["params"].clone())
            .collect()
    }

    /// Whether a request for `method` arrived.
    pub fn received(&self, method: &str) -> bool {
        self.requests.lock().iter().any(|request| request["method"] == method)
    }

    /// Wait until a request for `method` arrives, polling every few milliseconds.
    pub async fn wait_for_request(&self, method: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.received(method) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received(method)
    }
}

impl Drop for MockInspector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Session {
    script: Script,
    queue: VecDeque<ScriptedPause>,
    current: Option<ScriptedPause>,
    breakpoint_id: Option<String>,
    frames: usize,
    ended: bool,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Session {
    fn new(script: Script, requests: Arc<Mutex<Vec<Value>>>) -> Self {
        let queue = script.pauses.iter().cloned().collect();
        Self { script, queue, current: None, breakpoint_id: None, frames: 0, ended: false, requests }
    }

    async fn serve(mut self, mut socket: Socket) {
        while let Some(Ok(message)) = socket.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                continue;
            };
            self.requests.lock().push(request.clone());

            let method = request["method"].as_str().unwrap_or_default().to_string();
            debug!(%method, "Mock inspector request");
            if self.script.hang_up_on.as_deref() == Some(method.as_str()) {
                debug!(%method, "Mock inspector hanging up");
                let _ = socket.close(None).await;
                return;
            }
            let (before, reply, after) = self.handle(&method, &request["params"]);

            let response = match reply {
                Ok(result) => json!({"id": request["id"], "result": result}),
                Err(message) => json!({"id": request["id"], "error": {"code": -32000, "message": message}}),
            };
            for frame in before.into_iter().chain([response]).chain(after) {
                if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }

            if self.ended && self.script.close_after_end {
                let _ = socket.close(None).await;
                return;
            }
        }
    }

    /// Notifications sent before the response, the response, notifications sent after.
    fn handle(&mut self, method: &str, params: &Value) -> (Vec<Value>, Result<Value, String>, Vec<Value>) {
        let mut before = Vec::new();
        let mut after = Vec::new();
        let reply = match method {
            "Debugger.enable" => Ok(json!({"debuggerId": "mock-debugger"})),
            "Runtime.enable" => {
                before.push(notification(
                    "Runtime.executionContextCreated",
                    json!({"context": {"id": self.script.context_id, "origin": "", "name": "mock"}}),
                ));
                Ok(json!({}))
            }
            "Debugger.setPauseOnExceptions" => Ok(json!({})),
            "Debugger.setBreakpointByUrl" => match &self.script.breakpoint_error {
                Some(message) => Err(message.clone()),
                None => {
                    let id = format!("1:{}:0:{}", params["lineNumber"], params["url"].as_str().unwrap_or_default());
                    self.breakpoint_id = Some(id.clone());
                    Ok(json!({"breakpointId": id, "locations": []}))
                }
            },
            "Runtime.runIfWaitingForDebugger" => {
                after.extend(self.script.console.iter().map(|line| {
                    notification(
                        "Runtime.consoleAPICalled",
                        json!({"type": "log", "args": [{"type": "string", "value": line}]}),
                    )
                }));
                after.extend(self.advance());
                Ok(json!({}))
            }
            "Debugger.evaluateOnCallFrame" => match &self.current {
                Some(pause) => pause.evaluate(params["expression"].as_str().unwrap_or_default()),
                None => Err("Can only perform operation while paused.".into()),
            },
            "Debugger.resume" => {
                after.push(notification("Debugger.resumed", json!({})));
                after.extend(self.advance());
                Ok(json!({}))
            }
            _ => Err(format!("'{method}' wasn't found")),
        };
        (before, reply, after)
    }

    /// Report the next pause, or the end of the context when none is left.
    fn advance(&mut self) -> Option<Value> {
        self.current = None;
        if self.script.stall {
            return None;
        }
        match self.queue.pop_front() {
            Some(pause) => {
                self.frames += 1;
                let event = self.paused_event(&pause);
                self.current = Some(pause);
                Some(event)
            }
            None => {
                self.ended = true;
                Some(notification(
                    "Runtime.executionContextDestroyed",
                    json!({"executionContextId": self.script.context_id}),
                ))
            }
        }
    }

    fn paused_event(&self, pause: &ScriptedPause) -> Value {
        let (line, column) = pause.scope_start;
        let hit: Vec<&String> = self.breakpoint_id.iter().filter(|_| pause.hit).collect();
        let (reason, scope_kind) = if pause.hit { ("other", "local") } else { ("Break on start", "global") };
        notification(
            "Debugger.paused",
            json!({
                "reason": reason,
                "hitBreakpoints": hit,
                "callFrames": [{
                    "callFrameId": format!("frame-{}", self.frames),
                    "functionName": "",
                    "location": {"scriptId": "1", "lineNumber": line, "columnNumber": column},
                    "scopeChain": [
                        {
                            "type": scope_kind,
                            "object": {"type": "object"},
                            "startLocation": {"scriptId": "1", "lineNumber": line, "columnNumber": column}
                        }
                    ]
                }]
            }),
        )
    }
}

fn notification(method: &str, params: Value) -> Value {
    json!({"method": method, "params": params})
}

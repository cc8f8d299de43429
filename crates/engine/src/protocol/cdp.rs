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

//! Typed payloads of the inspector methods and events used by the engine.
//!
//! Only the fields the engine reads are modelled; unknown fields are ignored
//! so newer debuggees keep working.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Method and event names.
pub mod methods {
    /// Enables the debugger domain
    pub const DEBUGGER_ENABLE: &str = "Debugger.enable";
    /// Configures pausing on thrown exceptions
    pub const DEBUGGER_SET_PAUSE_ON_EXCEPTIONS: &str = "Debugger.setPauseOnExceptions";
    /// Installs a breakpoint by script URL
    pub const DEBUGGER_SET_BREAKPOINT_BY_URL: &str = "Debugger.setBreakpointByUrl";
    /// Resumes a paused debuggee
    pub const DEBUGGER_RESUME: &str = "Debugger.resume";
    /// Evaluates an expression on a paused call frame
    pub const DEBUGGER_EVALUATE_ON_CALL_FRAME: &str = "Debugger.evaluateOnCallFrame";
    /// Event: execution halted
    pub const DEBUGGER_PAUSED: &str = "Debugger.paused";
    /// Event: execution resumed
    pub const DEBUGGER_RESUMED: &str = "Debugger.resumed";
    /// Event: a script was compiled
    pub const DEBUGGER_SCRIPT_PARSED: &str = "Debugger.scriptParsed";
    /// Enables the runtime domain
    pub const RUNTIME_ENABLE: &str = "Runtime.enable";
    /// Releases a debuggee started halted
    pub const RUNTIME_RUN_IF_WAITING_FOR_DEBUGGER: &str = "Runtime.runIfWaitingForDebugger";
    /// Event: an execution context was created
    pub const RUNTIME_EXECUTION_CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
    /// Event: an execution context ended
    pub const RUNTIME_EXECUTION_CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";
    /// Event: the program called a console method
    pub const RUNTIME_CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
    /// Event: an exception was thrown and not caught
    pub const RUNTIME_EXCEPTION_THROWN: &str = "Runtime.exceptionThrown";
}

/// Deserialize a field so that an explicit `null` is kept as `Some(Value::Null)`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Position inside a script, 0-based line and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Script identifier
    #[serde(default)]
    pub script_id: String,
    /// 0-based line
    pub line_number: u32,
    /// 0-based column
    #[serde(default)]
    pub column_number: Option<u32>,
}

/// One entry of a call frame's scope chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope kind: `local`, `block`, `closure`, `global`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional scope name
    #[serde(default)]
    pub name: Option<String>,
    /// Where the scope's source range begins (absent for the global scope)
    #[serde(default)]
    pub start_location: Option<Location>,
    /// Where the scope's source range ends
    #[serde(default)]
    pub end_location: Option<Location>,
}

/// One frame of the paused call stack.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Identifier valid until the debuggee resumes
    pub call_frame_id: String,
    /// Name of the executing function (empty for top-level code)
    #[serde(default)]
    pub function_name: String,
    /// Current location
    pub location: Location,
    /// Script URL
    #[serde(default)]
    pub url: Option<String>,
    /// Scopes, innermost first
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
}

/// Parameters of `Debugger.paused`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    /// Call stack, innermost first
    pub call_frames: Vec<CallFrame>,
    /// Why execution halted
    #[serde(default)]
    pub reason: String,
    /// Breakpoints that caused the pause
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

/// When the debuggee should pause on thrown exceptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseOnExceptions {
    /// Never
    None,
    /// Only exceptions that are caught
    Caught,
    /// Only exceptions nothing catches
    #[default]
    Uncaught,
    /// Every exception
    All,
}

/// Parameters of `Debugger.setPauseOnExceptions`.
#[derive(Debug, Clone, Serialize)]
pub struct SetPauseOnExceptionsParams {
    /// Requested mode
    pub state: PauseOnExceptions,
}

/// Parameters of `Debugger.setBreakpointByUrl`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointByUrlParams {
    /// 0-based line
    pub line_number: u32,
    /// Script URL
    pub url: String,
    /// 0-based column
    pub column_number: u32,
}

/// Result of `Debugger.setBreakpointByUrl`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointByUrlResult {
    /// Identifier reported back in `hitBreakpoints`
    pub breakpoint_id: String,
    /// Locations already resolved
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// Parameters of `Debugger.evaluateOnCallFrame`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOnCallFrameParams {
    /// Frame to evaluate on
    pub call_frame_id: String,
    /// Source text to evaluate
    pub expression: String,
    /// Abort instead of running code with observable side effects
    pub throw_on_side_effect: bool,
    /// Do not pause on exceptions thrown by the evaluation
    pub silent: bool,
}

/// Mirror object describing a debuggee value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Value type: `object`, `number`, `string`, `undefined`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Object subtype: `null`, `array`, `error`, ...
    #[serde(default)]
    pub subtype: Option<String>,
    /// Constructor name for objects
    #[serde(default)]
    pub class_name: Option<String>,
    /// Primitive value (an explicit `null` is preserved)
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
    /// String form of values JSON cannot carry (`NaN`, `-0`, bigints)
    #[serde(default)]
    pub unserializable_value: Option<String>,
    /// Human readable rendering
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteObject {
    /// Scalar rendering of the value: description, then primitive value, then
    /// the unserializable form. `None` when the object offers none of them.
    pub fn display_value(&self) -> Option<String> {
        if let Some(description) = &self.description {
            return Some(description.clone());
        }
        match &self.value {
            Some(Value::String(text)) => return Some(text.clone()),
            Some(value) => return Some(value.to_string()),
            None => {}
        }
        self.unserializable_value.clone()
    }
}

/// Details of an exception thrown by the debuggee or by an evaluation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Short description
    #[serde(default)]
    pub text: String,
    /// 0-based line
    #[serde(default)]
    pub line_number: u32,
    /// 0-based column
    #[serde(default)]
    pub column_number: u32,
    /// The thrown value
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// Result of `Debugger.evaluateOnCallFrame`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOnCallFrameResult {
    /// Evaluation result (the thrown value when the evaluation threw)
    pub result: RemoteObject,
    /// Present when the evaluation threw
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// Description of an execution context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    /// Context id
    pub id: i64,
    /// Origin of the context
    #[serde(default)]
    pub origin: String,
    /// Human readable name
    #[serde(default)]
    pub name: String,
}

/// Parameters of `Runtime.executionContextCreated`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionContextCreated {
    /// The new context
    pub context: ExecutionContextDescription,
}

/// Parameters of `Runtime.executionContextDestroyed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyed {
    /// Id of the context that ended
    pub execution_context_id: i64,
}

/// Parameters of `Debugger.scriptParsed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsed {
    /// Script identifier
    pub script_id: String,
    /// Script URL (empty for eval'd code)
    #[serde(default)]
    pub url: String,
}

/// Parameters of `Runtime.exceptionThrown`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
    /// What was thrown and where
    pub exception_details: ExceptionDetails,
}

/// Parameters of `Runtime.consoleAPICalled`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    /// Console method: `log`, `warn`, `error`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Call arguments
    #[serde(default)]
    pub args: Vec<RemoteObject>,
}

impl ConsoleApiCalled {
    /// Arguments rendered and joined by spaces, the way a console prints them.
    pub fn text(&self) -> String {
        self.args
            .iter()
            .map(|arg| arg.display_value().unwrap_or_else(|| arg.kind.clone()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

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

//! Error taxonomy of the debug-session engine.
//!
//! Every fallible component has its own error enum so callers can tell a
//! refused connection from a protocol-level rejection or a launcher problem.
//! [`SessionError`] is what the session coordinator surfaces to its caller.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{protocol::ProtocolErrorBody, session::SessionPhase, stepping::EngineState};

/// Failures of the inspector connection and of individual requests.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The websocket handshake with the debuggee failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// Endpoint we tried to reach
        endpoint: String,
        /// Underlying failure
        reason: String,
    },
    /// The connection went away while the operation was outstanding.
    #[error("connection closed")]
    ConnectionClosed,
    /// No response arrived within the configured bound.
    #[error("request {method} (id {id}) timed out after {timeout:?}")]
    Timeout {
        /// Method of the request
        method: String,
        /// Request id
        id: u64,
        /// The bound that elapsed
        timeout: Duration,
    },
    /// The debuggee answered the request with an error object.
    #[error("{method} failed with code {code}: {message}")]
    Protocol {
        /// Method of the failed request
        method: String,
        /// Error code reported by the debuggee
        code: i64,
        /// Error message reported by the debuggee
        message: String,
    },
    /// Outbound payload could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    /// A response payload did not have the expected shape.
    #[error("failed to decode {method} result: {source}")]
    Decode {
        /// Method whose result was malformed
        method: String,
        /// Underlying serde failure
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Build a protocol error from the body the debuggee sent.
    pub fn protocol(method: impl Into<String>, body: ProtocolErrorBody) -> Self {
        Self::Protocol { method: method.into(), code: body.code, message: body.message }
    }

    /// Whether the debuggee itself rejected the request (as opposed to a transport failure).
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Failures converting a parser's JSON output into the typed syntax tree.
#[derive(Debug, Error)]
pub enum AstError {
    /// The input is not valid JSON.
    #[error("invalid syntax tree JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A node object has no string `type` field.
    #[error("node without a type at {path}")]
    MissingType {
        /// JSON path of the offending object
        path: String,
    },
    /// A node that the analyzer needs positions for has no `loc`.
    #[error("{kind} node at {path} has no source location (was the parser asked for locations?)")]
    MissingLocation {
        /// Node type
        kind: String,
        /// JSON path of the offending node
        path: String,
    },
    /// A required field is absent or has the wrong shape.
    #[error("{kind} node at {path} has an invalid `{field}` field")]
    InvalidField {
        /// Node type
        kind: String,
        /// Field name
        field: &'static str,
        /// JSON path of the offending node
        path: String,
    },
}

/// Failures of the parsing collaborator.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The parser ran but rejected the source.
    #[error("{path} could not be parsed: {message}")]
    Syntax {
        /// Parsed file
        path: PathBuf,
        /// Parser diagnostic
        message: String,
    },
    /// A file the parser needs could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File we tried to read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
    /// The parser could not be run at all.
    #[error("parser unavailable: {0}")]
    Unavailable(String),
    /// The parser produced output we could not interpret.
    #[error("parser produced an unusable syntax tree: {0}")]
    Ast(#[from] AstError),
}

/// Failures of the launching collaborator.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The debuggee process could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program we tried to run
        program: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
    /// The debuggee's diagnostic stream ended without announcing an endpoint.
    #[error("debuggee exited or closed its output without reporting an inspector endpoint")]
    NoEndpoint,
    /// The endpoint did not show up in time.
    #[error("debuggee did not report an inspector endpoint within {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by a trace session to its caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The debuggee could not be started.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// The source could not be handed to the parser.
    #[error(transparent)]
    Parser(ParseError),
    /// The inspector connection failed on the critical path.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A mandatory configuration request was rejected.
    #[error("debugger configuration failed at {step}: {source}")]
    Configuration {
        /// Configuration step that failed
        step: &'static str,
        /// Underlying failure
        #[source]
        source: TransportError,
    },
    /// The stepping engine attempted an illegal state change.
    #[error("illegal engine transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state
        from: EngineState,
        /// Requested state
        to: EngineState,
    },
    /// The session lifecycle attempted to move backwards.
    #[error("illegal session phase change from {from:?} to {to:?}")]
    InvalidPhase {
        /// Current phase
        from: SessionPhase,
        /// Requested phase
        to: SessionPhase,
    },
    /// A newer session (or an explicit cancel) replaced this one.
    #[error("session was superseded before it finished")]
    Superseded,
    /// The debuggee did not reach the next pause or context end in time.
    #[error("no pause or context end within {0:?}")]
    PauseTimeout(Duration),
    /// Protocol data violated an assumption the engine relies on.
    #[error("unexpected debuggee state: {0}")]
    Internal(String),
}

impl SessionError {
    /// Wrap a configuration failure with the step it happened in.
    pub fn configuration(step: &'static str, source: TransportError) -> Self {
        Self::Configuration { step, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_message_carries_code_and_message() {
        let err = TransportError::protocol(
            "Debugger.setBreakpointByUrl",
            ProtocolErrorBody { code: -32000, message: "Breakpoint at specified location already exists.".into(), data: None },
        );
        assert!(err.is_protocol());
        let text = err.to_string();
        assert!(text.contains("-32000"));
        assert!(text.contains("already exists"));
        assert!(text.contains("Debugger.setBreakpointByUrl"));
    }

    #[test]
    fn test_configuration_error_names_step() {
        let err = SessionError::configuration("Debugger.enable", TransportError::ConnectionClosed);
        assert_eq!(err.to_string(), "debugger configuration failed at Debugger.enable: connection closed");
    }
}

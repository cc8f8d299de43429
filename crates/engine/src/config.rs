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

//! Configuration of the engine and its default collaborators.
//!
//! All structs deserialize with defaults for missing fields so partial TOML
//! tables are accepted. Durations are stored as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{protocol::cdp::PauseOnExceptions, transport::TransportConfig};

/// Settings of the stepping engine and session coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound for a single request/response round-trip
    pub request_timeout_ms: u64,
    /// Delay after the execution context ended before results are read
    pub settle_delay_ms: u64,
    /// Bound for each wait on the next pause or the context end, `None` for unbounded
    pub pause_timeout_ms: Option<u64>,
    /// Resume the entry pause without evaluating unless it is our breakpoint
    pub skip_entry_pause: bool,
    /// Exception pausing mode installed during configuration
    pub pause_on_exceptions: PauseOnExceptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            settle_delay_ms: 2_000,
            pause_timeout_ms: None,
            skip_entry_pause: true,
            pause_on_exceptions: PauseOnExceptions::Uncaught,
        }
    }
}

impl EngineConfig {
    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the settle delay applied after the execution context ends
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = duration_ms(delay);
        self
    }

    /// Bound each wait for the next pause
    pub fn with_pause_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pause_timeout_ms = timeout.map(duration_ms);
        self
    }

    /// Enable or disable skipping of the entry pause
    pub fn with_skip_entry_pause(mut self, skip: bool) -> Self {
        self.skip_entry_pause = skip;
        self
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Settle delay
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Bound for each pause wait, if any
    pub fn pause_timeout(&self) -> Option<Duration> {
        self.pause_timeout_ms.map(Duration::from_millis)
    }

    /// Transport settings derived from this configuration.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: (self.request_timeout_ms > 0).then(|| self.request_timeout()),
        }
    }
}

/// Settings of [`NodeLauncher`](crate::launcher::NodeLauncher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Interpreter executable
    pub node_binary: String,
    /// Host the inspector listens on
    pub inspect_host: String,
    /// Port the inspector listens on, 0 for any free port
    pub inspect_port: u16,
    /// Arguments appended after the entry file
    pub script_args: Vec<String>,
    /// How long to wait for the inspector endpoint to be announced
    pub launch_timeout_ms: u64,
    /// How long a finished debuggee may take to exit before it is killed
    pub exit_grace_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".into(),
            inspect_host: "127.0.0.1".into(),
            inspect_port: 0,
            script_args: vec!["--vtrace".into()],
            launch_timeout_ms: 10_000,
            exit_grace_ms: 1_000,
        }
    }
}

impl LauncherConfig {
    /// Set the interpreter executable
    pub fn with_node_binary(mut self, binary: impl Into<String>) -> Self {
        self.node_binary = binary.into();
        self
    }

    /// The `--inspect-brk` flag for the configured address.
    pub fn inspect_flag(&self) -> String {
        format!("--inspect-brk={}:{}", self.inspect_host, self.inspect_port)
    }

    /// Bound for the endpoint announcement
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    /// Grace period for a finished debuggee
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

/// Settings of [`CommandParser`](crate::parser::CommandParser).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Program and leading arguments; the source path is appended
    pub command: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            command: ["acorn", "--ecma2022", "--locations", "--allow-hash-bang"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

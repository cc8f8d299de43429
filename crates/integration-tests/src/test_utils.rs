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

//! Test utilities for integration tests

use std::{collections::VecDeque, path::Path, time::Duration};

use parking_lot::Mutex;
use vtrace_engine::{
    Debuggee, EngineConfig, LaunchError, LaunchSpec, Launcher, ParseError, Program, SourceParser,
};

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test binary
    pub fn init_test_environment() {
        vtrace_common::logging::ensure_test_logging(None);
    }
}

/// Engine settings suited to mock sessions: no settle delay, short request timeout.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig::default().with_settle_delay(Duration::ZERO).with_request_timeout(Duration::from_secs(5))
}

/// Hands out pre-arranged inspector endpoints, one per launch.
#[derive(Debug, Default)]
pub struct StaticLauncher {
    endpoints: Mutex<VecDeque<String>>,
    launches: Mutex<Vec<LaunchSpec>>,
}

impl StaticLauncher {
    /// Serve `endpoints` in order; launching past the last one fails.
    pub fn new(endpoints: impl IntoIterator<Item = String>) -> Self {
        Self { endpoints: Mutex::new(endpoints.into_iter().collect()), launches: Mutex::default() }
    }

    /// Every launch request received so far.
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().clone()
    }
}

impl Launcher for StaticLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Debuggee, LaunchError> {
        self.launches.lock().push(spec.clone());
        let endpoint = self.endpoints.lock().pop_front().ok_or(LaunchError::NoEndpoint)?;
        Ok(Debuggee::attached(endpoint))
    }
}

/// Returns a fixed program, or a fixed syntax error, for every source.
#[derive(Debug, Clone)]
pub struct StaticParser {
    outcome: Result<Program, String>,
}

impl StaticParser {
    /// Always parse to `program`.
    pub fn program(program: Program) -> Self {
        Self { outcome: Ok(program) }
    }

    /// Always reject the source with `message`.
    pub fn syntax_error(message: &str) -> Self {
        Self { outcome: Err(message.to_string()) }
    }
}

impl SourceParser for StaticParser {
    async fn parse(&self, path: &Path) -> Result<Program, ParseError> {
        match &self.outcome {
            Ok(program) => Ok(program.clone()),
            Err(message) => Err(ParseError::Syntax { path: path.to_path_buf(), message: message.clone() }),
        }
    }
}

/// Syntax tree fixtures
pub mod fixtures {
    use vtrace_engine::Program;

    /// Source of [`function_program`]
    pub const FUNCTION_SOURCE: &str = "function f(x) {\n  let y = x + 1;\n  return y;\n}\nf(1);\n";

    /// ESTree of [`FUNCTION_SOURCE`] with the locations an ESTree parser reports
    pub const FUNCTION_TREE: &str = r#"{
      "type": "Program",
      "loc": {"start": {"line": 1, "column": 0}, "end": {"line": 5, "column": 5}},
      "body": [
        {
          "type": "FunctionDeclaration",
          "loc": {"start": {"line": 1, "column": 0}, "end": {"line": 4, "column": 1}},
          "id": {"type": "Identifier", "name": "f", "loc": {"start": {"line": 1, "column": 9}, "end": {"line": 1, "column": 10}}},
          "params": [
            {"type": "Identifier", "name": "x", "loc": {"start": {"line": 1, "column": 11}, "end": {"line": 1, "column": 12}}}
          ],
          "body": {
            "type": "BlockStatement",
            "loc": {"start": {"line": 1, "column": 14}, "end": {"line": 4, "column": 1}},
            "body": [
              {
                "type": "VariableDeclaration",
                "kind": "let",
                "loc": {"start": {"line": 2, "column": 2}, "end": {"line": 2, "column": 16}},
                "declarations": [{
                  "type": "VariableDeclarator",
                  "loc": {"start": {"line": 2, "column": 6}, "end": {"line": 2, "column": 15}},
                  "id": {"type": "Identifier", "name": "y", "loc": {"start": {"line": 2, "column": 6}, "end": {"line": 2, "column": 7}}},
                  "init": {
                    "type": "BinaryExpression",
                    "operator": "+",
                    "loc": {"start": {"line": 2, "column": 10}, "end": {"line": 2, "column": 15}},
                    "left": {"type": "Identifier", "name": "x", "loc": {"start": {"line": 2, "column": 10}, "end": {"line": 2, "column": 11}}},
                    "right": {"type": "Literal", "value": 1, "raw": "1", "loc": {"start": {"line": 2, "column": 14}, "end": {"line": 2, "column": 15}}}
                  }
                }]
              },
              {
                "type": "ReturnStatement",
                "loc": {"start": {"line": 3, "column": 2}, "end": {"line": 3, "column": 11}},
                "argument": {"type": "Identifier", "name": "y", "loc": {"start": {"line": 3, "column": 9}, "end": {"line": 3, "column": 10}}}
              }
            ]
          }
        },
        {
          "type": "ExpressionStatement",
          "loc": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 5}},
          "expression": {
            "type": "CallExpression",
            "loc": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 4}},
            "callee": {"type": "Identifier", "name": "f", "loc": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 1}}},
            "arguments": [{"type": "Literal", "value": 1, "raw": "1", "loc": {"start": {"line": 5, "column": 2}, "end": {"line": 5, "column": 3}}}]
          }
        }
      ]
    }"#;

    /// Parsed [`FUNCTION_TREE`]
    pub fn function_program() -> Program {
        Program::from_estree_str(FUNCTION_TREE).expect("fixture tree is valid")
    }
}

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

//! Source parsing collaborators.
//!
//! The engine does not parse JavaScript itself. A [`SourceParser`] turns a
//! file into a [`Program`]: [`CommandParser`] runs an external ESTree parser
//! and [`EstreeFileParser`] loads a syntax tree produced ahead of time.

use std::{
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::{ast::Program, config::ParserConfig, error::ParseError};

/// Produces the syntax tree of a source file.
pub trait SourceParser: Send + Sync {
    /// Parse `path`.
    ///
    /// A source the parser rejects is a [`ParseError::Syntax`]; a parser that
    /// cannot be run at all is a [`ParseError::Unavailable`].
    fn parse(&self, path: &Path) -> impl Future<Output = Result<Program, ParseError>> + Send;
}

/// Runs an external parser that prints ESTree JSON with locations on stdout.
#[derive(Debug, Clone, Default)]
pub struct CommandParser {
    config: ParserConfig,
}

impl CommandParser {
    /// Create a parser running the configured command.
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }
}

impl SourceParser for CommandParser {
    async fn parse(&self, path: &Path) -> Result<Program, ParseError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|source| ParseError::Read { path: path.to_path_buf(), source })?;

        let Some((program, args)) = self.config.command.split_first() else {
            return Err(ParseError::Unavailable("parser command is empty".into()));
        };
        debug!(parser = %program, file = %path.display(), "Parsing source");

        let output = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ParseError::Unavailable(format!("{program}: {e}")))?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if output.status.code() == Some(1) && is_syntax_diagnostic(&message) {
                return Err(ParseError::Syntax { path: path.to_path_buf(), message });
            }
            return Err(ParseError::Unavailable(format!("{program} failed ({}): {message}", output.status)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(Program::from_estree_str(&text)?)
    }
}

/// Location-bearing messages of acorn (`(1:4)`) and esprima (`Line 1:`), or a `SyntaxError`.
static SYNTAX_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(\d+:\d+\)|\bline \d+\b|syntax ?error|unexpected (token|character|end)")
        .expect("diagnostic pattern is valid")
});

/// Whether parser output reports a problem in the source rather than in the parser.
fn is_syntax_diagnostic(stderr: &str) -> bool {
    SYNTAX_DIAGNOSTIC.is_match(stderr)
}

/// Loads a pre-computed ESTree JSON document instead of parsing.
#[derive(Debug, Clone)]
pub struct EstreeFileParser {
    ast_path: PathBuf,
}

impl EstreeFileParser {
    /// Serve the tree stored at `ast_path` for any source.
    pub fn new(ast_path: impl Into<PathBuf>) -> Self {
        Self { ast_path: ast_path.into() }
    }
}

impl SourceParser for EstreeFileParser {
    async fn parse(&self, path: &Path) -> Result<Program, ParseError> {
        debug!(file = %path.display(), ast = %self.ast_path.display(), "Loading syntax tree");
        let text = tokio::fs::read_to_string(&self.ast_path)
            .await
            .map_err(|source| ParseError::Read { path: self.ast_path.clone(), source })?;
        Ok(Program::from_estree_str(&text)?)
    }
}

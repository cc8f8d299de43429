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

//! Candidate expression discovery.
//!
//! A node is a candidate when it is an identifier or a member access that
//! starts inside the paused lexical scope and ends on a line strictly before
//! the cursor line. Identifiers and member accesses are leaves of the walk,
//! so `a.b.c` yields the single candidate `a.b.c` and never `a.b` or `a`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    ast::{Node, Program, SourceLocation},
    protocol::cdp::Location,
};

/// Start of the innermost lexical scope at a pause, 0-based line and column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeStart {
    /// 0-based line
    pub line: u32,
    /// 0-based column
    pub column: u32,
}

impl ScopeStart {
    /// Create a scope start.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Scope start as reported by the debuggee. The global scope reports no
    /// location and starts at the top of the file.
    pub fn from_location(location: Option<&Location>) -> Self {
        location
            .map(|location| Self::new(location.line_number, location.column_number.unwrap_or(0)))
            .unwrap_or_default()
    }
}

/// Source span in editor convention: 0-based lines and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    /// 0-based start line
    pub start_line: u32,
    /// 0-based start column
    pub start_column: u32,
    /// 0-based end line
    pub end_line: u32,
    /// 0-based end column
    pub end_column: u32,
}

impl From<SourceLocation> for SourceRange {
    fn from(loc: SourceLocation) -> Self {
        Self {
            start_line: loc.start.line.saturating_sub(1),
            start_column: loc.start.column,
            end_line: loc.end.line.saturating_sub(1),
            end_column: loc.end.column,
        }
    }
}

/// An expression worth sampling at every pause, with the span it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Rendered source text
    pub expression: String,
    /// Where the expression occurs
    pub range: SourceRange,
}

/// Render an identifier, member access or literal back to source text.
///
/// Any other node renders as the empty string.
pub fn render_expression(node: &Node) -> String {
    match node {
        Node::Identifier { name, .. } => name.clone(),
        Node::Literal { value, .. } => value.to_string(),
        Node::MemberExpression { object, property, computed, .. } => {
            let object = render_expression(object);
            let property = render_expression(property);
            if *computed {
                format!("{object}[{property}]")
            } else {
                format!("{object}.{property}")
            }
        }
        Node::Other { .. } => String::new(),
    }
}

/// Walks a program looking for candidates.
#[derive(Debug, Clone, Copy)]
pub struct ScopeAnalyzer<'a> {
    program: &'a Program,
}

impl<'a> ScopeAnalyzer<'a> {
    /// Create an analyzer over a parsed program.
    pub fn new(program: &'a Program) -> Self {
        Self { program }
    }

    /// Candidates visible from `scope` on lines before `cursor_line` (0-based),
    /// in pre-order source order.
    pub fn analyze(&self, scope: ScopeStart, cursor_line: u32) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut stack = vec![self.program.root()];

        while let Some(node) = stack.pop() {
            match node {
                Node::Identifier { loc, .. } | Node::MemberExpression { loc, .. } => {
                    if qualifies(loc, scope, cursor_line) {
                        candidates.push(Candidate {
                            expression: render_expression(node),
                            range: SourceRange::from(*loc),
                        });
                    }
                }
                Node::Literal { .. } => {}
                Node::Other { children, .. } => stack.extend(children.iter().rev()),
            }
        }

        debug!(
            scope_line = scope.line,
            scope_column = scope.column,
            cursor_line,
            count = candidates.len(),
            "Discovered candidate expressions"
        );
        candidates
    }
}

fn qualifies(loc: &SourceLocation, scope: ScopeStart, cursor_line: u32) -> bool {
    let start_line = loc.start.line.saturating_sub(1);
    let end_line = loc.end.line.saturating_sub(1);
    let after_scope_start =
        start_line > scope.line || (start_line == scope.line && loc.start.column >= scope.column);
    after_scope_start && end_line < cursor_line
}

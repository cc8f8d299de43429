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

//! Typed syntax tree of a JavaScript source file.
//!
//! The parser collaborator produces a standard ESTree document. The engine
//! only cares about three kinds of nodes (identifiers, member accesses and
//! literals); everything else is kept as an opaque [`Node::Other`] that
//! preserves its children so the scope analyzer can walk through it.
//!
//! Positions follow the ESTree convention: 1-based lines, 0-based columns.

mod estree;

use std::fmt;

use serde::Deserialize;

use crate::error::AstError;

/// A point in the source, 1-based line and 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// 1-based line
    pub line: u32,
    /// 0-based column
    pub column: u32,
}

impl Position {
    /// Create a position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Source span of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// First character of the node
    pub start: Position,
    /// One past the last character of the node
    pub end: Position,
}

impl SourceLocation {
    /// Create a location from its two ends.
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Value of a literal node.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// `'text'`
    String(String),
    /// `42`, `1.5`
    Number(f64),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// `/pattern/flags`
    RegExp {
        /// Body of the expression
        pattern: String,
        /// Flags such as `gi`
        flags: String,
    },
    /// `10n`, kept as its decimal digits
    BigInt(String),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Number(number) => {
                if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e21 {
                    write!(f, "{number:.0}")
                } else {
                    write!(f, "{number}")
                }
            }
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Null => f.write_str("null"),
            Self::RegExp { pattern, flags } => write!(f, "/{pattern}/{flags}"),
            Self::BigInt(digits) => f.write_str(digits),
        }
    }
}

/// A syntax tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A bare name such as `x`
    Identifier {
        /// The name
        name: String,
        /// Source span
        loc: SourceLocation,
    },
    /// `object.property` or `object[property]`
    MemberExpression {
        /// Accessed object
        object: Box<Node>,
        /// Accessed property
        property: Box<Node>,
        /// Whether bracket notation is used
        computed: bool,
        /// Source span
        loc: SourceLocation,
    },
    /// A literal value
    Literal {
        /// The value
        value: LiteralValue,
        /// Source span, if the parser reported one
        loc: Option<SourceLocation>,
    },
    /// Any other node, reduced to its children
    Other {
        /// ESTree `type`
        kind: String,
        /// Source span, if the parser reported one
        loc: Option<SourceLocation>,
        /// Child nodes in source field order
        children: Vec<Node>,
    },
}

impl Node {
    /// Convert an ESTree JSON node.
    pub fn from_estree(value: &serde_json::Value) -> Result<Self, AstError> {
        estree::convert(value, "$")
    }

    /// ESTree type name of the node.
    pub fn kind(&self) -> &str {
        match self {
            Self::Identifier { .. } => "Identifier",
            Self::MemberExpression { .. } => "MemberExpression",
            Self::Literal { .. } => "Literal",
            Self::Other { kind, .. } => kind,
        }
    }

    /// Source span of the node, if known.
    pub fn loc(&self) -> Option<SourceLocation> {
        match self {
            Self::Identifier { loc, .. } | Self::MemberExpression { loc, .. } => Some(*loc),
            Self::Literal { loc, .. } | Self::Other { loc, .. } => *loc,
        }
    }

    /// Direct children, in source field order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Self::Identifier { .. } | Self::Literal { .. } => Vec::new(),
            Self::MemberExpression { object, property, .. } => vec![object.as_ref(), property.as_ref()],
            Self::Other { children, .. } => children.iter().collect(),
        }
    }
}

/// The root of a parsed file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    root: Node,
}

impl Program {
    /// Wrap an already converted root node.
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Parse ESTree JSON text into a program.
    ///
    /// Nesting depth is unbounded: deeply nested expressions are valid source,
    /// so the stack grows on demand instead of hitting a recursion limit.
    pub fn from_estree_str(text: &str) -> Result<Self, AstError> {
        let mut json = serde_json::Deserializer::from_str(text);
        json.disable_recursion_limit();
        let value = serde_json::Value::deserialize(serde_stacker::Deserializer::new(&mut json))?;
        json.end()?;
        Ok(Self::new(Node::from_estree(&value)?))
    }

    /// Root node (normally of kind `Program`).
    pub fn root(&self) -> &Node {
        &self.root
    }
}

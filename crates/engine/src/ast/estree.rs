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

//! ESTree JSON → [`Node`] conversion.
//!
//! Understands the output of acorn (`--locations`) and esprima (`loc: true`).

use serde_json::{Map, Value};

use super::{LiteralValue, Node, Position, SourceLocation};
use crate::error::AstError;

/// Fields that never hold child nodes.
const SKIPPED_FIELDS: [&str; 5] = ["type", "loc", "range", "start", "end"];

/// Work left while converting a tree.
///
/// Nodes are built bottom-up on an explicit stack so arbitrarily deep trees
/// convert without recursion.
enum Task<'a> {
    /// Convert one typed node and push it on the output stack
    Visit(&'a Value, String),
    /// Pop property then object and build a member expression
    Member(&'a Map<String, Value>, String),
    /// Pop this many children and build an opaque node
    Other(&'a Map<String, Value>, &'a str, String, usize),
}

pub(super) fn convert(value: &Value, path: &str) -> Result<Node, AstError> {
    let mut tasks = vec![Task::Visit(value, path.to_string())];
    let mut built: Vec<Node> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(value, path) => visit(value, path, &mut tasks, &mut built)?,
            Task::Member(object, path) => {
                let kind = "MemberExpression";
                let property = built.pop().ok_or_else(|| invalid(kind, "property", &path))?;
                let object_node = built.pop().ok_or_else(|| invalid(kind, "object", &path))?;
                built.push(Node::MemberExpression {
                    object: Box::new(object_node),
                    property: Box::new(property),
                    computed: object.get("computed").and_then(Value::as_bool).unwrap_or(false),
                    loc: required_loc(object, kind, &path)?,
                });
            }
            Task::Other(object, kind, path, count) => {
                let children = built.split_off(built.len().saturating_sub(count));
                built.push(Node::Other {
                    kind: kind.to_string(),
                    loc: optional_loc(object, kind, &path)?,
                    children,
                });
            }
        }
    }

    built.pop().ok_or_else(|| AstError::MissingType { path: path.to_string() })
}

/// Convert a leaf right away, or schedule a composite node after its children.
fn visit<'a>(
    value: &'a Value,
    path: String,
    tasks: &mut Vec<Task<'a>>,
    built: &mut Vec<Node>,
) -> Result<(), AstError> {
    let object = value.as_object().ok_or_else(|| AstError::MissingType { path: path.clone() })?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AstError::MissingType { path: path.clone() })?;

    match kind {
        "Identifier" => built.push(Node::Identifier {
            name: string_field(object, kind, "name", &path)?,
            loc: required_loc(object, kind, &path)?,
        }),
        "MemberExpression" => {
            let object_value = object.get("object").ok_or_else(|| invalid(kind, "object", &path))?;
            let property_value = object.get("property").ok_or_else(|| invalid(kind, "property", &path))?;
            tasks.push(Task::Member(object, path.clone()));
            tasks.push(Task::Visit(property_value, format!("{path}.property")));
            tasks.push(Task::Visit(object_value, format!("{path}.object")));
        }
        "Literal" => built.push(Node::Literal {
            value: literal_value(object, &path)?,
            loc: optional_loc(object, kind, &path)?,
        }),
        _ => {
            let children = typed_children(object, &path);
            tasks.push(Task::Other(object, kind, path, children.len()));
            // Reversed so the first child is converted first
            tasks.extend(children.into_iter().rev().map(|(child, path)| Task::Visit(child, path)));
        }
    }
    Ok(())
}

/// Typed nodes held by the fields of `object`, looking through arrays and untyped objects.
fn typed_children<'a>(object: &'a Map<String, Value>, path: &str) -> Vec<(&'a Value, String)> {
    let mut pending: Vec<(&'a Value, String)> = object
        .iter()
        .filter(|(field, _)| !SKIPPED_FIELDS.contains(&field.as_str()))
        .map(|(field, child)| (child, format!("{path}.{field}")))
        .collect();
    pending.reverse();

    let mut children = Vec::new();
    while let Some((value, path)) = pending.pop() {
        match value {
            Value::Array(items) => pending.extend(
                items.iter().enumerate().rev().map(|(index, item)| (item, format!("{path}[{index}]"))),
            ),
            Value::Object(inner) if inner.contains_key("type") => children.push((value, path)),
            Value::Object(inner) => pending
                .extend(inner.iter().rev().map(|(field, child)| (child, format!("{path}.{field}")))),
            _ => {}
        }
    }
    children
}

fn literal_value(object: &Map<String, Value>, path: &str) -> Result<LiteralValue, AstError> {
    if let Some(regex) = object.get("regex").and_then(Value::as_object) {
        return Ok(LiteralValue::RegExp {
            pattern: string_field(regex, "Literal", "pattern", path)?,
            flags: regex.get("flags").and_then(Value::as_str).unwrap_or_default().to_string(),
        });
    }
    if let Some(digits) = object.get("bigint").and_then(Value::as_str) {
        return Ok(LiteralValue::BigInt(digits.to_string()));
    }
    match object.get("value") {
        Some(Value::String(text)) => Ok(LiteralValue::String(text.clone())),
        Some(Value::Bool(value)) => Ok(LiteralValue::Boolean(*value)),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(LiteralValue::Number)
            .ok_or_else(|| invalid("Literal", "value", path)),
        Some(Value::Null) | None => Ok(LiteralValue::Null),
        Some(_) => Err(invalid("Literal", "value", path)),
    }
}

fn string_field(
    object: &Map<String, Value>,
    kind: &str,
    field: &'static str,
    path: &str,
) -> Result<String, AstError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(kind, field, path))
}

fn required_loc(object: &Map<String, Value>, kind: &str, path: &str) -> Result<SourceLocation, AstError> {
    optional_loc(object, kind, path)?
        .ok_or_else(|| AstError::MissingLocation { kind: kind.to_string(), path: path.to_string() })
}

fn optional_loc(
    object: &Map<String, Value>,
    kind: &str,
    path: &str,
) -> Result<Option<SourceLocation>, AstError> {
    let Some(loc) = object.get("loc").filter(|loc| !loc.is_null()) else {
        return Ok(None);
    };
    let start = loc.get("start").and_then(position);
    let end = loc.get("end").and_then(position);
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(SourceLocation::new(start, end))),
        _ => Err(invalid(kind, "loc", path)),
    }
}

fn position(value: &Value) -> Option<Position> {
    let line = u32::try_from(value.get("line")?.as_u64()?).ok()?;
    let column = u32::try_from(value.get("column")?.as_u64()?).ok()?;
    Some(Position::new(line, column))
}

fn invalid(kind: &str, field: &'static str, path: &str) -> AstError {
    AstError::InvalidField { kind: kind.to_string(), field, path: path.to_string() }
}

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

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Candidate;

/// Recorded value when an evaluation yields neither a description nor a value.
pub const UNDETERMINED: &str = "undetermined";

/// One observed value of a tracked expression, already stringified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueRecord(String);

impl ValueRecord {
    /// Record a rendered value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The sentinel for values that could not be determined.
    pub fn undetermined() -> Self {
        Self(UNDETERMINED.to_string())
    }

    /// Whether this is the undetermined sentinel.
    pub fn is_undetermined(&self) -> bool {
        self.0 == UNDETERMINED
    }

    /// Rendered value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the rendered value.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ValueRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value histories keyed by expression text, in first-discovery order.
///
/// The same text found at several spans shares a single history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedExpressions {
    histories: IndexMap<String, Vec<ValueRecord>>,
}

impl TrackedExpressions {
    /// Track every distinct expression of `candidates`.
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        let mut tracked = Self::default();
        for candidate in candidates {
            tracked.track(&candidate.expression);
        }
        tracked
    }

    /// Start tracking an expression. Returns false if it was already tracked.
    pub fn track(&mut self, expression: &str) -> bool {
        if self.histories.contains_key(expression) {
            return false;
        }
        self.histories.insert(expression.to_string(), Vec::new());
        true
    }

    /// Append a value to an expression's history. Returns false for an untracked expression.
    pub fn record(&mut self, expression: &str, value: ValueRecord) -> bool {
        match self.histories.get_mut(expression) {
            Some(history) => {
                history.push(value);
                true
            }
            None => false,
        }
    }

    /// Tracked expressions in evaluation order.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.histories.keys().map(String::as_str)
    }

    /// History of one expression.
    pub fn history(&self, expression: &str) -> Option<&[ValueRecord]> {
        self.histories.get(expression).map(Vec::as_slice)
    }

    /// Expressions with their histories, in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ValueRecord])> {
        self.histories.iter().map(|(expression, history)| (expression.as_str(), history.as_slice()))
    }

    /// Number of distinct expressions.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Drop every tracked expression and its history.
    pub fn clear(&mut self) {
        self.histories.clear();
    }
}

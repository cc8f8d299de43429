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

//! Rendering of traces and candidates for the terminal.
//!
//! Text output uses 1-based lines and columns so locations can be pasted
//! into an editor. JSON output keeps the engine's 0-based ranges.

use std::{io::Write, path::Path};

use eyre::{Result, WrapErr};
use serde::Serialize;
use vtrace_engine::{Candidate, SourceRange, TraceResult};

fn location(file: &Path, range: &SourceRange) -> String {
    format!("{}:{}:{}", file.display(), range.start_line + 1, range.start_column + 1)
}

/// One line per recorded value: `<file>:<line>:<col> <expression> = <value>`.
pub fn write_trace_text(out: &mut impl Write, file: &Path, trace: &TraceResult) -> Result<()> {
    if trace.is_empty() {
        writeln!(out, "No values recorded")?;
        return Ok(());
    }
    for expression in &trace.expressions {
        for range in &expression.ranges {
            for value in &expression.values {
                writeln!(out, "{} {} = {value}", location(file, range), expression.expression)?;
            }
        }
    }
    Ok(())
}

/// One line per candidate: `<file>:<line>:<col> <expression>`.
pub fn write_candidates_text(out: &mut impl Write, file: &Path, candidates: &[Candidate]) -> Result<()> {
    for candidate in candidates {
        writeln!(out, "{} {}", location(file, &candidate.range), candidate.expression)?;
    }
    Ok(())
}

/// Pretty-printed JSON followed by a newline.
pub fn write_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).wrap_err("Failed to serialize output")?;
    writeln!(out)?;
    Ok(())
}

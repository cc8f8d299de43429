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

//! Analyze command - static dry run of expression discovery

use std::path::PathBuf;

use clap::Args;
use eyre::{Result, WrapErr};
use tracing::info;
use vtrace_engine::{ScopeAnalyzer, ScopeStart, SourceParser};

use super::SelectedParser;
use crate::{config::VtraceConfig, output, OutputFormat};

/// Arguments of `vtrace analyze`
#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// File to analyze
    pub file: PathBuf,

    /// Cursor line (1-based)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub line: u32,

    /// Line the enclosing scope starts at (1-based, default: start of the file)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub scope_line: u32,

    /// Column the enclosing scope starts at (1-based)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub scope_column: u32,

    /// Pre-computed ESTree JSON of the file, instead of running the parser
    #[arg(long)]
    pub ast: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Run `vtrace analyze`.
pub async fn run(args: AnalyzeArgs, config: VtraceConfig) -> Result<()> {
    let parser = SelectedParser::new(args.ast.as_ref(), &config.parser);
    let program = parser
        .parse(&args.file)
        .await
        .wrap_err_with(|| format!("Failed to parse {}", args.file.display()))?;

    let scope = ScopeStart::new(args.scope_line - 1, args.scope_column - 1);
    let candidates = ScopeAnalyzer::new(&program).analyze(scope, args.line - 1);
    info!(candidates = candidates.len(), "Analysis complete");

    let mut stdout = std::io::stdout().lock();
    match args.format {
        OutputFormat::Text => output::write_candidates_text(&mut stdout, &args.file, &candidates)?,
        OutputFormat::Json => output::write_json(&mut stdout, &candidates)?,
    }
    Ok(())
}

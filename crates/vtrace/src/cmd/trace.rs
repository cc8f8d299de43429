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

//! Trace command - run the program and report recorded values

use std::{path::PathBuf, time::Duration};

use clap::Args;
use eyre::{Result, WrapErr};
use tracing::{info, warn};
use vtrace_engine::{NodeLauncher, SessionCoordinator, SessionError};

use super::SelectedParser;
use crate::{config::VtraceConfig, output, project, OutputFormat};

/// Arguments of `vtrace trace`
#[derive(Debug, Args)]
pub struct TraceArgs {
    /// File to set the breakpoint in
    pub file: PathBuf,

    /// Breakpoint line (1-based)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub line: u32,

    /// File to run instead of the traced one (default: package.json `main`, else the file itself)
    #[arg(long)]
    pub entry: Option<PathBuf>,

    /// Working directory of the program (default: the current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Pre-computed ESTree JSON of the file, instead of running the parser
    #[arg(long)]
    pub ast: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// Interpreter executable
    #[arg(long, env = "VTRACE_NODE")]
    pub node: Option<String>,

    /// Delay after the program ends before results are read, in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Per-request timeout in milliseconds, 0 to wait forever
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl TraceArgs {
    /// Fold the command-line overrides into the loaded configuration.
    fn apply(&self, mut config: VtraceConfig) -> VtraceConfig {
        if let Some(node) = &self.node {
            config.launcher.node_binary = node.clone();
        }
        if let Some(settle) = self.settle_ms {
            config.engine = config.engine.with_settle_delay(Duration::from_millis(settle));
        }
        if let Some(timeout) = self.timeout_ms {
            config.engine.request_timeout_ms = timeout;
        }
        config
    }
}

/// Run `vtrace trace`.
pub async fn run(args: TraceArgs, config: VtraceConfig) -> Result<()> {
    let config = args.apply(config);
    let request = project::resolve_request(&args.file, args.line - 1, args.entry.as_deref(), args.cwd.as_deref())
        .wrap_err("Failed to resolve what to run")?;
    info!(
        file = %request.target_file.display(),
        entry = %request.entry_file.display(),
        cwd = %request.working_dir.display(),
        line = args.line,
        "Tracing"
    );

    let coordinator = SessionCoordinator::new(
        NodeLauncher::new(config.launcher.clone()),
        SelectedParser::new(args.ast.as_ref(), &config.parser),
        config.engine.clone(),
    );

    let run = coordinator.run(request);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received Ctrl+C, cancelling the trace...");
            coordinator.cancel_active();
            run.await
        }
    };

    let trace = match result {
        Ok(trace) => trace,
        Err(SessionError::Superseded) => eyre::bail!("Trace cancelled"),
        Err(e) => return Err(e).wrap_err_with(|| format!("Failed to trace {}", args.file.display())),
    };

    let mut stdout = std::io::stdout().lock();
    match args.format {
        OutputFormat::Text => output::write_trace_text(&mut stdout, &args.file, &trace)?,
        OutputFormat::Json => output::write_json(&mut stdout, &trace.records)?,
    }
    Ok(())
}

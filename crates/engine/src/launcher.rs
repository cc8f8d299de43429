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

//! Debuggee launching.
//!
//! A [`Launcher`] starts the program under an inspector and reports the
//! websocket endpoint the inspector listens on. [`NodeLauncher`] runs
//! `node --inspect-brk` and reads the endpoint from its diagnostic stream.

use std::{
    future::Future,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader, Lines},
    process::{Child, Command},
    time,
};
use tracing::{debug, info, warn};

use crate::{config::LauncherConfig, error::LaunchError};

static WS_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"ws://\S+").expect("valid endpoint pattern"));

/// Target to tracing events carrying the debuggee's own output.
pub const DEBUGGEE_LOG_TARGET: &str = "debuggee";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// File handed to the interpreter
    pub entry_file: PathBuf,
    /// Working directory of the debuggee
    pub working_dir: PathBuf,
}

/// Starts debuggees.
pub trait Launcher: Send + Sync {
    /// Start the debuggee halted at entry and report its inspector endpoint.
    fn launch(&self, spec: &LaunchSpec) -> impl Future<Output = Result<Debuggee, LaunchError>> + Send;
}

/// A running debuggee, or an inspector endpoint we do not own.
#[derive(Debug)]
pub struct Debuggee {
    endpoint: String,
    process: Option<Child>,
    exit_grace: Duration,
}

impl Debuggee {
    /// Wrap a spawned process.
    pub fn spawned(endpoint: impl Into<String>, process: Child, exit_grace: Duration) -> Self {
        Self { endpoint: endpoint.into(), process: Some(process), exit_grace }
    }

    /// An inspector that is already listening and is not ours to stop.
    pub fn attached(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), process: None, exit_grace: Duration::ZERO }
    }

    /// Inspector websocket URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// OS process id, when we own a live process.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Wait up to `timeout` for the process to exit on its own.
    pub async fn wait_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let process = self.process.as_mut()?;
        match time::timeout(timeout, process.wait()).await {
            Ok(Ok(status)) => {
                log_exit(status);
                self.process = None;
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to wait for debuggee");
                None
            }
            Err(_) => None,
        }
    }

    /// Kill the process and reap it.
    pub async fn terminate(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        debug!(pid = ?process.id(), "Terminating debuggee");
        if let Err(e) = process.kill().await {
            warn!(error = %e, "Failed to kill debuggee");
        }
    }

    /// Stop the debuggee. A graceful shutdown first gives it the configured
    /// grace period to exit by itself.
    pub async fn shutdown(&mut self, graceful: bool) {
        if graceful && self.wait_exit(self.exit_grace).await.is_some() {
            return;
        }
        self.terminate().await;
    }
}

fn log_exit(status: ExitStatus) {
    if status.success() {
        debug!(%status, "Debuggee exited");
    } else {
        warn!(%status, "Debuggee exited with failure");
    }
}

/// Launches programs with `node --inspect-brk`.
#[derive(Debug, Clone, Default)]
pub struct NodeLauncher {
    config: LauncherConfig,
}

impl NodeLauncher {
    /// Create a launcher.
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Launcher settings.
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut command = Command::new(&self.config.node_binary);
        command
            .arg(self.config.inspect_flag())
            .arg(&spec.entry_file)
            .args(&self.config.script_args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Launcher for NodeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Debuggee, LaunchError> {
        let program = self.config.node_binary.clone();
        let mut child = self
            .command(spec)
            .spawn()
            .map_err(|source| LaunchError::Spawn { program: program.clone(), source })?;
        info!(
            pid = ?child.id(),
            entry = %spec.entry_file.display(),
            cwd = %spec.working_dir.display(),
            "Debuggee started"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(BufReader::new(stdout).lines(), "stdout"));
        }
        let Some(stderr) = child.stderr.take() else {
            return Err(LaunchError::NoEndpoint);
        };
        let mut stderr = BufReader::new(stderr).lines();

        let timeout = self.config.launch_timeout();
        let scan = async {
            while let Some(line) = stderr.next_line().await? {
                info!(target: DEBUGGEE_LOG_TARGET, stream = "stderr", "{line}");
                if let Some(found) = WS_URL.find(&line) {
                    return Ok(Some(found.as_str().to_string()));
                }
            }
            Ok::<_, std::io::Error>(None)
        };

        let endpoint = match time::timeout(timeout, scan).await {
            Ok(Ok(Some(endpoint))) => endpoint,
            Ok(Ok(None)) | Ok(Err(_)) => {
                let _ = child.kill().await;
                return Err(LaunchError::NoEndpoint);
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(LaunchError::Timeout(timeout));
            }
        };
        debug!(%endpoint, "Inspector endpoint announced");

        tokio::spawn(forward_lines(stderr, "stderr"));
        Ok(Debuggee::spawned(endpoint, child, self.config.exit_grace()))
    }
}

async fn forward_lines<R>(mut lines: Lines<BufReader<R>>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: DEBUGGEE_LOG_TARGET, stream, "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};
    use tempfile::TempDir;

    /// Write an executable shell script standing in for the interpreter.
    fn fake_node(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-node");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn launcher(binary: String, launch_timeout_ms: u64) -> NodeLauncher {
        NodeLauncher::new(LauncherConfig {
            node_binary: binary,
            launch_timeout_ms,
            exit_grace_ms: 100,
            ..Default::default()
        })
    }

    fn spec(dir: &Path) -> LaunchSpec {
        LaunchSpec { entry_file: dir.join("main.js"), working_dir: dir.to_path_buf() }
    }

    #[tokio::test]
    async fn test_endpoint_is_read_from_stderr() {
        vtrace_common::logging::ensure_test_logging(None);
        let dir = TempDir::new().unwrap();
        let binary = fake_node(
            dir.path(),
            "echo booting >&2\necho 'Debugger listening on ws://127.0.0.1:9229/abc-def' >&2\nsleep 30",
        );

        let mut debuggee = launcher(binary, 5_000).launch(&spec(dir.path())).await.unwrap();
        assert_eq!(debuggee.endpoint(), "ws://127.0.0.1:9229/abc-def");
        assert!(debuggee.pid().is_some());

        debuggee.shutdown(true).await;
        assert!(debuggee.pid().is_none());
    }

    #[tokio::test]
    async fn test_arguments_reach_the_interpreter() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args.txt");
        let binary = fake_node(
            dir.path(),
            &format!("echo \"$@\" > {}\necho ws://localhost:1/x >&2", args_file.display()),
        );

        let mut debuggee = launcher(binary, 5_000).launch(&spec(dir.path())).await.unwrap();
        debuggee.wait_exit(Duration::from_secs(5)).await;

        let args = fs::read_to_string(&args_file).unwrap();
        let expected = format!("--inspect-brk=127.0.0.1:0 {} --vtrace", dir.path().join("main.js").display());
        assert_eq!(args.trim(), expected);
    }

    #[tokio::test]
    async fn test_exit_without_endpoint() {
        let dir = TempDir::new().unwrap();
        let binary = fake_node(dir.path(), "echo 'Error: Cannot find module' >&2\nexit 1");
        let result = launcher(binary, 5_000).launch(&spec(dir.path())).await;
        assert!(matches!(result, Err(LaunchError::NoEndpoint)));
    }

    #[tokio::test]
    async fn test_endpoint_timeout() {
        let dir = TempDir::new().unwrap();
        let binary = fake_node(dir.path(), "sleep 30");
        let result = launcher(binary, 200).launch(&spec(dir.path())).await;
        assert!(matches!(result, Err(LaunchError::Timeout(timeout)) if timeout == Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-node").to_string_lossy().into_owned();
        let result = launcher(missing.clone(), 1_000).launch(&spec(dir.path())).await;
        match result {
            Err(LaunchError::Spawn { program, .. }) => assert_eq!(program, missing),
            other => panic!("Expected spawn failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_attached_debuggee_owns_no_process() {
        let mut debuggee = Debuggee::attached("ws://127.0.0.1:9229/x");
        assert_eq!(debuggee.pid(), None);
        assert_eq!(debuggee.wait_exit(Duration::from_millis(10)).await, None);
        debuggee.shutdown(false).await;
    }
}

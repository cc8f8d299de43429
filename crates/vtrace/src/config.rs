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

//! Configuration file handling.
//!
//! Settings are read from the first file found among `--config <path>`,
//! `./vtrace.toml` and `~/.vtrace.toml`. Missing tables and fields fall back
//! to their defaults; command-line flags override the file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vtrace_engine::{EngineConfig, LauncherConfig, ParserConfig};

/// File name looked up in the current and home directories
pub const CONFIG_FILE_NAME: &str = "vtrace.toml";

/// Everything configurable from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtraceConfig {
    /// Stepping engine and coordinator settings
    pub engine: EngineConfig,
    /// Debuggee launcher settings
    pub launcher: LauncherConfig,
    /// Source parser settings
    pub parser: ParserConfig,
}

impl VtraceConfig {
    /// Locations searched when no file is given, most specific first.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!(".{CONFIG_FILE_NAME}")));
        }
        paths
    }

    /// Load from `explicit` if given, which must exist, else from the first default location present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => Self::load_first(&Self::default_paths()),
        }
    }

    /// Load the first existing file of `paths`, or defaults when none exists.
    pub fn load_first(paths: &[PathBuf]) -> Result<Self> {
        match paths.iter().find(|path| path.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse one TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file as TOML: {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[engine]
settle_delay_ms = 0
pause_timeout_ms = 5000

[launcher]
node_binary = "/opt/node/bin/node"
"#,
        )
        .unwrap();

        let config = VtraceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.settle_delay_ms, 0);
        assert_eq!(config.engine.pause_timeout_ms, Some(5000));
        assert_eq!(config.engine.request_timeout_ms, EngineConfig::default().request_timeout_ms);
        assert_eq!(config.launcher.node_binary, "/opt/node/bin/node");
        assert_eq!(config.launcher.script_args, ["--vtrace"]);
        assert_eq!(config.parser, ParserConfig::default());
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(VtraceConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[engine\nsettle").unwrap();
        assert!(VtraceConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_first_existing_file_wins() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        fs::write(&second, "[parser]\ncommand = [\"esparse\"]\n").unwrap();

        let config = VtraceConfig::load_first(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(config.parser.command, ["esparse"]);

        fs::write(&first, "[parser]\ncommand = [\"acorn\"]\n").unwrap();
        let config = VtraceConfig::load_first(&[first, second]).unwrap();
        assert_eq!(config.parser.command, ["acorn"]);

        assert_eq!(VtraceConfig::load_first(&[]).unwrap(), VtraceConfig::default());
    }

    #[test]
    #[serial]
    fn test_current_directory_file_is_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[launcher]\ninspect_port = 9230\n").unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let loaded = VtraceConfig::load(None);
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(loaded.unwrap().launcher.inspect_port, 9230);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = VtraceConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<VtraceConfig>(&text).unwrap(), config);
    }
}

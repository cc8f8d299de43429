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

//! Entry point discovery.
//!
//! A traced file is often a module of a larger program. When the working
//! directory holds a `package.json` with a `main` field, that file is run
//! instead of the traced one.

use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use serde::Deserialize;
use tracing::debug;
use vtrace_engine::TraceRequest;

#[derive(Debug, Deserialize)]
struct PackageManifest {
    main: Option<String>,
}

/// `main` of `<dir>/package.json`, resolved against `dir`.
pub fn package_main(dir: &Path) -> Result<Option<PathBuf>> {
    let manifest_path = dir.join("package.json");
    if !manifest_path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&manifest_path)
        .wrap_err_with(|| format!("Failed to read {}", manifest_path.display()))?;
    let manifest: PackageManifest = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse {}", manifest_path.display()))?;
    Ok(manifest.main.filter(|main| !main.is_empty()).map(|main| dir.join(main)))
}

/// Build the request for `file` at the 0-based `line`.
///
/// An explicit entry wins, then the package entry of the working directory,
/// then the file itself.
pub fn resolve_request(
    file: &Path,
    line: u32,
    entry: Option<&Path>,
    cwd: Option<&Path>,
) -> Result<TraceRequest> {
    if !file.is_file() {
        eyre::bail!("{} does not exist or is not a file", file.display());
    }

    let working_dir = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().wrap_err("Failed to read the current directory")?,
    };

    let request = TraceRequest::new(file, line).with_working_dir(&working_dir);
    if let Some(entry) = entry {
        return Ok(request.with_entry(entry));
    }
    match package_main(&working_dir)? {
        Some(main) => {
            debug!(entry = %main.display(), "Running the package entry point");
            Ok(request.with_entry(main))
        }
        None => Ok(request),
    }
}

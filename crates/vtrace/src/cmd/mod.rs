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

//! Command modules for the VTrace CLI

use std::path::{Path, PathBuf};

use vtrace_engine::{CommandParser, EstreeFileParser, ParseError, ParserConfig, Program, SourceParser};

pub mod analyze;
pub mod trace;

/// Parser picked from the command line: a pre-computed tree or the configured command.
#[derive(Debug, Clone)]
pub enum SelectedParser {
    /// `--ast <JSON>`
    Estree(EstreeFileParser),
    /// External parser command
    Command(CommandParser),
}

impl SelectedParser {
    /// Use the tree at `ast` when given, the configured parser command otherwise.
    pub fn new(ast: Option<&PathBuf>, config: &ParserConfig) -> Self {
        match ast {
            Some(ast) => Self::Estree(EstreeFileParser::new(ast)),
            None => Self::Command(CommandParser::new(config.clone())),
        }
    }
}

impl SourceParser for SelectedParser {
    async fn parse(&self, path: &Path) -> Result<Program, ParseError> {
        match self {
            Self::Estree(parser) => parser.parse(path).await,
            Self::Command(parser) => parser.parse(path).await,
        }
    }
}

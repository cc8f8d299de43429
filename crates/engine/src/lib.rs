//! VTrace engine: record the values JavaScript expressions take while a
//! program runs.
//!
//! A [`SessionCoordinator`] parses the source, launches the program under the
//! V8 inspector, stops it at a breakpoint line and samples every expression in
//! scope at every pause until the program ends.

pub mod analysis;
pub use analysis::*;

pub mod ast;
pub use ast::{Node, Program};

pub mod config;
pub use config::*;

pub mod error;
pub use error::*;

pub mod launcher;
pub use launcher::*;

pub mod parser;
pub use parser::*;

pub mod protocol;

pub mod session;
pub use session::*;

pub mod stepping;
pub use stepping::*;

pub mod transport;
pub use transport::*;

//! CLI command implementations.

pub mod args;
pub mod output;

pub mod index;
pub mod parse;
pub mod search;
pub mod tokens;

pub use args::{Cli, Commands};
pub use output::Output;

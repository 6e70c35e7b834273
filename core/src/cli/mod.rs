//! CLI argument parsing for the `jobrig` binary.

mod parse;

pub use parse::parse_args;

//! CLI argument model and validation for the relay binary.

pub mod cli_args;
pub mod validation;

pub use cli_args::Cli;
pub use validation::*;

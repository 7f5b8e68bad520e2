//! CLI Module
//!
//! Exit codes shared by the `serialview` binary and scripts driving it.

pub mod exit_codes;

pub use exit_codes::{classify, exit_code_description, print_exit_codes, CliResult, ExitCodes};

//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod init_session;
pub mod scan;
pub mod serve;

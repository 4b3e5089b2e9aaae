//! Command-line interface for tracklister.
//!
//! Identifies the tracks in a recording and administers the result cache.

mod commands;

pub use commands::{already_reported, run_command, CacheCommand, Cli, Commands, CredentialArgs};

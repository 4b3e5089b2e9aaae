//! Tracklister - identify the tracks in a DJ mix.
//!
//! A recording is cut into overlapping segments, each segment is sent to a
//! recognition provider (AcoustID or ACRCloud) through a result cache and a
//! per-provider rate limiter, and the per-segment answers are merged into a
//! deduplicated, time-ordered tracklist.
//!
//! Entry point for library use is [`identification::identify_tracks`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod identification;
pub mod matcher;
pub mod providers;
pub mod rate_limit;
pub mod segment;
#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};

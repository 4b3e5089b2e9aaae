//! MusicBrainz lookups
//!
//! Not a recognition provider by itself: AcoustID matches carry a recording
//! MBID, and this client turns it into album, release date, ISRC and genres.
//!
//! API docs: https://musicbrainz.org/doc/MusicBrainz_API

mod adapter;
mod client;
pub mod dto;

pub use adapter::{to_details, RecordingDetails};
pub use client::{MusicBrainzClient, MIN_REQUEST_SPACING};

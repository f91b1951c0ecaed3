//! Last.fm 2.0 API client: signed now-playing and scrobble submissions plus
//! mobile-session authentication.

mod client;
mod error;

pub use client::{api_signature, LastFmClient};
pub use error::CredentialError;

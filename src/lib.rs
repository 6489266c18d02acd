//! Core library for genrify: Spotify playlist search, merge and cleanup.
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod playlist;
pub mod util;

pub use error::{Error, Result};

//! Episode store adapter
//!
//! The session reads episode records and writes back progress through
//! the [`EpisodeStore`] trait. Records are owned by the store and
//! outlive any playback session; the session only ever performs partial
//! updates of the progress fields.

mod json_file;
mod memory;

pub use json_file::JsonFileEpisodeStore;
pub use memory::MemoryEpisodeStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable episode identifier (the media URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(String);

impl EpisodeId {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpisodeId {
    fn from(url: &str) -> Self {
        Self(url.to_string())
    }
}

impl From<String> for EpisodeId {
    fn from(url: String) -> Self {
        Self(url)
    }
}

/// One playable episode record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Stable identifier, also the media URI
    pub id: EpisodeId,

    /// Episode title
    pub title: String,

    /// Podcast display name
    pub podcast_name: String,

    /// Artwork reference
    pub artwork_url: Option<String>,

    /// Total duration, unknown until reported
    pub duration_ms: Option<u64>,

    /// Last persisted playback position
    pub position_ms: u64,

    /// Played to the end
    pub finished: bool,

    /// Currently the playing episode
    pub is_playing: bool,
}

impl Episode {
    /// Create a fresh, never-played episode record
    pub fn new(id: impl Into<EpisodeId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            podcast_name: String::new(),
            artwork_url: None,
            duration_ms: None,
            position_ms: 0,
            finished: false,
            is_playing: false,
        }
    }

    pub fn with_podcast(mut self, name: impl Into<String>) -> Self {
        self.podcast_name = name.into();
        self
    }

    pub fn with_artwork(mut self, url: impl Into<String>) -> Self {
        self.artwork_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_position(mut self, position_ms: u64) -> Self {
        self.position_ms = position_ms;
        self
    }

    /// Apply a partial progress update, leaving every other field untouched
    pub fn apply(&mut self, update: &EpisodeUpdate) {
        self.position_ms = update.position_ms;
        self.is_playing = update.is_playing;
        self.finished = update.finished;
    }
}

/// Partial progress update written by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeUpdate {
    pub position_ms: u64,
    pub is_playing: bool,
    pub finished: bool,
}

/// Episode store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("episode {0} not found")]
    NotFound(EpisodeId),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store data is malformed: {0}")]
    Serialization(String),
}

/// Read-one / write-one access to episode records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Fetch one episode record
    async fn get(&self, id: &EpisodeId) -> Result<Episode, StoreError>;

    /// Read-modify-write the progress fields of one record
    async fn update(&self, id: &EpisodeId, update: EpisodeUpdate) -> Result<(), StoreError>;
}

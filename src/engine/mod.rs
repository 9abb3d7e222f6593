//! Playback engine adapter
//!
//! The engine decodes and outputs audio; the session only drives it
//! through fire-and-forget commands and learns about outcomes from
//! events. Engines may emit events from their own threads, so events
//! are handed to an [`EngineEventSink`] which forwards them into the
//! session controller's serialized message queue.

mod simulated;

pub use simulated::SimulatedEngine;

use crate::store::{Episode, EpisodeId};
use std::fmt;
use std::sync::Arc;

/// Display metadata handed to the engine alongside a media URI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub artwork_url: Option<String>,
}

impl From<&Episode> for MediaMetadata {
    fn from(episode: &Episode) -> Self {
        Self {
            title: episode.title.clone(),
            artist: episode.podcast_name.clone(),
            artwork_url: episode.artwork_url.clone(),
        }
    }
}

/// Why the engine moved to another media item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Playback of the previous item ended and the engine moved on
    Auto,
    /// The item was repeated
    Repeat,
    /// A seek crossed into another item
    Seek,
    /// The loaded item list changed
    PlaylistChanged,
}

/// Transport event reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine started or stopped producing audio
    IsPlayingChanged(bool),

    /// The engine's current item changed
    MediaItemTransition {
        id: Option<EpisodeId>,
        reason: TransitionReason,
    },

    /// Unrecoverable playback failure
    Error { cause: String },
}

/// Imperative engine command issued by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Load { uri: String, metadata: MediaMetadata },
    Prepare,
    Play,
    Pause,
    Resume,
    SeekTo(u64),
    SeekRelative(i64),
}

impl EngineCommand {
    /// Issue this command on the given engine
    pub fn apply_to(&self, engine: &dyn PlaybackEngine) {
        match self {
            EngineCommand::Load { uri, metadata } => engine.load(uri, metadata),
            EngineCommand::Prepare => engine.prepare(),
            EngineCommand::Play => engine.play(),
            EngineCommand::Pause => engine.pause(),
            EngineCommand::Resume => engine.resume(),
            EngineCommand::SeekTo(position_ms) => engine.seek_to(*position_ms),
            EngineCommand::SeekRelative(delta_ms) => engine.seek_relative(*delta_ms),
        }
    }

    /// Whether this command starts audio output
    pub fn starts_playback(&self) -> bool {
        matches!(self, EngineCommand::Play | EngineCommand::Resume)
    }
}

/// Thread-safe handle through which an engine reports events
#[derive(Clone)]
pub struct EngineEventSink {
    deliver: Arc<dyn Fn(EngineEvent) -> bool + Send + Sync>,
}

impl EngineEventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(EngineEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Forward an event; returns false once the receiving side is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventSink").finish_non_exhaustive()
    }
}

/// Playback engine trait defining the interface the session drives
///
/// Commands are fire-and-forget and must not block; outcomes arrive as
/// [`EngineEvent`]s through the attached sink.
pub trait PlaybackEngine: Send + Sync {
    /// Start delivering events to `sink`, replacing any previous sink
    fn attach(&self, sink: EngineEventSink);

    /// Stop delivering events
    fn detach(&self);

    /// Replace the current item with `uri`
    fn load(&self, uri: &str, metadata: &MediaMetadata);

    /// Acquire resources for the loaded item
    fn prepare(&self);

    /// Start playback of the prepared item
    fn play(&self);

    /// Pause playback
    fn pause(&self);

    /// Resume paused playback
    fn resume(&self);

    /// Seek to an absolute position
    fn seek_to(&self, position_ms: u64);

    /// Seek by a signed offset from the current position
    fn seek_relative(&self, delta_ms: i64);

    /// Current playback position
    fn current_position(&self) -> u64;

    /// Duration of the loaded item, if the engine knows it yet
    fn duration(&self) -> Option<u64>;

    /// Whether an item is loaded
    fn has_active_item(&self) -> bool;

    /// Whether audio is currently being produced
    fn is_playing(&self) -> bool;
}

/// Point-in-time view of the engine's queryable state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
    pub has_active_item: bool,
}

impl EngineSnapshot {
    pub fn capture(engine: &dyn PlaybackEngine) -> Self {
        Self {
            position_ms: engine.current_position(),
            duration_ms: engine.duration(),
            is_playing: engine.is_playing(),
            has_active_item: engine.has_active_item(),
        }
    }
}

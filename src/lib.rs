//! podsession - podcast playback session coordinator
//!
//! One authoritative playback session sits between user intents, a
//! playback engine and an episode store. The session decides what the
//! engine does next, attributes every observed position to exactly one
//! episode, and writes progress back in the order it happened.

pub mod engine;
pub mod player;
pub mod store;
pub mod utils;

pub use engine::{
    EngineCommand, EngineEvent, EngineEventSink, EngineSnapshot, MediaMetadata, PlaybackEngine,
    SimulatedEngine, TransitionReason,
};
pub use player::{Intent, Phase, PositionListener, SeekDirection, SessionController, SessionState};
pub use store::{
    Episode, EpisodeId, EpisodeStore, EpisodeUpdate, JsonFileEpisodeStore, MemoryEpisodeStore,
    StoreError,
};
pub use utils::{Config, Result, SessionConfig, SessionError};

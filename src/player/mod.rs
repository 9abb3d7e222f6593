//! Playback session module for podsession
//!
//! This module owns the single authoritative playback session. User
//! intents and engine events are funneled through the
//! [`SessionController`], which runs the [`PlaybackSession`] state
//! machine, drives the engine, and persists progress in order.

mod controller;
mod persistence;
mod state;
mod tracker;

pub use controller::{PositionListener, SessionController};
pub use persistence::PersistenceQueue;
pub use state::{
    is_finished, Effect, PersistRequest, PlaybackSession, SessionState, TickOutcome, Transition,
};
pub use tracker::{PersistThrottle, PositionTracker};

use crate::store::Episode;
use crate::utils::SessionConfig;
use std::fmt;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No episode loaded
    Idle,

    /// Loaded and prepared, not started
    Ready { position_ms: u64 },

    /// Producing audio
    Playing { position_ms: u64 },

    /// Paused by the user or the engine
    Paused { position_ms: u64 },

    /// Seek issued before playback started
    Seeking { target_ms: u64 },

    /// Playback unavailable until a new play request
    Error,
}

impl Phase {
    pub fn is_playing(&self) -> bool {
        matches!(self, Phase::Playing { .. })
    }

    /// Position carried by the phase, if any
    pub fn position_ms(&self) -> Option<u64> {
        match *self {
            Phase::Ready { position_ms }
            | Phase::Playing { position_ms }
            | Phase::Paused { position_ms } => Some(position_ms),
            Phase::Seeking { target_ms } => Some(target_ms),
            Phase::Idle | Phase::Error => None,
        }
    }

    /// Same phase with its position replaced
    pub fn with_position(self, position: u64) -> Self {
        match self {
            Phase::Ready { .. } => Phase::Ready { position_ms: position },
            Phase::Playing { .. } => Phase::Playing { position_ms: position },
            Phase::Paused { .. } => Phase::Paused { position_ms: position },
            Phase::Seeking { .. } => Phase::Seeking { target_ms: position },
            other => other,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = crate::utils::format_millis;
        match *self {
            Phase::Idle => write!(f, "idle"),
            Phase::Ready { position_ms } => write!(f, "ready at {}", at(position_ms)),
            Phase::Playing { position_ms } => write!(f, "playing at {}", at(position_ms)),
            Phase::Paused { position_ms } => write!(f, "paused at {}", at(position_ms)),
            Phase::Seeking { target_ms } => write!(f, "seeking to {}", at(target_ms)),
            Phase::Error => write!(f, "playback unavailable"),
        }
    }
}

/// Direction of a relative seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Forward,
    Backward,
}

/// User intent submitted by the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Play this episode, switching away from any other
    Play(Episode),

    /// Load this episode without starting it
    Prepare(Episode),

    Pause,

    Resume,

    /// Seek to an absolute position
    Seek(u64),

    /// Seek by an offset from the current position
    SeekRelative {
        delta_ms: u64,
        direction: SeekDirection,
    },
}

impl Intent {
    /// Skip back by the configured step
    pub fn skip_back(config: &SessionConfig) -> Self {
        Intent::SeekRelative {
            delta_ms: config.seek_back_ms,
            direction: SeekDirection::Backward,
        }
    }

    /// Skip forward by the configured step
    pub fn skip_forward(config: &SessionConfig) -> Self {
        Intent::SeekRelative {
            delta_ms: config.seek_forward_ms,
            direction: SeekDirection::Forward,
        }
    }

    /// Episode carried by the intent
    pub fn episode(&self) -> Option<&Episode> {
        match self {
            Intent::Play(episode) | Intent::Prepare(episode) => Some(episode),
            _ => None,
        }
    }
}

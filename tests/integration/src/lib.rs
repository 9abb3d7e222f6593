//! Integration test utilities for podsession
//!
//! This module provides recording doubles for the two adapters the
//! session drives:
//! - [`RecordingEngine`]: scripted position, command log, manual events
//! - [`RecordingStore`]: in-memory records with an ordered write log

use async_trait::async_trait;
use parking_lot::Mutex;
use podsession::{
    EngineCommand, EngineEvent, EngineEventSink, Episode, EpisodeId, EpisodeStore, EpisodeUpdate,
    MediaMetadata, MemoryEpisodeStore, PlaybackEngine, SessionConfig, StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct EngineModel {
    commands: Vec<EngineCommand>,
    item: Option<String>,
    playing: bool,
    position_ms: u64,
    duration_ms: Option<u64>,
    durations: HashMap<String, u64>,
}

/// Engine double that records every command and never emits on its own
#[derive(Default)]
pub struct RecordingEngine {
    model: Mutex<EngineModel>,
    sink: Mutex<Option<EngineEventSink>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Duration reported once `uri` is loaded
    pub fn register_duration(&self, uri: &str, duration_ms: u64) {
        self.model.lock().durations.insert(uri.to_string(), duration_ms);
    }

    /// Move the playhead, as if playback had progressed
    pub fn set_position(&self, position_ms: u64) {
        self.model.lock().position_ms = position_ms;
    }

    /// Change the playing flag without a session command
    pub fn set_playing(&self, playing: bool) {
        self.model.lock().playing = playing;
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.model.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.model.lock().commands.clear();
    }

    /// Deliver an event through the attached sink from the calling thread
    pub fn emit(&self, event: EngineEvent) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Sink captured before a reconnect, for replaying stale events
    pub fn take_sink(&self) -> Option<EngineEventSink> {
        self.sink.lock().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    fn record(&self, command: EngineCommand) -> parking_lot::MutexGuard<'_, EngineModel> {
        let mut model = self.model.lock();
        model.commands.push(command);
        model
    }
}

impl PlaybackEngine for RecordingEngine {
    fn attach(&self, sink: EngineEventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        *self.sink.lock() = None;
    }

    fn load(&self, uri: &str, metadata: &MediaMetadata) {
        let mut model = self.record(EngineCommand::Load {
            uri: uri.to_string(),
            metadata: metadata.clone(),
        });
        model.duration_ms = model.durations.get(uri).copied();
        model.item = Some(uri.to_string());
        model.playing = false;
        model.position_ms = 0;
    }

    fn prepare(&self) {
        self.record(EngineCommand::Prepare);
    }

    fn play(&self) {
        let mut model = self.record(EngineCommand::Play);
        model.playing = model.item.is_some();
    }

    fn pause(&self) {
        self.record(EngineCommand::Pause).playing = false;
    }

    fn resume(&self) {
        let mut model = self.record(EngineCommand::Resume);
        model.playing = model.item.is_some();
    }

    fn seek_to(&self, position_ms: u64) {
        self.record(EngineCommand::SeekTo(position_ms)).position_ms = position_ms;
    }

    fn seek_relative(&self, delta_ms: i64) {
        let mut model = self.record(EngineCommand::SeekRelative(delta_ms));
        model.position_ms = model.position_ms.saturating_add_signed(delta_ms);
    }

    fn current_position(&self) -> u64 {
        self.model.lock().position_ms
    }

    fn duration(&self) -> Option<u64> {
        self.model.lock().duration_ms
    }

    fn has_active_item(&self) -> bool {
        self.model.lock().item.is_some()
    }

    fn is_playing(&self) -> bool {
        self.model.lock().playing
    }
}

/// Store double recording every write attempt in order
#[derive(Default)]
pub struct RecordingStore {
    records: MemoryEpisodeStore,
    writes: Mutex<Vec<(EpisodeId, EpisodeUpdate)>>,
}

impl RecordingStore {
    pub fn with_episodes(episodes: impl IntoIterator<Item = Episode>) -> Arc<Self> {
        Arc::new(Self {
            records: MemoryEpisodeStore::with_episodes(episodes),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn writes(&self) -> Vec<(EpisodeId, EpisodeUpdate)> {
        self.writes.lock().clone()
    }

    pub fn writes_for(&self, id: &EpisodeId) -> Vec<EpisodeUpdate> {
        self.writes
            .lock()
            .iter()
            .filter(|(written, _)| written == id)
            .map(|(_, update)| *update)
            .collect()
    }

    pub fn remove(&self, id: &EpisodeId) -> Option<Episode> {
        self.records.remove(id)
    }

    pub fn snapshot(&self, id: &EpisodeId) -> Option<Episode> {
        self.records.snapshot(id)
    }
}

#[async_trait]
impl EpisodeStore for RecordingStore {
    async fn get(&self, id: &EpisodeId) -> Result<Episode, StoreError> {
        self.records.get(id).await
    }

    async fn update(&self, id: &EpisodeId, update: EpisodeUpdate) -> Result<(), StoreError> {
        self.writes.lock().push((id.clone(), update));
        self.records.update(id, update).await
    }
}

/// Episode fixture with a known duration
pub fn episode(url: &str, duration_ms: u64) -> Episode {
    Episode::new(url, format!("Episode {}", url))
        .with_podcast("Integration Cast")
        .with_duration(duration_ms)
}

/// Session settings with the default one second poll
pub fn test_config() -> SessionConfig {
    SessionConfig::default()
}

/// Whether `command` loads `uri`
pub fn is_load_of(command: &EngineCommand, uri: &str) -> bool {
    matches!(command, EngineCommand::Load { uri: loaded, .. } if loaded == uri)
}

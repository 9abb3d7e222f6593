//! Wall-clock driven playback engine
//!
//! Produces no audio; it advances the position with real time, detects
//! end of media and reports events from its own event thread, the way
//! a native player reports from its internal looper.

use super::{EngineEvent, EngineEventSink, MediaMetadata, PlaybackEngine, TransitionReason};
use crate::store::EpisodeId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const END_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Message to the event thread
enum Notice {
    Event(EngineEvent),
    Shutdown,
}

#[derive(Debug)]
struct LoadedItem {
    uri: String,
    metadata: MediaMetadata,
    duration_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct EngineState {
    item: Option<LoadedItem>,
    prepared: bool,
    playing: bool,
    failed: bool,
    /// Position at `anchor_at`
    anchor_ms: u64,
    anchor_at: Option<Instant>,
}

impl EngineState {
    fn position(&self) -> u64 {
        let elapsed = match (self.playing, self.anchor_at) {
            (true, Some(at)) => at.elapsed().as_millis() as u64,
            _ => 0,
        };
        let position = self.anchor_ms.saturating_add(elapsed);
        match self.item.as_ref().and_then(|item| item.duration_ms) {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn freeze(&mut self) {
        self.anchor_ms = self.position();
        self.anchor_at = None;
    }

    fn reanchor(&mut self, position_ms: u64) {
        let limit = self
            .item
            .as_ref()
            .and_then(|item| item.duration_ms)
            .unwrap_or(u64::MAX);
        self.anchor_ms = position_ms.min(limit);
        self.anchor_at = self.playing.then(Instant::now);
    }

    fn at_end(&self) -> bool {
        match self.item.as_ref().and_then(|item| item.duration_ms) {
            Some(duration) => self.position() >= duration,
            None => false,
        }
    }
}

/// Simulated engine with its own event thread
pub struct SimulatedEngine {
    state: Arc<Mutex<EngineState>>,
    sink: Arc<Mutex<Option<EngineEventSink>>>,
    durations: Mutex<HashMap<String, u64>>,
    notice_tx: Sender<Notice>,
    event_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let (notice_tx, notice_rx) = crossbeam_channel::unbounded();
        let state = Arc::new(Mutex::new(EngineState::default()));
        let sink = Arc::new(Mutex::new(None));

        let thread_state = Arc::clone(&state);
        let thread_sink = Arc::clone(&sink);
        let event_thread = thread::Builder::new()
            .name("sim-engine-events".to_string())
            .spawn(move || Self::event_loop(notice_rx, thread_state, thread_sink))
            .ok();

        if event_thread.is_none() {
            warn!("Simulated engine could not start its event thread; events are disabled");
        }

        Self {
            state,
            sink,
            durations: Mutex::new(HashMap::new()),
            notice_tx,
            event_thread: Mutex::new(event_thread),
        }
    }

    /// Register the duration the engine will report for `uri` once prepared
    pub fn with_duration(self, uri: impl Into<String>, duration_ms: u64) -> Self {
        self.register_duration(uri, duration_ms);
        self
    }

    pub fn register_duration(&self, uri: impl Into<String>, duration_ms: u64) {
        self.durations.lock().insert(uri.into(), duration_ms);
    }

    /// Metadata of the loaded item
    pub fn now_playing(&self) -> Option<MediaMetadata> {
        self.state.lock().item.as_ref().map(|item| item.metadata.clone())
    }

    /// Inject an unrecoverable failure
    pub fn fail(&self, cause: impl Into<String>) {
        {
            let mut state = self.state.lock();
            state.freeze();
            state.playing = false;
            state.failed = true;
        }
        self.notify(EngineEvent::Error { cause: cause.into() });
    }

    fn notify(&self, event: EngineEvent) {
        if self.notice_tx.send(Notice::Event(event)).is_err() {
            debug!("Simulated engine event thread is gone");
        }
    }

    fn set_playing(&self, playing: bool) {
        let changed = {
            let mut state = self.state.lock();
            if state.playing == playing {
                false
            } else {
                state.freeze();
                state.playing = playing;
                if playing {
                    state.anchor_at = Some(Instant::now());
                }
                true
            }
        };
        if changed {
            self.notify(EngineEvent::IsPlayingChanged(playing));
        }
    }

    fn event_loop(
        notices: Receiver<Notice>,
        state: Arc<Mutex<EngineState>>,
        sink: Arc<Mutex<Option<EngineEventSink>>>,
    ) {
        let deliver = |event: EngineEvent| {
            let current = sink.lock().clone();
            if let Some(sink) = current {
                sink.emit(event);
            }
        };

        loop {
            match notices.recv_timeout(END_CHECK_INTERVAL) {
                Ok(Notice::Event(event)) => deliver(event),
                Ok(Notice::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let ended = {
                        let mut state = state.lock();
                        if state.playing && state.at_end() {
                            state.freeze();
                            state.playing = false;
                            true
                        } else {
                            false
                        }
                    };
                    if ended {
                        debug!("Simulated engine reached end of media");
                        deliver(EngineEvent::IsPlayingChanged(false));
                    }
                }
            }
        }
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackEngine for SimulatedEngine {
    fn attach(&self, sink: EngineEventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn detach(&self) {
        *self.sink.lock() = None;
    }

    fn load(&self, uri: &str, metadata: &MediaMetadata) {
        let was_playing = {
            let mut state = self.state.lock();
            let was_playing = state.playing;
            *state = EngineState {
                item: Some(LoadedItem {
                    uri: uri.to_string(),
                    metadata: metadata.clone(),
                    duration_ms: None,
                }),
                ..EngineState::default()
            };
            was_playing
        };

        info!("Engine loaded {}", uri);
        if was_playing {
            self.notify(EngineEvent::IsPlayingChanged(false));
        }
        self.notify(EngineEvent::MediaItemTransition {
            id: Some(EpisodeId::from(uri)),
            reason: TransitionReason::PlaylistChanged,
        });
    }

    fn prepare(&self) {
        let mut state = self.state.lock();
        let Some(item) = state.item.as_mut() else {
            warn!("Engine asked to prepare with nothing loaded");
            return;
        };
        item.duration_ms = self.durations.lock().get(&item.uri).copied();
        state.prepared = true;
        state.failed = false;
    }

    fn play(&self) {
        {
            let state = self.state.lock();
            if !state.prepared || state.failed {
                warn!("Engine asked to play without a prepared item");
                return;
            }
            if state.at_end() {
                return;
            }
        }
        self.set_playing(true);
    }

    fn pause(&self) {
        self.set_playing(false);
    }

    fn resume(&self) {
        self.play();
    }

    fn seek_to(&self, position_ms: u64) {
        let mut state = self.state.lock();
        if state.item.is_some() {
            state.reanchor(position_ms);
        }
    }

    fn seek_relative(&self, delta_ms: i64) {
        let mut state = self.state.lock();
        if state.item.is_some() {
            let target = state.position().saturating_add_signed(delta_ms);
            state.reanchor(target);
        }
    }

    fn current_position(&self) -> u64 {
        self.state.lock().position()
    }

    fn duration(&self) -> Option<u64> {
        self.state.lock().item.as_ref().and_then(|item| item.duration_ms)
    }

    fn has_active_item(&self) -> bool {
        self.state.lock().item.is_some()
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let _ = self.notice_tx.send(Notice::Shutdown);
        if let Some(handle) = self.event_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

//! Playback session state machine
//!
//! [`PlaybackSession`] is pure: it never touches the engine or the
//! store. Each intent or engine event produces an ordered list of
//! [`Effect`]s which the controller executes front to back. Ordering is
//! the contract: when switching episodes, the pause and the final write
//! for the old episode always come before the load of the new one.

use crate::engine::{EngineCommand, EngineEvent, EngineSnapshot, MediaMetadata, TransitionReason};
use crate::player::{Intent, Phase, SeekDirection};
use crate::store::{Episode, EpisodeId, EpisodeUpdate};
use crate::utils::{clamp, Result, SessionConfig, SessionError};
use log::{debug, info};
use std::collections::VecDeque;

/// Loads whose transition events have not been seen yet
const PENDING_LOAD_LIMIT: usize = 8;

/// Consecutive ticks that must see a stopped engine before `Playing` yields
const STOPPED_TICK_LIMIT: u32 = 2;

/// Whether `position_ms` lies within the finished tail of the episode
///
/// An episode with unknown duration is never finished.
pub fn is_finished(position_ms: u64, duration_ms: Option<u64>, threshold_ms: u64) -> bool {
    match duration_ms {
        Some(duration) => position_ms > duration.saturating_sub(threshold_ms),
        None => false,
    }
}

/// Progress write for one episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistRequest {
    pub id: EpisodeId,
    pub update: EpisodeUpdate,
}

/// Side effect requested by the session, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Engine(EngineCommand),
    Persist(PersistRequest),
    StartTracking(EpisodeId),
    StopTracking,
}

/// Result of feeding one input to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub effects: Vec<Effect>,
    /// Phase reported back to the caller
    pub phase: Phase,
}

/// Outcome of one accepted position tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not playing; nothing to report
    Ignored,
    /// Position to report for the playing episode
    Position(u64),
    /// The engine stopped without a usable event and the session paused
    Stopped(Transition),
}

/// The authoritative session record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Episode loaded in the engine
    pub current: Option<Episode>,
    pub phase: Phase,
    /// Last observed position of `current`
    pub position_ms: u64,
    /// Duration of `current`, once known
    pub duration_ms: Option<u64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            current: None,
            phase: Phase::Idle,
            position_ms: 0,
            duration_ms: None,
        }
    }
}

impl SessionState {
    pub fn current_id(&self) -> Option<&EpisodeId> {
        self.current.as_ref().map(|episode| &episode.id)
    }
}

/// Playback session state machine
#[derive(Debug)]
pub struct PlaybackSession {
    state: SessionState,
    finished_threshold_ms: u64,
    resume_from_stored_position: bool,
    rewind_finished: bool,
    /// Set by a seek while playing; absorbs the engine's transient stop
    seek_guard: bool,
    /// Ticks in a row that saw the engine stopped while `Playing`
    stopped_ticks: u32,
    pending_loads: VecDeque<EpisodeId>,
}

impl PlaybackSession {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::default(),
            finished_threshold_ms: config.finished_threshold_ms,
            resume_from_stored_position: config.resume_from_stored_position,
            rewind_finished: config.rewind_finished,
            seek_guard: false,
            stopped_ticks: 0,
            pending_loads: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn current_id(&self) -> Option<&EpisodeId> {
        self.state.current_id()
    }

    /// Phase as seen by a UI displaying `id`
    pub fn phase_for(&self, id: &EpisodeId) -> Phase {
        if self.current_id() == Some(id) {
            self.state.phase
        } else {
            Phase::Idle
        }
    }

    /// Feed a user intent
    pub fn handle_intent(
        &mut self,
        intent: Intent,
        context: Option<&Episode>,
        snapshot: &EngineSnapshot,
    ) -> Transition {
        self.refresh(snapshot);

        match intent {
            Intent::Play(episode) => self.request_play(episode, snapshot),
            Intent::Prepare(episode) => self.request_prepare(episode, snapshot),
            _ if !self.targets_current(context) => {
                debug!("Ignoring {:?}: displayed episode is not the active one", intent);
                Transition {
                    effects: Vec::new(),
                    phase: Phase::Idle,
                }
            }
            Intent::Pause => self.request_pause(),
            Intent::Resume => self.request_resume(),
            Intent::Seek(target) => self.request_seek(target),
            Intent::SeekRelative { delta_ms, direction } => {
                self.request_seek_relative(delta_ms, direction)
            }
        }
    }

    /// Feed an engine-reported event
    pub fn handle_event(&mut self, event: EngineEvent, snapshot: &EngineSnapshot) -> Transition {
        self.refresh(snapshot);

        match event {
            EngineEvent::IsPlayingChanged(true) => self.engine_started(snapshot),
            EngineEvent::IsPlayingChanged(false) => self.engine_stopped(snapshot),
            EngineEvent::MediaItemTransition { id, reason } => {
                self.engine_transitioned(id, reason, snapshot)
            }
            EngineEvent::Error { .. } => self.engine_failed(),
        }
    }

    /// Record a polled position for `id`
    ///
    /// A `Playing` session whose engine stays stopped for
    /// `STOPPED_TICK_LIMIT` ticks is paused here, covering stops the
    /// seek guard absorbed and engines that refuse to play without an
    /// event. Fails with `StaleAttribution` when `id` is no longer the
    /// active episode.
    pub fn observe_tick(&mut self, id: &EpisodeId, snapshot: &EngineSnapshot) -> Result<TickOutcome> {
        if self.current_id() != Some(id) {
            return Err(SessionError::StaleAttribution {
                expected: self.current_id().cloned(),
                got: id.clone(),
            });
        }
        if !self.state.phase.is_playing() {
            return Ok(TickOutcome::Ignored);
        }

        self.refresh(snapshot);
        if snapshot.is_playing {
            self.seek_guard = false;
            self.stopped_ticks = 0;
            return Ok(TickOutcome::Position(self.state.position_ms));
        }

        self.stopped_ticks += 1;
        if self.stopped_ticks < STOPPED_TICK_LIMIT {
            return Ok(TickOutcome::Position(self.state.position_ms));
        }

        debug!("Engine stopped for {} ticks without an event", self.stopped_ticks);
        Ok(TickOutcome::Stopped(self.stop_playing()))
    }

    /// Periodic progress write for the playing episode
    pub fn checkpoint(&self) -> Option<PersistRequest> {
        match (self.state.phase, self.current_id()) {
            (Phase::Playing { position_ms }, Some(id)) => {
                Some(self.persist_request(id, position_ms, true))
            }
            _ => None,
        }
    }

    /// Quiesce the active episode and return to `Idle`
    pub fn release(&mut self, snapshot: &EngineSnapshot) -> Vec<Effect> {
        self.refresh(snapshot);
        let effects = self.quiesce(snapshot, true);
        self.state = SessionState::default();
        self.pending_loads.clear();
        effects
    }

    fn unchanged(&self) -> Transition {
        Transition {
            effects: Vec::new(),
            phase: self.state.phase,
        }
    }

    fn transition(&self, effects: Vec<Effect>) -> Transition {
        Transition {
            effects,
            phase: self.state.phase,
        }
    }

    fn targets_current(&self, context: Option<&Episode>) -> bool {
        match context {
            Some(episode) => self.current_id() == Some(&episode.id),
            None => true,
        }
    }

    /// Pull duration and, while playing, position from the engine
    fn refresh(&mut self, snapshot: &EngineSnapshot) {
        if self.state.current.is_none() || !snapshot.has_active_item {
            return;
        }
        if snapshot.duration_ms.is_some() {
            self.state.duration_ms = snapshot.duration_ms;
        }
        if self.state.phase.is_playing() {
            self.set_position(snapshot.position_ms);
        }
    }

    fn set_position(&mut self, position_ms: u64) {
        self.state.position_ms = position_ms;
        self.state.phase = self.state.phase.with_position(position_ms);
    }

    fn persist_request(&self, id: &EpisodeId, position_ms: u64, is_playing: bool) -> PersistRequest {
        let finished = is_finished(position_ms, self.state.duration_ms, self.finished_threshold_ms);
        let position_ms = if finished && self.rewind_finished { 0 } else { position_ms };
        PersistRequest {
            id: id.clone(),
            update: EpisodeUpdate {
                position_ms,
                is_playing,
                finished,
            },
        }
    }

    fn start_position(&self, episode: &Episode) -> u64 {
        let resumable = self.resume_from_stored_position
            && !episode.finished
            && episode.position_ms > 0
            && !is_finished(episode.position_ms, episode.duration_ms, self.finished_threshold_ms);
        if resumable {
            episode.position_ms
        } else {
            0
        }
    }

    /// Seek needed before replaying from `position_ms`, and the start
    ///
    /// A finished position restarts from 0.
    fn replay_effects(&self, position_ms: u64) -> (Vec<Effect>, u64) {
        if is_finished(position_ms, self.state.duration_ms, self.finished_threshold_ms) {
            (vec![Effect::Engine(EngineCommand::SeekTo(0))], 0)
        } else {
            (Vec::new(), position_ms)
        }
    }

    /// Stop attributing progress to the active episode and persist it
    ///
    /// Leaves the session `Idle`. Nothing is persisted from `Error`,
    /// the failure already wrote its best-effort record.
    fn quiesce(&mut self, snapshot: &EngineSnapshot, pause_engine: bool) -> Vec<Effect> {
        let Some(old) = self.state.current.take() else {
            return Vec::new();
        };

        let mut effects = vec![Effect::StopTracking];
        if self.state.phase != Phase::Error {
            if pause_engine && (self.state.phase.is_playing() || snapshot.is_playing) {
                effects.push(Effect::Engine(EngineCommand::Pause));
            }
            let position = self.state.position_ms;
            effects.push(Effect::Persist(self.persist_request(&old.id, position, false)));
            info!("Quiesced {} at {}ms", old.id, position);
        }

        self.state = SessionState::default();
        self.seek_guard = false;
        effects
    }

    /// Load `episode` into the engine, leaving the session `Ready`
    fn load(&mut self, episode: Episode) -> Vec<Effect> {
        let start = self.start_position(&episode);
        let mut effects = vec![
            Effect::Engine(EngineCommand::Load {
                uri: episode.id.as_str().to_string(),
                metadata: MediaMetadata::from(&episode),
            }),
            Effect::Engine(EngineCommand::Prepare),
        ];
        if start > 0 {
            effects.push(Effect::Engine(EngineCommand::SeekTo(start)));
        }

        if self.pending_loads.len() == PENDING_LOAD_LIMIT {
            self.pending_loads.pop_front();
        }
        self.pending_loads.push_back(episode.id.clone());

        info!("Loading {} at {}ms", episode.id, start);
        self.state = SessionState {
            duration_ms: episode.duration_ms,
            current: Some(episode),
            phase: Phase::Ready { position_ms: start },
            position_ms: start,
        };
        self.seek_guard = false;
        effects
    }

    /// Enter `Playing`, marking the episode as playing in the store
    fn enter_playing(&mut self, mut effects: Vec<Effect>, position_ms: u64) -> Transition {
        let Some(id) = self.current_id().cloned() else {
            return self.transition(effects);
        };

        self.state.phase = Phase::Playing { position_ms };
        self.state.position_ms = position_ms;
        self.stopped_ticks = 0;
        effects.push(Effect::Persist(self.persist_request(&id, position_ms, true)));
        effects.push(Effect::StartTracking(id));
        self.transition(effects)
    }

    fn request_play(&mut self, episode: Episode, snapshot: &EngineSnapshot) -> Transition {
        let same = self.current_id() == Some(&episode.id);

        match self.state.phase {
            Phase::Playing { .. } if same => {
                debug!("{} is already playing", episode.id);
                self.unchanged()
            }
            Phase::Ready { position_ms } | Phase::Paused { position_ms } if same => {
                let (mut effects, position_ms) = self.replay_effects(position_ms);
                if effects.is_empty() && position_ms > 0 {
                    effects.push(Effect::Engine(EngineCommand::SeekTo(position_ms)));
                }
                effects.push(Effect::Engine(EngineCommand::Play));
                self.enter_playing(effects, position_ms)
            }
            Phase::Seeking { target_ms } if same => {
                self.enter_playing(vec![Effect::Engine(EngineCommand::Play)], target_ms)
            }
            _ => {
                let mut effects = self.quiesce(snapshot, true);
                effects.extend(self.load(episode));
                effects.push(Effect::Engine(EngineCommand::Play));
                let start = self.state.position_ms;
                self.enter_playing(effects, start)
            }
        }
    }

    fn request_prepare(&mut self, episode: Episode, snapshot: &EngineSnapshot) -> Transition {
        if self.current_id() == Some(&episode.id) && self.state.phase != Phase::Error {
            debug!("{} is already loaded", episode.id);
            return self.unchanged();
        }

        let mut effects = self.quiesce(snapshot, true);
        effects.extend(self.load(episode));
        self.transition(effects)
    }

    fn request_pause(&mut self) -> Transition {
        let (Phase::Playing { position_ms }, Some(id)) = (self.state.phase, self.current_id()) else {
            debug!("Nothing playing to pause in {:?}", self.state.phase);
            return self.unchanged();
        };

        let effects = vec![
            Effect::Engine(EngineCommand::Pause),
            Effect::StopTracking,
            Effect::Persist(self.persist_request(id, position_ms, false)),
        ];
        self.state.phase = Phase::Paused { position_ms };
        self.seek_guard = false;
        self.transition(effects)
    }

    fn request_resume(&mut self) -> Transition {
        match self.state.phase {
            Phase::Paused { position_ms } => {
                let (mut effects, position_ms) = self.replay_effects(position_ms);
                effects.push(Effect::Engine(EngineCommand::Resume));
                self.enter_playing(effects, position_ms)
            }
            Phase::Ready { position_ms } => {
                let (mut effects, position_ms) = self.replay_effects(position_ms);
                if effects.is_empty() && position_ms > 0 {
                    effects.push(Effect::Engine(EngineCommand::SeekTo(position_ms)));
                }
                effects.push(Effect::Engine(EngineCommand::Play));
                self.enter_playing(effects, position_ms)
            }
            Phase::Seeking { target_ms } => {
                self.enter_playing(vec![Effect::Engine(EngineCommand::Play)], target_ms)
            }
            Phase::Idle | Phase::Playing { .. } | Phase::Error => self.unchanged(),
        }
    }

    fn request_seek(&mut self, target_ms: u64) -> Transition {
        let target_ms = match self.state.duration_ms {
            Some(duration) => target_ms.min(duration),
            None => target_ms,
        };

        match self.state.phase {
            Phase::Playing { .. } => {
                self.seek_guard = true;
                self.stopped_ticks = 0;
                self.set_position(target_ms);
            }
            Phase::Paused { .. } => self.set_position(target_ms),
            Phase::Ready { .. } | Phase::Seeking { .. } => {
                self.state.phase = Phase::Seeking { target_ms };
                self.state.position_ms = target_ms;
            }
            Phase::Idle | Phase::Error => return self.unchanged(),
        }

        self.transition(vec![Effect::Engine(EngineCommand::SeekTo(target_ms))])
    }

    fn request_seek_relative(&mut self, delta_ms: u64, direction: SeekDirection) -> Transition {
        if matches!(self.state.phase, Phase::Idle | Phase::Error) {
            return self.unchanged();
        }

        let base = self.state.position_ms;
        let target = match direction {
            SeekDirection::Forward => base.saturating_add(delta_ms),
            SeekDirection::Backward => base.saturating_sub(delta_ms),
        };
        let upper = self.state.duration_ms.unwrap_or(u64::MAX);
        self.request_seek(clamp(target, 0, upper))
    }

    fn engine_started(&mut self, snapshot: &EngineSnapshot) -> Transition {
        if !snapshot.is_playing {
            debug!("Stale start event, engine is not playing");
            return self.unchanged();
        }

        match self.state.phase {
            Phase::Playing { .. } => {
                self.seek_guard = false;
                match self.current_id().cloned() {
                    Some(id) => self.transition(vec![Effect::StartTracking(id)]),
                    None => self.unchanged(),
                }
            }
            Phase::Ready { .. } | Phase::Paused { .. } | Phase::Seeking { .. } => {
                info!("Engine resumed playback on its own");
                let position = if snapshot.has_active_item {
                    snapshot.position_ms
                } else {
                    self.state.position_ms
                };
                self.enter_playing(Vec::new(), position)
            }
            Phase::Idle | Phase::Error => self.unchanged(),
        }
    }

    fn engine_stopped(&mut self, snapshot: &EngineSnapshot) -> Transition {
        if !self.state.phase.is_playing() {
            return self.unchanged();
        }
        if snapshot.is_playing {
            debug!("Stale stop event, engine is playing again");
            return self.unchanged();
        }
        if self.seek_guard {
            debug!("Absorbing transient stop after seek");
            self.seek_guard = false;
            return self.unchanged();
        }

        self.stop_playing()
    }

    /// `Playing` to `Paused` after the engine stopped on its own
    fn stop_playing(&mut self) -> Transition {
        let (Phase::Playing { position_ms }, Some(id)) = (self.state.phase, self.current_id()) else {
            return self.unchanged();
        };

        info!("Engine stopped {} at {}ms", id, position_ms);
        let effects = vec![
            Effect::StopTracking,
            Effect::Persist(self.persist_request(id, position_ms, false)),
        ];
        self.state.phase = Phase::Paused { position_ms };
        self.seek_guard = false;
        self.stopped_ticks = 0;
        self.transition(effects)
    }

    fn engine_transitioned(
        &mut self,
        id: Option<EpisodeId>,
        reason: TransitionReason,
        snapshot: &EngineSnapshot,
    ) -> Transition {
        if let Some(id) = &id {
            if let Some(index) = self.pending_loads.iter().position(|pending| pending == id) {
                self.pending_loads.drain(..=index);
                return self.unchanged();
            }
            if self.current_id() == Some(id) {
                debug!("Engine transition within {} ({:?})", id, reason);
                return self.unchanged();
            }
        }
        if self.state.current.is_none() {
            return self.unchanged();
        }

        info!("Engine moved to {:?} ({:?}); releasing session item", id, reason);
        let effects = self.quiesce(snapshot, false);
        self.transition(effects)
    }

    fn engine_failed(&mut self) -> Transition {
        let mut effects = vec![Effect::StopTracking];
        if self.state.phase != Phase::Error {
            if let Some(id) = self.current_id() {
                effects.push(Effect::Persist(self.persist_request(
                    id,
                    self.state.position_ms,
                    false,
                )));
            }
        }
        self.state.phase = Phase::Error;
        self.seek_guard = false;
        self.transition(effects)
    }
}

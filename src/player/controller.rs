//! Session controller implementation for podsession
//!
//! The [`SessionController`] owns the playback session on a dedicated
//! tokio task. User intents, engine events and position ticks all
//! arrive as messages on one queue and are handled one at a time, so
//! the state machine never observes interleaved inputs. Engine events
//! may be emitted from any thread; they are stamped with the connection
//! epoch and anything from an old connection is dropped.

use crate::engine::{EngineEvent, EngineEventSink, EngineSnapshot, PlaybackEngine};
use crate::player::{
    Effect, Intent, PersistThrottle, PersistenceQueue, Phase, PlaybackSession, PositionTracker,
    SessionState, TickOutcome,
};
use crate::store::{Episode, EpisodeId, EpisodeStore};
use crate::utils::error::{Result, SessionError};
use crate::utils::SessionConfig;
use log::{debug, error, info, warn};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receives position updates for the playing episode
pub trait PositionListener: Send {
    fn on_position(&mut self, id: &EpisodeId, position_ms: u64);
}

impl<F> PositionListener for F
where
    F: FnMut(&EpisodeId, u64) + Send,
{
    fn on_position(&mut self, id: &EpisodeId, position_ms: u64) {
        self(id, position_ms)
    }
}

/// Internal controller message
enum Message {
    Connect {
        engine: Arc<dyn PlaybackEngine>,
        reply: oneshot::Sender<()>,
    },
    Submit {
        intent: Intent,
        context: Option<Episode>,
        reply: oneshot::Sender<Phase>,
    },
    Bind(Box<dyn PositionListener>),
    Unbind,
    Query {
        id: EpisodeId,
        reply: oneshot::Sender<Phase>,
    },
    State(oneshot::Sender<SessionState>),
    Release(oneshot::Sender<()>),
    Engine {
        epoch: u64,
        event: EngineEvent,
    },
    Tick {
        id: EpisodeId,
        generation: u64,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the session actor
pub struct SessionController {
    tx: mpsc::UnboundedSender<Message>,
    task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Spawn the session actor; must be called inside a tokio runtime
    pub fn new(store: Arc<dyn EpisodeStore>, config: &SessionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            session: PlaybackSession::new(config),
            engine: None,
            epoch: 0,
            tracker: PositionTracker::new(config.poll_interval()),
            throttle: PersistThrottle::new(config.persist_interval()),
            persistence: PersistenceQueue::new(store),
            listener: None,
            mailbox: tx.downgrade(),
        };
        let task = tokio::spawn(actor.run(rx));

        Self {
            tx,
            task: Some(task),
        }
    }

    /// Attach a playback engine, releasing any previously connected one
    pub async fn connect(&self, engine: Arc<dyn PlaybackEngine>) -> Result<()> {
        self.call(|reply| Message::Connect { engine, reply }).await
    }

    /// Submit a user intent and return the resulting phase
    ///
    /// `context` is the episode the caller is displaying; intents other
    /// than play or prepare are ignored when it is not the active one.
    pub async fn submit(&self, intent: Intent, context: Option<Episode>) -> Phase {
        match self
            .call(|reply| Message::Submit {
                intent,
                context,
                reply,
            })
            .await
        {
            Ok(phase) => phase,
            Err(e) => {
                error!("{}", e);
                Phase::Error
            }
        }
    }

    /// Route position updates to `listener`, replacing any previous one
    pub fn bind<L>(&self, listener: L)
    where
        L: PositionListener + 'static,
    {
        self.post(Message::Bind(Box::new(listener)));
    }

    pub fn unbind(&self) {
        self.post(Message::Unbind);
    }

    /// Phase as seen by a UI displaying `id`
    pub async fn query_state(&self, id: &EpisodeId) -> Phase {
        let id = id.clone();
        match self.call(|reply| Message::Query { id, reply }).await {
            Ok(phase) => phase,
            Err(e) => {
                error!("{}", e);
                Phase::Error
            }
        }
    }

    /// Copy of the full session record
    pub async fn state(&self) -> Result<SessionState> {
        self.call(Message::State).await
    }

    /// Quiesce the session and detach the engine; idempotent
    pub async fn release(&self) -> Result<()> {
        self.call(Message::Release).await
    }

    /// Release the session and wait until every queued write is stored
    pub async fn shutdown(mut self) -> Result<()> {
        self.call(Message::Shutdown).await?;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SessionError::Store(format!("session task failed: {}", e)))?;
        }
        Ok(())
    }

    fn post(&self, message: Message) {
        if self.tx.send(message).is_err() {
            error!("{}", SessionError::ControllerClosed);
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| SessionError::ControllerClosed)?;
        response.await.map_err(|_| SessionError::ControllerClosed)
    }
}

/// State owned by the controller task
struct SessionActor {
    session: PlaybackSession,
    engine: Option<Arc<dyn PlaybackEngine>>,
    /// Bumped on every connect and release
    epoch: u64,
    tracker: PositionTracker,
    throttle: PersistThrottle,
    persistence: PersistenceQueue,
    listener: Option<Box<dyn PositionListener>>,
    mailbox: mpsc::WeakUnboundedSender<Message>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        info!("Session controller started");

        while let Some(message) = rx.recv().await {
            if let ControlFlow::Break(reply) = self.handle(message) {
                self.finish().await;
                let _ = reply.send(());
                return;
            }
        }

        debug!("All controller handles dropped");
        self.finish().await;
    }

    async fn finish(&mut self) {
        self.release();
        self.listener = None;
        self.persistence.close().await;
        info!("Session controller stopped");
    }

    /// Breaks with the reply channel once shutdown is requested
    fn handle(&mut self, message: Message) -> ControlFlow<oneshot::Sender<()>> {
        match message {
            Message::Connect { engine, reply } => {
                self.connect(engine);
                let _ = reply.send(());
            }
            Message::Submit {
                intent,
                context,
                reply,
            } => {
                let phase = self.submit(intent, context);
                let _ = reply.send(phase);
            }
            Message::Bind(listener) => self.listener = Some(listener),
            Message::Unbind => self.listener = None,
            Message::Query { id, reply } => {
                let _ = reply.send(self.session.phase_for(&id));
            }
            Message::State(reply) => {
                let _ = reply.send(self.session.state().clone());
            }
            Message::Release(reply) => {
                self.release();
                let _ = reply.send(());
            }
            Message::Engine { epoch, event } => self.on_engine_event(epoch, event),
            Message::Tick { id, generation } => self.on_tick(id, generation),
            Message::Shutdown(reply) => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    fn connect(&mut self, engine: Arc<dyn PlaybackEngine>) {
        if self.engine.is_some() {
            self.release();
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let mailbox = self.mailbox.clone();
        engine.attach(EngineEventSink::new(move |event| match mailbox.upgrade() {
            Some(tx) => tx.send(Message::Engine { epoch, event }).is_ok(),
            None => false,
        }));

        self.engine = Some(engine);
        info!("Playback engine connected (epoch {})", epoch);
    }

    fn release(&mut self) {
        let Some(engine) = self.engine.take() else {
            debug!("Session already released");
            return;
        };

        let before = self.session.phase();
        let snapshot = EngineSnapshot::capture(engine.as_ref());
        let effects = self.session.release(&snapshot);
        self.execute(engine.as_ref(), effects);

        self.tracker.stop();
        self.throttle.reset();
        engine.detach();
        self.epoch += 1;

        self.log_phase_change(before);
        info!("Playback engine released");
    }

    fn submit(&mut self, intent: Intent, context: Option<Episode>) -> Phase {
        let Some(engine) = self.engine.clone() else {
            warn!("{}; ignoring {:?}", SessionError::EngineNotReady, intent);
            return self.session.phase();
        };

        let before = self.session.phase();
        let snapshot = EngineSnapshot::capture(engine.as_ref());
        let transition = self.session.handle_intent(intent, context.as_ref(), &snapshot);
        self.execute(engine.as_ref(), transition.effects);
        self.log_phase_change(before);
        transition.phase
    }

    fn on_engine_event(&mut self, epoch: u64, event: EngineEvent) {
        if epoch != self.epoch {
            debug!("Dropping {:?} from connection epoch {}", event, epoch);
            return;
        }
        let Some(engine) = self.engine.clone() else {
            return;
        };

        if let EngineEvent::Error { cause } = &event {
            error!("{}", SessionError::EngineFatal(cause.clone()));
        }

        let before = self.session.phase();
        let snapshot = EngineSnapshot::capture(engine.as_ref());
        let transition = self.session.handle_event(event, &snapshot);
        self.execute(engine.as_ref(), transition.effects);
        self.log_phase_change(before);
    }

    fn on_tick(&mut self, id: EpisodeId, generation: u64) {
        if !self.tracker.accepts(generation) {
            debug!("Dropping stale tick for {} (generation {})", id, generation);
            return;
        }
        let Some(engine) = self.engine.clone() else {
            return;
        };

        let before = self.session.phase();
        let snapshot = EngineSnapshot::capture(engine.as_ref());
        match self.session.observe_tick(&id, &snapshot) {
            Ok(TickOutcome::Position(position_ms)) => {
                if let Some(listener) = self.listener.as_mut() {
                    listener.on_position(&id, position_ms);
                }

                let now = Instant::now();
                if self.throttle.ready(now) {
                    if let Some(request) = self.session.checkpoint() {
                        self.throttle.mark(now);
                        self.persistence.enqueue(request);
                    }
                }
            }
            Ok(TickOutcome::Stopped(transition)) => {
                self.execute(engine.as_ref(), transition.effects);
                self.log_phase_change(before);
            }
            Ok(TickOutcome::Ignored) => {}
            Err(e) => warn!("{}", e),
        }
    }

    /// Run effects front to back
    fn execute(&mut self, engine: &dyn PlaybackEngine, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Engine(command) => {
                    debug!("Engine command: {:?}", command);
                    command.apply_to(engine);
                }
                Effect::Persist(request) => {
                    if self.session.current_id() == Some(&request.id) {
                        self.throttle.mark(Instant::now());
                    }
                    self.persistence.enqueue(request);
                }
                Effect::StartTracking(id) => self.start_tracking(id),
                Effect::StopTracking => {
                    self.tracker.stop();
                    self.throttle.reset();
                }
            }
        }
    }

    fn start_tracking(&mut self, id: EpisodeId) {
        let mailbox = self.mailbox.clone();
        self.tracker.start(id, move |id, generation| match mailbox.upgrade() {
            Some(tx) => tx.send(Message::Tick { id, generation }).is_ok(),
            None => false,
        });
    }

    fn log_phase_change(&self, before: Phase) {
        let after = self.session.phase();
        if after != before {
            info!("Session {} -> {}", before, after);
        }
    }
}

//! Position polling and persist throttling

use crate::store::EpisodeId;
use log::debug;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Periodic position poller bound to one episode at a time
///
/// Each start bumps a generation counter that is handed to every tick.
/// Ticks carrying an older generation were already in flight when the
/// tracker was restarted and must be dropped by the receiver.
#[derive(Debug)]
pub struct PositionTracker {
    period: Duration,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl PositionTracker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: None,
            generation: 0,
        }
    }

    /// Start ticking for `id`, cancelling any running task first
    ///
    /// `on_tick` receives the episode and generation; returning false
    /// ends the task. Must be called inside a tokio runtime.
    pub fn start<F>(&mut self, id: EpisodeId, on_tick: F) -> u64
    where
        F: Fn(EpisodeId, u64) -> bool + Send + 'static,
    {
        self.stop();
        self.generation += 1;

        let generation = self.generation;
        let period = self.period;
        debug!("Tracking {} (generation {})", id, generation);

        self.task = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !on_tick(id.clone(), generation) {
                    break;
                }
            }
        }));
        generation
    }

    /// Cancel the running task, if any
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Stopped tracking (generation {})", self.generation);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a tick of `generation` belongs to the running task
    pub fn accepts(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }
}

impl Drop for PositionTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Rate limit for periodic progress writes
#[derive(Debug, Clone)]
pub struct PersistThrottle {
    every: Duration,
    last: Option<Instant>,
}

impl PersistThrottle {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }

    /// Whether a write at `now` is due
    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.every,
            None => true,
        }
    }

    /// Record a write at `now`
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

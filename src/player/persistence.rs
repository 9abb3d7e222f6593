//! Ordered progress writes
//!
//! Writes are handed to a single worker task and applied strictly in
//! submission order, so a later write for an episode can never be
//! overtaken by an earlier one.

use crate::player::PersistRequest;
use crate::store::EpisodeStore;
use crate::utils::SessionError;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// FIFO queue of store updates
#[derive(Debug)]
pub struct PersistenceQueue {
    tx: Option<mpsc::UnboundedSender<PersistRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl PersistenceQueue {
    /// Spawn the worker; must be called inside a tokio runtime
    pub fn new(store: Arc<dyn EpisodeStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistRequest>();

        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                Self::write(store.as_ref(), request).await;
            }
            debug!("Persistence queue drained");
        });

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queue a write without waiting for it
    pub fn enqueue(&self, request: PersistRequest) {
        let Some(tx) = &self.tx else {
            warn!("Persistence queue closed; dropping write for {}", request.id);
            return;
        };
        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
            error!("Persistence worker is gone; dropping write for {}", request.id);
        }
    }

    /// Stop accepting writes and wait for queued ones to finish
    pub async fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("Persistence worker failed: {}", e);
            }
        }
    }

    async fn write(store: &dyn EpisodeStore, request: PersistRequest) {
        match store.update(&request.id, request.update).await {
            Ok(()) => debug!(
                "Persisted {} at {}ms (playing: {})",
                request.id, request.update.position_ms, request.update.is_playing
            ),
            Err(e) => match SessionError::from(e) {
                miss @ SessionError::StoreMiss(_) => warn!("{}; write dropped", miss),
                other => error!("Failed to persist {}: {}", request.id, other),
            },
        }
    }
}

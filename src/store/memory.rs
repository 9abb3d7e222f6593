//! In-memory episode store

use super::{Episode, EpisodeId, EpisodeStore, EpisodeUpdate, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Episode store backed by a map, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryEpisodeStore {
    episodes: RwLock<HashMap<EpisodeId, Episode>>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_episodes(episodes: impl IntoIterator<Item = Episode>) -> Self {
        let store = Self::new();
        for episode in episodes {
            store.insert(episode);
        }
        store
    }

    /// Insert or replace a record
    pub fn insert(&self, episode: Episode) {
        self.episodes.write().insert(episode.id.clone(), episode);
    }

    pub fn remove(&self, id: &EpisodeId) -> Option<Episode> {
        self.episodes.write().remove(id)
    }

    /// Synchronous snapshot of one record
    pub fn snapshot(&self, id: &EpisodeId) -> Option<Episode> {
        self.episodes.read().get(id).cloned()
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn get(&self, id: &EpisodeId) -> Result<Episode, StoreError> {
        self.snapshot(id).ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(&self, id: &EpisodeId, update: EpisodeUpdate) -> Result<(), StoreError> {
        let mut episodes = self.episodes.write();
        let episode = episodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        episode.apply(&update);
        Ok(())
    }
}

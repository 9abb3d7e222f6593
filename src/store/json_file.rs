//! Episode store persisted as a JSON file
//!
//! The whole file is rewritten on every update. Writes go to a sibling
//! temp file and are renamed into place so a crash never leaves a
//! truncated store behind.

use super::{Episode, EpisodeId, EpisodeStore, EpisodeUpdate, StoreError};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    episodes: BTreeMap<EpisodeId, Episode>,
}

/// JSON-backed episode store
pub struct JsonFileEpisodeStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl JsonFileEpisodeStore {
    /// Open a store at `path`; the file is created on first write
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a record
    pub async fn insert(&self, episode: Episode) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        file.episodes.insert(episode.id.clone(), episode);
        self.write(&file).await
    }

    /// All records, ordered by id
    pub async fn list(&self) -> Result<Vec<Episode>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.episodes.into_values().collect())
    }

    async fn read(&self) -> Result<StoreFile, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &StoreFile) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} episodes to {:?}", file.episodes.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for JsonFileEpisodeStore {
    async fn get(&self, id: &EpisodeId) -> Result<Episode, StoreError> {
        let _guard = self.lock.lock().await;
        self.read()
            .await?
            .episodes
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(&self, id: &EpisodeId, update: EpisodeUpdate) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let episode = file
            .episodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        episode.apply(&update);
        self.write(&file).await
    }
}

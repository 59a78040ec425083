//! Local JSON file persistence, with a timestamped backup of the previous
//! `games.json` taken before every overwrite.
//!
//! Grounded on `examples/original_source/updater/kv_helper.py`'s local-mode
//! branch and `main.py::save_and_backup`. The Python backs up *after*
//! overwriting the live file, which would copy the new (not the previous)
//! contents into `backups/` — treated here as a bug in the predecessor and
//! not reproduced; this implementation snapshots before it writes, per the
//! "snapshot the previous file" requirement.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::info;

use crate::models::{CatalogMeta, GameRecord, IdMap};

use super::Adapter;

pub struct LocalAdapter {
    current_dir: PathBuf,
    backups_dir: PathBuf,
}

impl LocalAdapter {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        LocalAdapter {
            current_dir: data_dir.join("current"),
            backups_dir: data_dir.join("backups"),
        }
    }

    fn id_map_path(&self) -> PathBuf {
        self.current_dir.join("id-map.json")
    }

    fn games_path(&self) -> PathBuf {
        self.current_dir.join("games.json")
    }

    async fn backup_games_file(&self) -> Result<()> {
        let source = self.games_path();
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Ok(());
        }
        fs::create_dir_all(&self.backups_dir)
            .await
            .context("failed to create backups directory")?;
        let stamp = Utc::now().format("%Y_%m_%d_%H%M%S");
        let backup_path = self.backups_dir.join(format!("games_{stamp}.json"));
        fs::copy(&source, &backup_path)
            .await
            .with_context(|| format!("failed to back up {} to {}", source.display(), backup_path.display()))?;
        info!(backup = %backup_path.display(), "backed up previous catalog");
        Ok(())
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    async fn get_id_map(&self) -> Result<IdMap> {
        let path = self.id_map_path();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            info!(path = %path.display(), "id-map file not found, returning empty list");
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).context("failed to parse id-map.json")
    }

    async fn get_games_data(&self) -> Result<Vec<GameRecord>> {
        let path = self.games_path();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            info!(path = %path.display(), "games file not found, returning empty list");
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let read: crate::models::CatalogRead =
            serde_json::from_slice(&bytes).context("failed to parse games.json")?;
        Ok(read.games)
    }

    async fn get_catalog_meta(&self) -> Result<Option<CatalogMeta>> {
        let path = self.games_path();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let read: crate::models::CatalogRead =
            serde_json::from_slice(&bytes).context("failed to parse games.json")?;
        Ok(read.meta)
    }

    async fn put_id_map(&self, id_map: &IdMap) -> Result<()> {
        fs::create_dir_all(&self.current_dir)
            .await
            .context("failed to create current data directory")?;
        let path = self.id_map_path();
        let json = serde_json::to_vec_pretty(id_map).context("failed to serialize id-map")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), count = id_map.len(), "saved id-map");
        Ok(())
    }

    async fn put_games_data(&self, games: &[GameRecord], last_updated: DateTime<Utc>) -> Result<()> {
        self.backup_games_file().await?;

        fs::create_dir_all(&self.current_dir)
            .await
            .context("failed to create current data directory")?;
        let path = self.games_path();
        let envelope = crate::models::CatalogEnvelope::new(games.to_vec(), last_updated);
        let json = serde_json::to_vec_pretty(&envelope).context("failed to serialize games data")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), count = games.len(), "saved games data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdMapEntry;

    #[tokio::test]
    async fn round_trips_id_map() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new(dir.path());
        let id_map = vec![IdMapEntry {
            id: "620".to_string(),
            itad_id: Some("abc".to_string()),
        }];
        adapter.put_id_map(&id_map).await.unwrap();
        let loaded = adapter.get_id_map().await.unwrap();
        assert_eq!(loaded, id_map);
    }

    #[tokio::test]
    async fn missing_files_return_empty() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new(dir.path());
        assert!(adapter.get_id_map().await.unwrap().is_empty());
        assert!(adapter.get_games_data().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backup_snapshots_the_previous_file_before_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        adapter.put_games_data(&[], Utc::now()).await.unwrap();
        let original_contents = fs::read_to_string(adapter.games_path()).await.unwrap();

        adapter.backup_games_file().await.unwrap();
        let backups: Vec<_> = std::fs::read_dir(&adapter.backups_dir).unwrap().collect();
        assert_eq!(backups.len(), 1);
        let backup_contents = fs::read_to_string(backups[0].as_ref().unwrap().path())
            .await
            .unwrap();
        assert_eq!(backup_contents, original_contents);
    }
}

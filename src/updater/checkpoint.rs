//! Batch sub-mode bookkeeping: the lock file, checkpoint shards, and
//! shard concatenation used when an append run has ≥1000 new ids.
//!
//! The paths and the 1000-record threshold come from `constants.py`
//! (`BATCH_DIR`, `CHECKPOINT_DIR`, `BATCH_LOCK_FILE`,
//! `CHECKPOINT_INTERVAL`); the lock-file and checkpoint-shard format
//! itself isn't in the retrieved Python and is specified fresh from
//! spec.md §4.5/§6.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::models::GameRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub start_time: DateTime<Utc>,
    pub log_file: String,
}

pub async fn write_lock(path: &Path, lock: &LockFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(lock).context("failed to serialize lock file")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("failed to write lock file {}", path.display()))
}

pub async fn read_lock(path: &Path) -> Result<Option<LockFile>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("failed to parse lock file")?,
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("failed to read lock file"),
    }
}

pub async fn remove_lock(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("failed to remove lock file"),
    }
}

fn shard_path(dir: &Path, count: usize) -> PathBuf {
    dir.join(format!("games_checkpoint_{count}.json"))
}

fn parse_shard_count(name: &str) -> Option<usize> {
    name.strip_prefix("games_checkpoint_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Writes a shard named by `total_count`, the cumulative number of
/// records processed so far (not the shard's own length).
pub async fn write_shard(dir: &Path, total_count: usize, records: &[GameRecord]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = shard_path(dir, total_count);
    let json = serde_json::to_vec_pretty(records).context("failed to serialize checkpoint shard")?;
    fs::write(&path, json)
        .await
        .with_context(|| format!("failed to write shard {}", path.display()))?;
    Ok(path)
}

/// Highest-numbered shard under `dir`, if any, so a restarted append run
/// knows how many leading ids to skip.
pub async fn latest_checkpoint(dir: &Path) -> Result<Option<(usize, Vec<GameRecord>)>> {
    if !fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(None);
    }
    let mut best: Option<usize> = None;
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(n) = parse_shard_count(&entry.file_name().to_string_lossy()) {
            if best.map(|b| n > b).unwrap_or(true) {
                best = Some(n);
            }
        }
    }
    let Some(count) = best else { return Ok(None) };
    let path = shard_path(dir, count);
    let bytes = fs::read(&path)
        .await
        .with_context(|| format!("failed to read shard {}", path.display()))?;
    let records = serde_json::from_slice(&bytes).context("failed to parse checkpoint shard")?;
    Ok(Some((count, records)))
}

/// Concatenates every shard under `dir` (sorted by count) plus `tail`,
/// skipping any record whose id is already in `existing_ids` (guards
/// against a restart re-rolling an id that an earlier shard already
/// captured).
pub async fn concatenate_shards(
    dir: &Path,
    tail: Vec<GameRecord>,
    existing_ids: &HashSet<String>,
) -> Result<Vec<GameRecord>> {
    let mut counts = Vec::new();
    if fs::try_exists(dir).await.unwrap_or(false) {
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to read {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(n) = parse_shard_count(&entry.file_name().to_string_lossy()) {
                counts.push(n);
            }
        }
    }
    counts.sort_unstable();

    let mut seen = existing_ids.clone();
    let mut merged = Vec::new();
    for count in counts {
        let path = shard_path(dir, count);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("failed to read shard {}", path.display()))?;
        let records: Vec<GameRecord> =
            serde_json::from_slice(&bytes).context("failed to parse checkpoint shard")?;
        for record in records {
            if seen.insert(record.id.clone()) {
                merged.push(record);
            }
        }
    }
    for record in tail {
        if seen.insert(record.id.clone()) {
            merged.push(record);
        }
    }
    Ok(merged)
}

pub async fn clear_checkpoints(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("failed to clear checkpoint dir"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_record(id: &str) -> GameRecord {
        GameRecord {
            id: id.to_string(),
            itad_id: None,
            title: id.to_string(),
            store_url: String::new(),
            image_url: String::new(),
            release_date: String::new(),
            review_score: String::new(),
            genres: vec![],
            tags: vec![],
            developers: vec![],
            publishers: vec![],
            platforms: Default::default(),
            supported_languages: String::new(),
            deal: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn lock_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_in_progress.lock");
        let lock = LockFile {
            start_time: Utc::now(),
            log_file: "rebuild_in_progress.log".to_string(),
        };
        write_lock(&path, &lock).await.unwrap();
        let read = read_lock(&path).await.unwrap().unwrap();
        assert_eq!(read.log_file, lock.log_file);
        remove_lock(&path).await.unwrap();
        assert!(read_lock(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finds_highest_numbered_shard() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), 1000, &[sample_record("1")]).await.unwrap();
        write_shard(dir.path(), 2000, &[sample_record("2")]).await.unwrap();
        let (count, records) = latest_checkpoint(dir.path()).await.unwrap().unwrap();
        assert_eq!(count, 2000);
        assert_eq!(records[0].id, "2");
    }

    #[tokio::test]
    async fn concatenate_dedupes_against_existing() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), 1000, &[sample_record("1"), sample_record("2")])
            .await
            .unwrap();
        let existing: HashSet<String> = ["2".to_string()].into_iter().collect();
        let merged = concatenate_shards(dir.path(), vec![sample_record("3")], &existing)
            .await
            .unwrap();
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}

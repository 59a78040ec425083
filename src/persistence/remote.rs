//! Remote KV persistence, driving a CLI binary (wrangler by default) as a
//! subprocess.
//!
//! Grounded on `examples/original_source/updater/kv_helper.py`'s KV-mode
//! branch: namespace id resolution via env var or a CLI listing call, a
//! temp-file write followed by `<cli> kv key put ... --path=<file>
//! --remote`, and a plain `<cli> kv key get ... --remote` for reads.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::info;
use uuid::Uuid;

use crate::models::{CatalogMeta, GameRecord, IdMap};

use super::Adapter;

const KV_BINDING_NAME: &str = "GSV_GAMES";

pub struct RemoteAdapter {
    cli: String,
    namespace_id: String,
    temp_dir: PathBuf,
}

impl RemoteAdapter {
    pub async fn new(cli: String, namespace_id: Option<String>) -> Result<Self> {
        let namespace_id = match namespace_id {
            Some(id) => id,
            None => Self::resolve_namespace_id(&cli, KV_BINDING_NAME).await?,
        };
        Ok(RemoteAdapter {
            cli,
            namespace_id,
            temp_dir: std::env::temp_dir(),
        })
    }

    async fn resolve_namespace_id(cli: &str, binding: &str) -> Result<String> {
        info!(binding, "fetching namespace id from CLI");
        let output = Command::new(cli)
            .args(["kv", "namespace", "list"])
            .output()
            .await
            .with_context(|| format!("failed to run `{cli} kv namespace list`"))?;
        if !output.status.success() {
            bail!(
                "`{cli} kv namespace list` failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        let namespaces: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)
            .context("failed to parse namespace list JSON")?;
        for ns in &namespaces {
            if ns.get("title").and_then(|t| t.as_str()) == Some(binding) {
                let id = ns
                    .get("id")
                    .and_then(|i| i.as_str())
                    .context("namespace entry missing id")?;
                return Ok(id.to_string());
            }
        }
        bail!("namespace for binding '{binding}' not found")
    }

    async fn get_key(&self, key: &str) -> Result<Vec<u8>> {
        let output = Command::new(&self.cli)
            .args([
                "kv",
                "key",
                "get",
                key,
                &format!("--namespace-id={}", self.namespace_id),
                "--remote",
            ])
            .output()
            .await
            .with_context(|| format!("failed to run `{} kv key get {key}`", self.cli))?;
        if !output.status.success() {
            bail!(
                "`{} kv key get {key}` failed: {}",
                self.cli,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(output.stdout)
    }

    async fn put_key(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let temp_file = self.temp_dir.join(format!("{key}-{}.json", Uuid::new_v4()));
        tokio::fs::write(&temp_file, bytes)
            .await
            .with_context(|| format!("failed to write temp file {}", temp_file.display()))?;

        let result = Command::new(&self.cli)
            .args([
                "kv",
                "key",
                "put",
                key,
                &format!("--namespace-id={}", self.namespace_id),
                &format!("--path={}", temp_file.display()),
                "--remote",
            ])
            .output()
            .await
            .with_context(|| format!("failed to run `{} kv key put {key}`", self.cli));

        let _ = tokio::fs::remove_file(&temp_file).await;

        let output = result?;
        if !output.status.success() {
            bail!(
                "`{} kv key put {key}` failed: {}",
                self.cli,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for RemoteAdapter {
    async fn get_id_map(&self) -> Result<IdMap> {
        let bytes = self.get_key("id-map").await?;
        serde_json::from_slice(&bytes).context("failed to parse id-map from KV")
    }

    async fn get_games_data(&self) -> Result<Vec<GameRecord>> {
        let bytes = self.get_key("games-data").await?;
        let read: crate::models::CatalogRead =
            serde_json::from_slice(&bytes).context("failed to parse games-data from KV")?;
        Ok(read.games)
    }

    async fn get_catalog_meta(&self) -> Result<Option<CatalogMeta>> {
        let bytes = match self.get_key("games-data").await {
            Ok(b) => b,
            Err(_) => return Ok(None),
        };
        let read: crate::models::CatalogRead =
            serde_json::from_slice(&bytes).context("failed to parse games-data from KV")?;
        Ok(read.meta)
    }

    async fn put_id_map(&self, id_map: &IdMap) -> Result<()> {
        let json = serde_json::to_vec_pretty(id_map).context("failed to serialize id-map")?;
        self.put_key("id-map", &json).await?;
        info!(count = id_map.len(), "saved id-map to KV");
        Ok(())
    }

    async fn put_games_data(&self, games: &[GameRecord], last_updated: DateTime<Utc>) -> Result<()> {
        let envelope = crate::models::CatalogEnvelope::new(games.to_vec(), last_updated);
        let json = serde_json::to_vec_pretty(&envelope).context("failed to serialize games data")?;
        self.put_key("games-data", &json).await?;
        info!(count = games.len(), "saved games-data to KV");
        Ok(())
    }
}

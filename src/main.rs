//! Entry point: parses CLI args, assembles `Config`, picks a persistence
//! adapter, and dispatches to the requested update mode.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_updater::config::{Config, PersistenceMode, PRICEHISTORY_RATE_DEFAULTS, STOREFRONT_RATE_DEFAULTS};
use catalog_updater::persistence::{local::LocalAdapter, remote::RemoteAdapter, Adapter};
use catalog_updater::rate::RateController;
use catalog_updater::updater::Updater;
use catalog_updater::upstream::{PriceHistoryClient, StorefrontClient};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_updater=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = cli::Args::parse();

    let regions = cli::parse_regions(&args.regions);
    let persistence_mode = if args.kv || std::env::var("GITHUB_ACTIONS").as_deref() == Ok("true") {
        PersistenceMode::Remote
    } else {
        PersistenceMode::Local
    };

    let config = Config {
        api_key: args.api_key.clone(),
        regions,
        persistence_mode,
        kv_cli: args.kv_cli.clone(),
        chunk_size: args.chunk_size,
        data_dir: args.data_dir.clone(),
    };

    let adapter: Arc<dyn Adapter> = match config.persistence_mode {
        PersistenceMode::Local => Arc::new(LocalAdapter::new(&config.data_dir)),
        PersistenceMode::Remote => {
            let namespace_id = std::env::var("KV_NAMESPACE_ID").ok();
            Arc::new(
                RemoteAdapter::new(config.kv_cli.clone(), namespace_id)
                    .await
                    .context("failed to initialize remote KV adapter")?,
            )
        }
    };

    let storefront_rate = Arc::new(RateController::new("store.steampowered.com", STOREFRONT_RATE_DEFAULTS));
    let pricehistory_rate = Arc::new(RateController::new("api.isthereanydeal.com", PRICEHISTORY_RATE_DEFAULTS));

    let storefront = Arc::new(StorefrontClient::new(storefront_rate).context("failed to build storefront client")?);
    let pricehistory = Arc::new(
        PriceHistoryClient::new(Some(config.api_key.clone()), pricehistory_rate)
            .context("failed to build price-history client")?,
    );

    let updater = Updater::new(config.clone(), storefront, pricehistory, adapter);

    if args.reset_prices {
        let touched = updater.run_reset_prices().await.context("reset-prices failed")?;
        info!(touched, "reset-prices complete");
        return Ok(());
    }

    if args.delete {
        let removed = updater.run_delete().await.context("delete failed")?;
        info!(removed, "delete complete");
        return Ok(());
    }

    if args.append {
        let title_file = config.title_list_path();
        let report = updater.run_append(&title_file).await.context("append failed")?;
        info!(
            new_ids = report.new_ids,
            added = report.added,
            failed = report.failed_games.len(),
            aborted = report.aborted,
            "append complete"
        );
        if report.aborted {
            anyhow::bail!("append aborted: {} failed record(s)", report.failed_games.len());
        }
        return Ok(());
    }

    let report = updater.run_diff_refresh().await.context("diff-refresh failed")?;
    info!(
        checked = report.checked,
        updated = report.updated,
        failed = report.failed_games.len(),
        aborted = report.aborted,
        "diff-refresh complete"
    );
    if report.aborted {
        anyhow::bail!("diff-refresh aborted: {} failed record(s)", report.failed_games.len());
    }
    Ok(())
}

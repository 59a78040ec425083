//! End-to-end append-mode scenarios: batch sub-mode entry at ≥1000 new
//! ids, and aborting cleanly when price-history returns nothing usable.

mod common;

use std::sync::Arc;

use catalog_updater::config::{region_config, Config, PersistenceMode};
use catalog_updater::persistence::local::LocalAdapter;
use catalog_updater::persistence::Adapter;
use catalog_updater::resolver::Candidate;
use catalog_updater::updater::Updater;

use common::{sample_game_info, FakePriceHistory, FakeStorefront};

fn test_config(data_dir: std::path::PathBuf) -> Config {
    Config {
        api_key: "test-key".to_string(),
        regions: vec![region_config("JP").unwrap()],
        persistence_mode: PersistenceMode::Local,
        kv_cli: "wrangler".to_string(),
        chunk_size: 200,
        data_dir,
    }
}

#[tokio::test]
async fn append_with_1200_new_ids_enters_batch_submode() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf());
    let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(&config.data_dir));

    let mut candidates = Vec::new();
    let mut title_file_contents = String::new();
    let mut storefront = FakeStorefront::new();
    for i in 0..1200 {
        let app_id = format!("{i}");
        candidates.push(Candidate { app_id: app_id.clone(), name: format!("Game {i}") });
        title_file_contents.push_str(&app_id);
        title_file_contents.push('\n');
        storefront = storefront.with_game_info(&app_id, sample_game_info(&format!("Game {i}"), &app_id, "JPY", 1000, 1000));
    }
    storefront.app_list = candidates;
    let storefront = Arc::new(storefront);
    let pricehistory = Arc::new(FakePriceHistory::new());

    let title_file = dir.path().join("title_list.txt");
    tokio::fs::write(&title_file, title_file_contents).await.unwrap();

    let updater = Updater::new(config.clone(), storefront, pricehistory, adapter.clone());
    let report = updater.run_append(&title_file).await.unwrap();

    assert!(!report.aborted, "failed games: {:?}", report.failed_games);
    assert_eq!(report.new_ids, 1200);
    assert_eq!(report.added, 1200);

    let games = adapter.get_games_data().await.unwrap();
    assert_eq!(games.len(), 1200);
    let ids: Vec<&str> = games.iter().map(|g| g.id.as_str()).collect();
    let expected: Vec<String> = (0..1200).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected, "new records must land in resolver order");

    assert!(
        !tokio::fs::try_exists(config.batch_lock_path()).await.unwrap(),
        "the lock file must be removed on successful completion"
    );
    assert!(
        !tokio::fs::try_exists(config.checkpoint_dir()).await.unwrap(),
        "checkpoint shards are cleared once the batch merges successfully"
    );
}

#[tokio::test]
async fn append_with_2500_new_ids_crosses_two_checkpoints_without_id_map_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf());
    let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(&config.data_dir));

    let mut candidates = Vec::new();
    let mut title_file_contents = String::new();
    let mut storefront = FakeStorefront::new();
    for i in 0..2500 {
        let app_id = format!("{i}");
        candidates.push(Candidate { app_id: app_id.clone(), name: format!("Game {i}") });
        title_file_contents.push_str(&app_id);
        title_file_contents.push('\n');
        storefront = storefront.with_game_info(&app_id, sample_game_info(&format!("Game {i}"), &app_id, "JPY", 1000, 1000));
    }
    storefront.app_list = candidates;
    let storefront = Arc::new(storefront);
    let pricehistory = Arc::new(FakePriceHistory::new());

    let title_file = dir.path().join("title_list.txt");
    tokio::fs::write(&title_file, title_file_contents).await.unwrap();

    let updater = Updater::new(config.clone(), storefront, pricehistory, adapter.clone());
    let report = updater.run_append(&title_file).await.unwrap();

    assert!(!report.aborted, "failed games: {:?}", report.failed_games);
    assert_eq!(report.added, 2500);

    let id_map = adapter.get_id_map().await.unwrap();
    assert_eq!(id_map.len(), 2500, "checkpointed id-map writes must not duplicate ids across checkpoints");
    let mut ids: Vec<&str> = id_map.iter().map(|e| e.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 2500, "id-map must not contain duplicate ids after crossing two checkpoints");
}

#[tokio::test]
async fn append_below_threshold_aborts_on_per_id_storefront_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf());
    let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(&config.data_dir));

    let candidates = vec![
        Candidate { app_id: "1".to_string(), name: "Game 1".to_string() },
        Candidate { app_id: "2".to_string(), name: "Game 2".to_string() },
    ];
    // id "2" deliberately has no registered game_info, so its storefront
    // fetch reports "no data" and build_one fails for it.
    let mut storefront = FakeStorefront::new().with_game_info("1", sample_game_info("Game 1", "1", "JPY", 1000, 1000));
    storefront.app_list = candidates;
    let storefront = Arc::new(storefront);
    let pricehistory = Arc::new(FakePriceHistory::new());

    let title_file = dir.path().join("title_list.txt");
    tokio::fs::write(&title_file, "1\n2\n").await.unwrap();

    let updater = Updater::new(config.clone(), storefront, pricehistory, adapter.clone());
    let report = updater.run_append(&title_file).await.unwrap();

    assert!(report.aborted);
    assert_eq!(report.failed_games.len(), 1);
    assert_eq!(report.failed_games[0].app_id, "2");
    assert!(adapter.get_id_map().await.unwrap().is_empty(), "a per-id failure must abort the whole append, not write a partial catalog");
    assert!(adapter.get_games_data().await.unwrap().is_empty());
}

#[tokio::test]
async fn append_aborts_and_stages_rebuilt_json_when_batch_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf());
    let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new(&config.data_dir));

    let mut candidates = Vec::new();
    let mut title_file_contents = String::new();
    let mut pricehistory = FakePriceHistory::new().empty_batch();
    for i in 0..50 {
        let app_id = format!("{i}");
        candidates.push(Candidate { app_id: app_id.clone(), name: format!("Game {i}") });
        title_file_contents.push_str(&app_id);
        title_file_contents.push('\n');
        pricehistory = pricehistory.with_itad_id(&app_id, &format!("itad-{i}"));
    }
    let mut storefront = FakeStorefront::new();
    storefront.app_list = candidates;
    let storefront = Arc::new(storefront);
    // `empty_batch` mimics price-history returning `[]` for the 50
    // non-empty input ids, the abort signal from scenario 6.
    let pricehistory = Arc::new(pricehistory);

    let title_file = dir.path().join("title_list.txt");
    tokio::fs::write(&title_file, title_file_contents).await.unwrap();

    let updater = Updater::new(config.clone(), storefront, pricehistory, adapter.clone());
    let report = updater.run_append(&title_file).await.unwrap();

    assert!(report.aborted);
    assert!(adapter.get_id_map().await.unwrap().is_empty(), "no write to id-map on abort");
    assert!(adapter.get_games_data().await.unwrap().is_empty(), "no write to games-data on abort");
    assert!(tokio::fs::try_exists(config.rebuilt_temp_path()).await.unwrap());
}

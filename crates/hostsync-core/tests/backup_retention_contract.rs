//! Contract Test: Backups, Retention & Restore
//!
//! Constraints verified:
//! - Every write is preceded by a full-file snapshot
//! - After a write only the configured number of newest snapshots remain
//! - A restore snapshots the pre-restore state and then reproduces the
//!   backup byte for byte
//!
//! If this test fails, the rollback trail is unreliable.

mod common;

use common::*;
use hostsync_core::hosts::{HostsFile, SectionMarkers};
use hostsync_core::{BackupManager, CycleOutcome, SyncEngine};
use std::time::Duration;

#[tokio::test]
async fn snapshot_holds_full_pre_write_content() {
    let env = TestEnv::new(BASE_HOSTS);
    let source = ScriptedRouteSource::new(routes(&["a.test"]));

    let (mut engine, _events) =
        SyncEngine::new(Box::new(source), &env.config()).expect("engine construction succeeds");
    engine.run_cycle().await;

    let backups = engine.handle().list_backups().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(std::fs::read_to_string(&backups[0].path).unwrap(), BASE_HOSTS);
}

#[tokio::test]
async fn write_prunes_to_retention_count() {
    let env = TestEnv::new(BASE_HOSTS);
    for (i, age) in [500u64, 400, 300, 200, 100].iter().enumerate() {
        env.seed_backup(
            &format!("hosts_2024010{}_120000.bak", i + 1),
            "old",
            Duration::from_secs(*age),
        );
    }

    let mut config = env.config();
    config.max_backups = 3;
    let source = ScriptedRouteSource::new(routes(&["a.test"]));

    let (mut engine, _events) =
        SyncEngine::new(Box::new(source), &config).expect("engine construction succeeds");
    assert_eq!(
        engine.run_cycle().await,
        CycleOutcome::Applied { route_count: 1 }
    );

    let names: Vec<String> = engine
        .handle()
        .list_backups()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();

    assert_eq!(names.len(), 3);
    // The fresh snapshot plus the two most recently modified seeds
    assert!(!names[0].starts_with("hosts_2024"));
    assert_eq!(names[1], "hosts_20240105_120000.bak");
    assert_eq!(names[2], "hosts_20240104_120000.bak");
}

#[tokio::test]
async fn unchanged_cycle_does_not_prune() {
    let env = TestEnv::new(BASE_HOSTS);
    let mut config = env.config();
    config.max_backups = 0;
    let source = ScriptedRouteSource::new(Vec::new());

    env.seed_backup("hosts_20240101_120000.bak", "old", Duration::from_secs(60));

    let (mut engine, _events) =
        SyncEngine::new(Box::new(source), &config).expect("engine construction succeeds");
    engine.run_cycle().await;

    assert_eq!(env.backup_names(), vec!["hosts_20240101_120000.bak"]);
}

#[tokio::test]
async fn restore_snapshots_current_state_first() {
    let env = TestEnv::new("10.0.0.1 current\n");
    let original = "127.0.0.1 localhost\n# restored content\n";
    let backup = env.seed_backup("hosts_20200101_000000.bak", original, Duration::from_secs(3600));

    let hosts = HostsFile::new(&env.hosts_path, SectionMarkers::for_product("DevProxy"));
    let manager = BackupManager::new(&env.backup_dir);

    manager.restore(&hosts, &backup).await.unwrap();

    assert_eq!(env.hosts_content(), original);

    let backups = manager.list().await.unwrap();
    assert_eq!(backups.len(), 2);
    let pre_restore = backups
        .iter()
        .find(|b| b.path != backup)
        .expect("pre-restore snapshot");
    assert_eq!(
        std::fs::read_to_string(&pre_restore.path).unwrap(),
        "10.0.0.1 current\n"
    );
    // The restored backup itself is never modified
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), original);
}

#[tokio::test]
async fn restore_through_handle_accepts_backup_name() {
    let env = TestEnv::new(BASE_HOSTS);
    env.seed_backup("hosts_20200101_000000.bak", "# old hosts\n", Duration::from_secs(3600));
    let source = ScriptedRouteSource::new(Vec::new());

    let (engine, _events) =
        SyncEngine::new(Box::new(source), &env.config()).expect("engine construction succeeds");
    let handle = engine.handle();

    handle
        .restore_backup("hosts_20200101_000000.bak")
        .await
        .unwrap();

    assert_eq!(env.hosts_content(), "# old hosts\n");
    assert!(handle.managed_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn restore_rejects_foreign_paths() {
    let env = TestEnv::new(BASE_HOSTS);
    let foreign = env.dir.path().join("hosts_20200101_000000.bak");
    std::fs::write(&foreign, "# not ours\n").unwrap();
    let source = ScriptedRouteSource::new(Vec::new());

    let (engine, _events) =
        SyncEngine::new(Box::new(source), &env.config()).expect("engine construction succeeds");

    assert!(engine.handle().restore_backup(&foreign).await.is_err());
    assert_eq!(env.hosts_content(), BASE_HOSTS);
}

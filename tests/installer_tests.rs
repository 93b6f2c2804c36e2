mod common;

use async_trait::async_trait;
use common::{our_symlinks, package_mod, test_env, FakeCatalog};
use simsforge::commands::{maintenance_command, mod_command, profile_command};
use simsforge::content::fake_score::{FakeScoreReport, ScoringMeta};
use simsforge::error::{AppError, Result};
use simsforge::install::installer::{
    self, DecisionSink, InstallDecision, InstallHooks, InstallRequest,
};
use simsforge::integrations::catalog::CatalogModMetadata;
use simsforge::integrations::fake_reports::{FakeModReport, FakeReportPublisher, WarningStatus};
use simsforge::state::event_state::EventType;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct ScriptedDecision(InstallDecision);

#[async_trait]
impl DecisionSink for ScriptedDecision {
    async fn decide(&self, _report: &FakeScoreReport, _meta: &ScoringMeta) -> InstallDecision {
        self.0
    }
}

#[derive(Default)]
struct RecordingReports {
    submitted: Mutex<Vec<i64>>,
}

#[async_trait]
impl FakeReportPublisher for RecordingReports {
    async fn submit_report(&self, report: &FakeModReport) -> Result<()> {
        self.submitted.lock().unwrap().push(report.remote_mod_id);
        Ok(())
    }

    async fn batch_warning_status(
        &self,
        _remote_mod_ids: &[i64],
    ) -> Result<HashMap<i64, WarningStatus>> {
        Ok(HashMap::new())
    }
}

fn request(remote_mod_id: i64, mods_folder: Option<std::path::PathBuf>) -> InstallRequest {
    InstallRequest {
        remote_mod_id,
        file_id: None,
        mods_folder,
    }
}

#[tokio::test]
async fn clean_install_populates_cache_profile_and_mods_folder() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "A", &[("A/foo.package", b"DBPF-foo")]),
    );

    let outcome = installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    // Cache: one entry, referenced by exactly P1.
    let entry = env
        .state
        .cache_manager
        .get(&outcome.fingerprint)
        .await
        .unwrap();
    assert_eq!(entry.remote_mod_id, 42);
    assert_eq!(entry.used_by.iter().copied().collect::<Vec<_>>(), vec![p1.id]);

    // Profile: one enabled mod.
    let profile = env.state.profile_manager.get_profile(p1.id).await.unwrap();
    assert_eq!(profile.mods.len(), 1);
    assert_eq!(profile.mods[0].remote_mod_id, 42);
    assert!(profile.mods[0].enabled);

    // Mods folder: exactly one of our symlinks, pointing at the entry.
    let links = our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root());
    assert_eq!(
        links,
        vec![(
            "A".to_string(),
            env.state.cache_manager.path_for(&outcome.fingerprint)
        )]
    );

    // Temp downloads are gone.
    let leftovers: Vec<_> = std::fs::read_dir(&env.state.temp_root)
        .map(|it| it.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn identical_archives_deduplicate_across_profiles() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let p2 = env.state.profile_manager.create_profile("P2").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Shared", &[("shared.package", b"DBPF-shared")]),
    );

    let first = installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    env.state
        .profile_manager
        .set_active(Some(p2.id))
        .await
        .unwrap();
    let second = installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    let stats = env.state.cache_manager.stats().await;
    assert_eq!(stats.entries, 1);

    let entry = env
        .state
        .cache_manager
        .get(&first.fingerprint)
        .await
        .unwrap();
    assert!(entry.used_by.contains(&p1.id) && entry.used_by.contains(&p2.id));

    for id in [p1.id, p2.id] {
        let profile = env.state.profile_manager.get_profile(id).await.unwrap();
        assert_eq!(profile.mods.len(), 1);
        assert_eq!(profile.mods[0].fingerprint, first.fingerprint);
    }
}

#[tokio::test]
async fn switching_profiles_rewrites_the_mods_folder() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let p2 = env.state.profile_manager.create_profile("P2").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "OnlyInP1", &[("a.package", b"DBPF")]),
    );

    installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();
    assert_eq!(
        our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).len(),
        1
    );
    let stats_before = env.state.cache_manager.stats().await;

    profile_command::set_active_profile(&env.state, Some(p2.id), Some(&env.mods_folder))
        .await
        .unwrap();

    assert!(our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).is_empty());
    let stats_after = env.state.cache_manager.stats().await;
    assert_eq!(stats_before.entries, stats_after.entries);
}

#[tokio::test]
async fn deleting_all_profiles_orphans_then_gc_frees() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let p2 = env.state.profile_manager.create_profile("P2").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Shared", &[("shared.package", b"DBPF-shared")]),
    );

    let outcome = installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap();
    env.state
        .profile_manager
        .set_active(Some(p2.id))
        .await
        .unwrap();
    installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    let byte_size = env
        .state
        .cache_manager
        .get(&outcome.fingerprint)
        .await
        .unwrap()
        .byte_size;

    env.state.profile_manager.set_active(None).await.unwrap();
    profile_command::delete_profile(&env.state, p1.id).await.unwrap();
    profile_command::delete_profile(&env.state, p2.id).await.unwrap();

    let entry = env
        .state
        .cache_manager
        .get(&outcome.fingerprint)
        .await
        .unwrap();
    assert!(entry.used_by.is_empty());

    let report = env.state.cache_manager.gc().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.freed_bytes, byte_size);
}

#[tokio::test]
async fn suspicious_mod_cancel_short_circuits() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let mut fake = package_mod(&env.fixtures, "Patreon Exclusive Skin", &[("readme.txt", b"pay me")]);
    fake.metadata = CatalogModMetadata {
        download_count: 5000,
        ..CatalogModMetadata::default()
    };
    let catalog = FakeCatalog::default().with_mod(77, fake);

    let sink = ScriptedDecision(InstallDecision::Cancel);
    let err = installer::install(
        &env.state,
        &catalog,
        request(77, Some(env.mods_folder.clone())),
        InstallHooks {
            decision: Some(&sink),
            ..InstallHooks::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::UserAborted));
    assert_eq!(env.state.cache_manager.stats().await.entries, 0);
    let profile = env.state.profile_manager.get_profile(p1.id).await.unwrap();
    assert!(profile.mods.is_empty());
    assert!(our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).is_empty());

    let leftovers: Vec<_> = std::fs::read_dir(&env.state.temp_root)
        .map(|it| it.filter_map(|e| e.ok()).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn report_decision_publishes_and_aborts() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        78,
        package_mod(&env.fixtures, "VIP only hair", &[("info.html", b"<html>")]),
    );

    let sink = ScriptedDecision(InstallDecision::Report);
    let reports = RecordingReports::default();
    let err = installer::install(
        &env.state,
        &catalog,
        request(78, None),
        InstallHooks {
            decision: Some(&sink),
            reports: Some(&reports),
            cancel: CancellationToken::new(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::UserAborted));
    assert_eq!(*reports.submitted.lock().unwrap(), vec![78]);
}

#[tokio::test]
async fn missing_mods_folder_still_commits_cache_and_profile() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "NoFolder", &[("a.package", b"DBPF")]),
    );

    let missing = env.mods_folder.join("not-created-yet");
    let outcome = installer::install(
        &env.state,
        &catalog,
        request(42, Some(missing.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    assert!(env.state.cache_manager.get(&outcome.fingerprint).await.is_some());
    let profile = env.state.profile_manager.get_profile(p1.id).await.unwrap();
    assert_eq!(profile.mods.len(), 1);

    // Activation ran as a no-op; the folder was never created.
    let activation = outcome.activation.unwrap();
    assert_eq!(activation.created, 0);
    assert!(!missing.exists());
}

#[tokio::test]
async fn install_without_active_profile_fails_fast() {
    let env = test_env().await;
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Nobody", &[("a.package", b"DBPF")]),
    );

    let err = installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NoActiveProfile));
}

#[tokio::test]
async fn install_then_remove_restores_reference_count() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Transient", &[("t.package", b"DBPF")]),
    );

    let outcome = installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    mod_command::remove_mod(&env.state, 42, Some(&env.mods_folder))
        .await
        .unwrap();

    // Back to the pre-install reference count (empty), link gone, entry
    // still cached until gc.
    let entry = env
        .state
        .cache_manager
        .get(&outcome.fingerprint)
        .await
        .unwrap();
    assert!(entry.used_by.is_empty());
    assert!(our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).is_empty());
}

#[tokio::test]
async fn toggle_disables_without_removing() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Toggled", &[("t.package", b"DBPF")]),
    );

    installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    mod_command::toggle_mod(&env.state, 42, false, Some(&env.mods_folder))
        .await
        .unwrap();
    assert!(our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).is_empty());

    mod_command::toggle_mod(&env.state, 42, true, Some(&env.mods_folder))
        .await
        .unwrap();
    assert_eq!(
        our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).len(),
        1
    );
}

#[tokio::test]
async fn cancellation_after_admission_keeps_entry_unattached() {
    let env = test_env().await;
    let p1 = env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Cancelled", &[("c.package", b"DBPF")]),
    );

    // Cancel the token the moment admission starts: the extraction is kept
    // for reuse but the profile must not be attached.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    env.state
        .events
        .subscribe(Box::new(move |payload| {
            if payload.event_type == EventType::AdmittingToCache {
                trigger.cancel();
            }
        }))
        .await;

    let err = installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks {
            cancel,
            ..InstallHooks::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Cancelled));

    let stats = env.state.cache_manager.stats().await;
    assert_eq!(stats.entries, 1, "extracted tree stays for reuse");
    assert_eq!(stats.distinct_profiles, 0, "no profile reference was kept");
    let profile = env.state.profile_manager.get_profile(p1.id).await.unwrap();
    assert!(profile.mods.is_empty());
}

#[tokio::test]
async fn update_check_compares_archive_names() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Versioned", &[("v1.package", b"DBPF-v1")]),
    );

    installer::install(
        &env.state,
        &catalog,
        request(42, None),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    // Same catalog file: nothing to update.
    let candidates = mod_command::updates_available(&env.state, &catalog)
        .await
        .unwrap();
    assert!(candidates.is_empty());

    // The catalog now serves a renamed (newer) archive.
    let mut newer = package_mod(&env.fixtures, "Versioned", &[("v2.package", b"DBPF-v2")]);
    newer.archive_name = "Versioned-v2.zip".to_string();
    let updated_catalog = FakeCatalog::default().with_mod(42, newer);

    let candidates = mod_command::updates_available(&env.state, &updated_catalog)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].remote_mod_id, 42);

    let outcomes = mod_command::update_all(&env.state, &updated_catalog, Some(&env.mods_folder))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);

    // Replaced in place: still one mod, now the new archive.
    let profile = env.state.profile_manager.active_profile().await.unwrap();
    assert_eq!(profile.mods.len(), 1);
    assert_eq!(profile.mods[0].archive_name, "Versioned-v2.zip");
}

#[tokio::test]
async fn reset_everything_wipes_profiles_cache_and_mod_links() {
    let env = test_env().await;
    env.state.profile_manager.create_profile("P1").await.unwrap();
    let catalog = FakeCatalog::default().with_mod(
        42,
        package_mod(&env.fixtures, "Doomed", &[("d.package", b"DBPF")]),
    );
    installer::install(
        &env.state,
        &catalog,
        request(42, Some(env.mods_folder.clone())),
        InstallHooks::default(),
    )
    .await
    .unwrap();

    // A user file that must survive the reset.
    std::fs::write(env.mods_folder.join("Resource.cfg"), b"keep me").unwrap();

    let report = maintenance_command::reset_everything(&env.state, Some(&env.mods_folder))
        .await
        .unwrap();

    assert_eq!(report.profiles_deleted, 1);
    assert_eq!(report.gc.removed, 1);
    assert!(report.mods_dirs_removed >= 1);
    assert!(env.state.profile_manager.list_profiles().await.is_empty());
    assert_eq!(env.state.cache_manager.stats().await.entries, 0);
    assert!(env.mods_folder.join("Resource.cfg").exists());
    assert!(our_symlinks(&env.mods_folder, env.state.cache_manager.cache_root()).is_empty());
}

mod common;

use chrono::Utc;
use common::test_env;
use simsforge::error::AppError;
use simsforge::state::profile_state::{PresentationMeta, ProfileMod};
use simsforge::state::State;
use uuid::Uuid;

fn mod_entry(remote_mod_id: i64, fingerprint: &str) -> ProfileMod {
    ProfileMod {
        remote_mod_id,
        display_name: format!("Mod {}", remote_mod_id),
        version_label: None,
        fingerprint: fingerprint.to_string(),
        archive_name: format!("mod_{}.zip", remote_mod_id),
        installed_at: Utc::now(),
        enabled: true,
        presentation: PresentationMeta::default(),
    }
}

#[tokio::test]
async fn first_profile_becomes_active() {
    let env = test_env().await;
    let first = env.state.profile_manager.create_profile("Main").await.unwrap();
    assert_eq!(
        env.state.profile_manager.active_profile_id().await,
        Some(first.id)
    );

    let second = env.state.profile_manager.create_profile("Alt").await.unwrap();
    assert_eq!(
        env.state.profile_manager.active_profile_id().await,
        Some(first.id),
        "creating another profile must not steal the marker"
    );
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn active_profile_cannot_be_deleted() {
    let env = test_env().await;
    let profile = env.state.profile_manager.create_profile("Main").await.unwrap();

    let err = env
        .state
        .profile_manager
        .delete_profile(profile.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidProfile(_)));

    env.state.profile_manager.set_active(None).await.unwrap();
    env.state
        .profile_manager
        .delete_profile(profile.id)
        .await
        .unwrap();
    assert!(env.state.profile_manager.list_profiles().await.is_empty());
}

#[tokio::test]
async fn set_active_requires_an_existing_profile() {
    let env = test_env().await;
    let err = env
        .state
        .profile_manager
        .set_active(Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProfileNotFound(_)));
}

#[tokio::test]
async fn duplicate_mod_is_replaced_in_place() {
    let env = test_env().await;
    let profile = env.state.profile_manager.create_profile("Main").await.unwrap();

    env.state
        .profile_manager
        .add_mod(profile.id, mod_entry(42, "fp-old"))
        .await
        .unwrap();
    env.state
        .profile_manager
        .add_mod(profile.id, mod_entry(43, "fp-other"))
        .await
        .unwrap();

    // Re-install of 42 with new bytes: replaced in place, old fingerprint
    // reported back, position preserved.
    let replaced = env
        .state
        .profile_manager
        .add_mod(profile.id, mod_entry(42, "fp-new"))
        .await
        .unwrap();
    assert_eq!(replaced.as_deref(), Some("fp-old"));

    let reloaded = env.state.profile_manager.get_profile(profile.id).await.unwrap();
    assert_eq!(reloaded.mods.len(), 2);
    assert_eq!(reloaded.mods[0].remote_mod_id, 42);
    assert_eq!(reloaded.mods[0].fingerprint, "fp-new");

    // Same fingerprint again reports no replacement.
    let unchanged = env
        .state
        .profile_manager
        .add_mod(profile.id, mod_entry(42, "fp-new"))
        .await
        .unwrap();
    assert_eq!(unchanged, None);
}

#[tokio::test]
async fn remove_and_toggle_report_missing_mods() {
    let env = test_env().await;
    let profile = env.state.profile_manager.create_profile("Main").await.unwrap();

    let err = env
        .state
        .profile_manager
        .remove_mod(profile.id, 999)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ModNotInProfile { .. }));

    env.state
        .profile_manager
        .add_mod(profile.id, mod_entry(7, "fp"))
        .await
        .unwrap();
    env.state
        .profile_manager
        .toggle_mod(profile.id, 7, false)
        .await
        .unwrap();
    let reloaded = env.state.profile_manager.get_profile(profile.id).await.unwrap();
    assert!(!reloaded.mods[0].enabled);

    let removed = env
        .state
        .profile_manager
        .remove_mod(profile.id, 7)
        .await
        .unwrap();
    assert_eq!(removed.fingerprint, "fp");
}

#[tokio::test]
async fn store_survives_restart() {
    let env = test_env().await;
    let profile = env.state.profile_manager.create_profile("Main").await.unwrap();
    env.state
        .profile_manager
        .add_mod(profile.id, mod_entry(1, "fp-1"))
        .await
        .unwrap();
    let data_root = env.keep_data_root();

    let state = State::new_with_root(data_root).await.unwrap();
    let reloaded = state.profile_manager.get_profile(profile.id).await.unwrap();
    assert_eq!(reloaded.name, "Main");
    assert_eq!(reloaded.mods.len(), 1);
    assert_eq!(state.profile_manager.active_profile_id().await, Some(profile.id));
}

#[tokio::test]
async fn corrupt_profile_index_recovers_empty() {
    let env = test_env().await;
    let data_root = env.keep_data_root();

    let index_path = data_root.join("Profiles").join("index.json");
    std::fs::create_dir_all(index_path.parent().unwrap()).unwrap();
    std::fs::write(&index_path, b"%%% definitely not json %%%").unwrap();

    let state = State::new_with_root(data_root.clone()).await.unwrap();
    assert!(state.recovered_on_startup());
    assert!(state.profile_manager.list_profiles().await.is_empty());
    assert!(data_root
        .join("Profiles")
        .join("index.json.corrupted")
        .exists());
}

#[tokio::test]
async fn stale_active_marker_is_cleared_on_load() {
    let env = test_env().await;
    let data_root = env.keep_data_root();

    let index_path = data_root.join("Profiles").join("index.json");
    std::fs::create_dir_all(index_path.parent().unwrap()).unwrap();
    let ghost = Uuid::new_v4();
    std::fs::write(
        &index_path,
        format!(
            r#"{{"version": 1, "profiles": {{}}, "active_profile_id": "{}"}}"#,
            ghost
        ),
    )
    .unwrap();

    let state = State::new_with_root(data_root).await.unwrap();
    assert_eq!(state.profile_manager.active_profile_id().await, None);
}

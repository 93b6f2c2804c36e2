use crate::activation::activator::ActivationOutcome;
use crate::commands::profile_command::reconcile_active;
use crate::error::{AppError, Result};
use crate::install::installer::{self, InstallHooks, InstallOutcome, InstallRequest};
use crate::integrations::catalog::CatalogDownloader;
use crate::state::State;
use log::{info, warn};
use serde::Serialize;
use std::path::Path;

pub async fn install_mod(
    state: &State,
    downloader: &dyn CatalogDownloader,
    request: InstallRequest,
    hooks: InstallHooks<'_>,
) -> Result<InstallOutcome> {
    installer::install(state, downloader, request, hooks).await
}

/// Removes a mod from the active profile, releases its cache reference and
/// reconciles the Mods folder so the symlink disappears immediately.
pub async fn remove_mod(
    state: &State,
    remote_mod_id: i64,
    mods_folder: Option<&Path>,
) -> Result<Option<ActivationOutcome>> {
    let profile = state
        .profile_manager
        .active_profile()
        .await
        .ok_or(AppError::NoActiveProfile)?;

    let removed = state
        .profile_manager
        .remove_mod(profile.id, remote_mod_id)
        .await?;
    // Another entry of the same profile can share the fingerprint when two
    // catalog mods ship identical bytes; the reference stays in that case.
    let remaining = state.profile_manager.get_profile(profile.id).await?;
    if !remaining
        .mods
        .iter()
        .any(|m| m.fingerprint == removed.fingerprint)
    {
        state
            .cache_manager
            .release(&removed.fingerprint, profile.id)
            .await?;
    }

    match mods_folder {
        Some(folder) => Ok(Some(reconcile_active(state, folder).await?)),
        None => Ok(None),
    }
}

/// Flips a mod's enabled flag and reconciles immediately.
pub async fn toggle_mod(
    state: &State,
    remote_mod_id: i64,
    enabled: bool,
    mods_folder: Option<&Path>,
) -> Result<Option<ActivationOutcome>> {
    let profile = state
        .profile_manager
        .active_profile()
        .await
        .ok_or(AppError::NoActiveProfile)?;

    state
        .profile_manager
        .toggle_mod(profile.id, remote_mod_id, enabled)
        .await?;

    match mods_folder {
        Some(folder) => Ok(Some(reconcile_active(state, folder).await?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCandidate {
    pub remote_mod_id: i64,
    pub display_name: String,
    pub installed_archive: String,
    pub latest_archive: String,
}

/// Asks the catalog for the latest file of every installed mod and returns
/// those whose archive differs from what the profile carries.
pub async fn updates_available(
    state: &State,
    downloader: &dyn CatalogDownloader,
) -> Result<Vec<UpdateCandidate>> {
    let profile = state
        .profile_manager
        .active_profile()
        .await
        .ok_or(AppError::NoActiveProfile)?;

    let mut candidates = Vec::new();
    for entry in &profile.mods {
        let resolved = match downloader.resolve_download(entry.remote_mod_id, None).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    "Skipping update check for mod {}: {}",
                    entry.remote_mod_id, e
                );
                continue;
            }
        };
        if resolved.archive_name != entry.archive_name {
            candidates.push(UpdateCandidate {
                remote_mod_id: entry.remote_mod_id,
                display_name: entry.display_name.clone(),
                installed_archive: entry.archive_name.clone(),
                latest_archive: resolved.archive_name,
            });
        }
    }
    info!(
        "Update check: {} of {} mods have a newer file",
        candidates.len(),
        profile.mods.len()
    );
    Ok(candidates)
}

/// Re-installs one mod at its latest file. The profile entry is replaced in
/// place and the previous archive's reference is released.
pub async fn update_mod(
    state: &State,
    downloader: &dyn CatalogDownloader,
    remote_mod_id: i64,
    mods_folder: Option<&Path>,
    hooks: InstallHooks<'_>,
) -> Result<InstallOutcome> {
    let profile = state
        .profile_manager
        .active_profile()
        .await
        .ok_or(AppError::NoActiveProfile)?;
    if !profile
        .mods
        .iter()
        .any(|m| m.remote_mod_id == remote_mod_id)
    {
        return Err(AppError::ModNotInProfile {
            profile_id: profile.id,
            remote_mod_id,
        });
    }

    installer::install(
        state,
        downloader,
        InstallRequest {
            remote_mod_id,
            file_id: None,
            mods_folder: mods_folder.map(|p| p.to_path_buf()),
        },
        hooks,
    )
    .await
}

/// Updates every mod the catalog has a newer file for. Failures are
/// collected per mod; the first error is returned after the rest finished.
pub async fn update_all(
    state: &State,
    downloader: &dyn CatalogDownloader,
    mods_folder: Option<&Path>,
) -> Result<Vec<InstallOutcome>> {
    let candidates = updates_available(state, downloader).await?;
    let mut outcomes = Vec::new();
    let mut first_error: Option<AppError> = None;

    for candidate in candidates {
        let result = installer::install(
            state,
            downloader,
            InstallRequest {
                remote_mod_id: candidate.remote_mod_id,
                file_id: None,
                mods_folder: mods_folder.map(|p| p.to_path_buf()),
            },
            InstallHooks::default(),
        )
        .await;
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!("Update of mod {} failed: {}", candidate.remote_mod_id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if outcomes.is_empty() => Err(e),
        Some(e) => {
            warn!("update_all finished with errors; first was: {}", e);
            Ok(outcomes)
        }
        None => Ok(outcomes),
    }
}

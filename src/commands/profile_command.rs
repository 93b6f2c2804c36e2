use crate::activation::activator::{self, ActivationOutcome};
use crate::error::Result;
use crate::state::profile_state::Profile;
use crate::state::State;
use log::info;
use std::path::Path;
use uuid::Uuid;

/// Rebuilds the desired link set for the active profile (empty when no
/// profile is active) and reconciles the Mods folder against it. Every
/// profile mutation triggers this immediately so the folder never drifts.
pub async fn reconcile_active(state: &State, mods_folder: &Path) -> Result<ActivationOutcome> {
    let desired = match state.profile_manager.active_profile().await {
        Some(profile) => activator::build_desired(&profile, &state.cache_manager)?,
        None => Vec::new(),
    };
    state.activator.reconcile(mods_folder, &desired).await
}

pub async fn create_profile(state: &State, name: &str) -> Result<Profile> {
    state.profile_manager.create_profile(name).await
}

/// Deletes a profile and drops its cache references. The entries it used
/// become orphaned once no other profile references them; `gc` collects
/// them later.
pub async fn delete_profile(state: &State, id: Uuid) -> Result<()> {
    let removed = state.profile_manager.delete_profile(id).await?;
    let orphaned = state.cache_manager.detach_profile(removed.id).await?;
    info!(
        "Profile '{}' deleted; {} cache entries became orphaned",
        removed.name,
        orphaned.len()
    );
    Ok(())
}

pub async fn list_profiles(state: &State) -> Vec<Profile> {
    state.profile_manager.list_profiles().await
}

/// Moves the active marker and reconciles the Mods folder to the new active
/// profile's enabled subset (or to empty on deactivation).
pub async fn set_active_profile(
    state: &State,
    id: Option<Uuid>,
    mods_folder: Option<&Path>,
) -> Result<Option<ActivationOutcome>> {
    state.profile_manager.set_active(id).await?;
    match mods_folder {
        Some(folder) => Ok(Some(reconcile_active(state, folder).await?)),
        None => Ok(None),
    }
}

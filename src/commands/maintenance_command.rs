use crate::disk::profiler::{BenchmarkOptions, DiskPerformanceConfig};
use crate::error::Result;
use crate::state::cache_state::{CacheStats, GcReport};
use crate::state::event_state::EventType;
use crate::state::State;
use crate::utils::file_utils;
use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Benchmarks the Mods volume and persists the resulting concurrency
/// budget. The running process keeps its current semaphore; the new pool
/// size applies from the next start.
pub async fn benchmark_disk(
    state: &State,
    mods_folder: &Path,
    options: BenchmarkOptions,
) -> Result<DiskPerformanceConfig> {
    let config = state
        .disk_manager
        .benchmark(mods_folder, options, &state.events)
        .await?;
    if state.io_semaphore.available_permits() != config.pool_size {
        info!(
            "Pool size changed to {}; the running process keeps its current budget until restart",
            config.pool_size
        );
    }
    Ok(config)
}

/// Garbage-collects orphaned cache entries and clears leftover temp
/// downloads.
pub async fn clear_cache(state: &State) -> Result<GcReport> {
    let report = state.cache_manager.gc().await?;
    if let Err(e) = file_utils::remove_dir_all_if_exists(&state.temp_root).await {
        warn!("Failed to clear temp downloads: {}", e);
    }
    Ok(report)
}

pub async fn cache_stats(state: &State) -> CacheStats {
    state.cache_manager.stats().await
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub mods_dirs_removed: usize,
    pub profiles_deleted: usize,
    pub gc: GcReport,
}

/// Factory reset: deactivate, wipe the Mods folder's directories (regular
/// files are user content and stay), drop every profile, collect the whole
/// cache and reset preferences.
pub async fn reset_everything(state: &State, mods_folder: Option<&Path>) -> Result<ResetReport> {
    let event_id = Uuid::new_v4();
    state
        .events
        .emit_progress(
            event_id,
            EventType::ResettingData,
            None,
            "Starting factory reset",
            Some(0.0),
        )
        .await;

    state.profile_manager.set_active(None).await?;

    let mods_dirs_removed = match mods_folder {
        Some(folder) => {
            state
                .events
                .emit_progress(
                    event_id,
                    EventType::ResettingData,
                    None,
                    "Clearing the Mods folder",
                    Some(20.0),
                )
                .await;
            file_utils::remove_top_level_dirs(folder, state.io_semaphore.clone()).await?
        }
        None => 0,
    };

    state
        .events
        .emit_progress(
            event_id,
            EventType::ResettingData,
            None,
            "Deleting profiles",
            Some(50.0),
        )
        .await;
    let profiles = state.profile_manager.list_profiles().await;
    let mut profiles_deleted = 0usize;
    for profile in profiles {
        state.profile_manager.delete_profile(profile.id).await?;
        state.cache_manager.detach_profile(profile.id).await?;
        profiles_deleted += 1;
    }

    state
        .events
        .emit_progress(
            event_id,
            EventType::ResettingData,
            None,
            "Collecting the cache",
            Some(75.0),
        )
        .await;
    let gc = state.cache_manager.gc().await?;

    state.settings_manager.reset().await?;

    state
        .events
        .emit_progress(
            event_id,
            EventType::ResettingData,
            None,
            "Factory reset complete",
            Some(100.0),
        )
        .await;

    info!(
        "Reset complete: {} mods dirs removed, {} profiles deleted, {} cache entries freed",
        mods_dirs_removed, profiles_deleted, gc.removed
    );
    Ok(ResetReport {
        mods_dirs_removed,
        profiles_deleted,
        gc,
    })
}

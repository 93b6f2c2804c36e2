use crate::activation::activator::Activator;
use crate::config::{ProjectDirsExt, SIMSFORGE_DIRECTORY};
use crate::disk::profiler::DiskProfileManager;
use crate::error::Result;
use crate::state::cache_state::ModCacheManager;
use crate::state::event_state::EventState;
use crate::state::profile_state::{ProfileManager, PROFILE_INDEX_FILENAME};
use crate::state::settings_state::{SettingsManager, SETTINGS_FILENAME};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

const DISK_CONFIG_FILENAME: &str = "disk-performance.json";

/// Explicit context owning every manager plus the process-wide I/O
/// semaphore. Operations receive it by reference; there is no ambient
/// global state.
pub struct State {
    pub data_root: PathBuf,
    pub temp_root: PathBuf,
    pub settings_manager: SettingsManager,
    pub profile_manager: ProfileManager,
    pub cache_manager: ModCacheManager,
    pub disk_manager: DiskProfileManager,
    pub activator: Activator,
    pub events: Arc<EventState>,
    pub io_semaphore: Arc<Semaphore>,
}

impl State {
    /// Builds and fully loads the state rooted at the platform data
    /// directory (or the configured override).
    pub async fn new() -> Result<Arc<State>> {
        Self::new_with_root(SIMSFORGE_DIRECTORY.root_dir()).await
    }

    /// Builds and fully loads the state under an explicit root. Used by the
    /// CLI `--data-root` flag and by tests.
    pub async fn new_with_root(data_root: PathBuf) -> Result<Arc<State>> {
        info!("State: initializing under {:?}", data_root);

        let cache_root = data_root.join("ModsCache");
        let temp_root = data_root.join("temp").join("downloads");

        let settings_manager = SettingsManager::new(data_root.join(SETTINGS_FILENAME));
        let profile_manager =
            ProfileManager::new(data_root.join("Profiles").join(PROFILE_INDEX_FILENAME));
        let cache_manager = ModCacheManager::new(cache_root.clone());
        let disk_manager = DiskProfileManager::new(data_root.join(DISK_CONFIG_FILENAME));
        let activator = Activator::new(cache_root);

        settings_manager.load().await?;
        disk_manager.load().await?;
        cache_manager.load().await?;
        profile_manager.load().await?;

        let pool_size = disk_manager.pool_size().await;
        info!("State: I/O pool size is {}", pool_size);

        let state = Arc::new(Self {
            data_root,
            temp_root,
            settings_manager,
            profile_manager,
            cache_manager,
            disk_manager,
            activator,
            events: Arc::new(EventState::new()),
            io_semaphore: Arc::new(Semaphore::new(pool_size)),
        });

        state.reconcile_references().await?;

        if state.recovered_on_startup() {
            warn!("State: one or more indices were recovered on startup");
        }

        Ok(state)
    }

    /// True when a corrupt index had to be renamed aside during load.
    pub fn recovered_on_startup(&self) -> bool {
        self.cache_manager.recovered_on_startup() || self.profile_manager.recovered_on_startup()
    }

    /// Cross-store consistency pass: every fingerprint a profile names must
    /// exist in the cache and list that profile in its reference set.
    /// Missing references are re-added; missing entries are only reported,
    /// the next install repairs them.
    async fn reconcile_references(&self) -> Result<()> {
        for profile in self.profile_manager.list_profiles().await {
            for entry in &profile.mods {
                match self.cache_manager.get(&entry.fingerprint).await {
                    Some(cached) => {
                        if !cached.used_by.contains(&profile.id) {
                            warn!(
                                "Cache entry {} was missing the reference from profile {}; restoring it",
                                entry.fingerprint, profile.id
                            );
                            self.cache_manager
                                .attach(&entry.fingerprint, profile.id)
                                .await?;
                        }
                    }
                    None => {
                        warn!(
                            "Profile {} references fingerprint {} which is not in the cache; reinstall mod {} to repair",
                            profile.id, entry.fingerprint, entry.remote_mod_id
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

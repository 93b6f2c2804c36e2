use crate::error::{AppError, Result};
use crate::utils::file_utils;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub const PROFILE_INDEX_FILENAME: &str = "index.json";
const PROFILE_INDEX_CURRENT_VERSION: u32 = 1;

fn default_true() -> bool {
    true
}

/// Catalog-sourced extras carried for display only; the engine never
/// interprets them.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PresentationMeta {
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One installed mod within a profile. `fingerprint` points at the cache
/// entry holding the extracted tree; `remote_mod_id` is unique per profile.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProfileMod {
    pub remote_mod_id: i64,
    pub display_name: String,
    pub version_label: Option<String>,
    pub fingerprint: String,
    pub archive_name: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub presentation: PresentationMeta,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Profile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub mods: Vec<ProfileMod>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProfileIndex {
    #[serde(default = "default_index_version")]
    pub version: u32,
    #[serde(default)]
    pub profiles: HashMap<Uuid, Profile>,
    #[serde(default)]
    pub active_profile_id: Option<Uuid>,
}

fn default_index_version() -> u32 {
    PROFILE_INDEX_CURRENT_VERSION
}

impl Default for ProfileIndex {
    fn default() -> Self {
        Self {
            version: PROFILE_INDEX_CURRENT_VERSION,
            profiles: HashMap::new(),
            active_profile_id: None,
        }
    }
}

/// Durable store of profiles and the active-profile marker, persisted as one
/// JSON document with write-then-rename. Reads hand out snapshots.
pub struct ProfileManager {
    index: Arc<RwLock<ProfileIndex>>,
    index_path: PathBuf,
    save_lock: Mutex<()>,
    recovered: std::sync::atomic::AtomicBool,
}

impl ProfileManager {
    pub fn new(index_path: PathBuf) -> Self {
        info!(
            "ProfileManager: Initializing with path: {:?} (profiles loading deferred)",
            index_path
        );
        Self {
            index: Arc::new(RwLock::new(ProfileIndex::default())),
            index_path,
            save_lock: Mutex::new(()),
            recovered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn recovered_on_startup(&self) -> bool {
        self.recovered.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn load(&self) -> Result<()> {
        if !self.index_path.exists() {
            info!("Profile index not found; starting with an empty store");
            return Ok(());
        }

        let data = fs::read_to_string(&self.index_path).await?;
        let mut parsed = match serde_json::from_str::<ProfileIndex>(&data) {
            Ok(parsed) => {
                if parsed.version > PROFILE_INDEX_CURRENT_VERSION {
                    return Err(AppError::SchemaTooNew {
                        found: parsed.version,
                        supported: PROFILE_INDEX_CURRENT_VERSION,
                    });
                }
                let mut parsed = parsed;
                if parsed.version < PROFILE_INDEX_CURRENT_VERSION {
                    info!(
                        "Upgrading profile index schema v{} -> v{}",
                        parsed.version, PROFILE_INDEX_CURRENT_VERSION
                    );
                    parsed.version = PROFILE_INDEX_CURRENT_VERSION;
                }
                parsed
            }
            Err(e) => {
                error!(
                    "Profile index unreadable: {}. Renaming it aside and starting empty.",
                    e
                );
                let aside = self.index_path.with_extension("json.corrupted");
                fs::rename(&self.index_path, &aside).await?;
                self.recovered
                    .store(true, std::sync::atomic::Ordering::Relaxed);
                ProfileIndex::default()
            }
        };

        // The active marker must always point at an existing profile.
        if let Some(active) = parsed.active_profile_id {
            if !parsed.profiles.contains_key(&active) {
                warn!(
                    "Active profile {} does not exist; clearing the marker",
                    active
                );
                parsed.active_profile_id = None;
            }
        }

        info!("Loaded {} profiles", parsed.profiles.len());
        *self.index.write().await = parsed;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let data = {
            let index = self.index.read().await;
            serde_json::to_string_pretty(&*index)?
        };
        file_utils::write_atomic(&self.index_path, data.as_bytes()).await
    }

    /// Creates a fresh profile. The very first profile in an empty store
    /// becomes active immediately.
    pub async fn create_profile(&self, name: &str) -> Result<Profile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidProfile(
                "profile name must not be empty".to_string(),
            ));
        }

        let profile = Profile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mods: Vec::new(),
            created_at: Utc::now(),
        };

        {
            let mut index = self.index.write().await;
            let was_empty = index.profiles.is_empty();
            index.profiles.insert(profile.id, profile.clone());
            if was_empty {
                info!(
                    "First profile '{}' ({}) becomes active",
                    profile.name, profile.id
                );
                index.active_profile_id = Some(profile.id);
            }
        }
        self.save().await?;
        info!("Created profile '{}' ({})", profile.name, profile.id);
        Ok(profile)
    }

    /// Drops a profile. The active profile cannot be deleted; deactivate it
    /// first. Returns the removed profile so the caller can drop its cache
    /// references.
    pub async fn delete_profile(&self, id: Uuid) -> Result<Profile> {
        let removed = {
            let mut index = self.index.write().await;
            if index.active_profile_id == Some(id) {
                return Err(AppError::InvalidProfile(format!(
                    "profile {} is active and cannot be deleted",
                    id
                )));
            }
            match index.profiles.remove(&id) {
                Some(profile) => profile,
                None => return Err(AppError::ProfileNotFound(id)),
            }
        };
        self.save().await?;
        info!("Deleted profile '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    /// Moves the active marker. `None` deactivates.
    pub async fn set_active(&self, id: Option<Uuid>) -> Result<()> {
        {
            let mut index = self.index.write().await;
            if let Some(id) = id {
                if !index.profiles.contains_key(&id) {
                    return Err(AppError::ProfileNotFound(id));
                }
            }
            index.active_profile_id = id;
        }
        self.save().await?;
        info!("Active profile is now {:?}", id);
        Ok(())
    }

    pub async fn active_profile_id(&self) -> Option<Uuid> {
        self.index.read().await.active_profile_id
    }

    pub async fn active_profile(&self) -> Option<Profile> {
        let index = self.index.read().await;
        index
            .active_profile_id
            .and_then(|id| index.profiles.get(&id).cloned())
    }

    pub async fn get_profile(&self, id: Uuid) -> Result<Profile> {
        self.index
            .read()
            .await
            .profiles
            .get(&id)
            .cloned()
            .ok_or(AppError::ProfileNotFound(id))
    }

    /// Snapshot of all profiles, oldest first.
    pub async fn list_profiles(&self) -> Vec<Profile> {
        let mut profiles: Vec<Profile> = self.index.read().await.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        profiles
    }

    /// Appends a mod to the profile, or replaces the existing entry in place
    /// when the profile already carries this `remote_mod_id` (re-install).
    /// Returns the fingerprint the replaced entry pointed at, if any.
    pub async fn add_mod(&self, profile_id: Uuid, mod_entry: ProfileMod) -> Result<Option<String>> {
        let replaced_fingerprint = {
            let mut index = self.index.write().await;
            let profile = index
                .profiles
                .get_mut(&profile_id)
                .ok_or(AppError::ProfileNotFound(profile_id))?;

            match profile
                .mods
                .iter_mut()
                .find(|m| m.remote_mod_id == mod_entry.remote_mod_id)
            {
                Some(existing) => {
                    info!(
                        "Replacing mod {} in profile {} (re-install)",
                        mod_entry.remote_mod_id, profile_id
                    );
                    let old_fingerprint = existing.fingerprint.clone();
                    *existing = mod_entry;
                    if old_fingerprint == existing.fingerprint {
                        None
                    } else {
                        Some(old_fingerprint)
                    }
                }
                None => {
                    info!(
                        "Adding mod {} ('{}') to profile {}",
                        mod_entry.remote_mod_id, mod_entry.display_name, profile_id
                    );
                    profile.mods.push(mod_entry);
                    None
                }
            }
        };
        self.save().await?;
        Ok(replaced_fingerprint)
    }

    /// Removes a mod from the profile and returns the removed entry.
    pub async fn remove_mod(&self, profile_id: Uuid, remote_mod_id: i64) -> Result<ProfileMod> {
        let removed = {
            let mut index = self.index.write().await;
            let profile = index
                .profiles
                .get_mut(&profile_id)
                .ok_or(AppError::ProfileNotFound(profile_id))?;

            let position = profile
                .mods
                .iter()
                .position(|m| m.remote_mod_id == remote_mod_id)
                .ok_or(AppError::ModNotInProfile {
                    profile_id,
                    remote_mod_id,
                })?;
            profile.mods.remove(position)
        };
        self.save().await?;
        info!(
            "Removed mod {} ('{}') from profile {}",
            remote_mod_id, removed.display_name, profile_id
        );
        Ok(removed)
    }

    pub async fn toggle_mod(
        &self,
        profile_id: Uuid,
        remote_mod_id: i64,
        enabled: bool,
    ) -> Result<()> {
        {
            let mut index = self.index.write().await;
            let profile = index
                .profiles
                .get_mut(&profile_id)
                .ok_or(AppError::ProfileNotFound(profile_id))?;

            let entry = profile
                .mods
                .iter_mut()
                .find(|m| m.remote_mod_id == remote_mod_id)
                .ok_or(AppError::ModNotInProfile {
                    profile_id,
                    remote_mod_id,
                })?;
            entry.enabled = enabled;
        }
        self.save().await?;
        info!(
            "Mod {} in profile {} is now {}",
            remote_mod_id,
            profile_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}

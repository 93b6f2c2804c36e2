use crate::error::{AppError, Result};
use crate::state::cache_state::ModCacheManager;
use crate::state::profile_state::Profile;
use crate::utils::{file_utils, path_utils};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// One symlink the Mods folder should contain: `mods_folder/<safe_name>`
/// pointing at `source_path` (a cache entry's extracted tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLink {
    pub safe_name: String,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ActivationOutcome {
    pub created: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub errors: Vec<ActivationError>,
}

impl ActivationOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reconciles the game's Mods folder against the active profile's enabled
/// subset. Only symlinks pointing into the cache root are ever touched;
/// user files, user directories and foreign symlinks are left alone.
pub struct Activator {
    cache_root: PathBuf,
    /// Exclusive lock over the Mods folder so two installs cannot race on
    /// the same link.
    reconcile_lock: Mutex<()>,
}

impl Activator {
    pub fn new(cache_root: PathBuf) -> Self {
        Self {
            cache_root,
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Is this symlink one of ours? The marker is the link target: anything
    /// resolving into the cache root was created by us.
    async fn classify_ours(&self, link_path: &Path) -> Option<PathBuf> {
        match fs::read_link(link_path).await {
            Ok(target) if target.starts_with(&self.cache_root) => Some(target),
            _ => None,
        }
    }

    /// Makes the set of our symlinks in `mods_folder` equal `desired`.
    /// Idempotent; per-item failures are collected in the outcome and do not
    /// stop the remaining items. A missing Mods folder is a no-op.
    pub async fn reconcile(
        &self,
        mods_folder: &Path,
        desired: &[DesiredLink],
    ) -> Result<ActivationOutcome> {
        let _guard = self.reconcile_lock.lock().await;

        let mut outcome = ActivationOutcome::default();
        if !mods_folder.exists() {
            info!(
                "Mods folder {:?} does not exist; skipping activation",
                mods_folder
            );
            return Ok(outcome);
        }

        let desired_by_name: HashMap<&str, &DesiredLink> = desired
            .iter()
            .map(|d| (d.safe_name.as_str(), d))
            .collect();
        let mut satisfied: HashSet<String> = HashSet::new();

        let mut entries = fs::read_dir(mods_folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = fs::symlink_metadata(&path).await?;
            if !meta.file_type().is_symlink() {
                // Regular file or directory: user content, never touched.
                continue;
            }

            let Some(current_target) = self.classify_ours(&path).await else {
                debug!("Leaving foreign symlink alone: {:?}", path);
                continue;
            };

            let name = entry.file_name().to_string_lossy().to_string();
            match desired_by_name.get(name.as_str()) {
                Some(want) if current_target == want.source_path => {
                    satisfied.insert(name);
                    outcome.unchanged += 1;
                }
                other => {
                    // Stale name or stale target; recreate below if wanted.
                    if other.is_some() {
                        debug!(
                            "Symlink {:?} points at {:?}, expected {:?}; recreating",
                            path,
                            current_target,
                            other.map(|d| &d.source_path)
                        );
                    }
                    match file_utils::remove_symlink(&path).await {
                        Ok(()) => outcome.removed += 1,
                        Err(e) => {
                            warn!("Failed to remove stale symlink {:?}: {}", path, e);
                            outcome.errors.push(ActivationError {
                                name,
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for want in desired {
            if satisfied.contains(&want.safe_name) {
                continue;
            }
            let link_path = mods_folder.join(&want.safe_name);
            match file_utils::symlink_dir(&want.source_path, &link_path).await {
                Ok(()) => {
                    debug!("Linked {:?} -> {:?}", link_path, want.source_path);
                    outcome.created += 1;
                }
                Err(e) => {
                    warn!("Failed to create symlink {:?}: {}", link_path, e);
                    outcome.errors.push(ActivationError {
                        name: want.safe_name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Reconciled {:?}: created={}, removed={}, unchanged={}, errors={}",
            mods_folder,
            outcome.created,
            outcome.removed,
            outcome.unchanged,
            outcome.errors.len()
        );
        Ok(outcome)
    }
}

/// Derives the desired link set for a profile's enabled mods: sanitized
/// display names, collisions resolved with a fingerprint prefix, sources
/// resolved through the cache.
pub fn build_desired(profile: &Profile, cache: &ModCacheManager) -> Result<Vec<DesiredLink>> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut desired = Vec::new();

    for entry in profile.mods.iter().filter(|m| m.enabled) {
        let sanitized = path_utils::sanitize_link_name(&entry.display_name);
        let safe_name = path_utils::dedupe_link_name(&sanitized, &entry.fingerprint, &taken);
        if !taken.insert(safe_name.clone()) {
            return Err(AppError::Other(format!(
                "link name collision could not be resolved for '{}'",
                entry.display_name
            )));
        }
        desired.push(DesiredLink {
            safe_name,
            source_path: cache.path_for(&entry.fingerprint),
        });
    }

    Ok(desired)
}

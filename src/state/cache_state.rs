use crate::content::inspector::{self, ExtractedFile, InspectionLimits};
use crate::error::{AppError, Result};
use crate::utils::{file_utils, hash_utils};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub const CACHE_INDEX_FILENAME: &str = "cache.index.json";
const CACHE_INDEX_CURRENT_VERSION: u32 = 1;
const METADATA_FILENAME: &str = "metadata.json";
const FILES_DIR_NAME: &str = "files";
const PARTIAL_DIR_NAME: &str = "files.partial";

/// Hex-encoded SHA-256 of the archive byte stream; primary key of the cache.
pub type Fingerprint = String;

/// One admitted archive: where it came from, what it extracted to, and the
/// set of profiles referencing it. `admitted_at` and `extracted_files` never
/// change after admission; `used_by` is the reverse reference count.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CachedArchive {
    pub fingerprint: Fingerprint,
    pub remote_mod_id: i64,
    pub archive_name: String,
    pub byte_size: u64,
    pub admitted_at: DateTime<Utc>,
    #[serde(default)]
    pub used_by: HashSet<Uuid>,
    #[serde(default)]
    pub extracted_files: Vec<ExtractedFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CacheIndex {
    #[serde(default = "default_index_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: HashMap<Fingerprint, CachedArchive>,
    #[serde(default)]
    pub last_gc: Option<DateTime<Utc>>,
}

fn default_index_version() -> u32 {
    CACHE_INDEX_CURRENT_VERSION
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: CACHE_INDEX_CURRENT_VERSION,
            entries: HashMap::new(),
            last_gc: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GcReport {
    pub removed: usize,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub total_bytes: u64,
    pub entries: usize,
    pub distinct_profiles: usize,
}

/// Content-addressed store of extracted mod archives, reference-counted by
/// profile. Layout under `cache_root`:
/// `cache.index.json`, `<fingerprint>/metadata.json`,
/// `<fingerprint>/files/<extracted tree>`.
pub struct ModCacheManager {
    cache_root: PathBuf,
    index: Arc<RwLock<CacheIndex>>,
    save_lock: Mutex<()>,
    /// Per-fingerprint admission locks so two concurrent installs of the
    /// same bytes extract at most once.
    admissions: DashMap<Fingerprint, Arc<Mutex<()>>>,
    recovered: std::sync::atomic::AtomicBool,
}

impl ModCacheManager {
    pub fn new(cache_root: PathBuf) -> Self {
        info!(
            "ModCacheManager: Initializing with root: {:?} (index loading deferred)",
            cache_root
        );
        Self {
            cache_root,
            index: Arc::new(RwLock::new(CacheIndex::default())),
            save_lock: Mutex::new(()),
            admissions: DashMap::new(),
            recovered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// True when the last `load` had to rename an unreadable index aside and
    /// start over.
    pub fn recovered_on_startup(&self) -> bool {
        self.recovered.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn index_path(&self) -> PathBuf {
        self.cache_root.join(CACHE_INDEX_FILENAME)
    }

    fn entry_dir(&self, fingerprint: &str) -> PathBuf {
        self.cache_root.join(fingerprint)
    }

    /// Directory whose children get symlinked into the Mods folder.
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.entry_dir(fingerprint).join(FILES_DIR_NAME)
    }

    /// Loads the index from disk and reconciles it with what is actually
    /// there: index entries without an extracted tree are dropped, trees
    /// without an index entry are deleted. An unparseable index is renamed
    /// aside and replaced with an empty one.
    pub async fn load(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_root).await?;

        let index_path = self.index_path();
        let mut index = if index_path.exists() {
            let data = fs::read_to_string(&index_path).await?;
            match serde_json::from_str::<CacheIndex>(&data) {
                Ok(parsed) => {
                    if parsed.version > CACHE_INDEX_CURRENT_VERSION {
                        return Err(AppError::SchemaTooNew {
                            found: parsed.version,
                            supported: CACHE_INDEX_CURRENT_VERSION,
                        });
                    }
                    let mut parsed = parsed;
                    if parsed.version < CACHE_INDEX_CURRENT_VERSION {
                        info!(
                            "Upgrading cache index schema v{} -> v{}",
                            parsed.version, CACHE_INDEX_CURRENT_VERSION
                        );
                        parsed.version = CACHE_INDEX_CURRENT_VERSION;
                    }
                    parsed
                }
                Err(e) => {
                    error!("Cache index unreadable: {}. Renaming it aside and starting empty.", e);
                    let aside = index_path.with_extension("json.corrupted");
                    fs::rename(&index_path, &aside).await?;
                    self.recovered
                        .store(true, std::sync::atomic::Ordering::Relaxed);
                    CacheIndex::default()
                }
            }
        } else {
            CacheIndex::default()
        };

        // Entries whose extracted tree vanished are stale.
        let mut missing: Vec<Fingerprint> = Vec::new();
        for fingerprint in index.entries.keys() {
            if !self.path_for(fingerprint).exists() {
                missing.push(fingerprint.clone());
            }
        }
        for fingerprint in &missing {
            warn!(
                "Cache entry {} has no extracted tree on disk; dropping it from the index",
                fingerprint
            );
            index.entries.remove(fingerprint);
        }

        // Directories nobody indexes are leftovers from interrupted
        // admissions; delete them.
        let mut orphan_dirs: Vec<PathBuf> = Vec::new();
        let mut entries = fs::read_dir(&self.cache_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !index.entries.contains_key(&name) {
                orphan_dirs.push(entry.path());
            }
        }
        for dir in orphan_dirs {
            warn!("Removing unindexed cache directory {:?}", dir);
            if let Err(e) = file_utils::remove_dir_all_if_exists(&dir).await {
                error!("Failed to remove unindexed cache directory {:?}: {}", dir, e);
            }
        }

        {
            let mut guard = self.index.write().await;
            *guard = index;
        }
        self.persist_index().await?;
        let entry_count = self.index.read().await.entries.len();
        info!("Cache loaded: {} entries under {:?}", entry_count, self.cache_root);
        Ok(())
    }

    async fn persist_index(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let data = {
            let index = self.index.read().await;
            serde_json::to_string_pretty(&*index)?
        };
        file_utils::write_atomic(self.index_path(), data.as_bytes()).await
    }

    async fn persist_entry_metadata(&self, entry: &CachedArchive) -> Result<()> {
        let path = self.entry_dir(&entry.fingerprint).join(METADATA_FILENAME);
        let data = serde_json::to_string_pretty(entry)?;
        file_utils::write_atomic(path, data.as_bytes()).await
    }

    /// Admits an archive into the cache for `profile_id`, computing the
    /// fingerprint by streaming the file through the digest. If the
    /// fingerprint is already present the call only adds the profile
    /// reference (idempotent); otherwise the archive is extracted once into
    /// `<fingerprint>/files/`.
    pub async fn admit(
        &self,
        archive_path: &Path,
        remote_mod_id: i64,
        archive_name: &str,
        profile_id: Uuid,
        limits: InspectionLimits,
    ) -> Result<CachedArchive> {
        let fingerprint = hash_utils::fingerprint_file(archive_path).await?;

        let admission_lock = self
            .admissions
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _admission = admission_lock.lock().await;

        // Recheck under the admission lock: a concurrent install of the same
        // bytes may have finished while we waited.
        let existing = {
            let index = self.index.read().await;
            index.entries.get(&fingerprint).cloned()
        };
        if let Some(mut entry) = existing {
            if entry.used_by.insert(profile_id) {
                info!(
                    "Cache hit for {} ({}); attaching profile {}",
                    archive_name, fingerprint, profile_id
                );
                {
                    let mut index = self.index.write().await;
                    index.entries.insert(fingerprint.clone(), entry.clone());
                }
                self.persist_entry_metadata(&entry).await?;
                self.persist_index().await?;
            } else {
                info!(
                    "Cache hit for {} ({}); profile {} already attached",
                    archive_name, fingerprint, profile_id
                );
            }
            return Ok(entry);
        }

        info!(
            "Admitting {} as {} for profile {}",
            archive_name, fingerprint, profile_id
        );

        let entry_dir = self.entry_dir(&fingerprint);
        let partial_dir = entry_dir.join(PARTIAL_DIR_NAME);
        // A crash mid-admission can leave a stale partial tree behind.
        file_utils::remove_dir_all_if_exists(&entry_dir).await?;
        fs::create_dir_all(&entry_dir).await?;

        let manifest: Vec<ExtractedFile> =
            match inspector::extract(archive_path, &partial_dir, limits).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    let _ = file_utils::remove_dir_all_if_exists(&entry_dir).await;
                    return Err(e);
                }
            };

        // The archive must still hash to the fingerprint we keyed on; a
        // mismatch means it changed while we were extracting.
        let actual = hash_utils::fingerprint_file(archive_path).await?;
        if actual != fingerprint {
            let _ = file_utils::remove_dir_all_if_exists(&entry_dir).await;
            return Err(AppError::FingerprintMismatch {
                expected: fingerprint,
                actual,
            });
        }

        fs::rename(&partial_dir, self.path_for(&fingerprint))
            .await
            .map_err(|e| {
                AppError::ExtractionFailed(format!(
                    "finalizing extracted tree for {}: {}",
                    fingerprint, e
                ))
            })?;

        let byte_size = fs::metadata(archive_path).await?.len();
        let entry = CachedArchive {
            fingerprint: fingerprint.clone(),
            remote_mod_id,
            archive_name: archive_name.to_string(),
            byte_size,
            admitted_at: Utc::now(),
            used_by: HashSet::from([profile_id]),
            extracted_files: manifest,
        };

        self.persist_entry_metadata(&entry).await?;
        {
            let mut index = self.index.write().await;
            index.entries.insert(fingerprint.clone(), entry.clone());
        }
        self.persist_index().await?;

        Ok(entry)
    }

    pub async fn get(&self, fingerprint: &str) -> Option<CachedArchive> {
        self.index.read().await.entries.get(fingerprint).cloned()
    }

    /// Re-adds a profile reference to an existing entry. Used by the startup
    /// consistency pass when a profile names a fingerprint the entry forgot.
    pub async fn attach(&self, fingerprint: &str, profile_id: Uuid) -> Result<()> {
        let updated = {
            let mut index = self.index.write().await;
            match index.entries.get_mut(fingerprint) {
                Some(entry) => {
                    if entry.used_by.insert(profile_id) {
                        Some(entry.clone())
                    } else {
                        None
                    }
                }
                None => {
                    return Err(AppError::CacheCorrupt(format!(
                        "no cache entry for fingerprint {}",
                        fingerprint
                    )))
                }
            }
        };
        if let Some(entry) = updated {
            self.persist_entry_metadata(&entry).await?;
            self.persist_index().await?;
        }
        Ok(())
    }

    /// Drops one profile reference from one entry. The entry stays on disk
    /// even when it becomes orphaned; `gc` collects it later.
    pub async fn release(&self, fingerprint: &str, profile_id: Uuid) -> Result<()> {
        let updated = {
            let mut index = self.index.write().await;
            match index.entries.get_mut(fingerprint) {
                Some(entry) => {
                    let removed = entry.used_by.remove(&profile_id);
                    if removed {
                        Some(entry.clone())
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = updated {
            if entry.used_by.is_empty() {
                info!("Cache entry {} is now orphaned", fingerprint);
            }
            self.persist_entry_metadata(&entry).await?;
            self.persist_index().await?;
        }
        Ok(())
    }

    /// Removes `profile_id` from every entry's reference set and returns the
    /// fingerprints that became orphaned.
    pub async fn detach_profile(&self, profile_id: Uuid) -> Result<Vec<Fingerprint>> {
        let (touched, orphaned) = {
            let mut index = self.index.write().await;
            let mut touched: Vec<CachedArchive> = Vec::new();
            let mut orphaned: Vec<Fingerprint> = Vec::new();
            for entry in index.entries.values_mut() {
                if entry.used_by.remove(&profile_id) {
                    touched.push(entry.clone());
                    if entry.used_by.is_empty() {
                        orphaned.push(entry.fingerprint.clone());
                    }
                }
            }
            (touched, orphaned)
        };

        for entry in &touched {
            self.persist_entry_metadata(entry).await?;
        }
        if !touched.is_empty() {
            self.persist_index().await?;
        }
        info!(
            "Detached profile {} from {} cache entries ({} now orphaned)",
            profile_id,
            touched.len(),
            orphaned.len()
        );
        Ok(orphaned)
    }

    /// Deletes every orphaned entry: tree first, then index record. Safe to
    /// call whenever no activation is in flight.
    pub async fn gc(&self) -> Result<GcReport> {
        let orphans: Vec<CachedArchive> = {
            let index = self.index.read().await;
            index
                .entries
                .values()
                .filter(|e| e.used_by.is_empty())
                .cloned()
                .collect()
        };

        let mut removed = 0usize;
        let mut freed_bytes = 0u64;
        for orphan in orphans {
            let dir = self.entry_dir(&orphan.fingerprint);
            match file_utils::remove_dir_all_if_exists(&dir).await {
                Ok(()) => {
                    let mut index = self.index.write().await;
                    index.entries.remove(&orphan.fingerprint);
                    removed += 1;
                    freed_bytes += orphan.byte_size;
                }
                Err(e) => {
                    error!(
                        "GC failed to remove {:?}; keeping its index entry: {}",
                        dir, e
                    );
                }
            }
        }

        {
            let mut index = self.index.write().await;
            index.last_gc = Some(Utc::now());
        }
        self.persist_index().await?;

        info!("GC removed {} entries, freed {} bytes", removed, freed_bytes);
        Ok(GcReport {
            removed,
            freed_bytes,
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        let mut profiles: HashSet<Uuid> = HashSet::new();
        let mut total_bytes = 0u64;
        for entry in index.entries.values() {
            total_bytes += entry.byte_size;
            profiles.extend(entry.used_by.iter().copied());
        }
        CacheStats {
            total_bytes,
            entries: index.entries.len(),
            distinct_profiles: profiles.len(),
        }
    }
}

use crate::error::{AppError, Result};
use crate::state::event_state::{EventState, EventType};
use crate::utils::file_utils;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::Disks;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const DISK_CONFIG_FILENAME: &str = "disk-performance.json";
const DISK_CONFIG_CURRENT_VERSION: u32 = 1;

/// Concurrency budget used before the first benchmark has run.
pub const DEFAULT_POOL_SIZE: usize = 4;

const BENCH_DIR_PREFIX: &str = ".sf-bench-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskType {
    Hdd,
    SataSsd,
    Nvme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskPerformanceConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    pub disk_type: DiskType,
    pub disk_speed_mbps: u64,
    /// System-wide concurrency budget for IO-heavy tasks.
    pub pool_size: usize,
    /// Whether directory symlinks could be created on the benchmarked
    /// volume. On Windows this fails without developer mode or elevation.
    #[serde(default)]
    pub symlinks_supported: bool,
    pub last_benchmarked_at: DateTime<Utc>,
}

fn default_config_version() -> u32 {
    DISK_CONFIG_CURRENT_VERSION
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkOptions {
    pub total_bytes: u64,
    pub chunk_bytes: u64,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            total_bytes: 256 * 1024 * 1024,
            chunk_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Maps measured throughput onto a disk class and pool size. Thresholds
/// follow observed sequential rates: spinning rust stays under 100 MB/s,
/// SATA tops out around 400.
pub fn classify_throughput(mbps: u64) -> (DiskType, usize) {
    if mbps < 100 {
        (DiskType::Hdd, 2)
    } else if mbps <= 400 {
        (DiskType::SataSsd, 6)
    } else {
        (DiskType::Nvme, 12)
    }
}

/// Owns the persisted `disk-performance.json` and runs benchmarks against
/// the Mods volume.
pub struct DiskProfileManager {
    config: Arc<RwLock<Option<DiskPerformanceConfig>>>,
    config_path: PathBuf,
    save_lock: Mutex<()>,
}

impl DiskProfileManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(None)),
            config_path,
            save_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<()> {
        if !self.config_path.exists() {
            info!("No disk performance config yet; benchmark has not been run");
            return Ok(());
        }
        let data = fs::read_to_string(&self.config_path).await?;
        match serde_json::from_str::<DiskPerformanceConfig>(&data) {
            Ok(loaded) => {
                if loaded.version > DISK_CONFIG_CURRENT_VERSION {
                    return Err(AppError::SchemaTooNew {
                        found: loaded.version,
                        supported: DISK_CONFIG_CURRENT_VERSION,
                    });
                }
                info!(
                    "Loaded disk performance config: {:?} at {} MB/s, pool size {}",
                    loaded.disk_type, loaded.disk_speed_mbps, loaded.pool_size
                );
                *self.config.write().await = Some(loaded);
            }
            Err(e) => {
                warn!(
                    "Disk performance config unreadable ({}); it will be rebuilt on the next benchmark",
                    e
                );
            }
        }
        Ok(())
    }

    pub async fn current_config(&self) -> Option<DiskPerformanceConfig> {
        self.config.read().await.clone()
    }

    /// The process-wide concurrency budget. Conservative default until the
    /// first benchmark has been persisted.
    pub async fn pool_size(&self) -> usize {
        self.config
            .read()
            .await
            .as_ref()
            .map(|c| c.pool_size.max(1))
            .unwrap_or(DEFAULT_POOL_SIZE)
    }

    async fn save(&self, config: &DiskPerformanceConfig) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let data = serde_json::to_string_pretty(config)?;
        file_utils::write_atomic(&self.config_path, data.as_bytes()).await?;
        info!("Saved disk performance config to {:?}", self.config_path);
        Ok(())
    }

    /// Benchmarks `target_dir` by writing and reading back probe files,
    /// classifies the volume, probes symlink capability, persists the result
    /// and returns it. Probe files are removed on success and on failure.
    pub async fn benchmark(
        &self,
        target_dir: &Path,
        options: BenchmarkOptions,
        events: &EventState,
    ) -> Result<DiskPerformanceConfig> {
        if !target_dir.exists() {
            return Err(AppError::Benchmark(format!(
                "target directory does not exist: {}",
                target_dir.display()
            )));
        }
        ensure_free_space(target_dir, options.total_bytes)?;

        let event_id = Uuid::new_v4();
        let probe_dir = target_dir.join(format!("{}{}", BENCH_DIR_PREFIX, Uuid::new_v4()));
        fs::create_dir_all(&probe_dir).await?;

        let result = self
            .run_probes(&probe_dir, options, events, event_id)
            .await;

        // Cleanup happens on both paths before the outcome is surfaced.
        if let Err(e) = file_utils::remove_dir_all_if_exists(&probe_dir).await {
            warn!("Failed to clean up benchmark probes at {:?}: {}", probe_dir, e);
        }

        let (mbps, symlinks_supported) = result?;
        let (disk_type, pool_size) = classify_throughput(mbps);
        let config = DiskPerformanceConfig {
            version: DISK_CONFIG_CURRENT_VERSION,
            disk_type,
            disk_speed_mbps: mbps,
            pool_size,
            symlinks_supported,
            last_benchmarked_at: Utc::now(),
        };

        self.save(&config).await?;
        *self.config.write().await = Some(config.clone());

        events
            .emit_progress(
                event_id,
                EventType::BenchmarkingDisk,
                None,
                format!(
                    "Benchmark complete: {:?} at {} MB/s, pool size {}",
                    config.disk_type, config.disk_speed_mbps, config.pool_size
                ),
                Some(100.0),
            )
            .await;

        Ok(config)
    }

    async fn run_probes(
        &self,
        probe_dir: &Path,
        options: BenchmarkOptions,
        events: &EventState,
        event_id: Uuid,
    ) -> Result<(u64, bool)> {
        let chunk_bytes = options.chunk_bytes.max(64 * 1024);
        let chunk_count = (options.total_bytes / chunk_bytes).max(1);

        info!(
            "Benchmarking {:?}: {} chunks of {} bytes",
            probe_dir, chunk_count, chunk_bytes
        );

        let mut payload = vec![0u8; chunk_bytes as usize];
        rand::thread_rng().fill_bytes(&mut payload);

        // Write phase: 0..50 percent.
        let write_started = Instant::now();
        for i in 0..chunk_count {
            let path = probe_dir.join(format!("probe_{}.bin", i));
            let mut file = fs::File::create(&path).await?;
            file.write_all(&payload).await?;
            file.sync_all().await?;
            drop(file);

            let pct = (i + 1) as f64 / chunk_count as f64 * 50.0;
            events
                .emit_progress(
                    event_id,
                    EventType::BenchmarkingDisk,
                    None,
                    format!("Writing probe {}/{}", i + 1, chunk_count),
                    Some(pct),
                )
                .await;
        }
        let write_secs = write_started.elapsed().as_secs_f64();

        // Read phase: 50..95 percent.
        let read_started = Instant::now();
        for i in 0..chunk_count {
            let path = probe_dir.join(format!("probe_{}.bin", i));
            let data = fs::read(&path).await?;
            if data.len() as u64 != chunk_bytes {
                return Err(AppError::Benchmark(format!(
                    "probe file {} came back truncated",
                    path.display()
                )));
            }

            let pct = 50.0 + (i + 1) as f64 / chunk_count as f64 * 45.0;
            events
                .emit_progress(
                    event_id,
                    EventType::BenchmarkingDisk,
                    None,
                    format!("Reading probe {}/{}", i + 1, chunk_count),
                    Some(pct),
                )
                .await;
        }
        let read_secs = read_started.elapsed().as_secs_f64();

        let moved_bytes = (chunk_count * chunk_bytes * 2) as f64;
        let elapsed = (write_secs + read_secs).max(0.001);
        let mbps = (moved_bytes / elapsed / (1024.0 * 1024.0)).round() as u64;
        debug!(
            "Benchmark raw numbers: write {:.2}s, read {:.2}s, {} MB/s",
            write_secs, read_secs, mbps
        );

        let symlinks_supported = probe_symlink_capability(probe_dir).await;
        if !symlinks_supported {
            warn!("Directory symlinks are not available on the benchmarked volume");
        }

        Ok((mbps, symlinks_supported))
    }
}

/// Tries to create one directory symlink inside `dir`. The probe result is
/// persisted so callers can warn before activation ever runs.
async fn probe_symlink_capability(dir: &Path) -> bool {
    let target = dir.join("symlink_probe_target");
    let link = dir.join("symlink_probe_link");
    if fs::create_dir_all(&target).await.is_err() {
        return false;
    }
    let supported = file_utils::symlink_dir(&target, &link).await.is_ok();
    if supported {
        let _ = file_utils::remove_symlink(&link).await;
    }
    let _ = fs::remove_dir(&target).await;
    supported
}

fn ensure_free_space(target_dir: &Path, needed_bytes: u64) -> Result<()> {
    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .iter()
        .filter(|d| target_dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    if let Some(disk) = best {
        // Probes plus a quarter of headroom so the benchmark never pushes a
        // nearly-full volume over the edge.
        let required = needed_bytes + needed_bytes / 4;
        if disk.available_space() < required {
            return Err(AppError::Benchmark(format!(
                "not enough free space on {} for benchmark probes ({} bytes required)",
                disk.mount_point().display(),
                required
            )));
        }
    } else {
        debug!(
            "Could not resolve a disk for {:?}; skipping free-space check",
            target_dir
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_buckets() {
        assert_eq!(classify_throughput(40), (DiskType::Hdd, 2));
        assert_eq!(classify_throughput(99), (DiskType::Hdd, 2));
        assert_eq!(classify_throughput(100), (DiskType::SataSsd, 6));
        assert_eq!(classify_throughput(400), (DiskType::SataSsd, 6));
        assert_eq!(classify_throughput(401), (DiskType::Nvme, 12));
        assert_eq!(classify_throughput(3500), (DiskType::Nvme, 12));
    }

    #[tokio::test]
    async fn benchmark_persists_config_and_cleans_probes() {
        let data_dir = tempfile::tempdir().unwrap();
        let mods_dir = tempfile::tempdir().unwrap();
        let manager = DiskProfileManager::new(data_dir.path().join(DISK_CONFIG_FILENAME));
        let events = EventState::new();

        let options = BenchmarkOptions {
            total_bytes: 256 * 1024,
            chunk_bytes: 64 * 1024,
        };
        let config = manager
            .benchmark(mods_dir.path(), options, &events)
            .await
            .unwrap();

        assert!(config.pool_size >= 1);
        assert!(data_dir.path().join(DISK_CONFIG_FILENAME).exists());
        assert_eq!(manager.pool_size().await, config.pool_size);

        // No probe litter left behind.
        let mut entries = tokio::fs::read_dir(mods_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pool_size_defaults_without_benchmark() {
        let data_dir = tempfile::tempdir().unwrap();
        let manager = DiskProfileManager::new(data_dir.path().join(DISK_CONFIG_FILENAME));
        manager.load().await.unwrap();
        assert_eq!(manager.pool_size().await, DEFAULT_POOL_SIZE);
    }
}

use async_trait::async_trait;
use simsforge::error::{AppError, Result};
use simsforge::integrations::catalog::{
    CatalogDownloader, CatalogModMetadata, FetchProgress, ResolvedDownload,
};
use simsforge::state::State;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Builds a zip fixture at `path` with the given (entry name, bytes) pairs.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub struct TestEnv {
    pub state: Arc<State>,
    pub mods_folder: PathBuf,
    pub fixtures: PathBuf,
    // Held for their Drop impls.
    _data_root: TempDir,
    _mods_root: TempDir,
}

impl TestEnv {
    /// Shuts the state down but keeps the data root on disk, for tests that
    /// reopen it to simulate a process restart.
    #[allow(dead_code)]
    pub fn keep_data_root(self) -> PathBuf {
        drop(self.state);
        #[allow(deprecated)]
        let root = self._data_root.into_path();
        root
    }
}

/// A fully isolated state rooted in temp directories, plus a Mods folder
/// and a place for archive fixtures.
pub async fn test_env() -> TestEnv {
    let data_root = TempDir::new().unwrap();
    let mods_root = TempDir::new().unwrap();
    let mods_folder = mods_root.path().join("Mods");
    std::fs::create_dir_all(&mods_folder).unwrap();
    let fixtures = mods_root.path().join("fixtures");
    std::fs::create_dir_all(&fixtures).unwrap();

    let state = State::new_with_root(data_root.path().to_path_buf())
        .await
        .unwrap();

    TestEnv {
        state,
        mods_folder,
        fixtures,
        _data_root: data_root,
        _mods_root: mods_root,
    }
}

#[derive(Clone)]
pub struct FakeMod {
    pub archive_name: String,
    pub archive_path: PathBuf,
    pub mod_name: String,
    pub metadata: CatalogModMetadata,
}

/// Scripted catalog: downloads are local fixture files served through the
/// same trait the real client implements.
#[derive(Default)]
pub struct FakeCatalog {
    pub mods: HashMap<i64, FakeMod>,
}

impl FakeCatalog {
    pub fn with_mod(mut self, remote_mod_id: i64, fake: FakeMod) -> Self {
        self.mods.insert(remote_mod_id, fake);
        self
    }
}

#[async_trait]
impl CatalogDownloader for FakeCatalog {
    async fn resolve_download(
        &self,
        remote_mod_id: i64,
        file_id: Option<i64>,
    ) -> Result<ResolvedDownload> {
        let fake = self
            .mods
            .get(&remote_mod_id)
            .ok_or(AppError::ResolveFailed(remote_mod_id))?;
        Ok(ResolvedDownload {
            archive_name: fake.archive_name.clone(),
            download_url: fake.archive_path.to_string_lossy().into_owned(),
            byte_size: std::fs::metadata(&fake.archive_path).ok().map(|m| m.len()),
            effective_file_id: file_id.unwrap_or(1),
            mod_name: fake.mod_name.clone(),
        })
    }

    async fn get_mod_metadata(&self, remote_mod_id: i64) -> Result<CatalogModMetadata> {
        Ok(self
            .mods
            .get(&remote_mod_id)
            .map(|f| f.metadata.clone())
            .unwrap_or_default())
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        _stall_timeout: Duration,
        progress: &FetchProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let copied = tokio::fs::copy(url, dest).await?;
        progress(copied, Some(copied));
        Ok(())
    }
}

/// Convenience: a fixture mod whose zip is written on the fly.
pub fn package_mod(fixtures: &Path, name: &str, entries: &[(&str, &[u8])]) -> FakeMod {
    let archive_name = format!("{}.zip", name);
    let archive_path = fixtures.join(&archive_name);
    write_zip(&archive_path, entries);
    FakeMod {
        archive_name,
        archive_path,
        mod_name: name.to_string(),
        metadata: CatalogModMetadata {
            download_count: 10_000,
            ..CatalogModMetadata::default()
        },
    }
}

/// Counts the symlinks in a directory that resolve into `cache_root`.
pub fn our_symlinks(dir: &Path, cache_root: &Path) -> Vec<(String, PathBuf)> {
    let mut links = Vec::new();
    if !dir.exists() {
        return links;
    }
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let meta = std::fs::symlink_metadata(entry.path()).unwrap();
        if !meta.file_type().is_symlink() {
            continue;
        }
        let target = std::fs::read_link(entry.path()).unwrap();
        if target.starts_with(cache_root) {
            links.push((entry.file_name().to_string_lossy().into_owned(), target));
        }
    }
    links.sort();
    links
}

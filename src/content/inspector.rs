use crate::error::{AppError, Result};
use crate::utils::path_utils;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Extensions of files that actually do something in the game.
const PACKAGE_EXTENSIONS: &[&str] = &["package"];
const SCRIPT_EXTENSIONS: &[&str] = &["ts4script", "py", "pyc"];

/// Entry names that raise flags during inspection: droppers, shortcuts and
/// double extensions masquerading as mod content.
static SUSPICIOUS_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\.(exe|bat|cmd|scr|msi|vbs|ps1)$|\.(package|ts4script)\.[a-z0-9]{1,4}$|\.(url|lnk)$)")
        .expect("suspicious name regex is valid")
});

/// Bounds enforced on every archive before any byte is extracted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InspectionLimits {
    pub max_entries: usize,
    pub max_uncompressed_bytes: u64,
}

impl Default for InspectionLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_uncompressed_bytes: 4 * 1024 * 1024 * 1024, // 4 GiB
        }
    }
}

/// What `inspect` learned about an archive without extracting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub total_entries: usize,
    pub file_list: Vec<String>,
    pub has_package_files: bool,
    pub has_script_files: bool,
    pub suspicious_files: bool,
}

/// One regular file written by `extract`, in archive order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub relative_path: String,
    pub leaf_name: String,
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Validates one entry against path safety and kind restrictions.
/// Directory entries pass through (they carry no content); symlinks and
/// device nodes are rejected outright.
fn validate_entry(name: &str, unix_mode: Option<u32>) -> Result<()> {
    if !path_utils::is_safe_archive_path(name) {
        return Err(AppError::UnsafeArchive(format!(
            "entry escapes the extraction root: {:?}",
            name
        )));
    }
    if let Some(mode) = unix_mode {
        let file_type = mode & 0o170000;
        // S_IFLNK, S_IFBLK, S_IFCHR, S_IFIFO, S_IFSOCK
        if matches!(file_type, 0o120000 | 0o060000 | 0o020000 | 0o010000 | 0o140000) {
            return Err(AppError::UnsafeArchive(format!(
                "entry is not a regular file or directory: {:?}",
                name
            )));
        }
    }
    Ok(())
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive_path)?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

/// Enumerates and classifies the contents of a ZIP archive without writing
/// anything to disk.
///
/// A zero-entry archive is rejected: it can never contribute mod content and
/// is one of the strongest fake signals.
pub async fn inspect(archive_path: &Path, limits: InspectionLimits) -> Result<Inspection> {
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || inspect_blocking(&archive_path, limits)).await?
}

fn inspect_blocking(archive_path: &Path, limits: InspectionLimits) -> Result<Inspection> {
    let mut archive = open_archive(archive_path)?;

    let total_entries = archive.len();
    if total_entries == 0 {
        return Err(AppError::UnsafeArchive(
            "archive contains no entries".to_string(),
        ));
    }
    if total_entries > limits.max_entries {
        return Err(AppError::ArchiveTooLarge(format!(
            "{} entries exceeds the limit of {}",
            total_entries, limits.max_entries
        )));
    }

    let mut file_list = Vec::new();
    let mut has_package_files = false;
    let mut has_script_files = false;
    let mut suspicious_files = false;
    let mut uncompressed_total: u64 = 0;

    for i in 0..total_entries {
        let entry = archive.by_index(i)?;
        let raw_name = entry.name().to_string();
        validate_entry(&raw_name, entry.unix_mode())?;

        uncompressed_total = uncompressed_total.saturating_add(entry.size());
        if uncompressed_total > limits.max_uncompressed_bytes {
            return Err(AppError::ArchiveTooLarge(format!(
                "uncompressed size exceeds the limit of {} bytes",
                limits.max_uncompressed_bytes
            )));
        }

        if entry.is_dir() {
            continue;
        }

        if let Some(ext) = extension_of(&raw_name) {
            if PACKAGE_EXTENSIONS.contains(&ext.as_str()) {
                has_package_files = true;
            }
            if SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
                has_script_files = true;
            }
        }
        if SUSPICIOUS_NAME_RE.is_match(&raw_name) {
            debug!("Suspicious entry name in {:?}: {}", archive_path, raw_name);
            suspicious_files = true;
        }

        file_list.push(raw_name);
    }

    debug!(
        "Inspected {:?}: {} entries, {} files, packages={}, scripts={}, suspicious={}",
        archive_path,
        total_entries,
        file_list.len(),
        has_package_files,
        has_script_files,
        suspicious_files
    );

    Ok(Inspection {
        total_entries,
        file_list,
        has_package_files,
        has_script_files,
        suspicious_files,
    })
}

/// Extracts every regular entry of the archive under `dest_dir`, preserving
/// relative paths, and returns the manifest of written files in archive
/// order.
///
/// The whole extraction fails on the first unsafe or non-regular entry. On
/// failure the partially written tree is left for the caller to remove;
/// nothing outside `dest_dir` is ever touched.
pub async fn extract(
    archive_path: &Path,
    dest_dir: &Path,
    limits: InspectionLimits,
) -> Result<Vec<ExtractedFile>> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &dest_dir, limits)).await?
}

fn extract_blocking(
    archive_path: &Path,
    dest_dir: &Path,
    limits: InspectionLimits,
) -> Result<Vec<ExtractedFile>> {
    let mut archive = open_archive(archive_path)?;

    if archive.len() == 0 {
        return Err(AppError::UnsafeArchive(
            "archive contains no entries".to_string(),
        ));
    }
    if archive.len() > limits.max_entries {
        return Err(AppError::ArchiveTooLarge(format!(
            "{} entries exceeds the limit of {}",
            archive.len(),
            limits.max_entries
        )));
    }

    // Validate everything up front so a hostile trailing entry cannot leave
    // half the tree extracted before the rejection.
    let mut uncompressed_total: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        validate_entry(entry.name(), entry.unix_mode())?;
        uncompressed_total = uncompressed_total.saturating_add(entry.size());
        if uncompressed_total > limits.max_uncompressed_bytes {
            return Err(AppError::ArchiveTooLarge(format!(
                "uncompressed size exceeds the limit of {} bytes",
                limits.max_uncompressed_bytes
            )));
        }
    }

    std::fs::create_dir_all(dest_dir)?;

    let mut manifest = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(p) => p,
            None => {
                return Err(AppError::UnsafeArchive(format!(
                    "entry escapes the extraction root: {:?}",
                    entry.name()
                )))
            }
        };

        let out_path = dest_dir.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path).map_err(|e| {
            AppError::ExtractionFailed(format!("creating {:?}: {}", out_path, e))
        })?;
        std::io::copy(&mut entry, &mut out_file).map_err(|e| {
            AppError::ExtractionFailed(format!("writing {:?}: {}", out_path, e))
        })?;

        let relative_str = relative
            .to_str()
            .map(|s| s.replace('\\', "/"))
            .unwrap_or_else(|| entry.name().to_string());
        let leaf_name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        manifest.push(ExtractedFile {
            relative_path: relative_str,
            leaf_name,
        });
    }

    if manifest.is_empty() {
        // Directory-only archives carry no activatable content.
        warn!("Archive {:?} contained no regular files", archive_path);
    }

    info!(
        "Extracted {} files from {:?} into {:?}",
        manifest.len(),
        archive_path,
        dest_dir
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[tokio::test]
    async fn inspect_classifies_contents() {
        let zip = build_zip(&[
            ("Mods/hair.package", b"DBPF"),
            ("Mods/tuning.ts4script", b"PK"),
            ("readme.txt", b"hi"),
        ]);
        let inspection = inspect(zip.path(), InspectionLimits::default())
            .await
            .unwrap();
        assert_eq!(inspection.total_entries, 3);
        assert!(inspection.has_package_files);
        assert!(inspection.has_script_files);
        assert!(!inspection.suspicious_files);
    }

    #[tokio::test]
    async fn inspect_flags_droppers() {
        let zip = build_zip(&[("FreeHair.package.exe", b"MZ")]);
        let inspection = inspect(zip.path(), InspectionLimits::default())
            .await
            .unwrap();
        assert!(inspection.suspicious_files);
        assert!(!inspection.has_package_files);
    }

    #[tokio::test]
    async fn traversal_entry_is_rejected() {
        let zip = build_zip(&[("../escape.package", b"DBPF")]);
        let dest = tempfile::tempdir().unwrap();
        let err = extract(zip.path(), dest.path(), InspectionLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsafeArchive(_)));
    }

    #[tokio::test]
    async fn entry_count_limit_is_enforced(){
        let zip = build_zip(&[("a.package", b"1"), ("b.package", b"2")]);
        let limits = InspectionLimits {
            max_entries: 1,
            ..InspectionLimits::default()
        };
        let err = inspect(zip.path(), limits).await.unwrap_err();
        assert!(matches!(err, AppError::ArchiveTooLarge(_)));
    }

    #[tokio::test]
    async fn extract_preserves_relative_paths() {
        let zip = build_zip(&[
            ("CAS/top.package", b"DBPF-top"),
            ("scripts/mod.ts4script", b"zip-inner"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        let manifest = extract(zip.path(), dest.path(), InspectionLimits::default())
            .await
            .unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].relative_path, "CAS/top.package");
        assert_eq!(manifest[0].leaf_name, "top.package");
        assert!(dest.path().join("CAS/top.package").exists());
        assert_eq!(
            std::fs::read(dest.path().join("scripts/mod.ts4script")).unwrap(),
            b"zip-inner"
        );
    }
}

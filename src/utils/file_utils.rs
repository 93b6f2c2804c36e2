use crate::error::{AppError, Result};
use futures::future::join_all;
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

/// Writes `contents` to `path` atomically: the data goes to a sibling temp
/// file first, is synced, then renamed over the destination. Readers either
/// see the old file or the complete new one.
pub async fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await.map_err(|e| {
        error!(
            "Failed to rename {:?} over {:?}: {}",
            tmp_path, path, e
        );
        AppError::Io(e)
    })?;

    Ok(())
}

/// Removes a directory tree if it exists, swallowing "not found".
pub async fn remove_dir_all_if_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!("Removed directory tree: {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Deletes every top-level *directory* inside `dir` in parallel, bounded by
/// the given semaphore. Regular files are left untouched. Returns the number
/// of directories removed; the first failure is returned after all tasks
/// have finished.
pub async fn remove_top_level_dirs(dir: &Path, semaphore: Arc<Semaphore>) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut targets: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        // Symlinked mod directories count too: remove_dir_all on a symlink
        // would follow it, so drop the link itself instead.
        if file_type.is_symlink() {
            targets.push(entry.path());
        } else if file_type.is_dir() {
            targets.push(entry.path());
        }
    }

    info!(
        "Removing {} top-level directories under {:?}",
        targets.len(),
        dir
    );

    let mut tasks = Vec::new();
    for target in targets {
        let sem = semaphore.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await?;
            let meta = fs::symlink_metadata(&target).await?;
            if meta.file_type().is_symlink() {
                remove_symlink(&target).await?;
            } else {
                fs::remove_dir_all(&target).await?;
            }
            Ok::<_, AppError>(())
        }));
    }

    let results = join_all(tasks).await;
    let mut removed = 0usize;
    let mut first_error: Option<AppError> = None;
    for result in results {
        match result {
            Ok(Ok(())) => removed += 1,
            Ok(Err(e)) => {
                error!("Failed to remove a directory during reset: {}", e);
                first_error.get_or_insert(e);
            }
            Err(join_err) => {
                error!("Directory removal task panicked: {}", join_err);
                first_error.get_or_insert(AppError::Task(join_err));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

/// Removes a symlink entry. On Windows a directory symlink is a directory
/// entry and needs `remove_dir`; on POSIX it is always a file entry.
pub async fn remove_symlink(path: &Path) -> Result<()> {
    #[cfg(windows)]
    {
        fs::remove_dir(path).await.map_err(AppError::Io)
    }
    #[cfg(not(windows))]
    {
        fs::remove_file(path).await.map_err(AppError::Io)
    }
}

/// Creates a directory symlink `link -> target`.
pub async fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    let target = target.to_path_buf();
    let link = link.to_path_buf();
    let target_clone = target.clone();
    let link_clone = link.clone();
    tokio::task::spawn_blocking(move || {
        #[cfg(windows)]
        {
            std::os::windows::fs::symlink_dir(&target_clone, &link_clone)
        }
        #[cfg(not(windows))]
        {
            std::os::unix::fs::symlink(&target_clone, &link_clone)
        }
    })
    .await?
    .map_err(|e| AppError::SymlinkFailed(format!("{} -> {}: {}", link.display(), target.display(), e)))?;
    Ok(())
}

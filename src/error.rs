use serde::Serialize;
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Semaphore acquire error: {0}")]
    Semaphore(#[from] tokio::sync::AcquireError),

    #[error("No active profile. Create or activate a profile first.")]
    NoActiveProfile,

    #[error("Profile not found: {0}")]
    ProfileNotFound(Uuid),

    #[error("Invalid profile operation: {0}")]
    InvalidProfile(String),

    #[error("Mod with remote id {remote_mod_id} not found in profile {profile_id}")]
    ModNotInProfile {
        profile_id: Uuid,
        remote_mod_id: i64,
    },

    #[error("Unsafe archive: {0}")]
    UnsafeArchive(String),

    #[error("Archive exceeds configured limits: {0}")]
    ArchiveTooLarge(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Fingerprint mismatch after admission: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("Failed to resolve download for mod {0}")]
    ResolveFailed(i64),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Too many redirects while downloading (limit {0})")]
    TooManyRedirects(u32),

    #[error("Download stalled: no progress for {0} seconds")]
    DownloadStalled(u64),

    #[error("Cache is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("Profile index is corrupt: {0}")]
    ProfileIndexCorrupt(String),

    #[error("State file schema is newer than this build supports: found v{found}, supported up to v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Symlink operation failed: {0}")]
    SymlinkFailed(String),

    #[error("Aborted by user decision")]
    UserAborted,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Benchmark error: {0}")]
    Benchmark(String),

    #[error("Report submission failed: {0}")]
    ReportFailed(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl AppError {
    /// Process exit code for this error. 0 is success and 1 the generic
    /// failure bucket; the remaining codes follow the CLI contract:
    /// 2 precondition, 3 integrity, 4 external, 5 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::NoActiveProfile
            | AppError::ProfileNotFound(_)
            | AppError::InvalidProfile(_)
            | AppError::ModNotInProfile { .. } => 2,
            AppError::CacheCorrupt(_)
            | AppError::ProfileIndexCorrupt(_)
            | AppError::SchemaTooNew { .. }
            | AppError::FingerprintMismatch { .. } => 3,
            AppError::Http(_)
            | AppError::ResolveFailed(_)
            | AppError::DownloadFailed(_)
            | AppError::TooManyRedirects(_)
            | AppError::DownloadStalled(_)
            | AppError::ReportFailed(_) => 4,
            AppError::UserAborted | AppError::Cancelled => 5,
            _ => 1,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CommandError {
    pub message: String,
    pub kind: String,
    pub exit_code: i32,
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        CommandError {
            exit_code: error.exit_code(),
            kind: format!("{:?}", error),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

pub static SIMSFORGE_DIRECTORY: Lazy<ProjectDirs> =
    Lazy::new(|| match ProjectDirs::from("gg", "simsforge", "SimsForge") {
        Some(proj_dirs) => proj_dirs,
        None => panic!("Failed to get application directory"),
    });

/// Optional override of the data root, set once at startup (CLI flag or test
/// harness). `None` means "use the platform default".
pub static DATA_ROOT_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Shared HTTP client. Redirects are handled manually by the download code so
/// that redirect depth and relative `Location` rewriting stay under our
/// control.
pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    reqwest::ClientBuilder::new()
        .user_agent(APP_USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
});

// Extension trait for ProjectDirs to expose the SimsForge state layout
pub trait ProjectDirsExt {
    fn root_dir(&self) -> PathBuf;
    fn cache_root(&self) -> PathBuf;
    fn profiles_dir(&self) -> PathBuf;
    fn temp_downloads_dir(&self) -> PathBuf;
}

impl ProjectDirsExt for ProjectDirs {
    fn root_dir(&self) -> PathBuf {
        if let Ok(guard) = DATA_ROOT_OVERRIDE.read() {
            if let Some(root) = guard.as_ref() {
                return root.clone();
            }
        }
        if cfg!(target_os = "windows") {
            self.data_dir()
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| self.data_dir().to_path_buf())
        } else {
            self.data_dir().to_path_buf()
        }
    }

    fn cache_root(&self) -> PathBuf {
        self.root_dir().join("ModsCache")
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root_dir().join("Profiles")
    }

    fn temp_downloads_dir(&self) -> PathBuf {
        self.root_dir().join("temp").join("downloads")
    }
}

/// Points the whole state layout at a different root. Must be called before
/// `State::new`; used by the CLI `--data-root` flag and by tests.
pub fn set_data_root(path: Option<PathBuf>) {
    if let Ok(mut guard) = DATA_ROOT_OVERRIDE.write() {
        *guard = path;
    }
}

use crate::content::fake_score::ScoreParams;
use crate::content::inspector::InspectionLimits;
use crate::error::{AppError, Result};
use crate::utils::file_utils;
use base64::Engine;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

pub const SETTINGS_FILENAME: &str = "settings.json";
const SETTINGS_CURRENT_VERSION: u32 = 1;

fn default_settings_version() -> u32 {
    SETTINGS_CURRENT_VERSION
}

fn default_stall_timeout() -> u64 {
    30
}

fn default_catalog_base_url() -> String {
    "https://api.simsforge.gg/v1".to_string()
}

fn default_report_base_url() -> String {
    "https://reports.simsforge.gg/v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_settings_version")]
    pub version: u32,
    #[serde(default)]
    pub inspection: InspectionLimits,
    #[serde(default)]
    pub score_params: ScoreParams,
    #[serde(default = "default_stall_timeout")]
    pub download_stall_timeout_secs: u64,
    #[serde(default = "default_catalog_base_url")]
    pub catalog_base_url: String,
    #[serde(default = "default_report_base_url")]
    pub report_base_url: String,
    /// Third-party catalog API key, stored obfuscated (base64). The engine
    /// never interprets the decoded value; it is forwarded as-is.
    #[serde(default)]
    pub catalog_api_key_obfuscated: Option<String>,
    /// The game's Mods folder, once the user has picked it.
    #[serde(default)]
    pub mods_folder: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_CURRENT_VERSION,
            inspection: InspectionLimits::default(),
            score_params: ScoreParams::default(),
            download_stall_timeout_secs: default_stall_timeout(),
            catalog_base_url: default_catalog_base_url(),
            report_base_url: default_report_base_url(),
            catalog_api_key_obfuscated: None,
            mods_folder: None,
        }
    }
}

pub struct SettingsManager {
    settings: Arc<RwLock<AppSettings>>,
    settings_path: PathBuf,
    save_lock: Mutex<()>,
}

impl SettingsManager {
    pub fn new(settings_path: PathBuf) -> Self {
        info!(
            "SettingsManager: Initializing with path: {:?} (loading deferred)",
            settings_path
        );
        Self {
            settings: Arc::new(RwLock::new(AppSettings::default())),
            settings_path,
            save_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<()> {
        if !self.settings_path.exists() {
            info!("Settings file not found, writing defaults");
            self.save().await?;
            return Ok(());
        }

        let data = fs::read_to_string(&self.settings_path).await?;
        match serde_json::from_str::<AppSettings>(&data) {
            Ok(loaded) => {
                if loaded.version > SETTINGS_CURRENT_VERSION {
                    return Err(AppError::SchemaTooNew {
                        found: loaded.version,
                        supported: SETTINGS_CURRENT_VERSION,
                    });
                }
                debug!("Loaded settings: {:?}", loaded);
                *self.settings.write().await = loaded;
            }
            Err(e) => {
                error!("Settings file unreadable ({}); backing it up and using defaults", e);
                let backup = self.settings_path.with_extension("json.corrupted");
                if let Err(copy_err) = fs::copy(&self.settings_path, &backup).await {
                    warn!("Failed to back up corrupted settings: {}", copy_err);
                }
                self.save().await?;
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let data = {
            let settings = self.settings.read().await;
            serde_json::to_string_pretty(&*settings)?
        };
        file_utils::write_atomic(&self.settings_path, data.as_bytes()).await?;
        info!("Saved settings to {:?}", self.settings_path);
        Ok(())
    }

    pub async fn get(&self) -> AppSettings {
        self.settings.read().await.clone()
    }

    pub async fn set(&self, new_settings: AppSettings) -> Result<()> {
        {
            let mut settings = self.settings.write().await;
            let version = settings.version;
            *settings = new_settings;
            settings.version = version;
        }
        self.save().await
    }

    /// De-obfuscates the stored catalog API key. The result stays opaque to
    /// the engine; it only rides along on catalog requests.
    pub async fn catalog_api_key(&self) -> Option<String> {
        let obfuscated = self.settings.read().await.catalog_api_key_obfuscated.clone()?;
        match base64::engine::general_purpose::STANDARD.decode(obfuscated.as_bytes()) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Stored API key is not valid base64: {}", e);
                None
            }
        }
    }

    /// Factory-reset hook: drops everything back to defaults.
    pub async fn reset(&self) -> Result<()> {
        *self.settings.write().await = AppSettings::default();
        self.save().await
    }
}

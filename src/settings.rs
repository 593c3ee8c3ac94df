use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::viewer::{EngineConfig, LinkTarget, RegionSelectors, ViewerOptions};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pdfpane";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Size of the host container in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default = "default_container_width")]
    pub width: f64,

    #[serde(default = "default_container_height")]
    pub height: f64,

    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            width: default_container_width(),
            height: default_container_height(),
            device_pixel_ratio: default_device_pixel_ratio(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default = "default_initial_page")]
    pub initial_page: u32,

    /// HTML skeleton file; the built-in skeleton when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,

    #[serde(default)]
    pub selectors: RegionSelectors,

    #[serde(default)]
    pub container: ContainerSettings,

    #[serde(default)]
    pub external_link_target: LinkTarget,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_initial_page() -> u32 {
    1
}

fn default_container_width() -> f64 {
    800.0
}

fn default_container_height() -> f64 {
    1000.0
}

fn default_device_pixel_ratio() -> f64 {
    1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            engine: EngineConfig::default(),
            initial_page: default_initial_page(),
            template: None,
            selectors: RegionSelectors::default(),
            container: ContainerSettings::default(),
            external_link_target: LinkTarget::default(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file yields defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let Some(path) = default_config_path() else {
            warn!("Could not determine config directory, using default settings");
            return Ok(Self::default());
        };
        if !path.exists() {
            info!("No settings file at {path:?}, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
        }
        if settings.initial_page == 0 {
            warn!("initial_page is 1-based; using 1 instead of 0");
            settings.initial_page = 1;
        }
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Controller options described by these settings. Reads the template
    /// file when one is configured.
    pub fn viewer_options(&self) -> Result<ViewerOptions, SettingsError> {
        let template = match &self.template {
            Some(path) => match fs::read_to_string(path) {
                Ok(html) => Some(html),
                Err(source) => {
                    error!("Failed to read template {path:?}: {source}");
                    return Err(SettingsError::Read {
                        path: path.clone(),
                        source,
                    });
                }
            },
            None => None,
        };

        Ok(ViewerOptions {
            template,
            selectors: self.selectors.clone(),
            initial_page: self.initial_page,
            engine: self.engine.clone(),
            external_link_target: self.external_link_target,
        })
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use metadata::AudioLoader;
use serde::{Deserialize, Serialize};

use crate::files::ExtensionFilter;

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_BATCH_SIZE: usize = 250;
const DEFAULT_DEBOUNCE_SECS: u64 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub version: u32,
    pub restrict_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub external_restrict_extensions: Vec<String>,
    pub external_exclude_extensions: Vec<String>,
    pub monitor_libraries: bool,
    pub watch_debounce_secs: u64,
    pub batch_size: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            restrict_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            external_restrict_extensions: Vec::new(),
            external_exclude_extensions: Vec::new(),
            monitor_libraries: false,
            watch_debounce_secs: DEFAULT_DEBOUNCE_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ScanSettings {
    pub fn batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    pub fn watch_debounce(&self) -> Duration {
        let secs = if self.watch_debounce_secs == 0 {
            DEFAULT_DEBOUNCE_SECS
        } else {
            self.watch_debounce_secs
        };
        Duration::from_secs(secs)
    }

    pub fn library_filter(&self, loader: &AudioLoader) -> ExtensionFilter {
        ExtensionFilter::new(
            &with_decoder_defaults(&self.restrict_extensions, loader),
            &self.exclude_extensions,
        )
    }

    pub fn external_filter(&self, loader: &AudioLoader) -> ExtensionFilter {
        ExtensionFilter::new(
            &with_decoder_defaults(&self.external_restrict_extensions, loader),
            &self.external_exclude_extensions,
        )
    }
}

fn with_decoder_defaults(restrict: &[String], loader: &AudioLoader) -> Vec<String> {
    if !restrict.is_empty() {
        return restrict.to_vec();
    }
    let mut extensions = loader.supported_extensions();
    extensions.push("cue".to_string());
    extensions
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("LIBRARY_SCAN_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Returns the settings and whether the file was freshly created.
pub fn load_or_create_config(path: &Path) -> Result<(ScanSettings, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut settings: ScanSettings = serde_yaml::from_str(&contents)?;
        if settings.version < CONFIG_VERSION {
            settings.version = CONFIG_VERSION;
        }
        if settings.batch_size == 0 {
            settings.batch_size = DEFAULT_BATCH_SIZE;
        }
        if settings.watch_debounce_secs == 0 {
            settings.watch_debounce_secs = DEFAULT_DEBOUNCE_SECS;
        }
        return Ok((settings, false));
    }

    let settings = ScanSettings::default();
    save_config(path, &settings)?;
    Ok((settings, true))
}

pub fn save_config(path: &Path, settings: &ScanSettings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(settings)?;
    fs::write(path, contents)?;
    Ok(())
}

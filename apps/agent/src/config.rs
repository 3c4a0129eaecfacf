//! Agent configuration.
//!
//! Priority: environment variables (`DRIVECOPY_*`) > settings file > defaults. The settings file is
//! `settings.json` in the platform config dir (`~/.config/drivecopy/` on Linux), or wherever
//! `DRIVECOPY_SETTINGS` points.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filter::{ExtensionProfile, SupportedFileFilter};
use crate::router::{Backoff, DeviceOpenRetry, RetryPolicy};
use crate::session::{DestinationLayout, DestinationPlanner};
use crate::transfer::FileCopyEngine;
use crate::transfer::copy::DEFAULT_CHUNK_SIZE;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(30 * 60);

/// Settings as stored on disk. Every field is optional; missing ones fall through to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsFile {
    pub backup_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub extension_profile: Option<String>,
    pub custom_extensions: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
    pub destination_layout: Option<DestinationLayout>,
    pub poll_interval_secs: Option<u64>,
    pub mount_parents: Option<Vec<PathBuf>>,
    pub backup_existing_on_start: Option<bool>,
    pub retry_base_secs: Option<u64>,
    pub retry_max_secs: Option<u64>,
    pub max_retry_attempts: Option<u32>,
    pub device_open_retry: Option<DeviceOpenRetry>,
    pub preserve_modified_time: Option<bool>,
    pub log_level: Option<String>,
}

pub fn parse_settings(contents: &str) -> Result<SettingsFile, serde_json::Error> {
    serde_json::from_str(contents)
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Session folders are created under here
    pub backup_root: PathBuf,
    pub log_dir: PathBuf,
    pub profile: ExtensionProfile,
    /// Replaces the profile's extensions when set
    pub custom_extensions: Option<Vec<String>>,
    pub chunk_size: usize,
    pub layout: DestinationLayout,
    pub poll_interval: Duration,
    /// Directories removable drives get mounted under
    pub mount_parents: Vec<PathBuf>,
    pub backup_existing_on_start: bool,
    pub retry: RetryPolicy,
    pub preserve_modified_time: bool,
    /// `error`, `warn`, `info`, `debug` or `trace`. Ignored when `RUST_LOG` is set.
    pub log_level: String,
    /// Problems found while loading, logged once logging is up
    pub warnings: Vec<String>,
}

impl AgentConfig {
    /// Loads the settings file (if any) and applies env overrides.
    pub fn load() -> Self {
        let (settings, settings_warning) = match settings_path() {
            Some(path) => read_settings(&path),
            None => (SettingsFile::default(), None),
        };
        let mut config = Self::from_parts(settings, |key| env::var(key).ok());
        config.warnings.splice(0..0, settings_warning);
        config
    }

    /// Builds a config from parsed settings and an env lookup.
    pub fn from_parts(settings: SettingsFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut warnings = Vec::new();
        let backup_root = env("DRIVECOPY_BACKUP_ROOT")
            .map(PathBuf::from)
            .or(settings.backup_root)
            .unwrap_or_else(default_backup_root);

        let log_dir = env("DRIVECOPY_LOG_DIR")
            .map(PathBuf::from)
            .or(settings.log_dir)
            .unwrap_or_else(|| default_log_dir(&backup_root));

        let profile = env("DRIVECOPY_PROFILE")
            .as_deref()
            .and_then(ExtensionProfile::parse)
            .or_else(|| settings.extension_profile.as_deref().and_then(ExtensionProfile::parse))
            .unwrap_or_default();

        let custom_extensions = env("DRIVECOPY_EXTENSIONS")
            .map(|list| list.split(',').map(|e| e.trim().to_string()).collect::<Vec<_>>())
            .or(settings.custom_extensions)
            .filter(|list| list.iter().any(|e| !e.is_empty()));

        let chunk_size = parse_env(&env, "DRIVECOPY_CHUNK_SIZE", &mut warnings)
            .or(settings.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        let layout = env("DRIVECOPY_LAYOUT")
            .as_deref()
            .and_then(DestinationLayout::parse)
            .or(settings.destination_layout)
            .unwrap_or_default();

        let poll_interval = parse_env(&env, "DRIVECOPY_POLL_SECS", &mut warnings)
            .or(settings.poll_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let mount_parents = env("DRIVECOPY_MOUNT_PARENTS")
            .map(|list| env::split_paths(&list).collect::<Vec<_>>())
            .or(settings.mount_parents)
            .unwrap_or_else(default_mount_parents);

        let backup_existing_on_start = parse_bool_env(&env, "DRIVECOPY_BACKUP_EXISTING")
            .or(settings.backup_existing_on_start)
            .unwrap_or(true);

        let retry_base = parse_env(&env, "DRIVECOPY_RETRY_BASE_SECS", &mut warnings)
            .or(settings.retry_base_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_BASE);
        let retry_max = parse_env(&env, "DRIVECOPY_RETRY_MAX_SECS", &mut warnings)
            .or(settings.retry_max_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_MAX)
            .max(retry_base);
        let max_attempts =
            parse_env(&env, "DRIVECOPY_MAX_RETRY_ATTEMPTS", &mut warnings).or(settings.max_retry_attempts);
        let device_open_retry = env("DRIVECOPY_DEVICE_OPEN_RETRY")
            .as_deref()
            .and_then(DeviceOpenRetry::parse)
            .or(settings.device_open_retry)
            .unwrap_or_default();

        let preserve_modified_time = parse_bool_env(&env, "DRIVECOPY_PRESERVE_MTIME")
            .or(settings.preserve_modified_time)
            .unwrap_or(true);

        let log_level = env("DRIVECOPY_LOG_LEVEL")
            .or(settings.log_level)
            .unwrap_or_else(|| "info".to_string());

        Self {
            backup_root,
            log_dir,
            profile,
            custom_extensions,
            chunk_size,
            layout,
            poll_interval,
            mount_parents,
            backup_existing_on_start,
            retry: RetryPolicy {
                backoff: Backoff::new(retry_base, retry_max),
                max_attempts,
                device_open_retry,
            },
            preserve_modified_time,
            log_level,
            warnings,
        }
    }

    pub fn filter(&self) -> SupportedFileFilter {
        match &self.custom_extensions {
            Some(extensions) => SupportedFileFilter::with_extensions(extensions),
            None => SupportedFileFilter::from_profile(self.profile),
        }
    }

    pub fn engine(&self) -> FileCopyEngine {
        FileCopyEngine::new(self.chunk_size).preserve_modified_time(self.preserve_modified_time)
    }

    pub fn planner(&self) -> DestinationPlanner {
        DestinationPlanner::new(&self.backup_root, self.layout)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_parts(SettingsFile::default(), |_| None)
    }
}

fn settings_path() -> Option<PathBuf> {
    env::var_os("DRIVECOPY_SETTINGS")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("drivecopy").join("settings.json")))
}

/// Reads the settings file, falling back to defaults if it's missing or broken. A broken file comes
/// back with a warning.
fn read_settings(path: &Path) -> (SettingsFile, Option<String>) {
    let Ok(contents) = fs::read_to_string(path) else {
        return (SettingsFile::default(), None);
    };
    match parse_settings(&contents) {
        Ok(settings) => (settings, None),
        Err(e) => (
            SettingsFile::default(),
            Some(format!("Ignoring unreadable settings file {}: {}", path.display(), e)),
        ),
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warnings.push(format!("Ignoring invalid {}={:?}", key, value));
            None
        }
    }
}

fn parse_bool_env(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| v == "true" || v == "1")
}

fn default_backup_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("UsbBackup")
}

fn default_log_dir(backup_root: &Path) -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("drivecopy").join("logs"))
        .unwrap_or_else(|| backup_root.join("logs"))
}

fn default_mount_parents() -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Volumes")]
    } else if cfg!(target_os = "linux") {
        vec![PathBuf::from("/media"), PathBuf::from("/run/media")]
    } else {
        Vec::new()
    }
}

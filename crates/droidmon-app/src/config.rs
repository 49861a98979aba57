//! Configuration file parsing for `.droidmon/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use droidmon_adb::EmulatorConfig;
use droidmon_core::prelude::*;
use serde::{Deserialize, Serialize};

use crate::monitor::MonitorConfig;

const CONFIG_FILENAME: &str = "config.toml";
const DROIDMON_DIR: &str = ".droidmon";

/// Global application settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub installer: InstallerSettings,
    pub sessions: SessionSettings,
    /// Present only for emulator-backed setups
    pub emulator: Option<EmulatorSettings>,
}

/// `[monitor]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between background health checks
    pub check_interval_secs: u64,

    /// Consecutive recovery attempts before recovery is abandoned
    pub max_recovery_attempts: u32,

    /// Seconds to wait for a device to appear and finish booting
    pub wait_timeout_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            max_recovery_attempts: 3,
            wait_timeout_secs: 120,
        }
    }
}

impl MonitorSettings {
    /// Build the runtime monitor configuration
    pub fn to_monitor_config(&self, emulator: Option<EmulatorConfig>) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            max_recovery_attempts: self.max_recovery_attempts,
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            emulator,
            ..MonitorConfig::default()
        }
    }
}

/// `[installer]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Maximum attempts per install operation
    pub max_retries: u32,

    /// Where downloaded APKs land; system temp dir when unset
    pub download_dir: Option<PathBuf>,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            download_dir: None,
        }
    }
}

/// `[sessions]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Base directory for session artifacts
    pub base_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("sessions"),
        }
    }
}

/// `[emulator]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorSettings {
    /// AVD name to boot
    pub avd_name: String,

    /// Android SDK root
    pub sdk_path: PathBuf,

    #[serde(default = "default_gpu_mode")]
    pub gpu_mode: String,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,

    #[serde(default = "default_true")]
    pub no_snapshot: bool,

    #[serde(default = "default_true")]
    pub no_audio: bool,

    #[serde(default = "default_true")]
    pub no_boot_anim: bool,

    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_gpu_mode() -> String {
    "auto".to_string()
}

fn default_memory_mb() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

impl EmulatorSettings {
    pub fn to_emulator_config(&self) -> EmulatorConfig {
        EmulatorConfig {
            avd_name: self.avd_name.clone(),
            sdk_path: self.sdk_path.clone(),
            gpu_mode: self.gpu_mode.clone(),
            memory_mb: self.memory_mb,
            no_snapshot: self.no_snapshot,
            no_audio: self.no_audio,
            no_boot_anim: self.no_boot_anim,
            extra_args: self.extra_args.clone(),
        }
    }
}

impl Settings {
    /// Runtime monitor config combining the `[monitor]` and `[emulator]`
    /// sections
    pub fn monitor_config(&self) -> MonitorConfig {
        let emulator = self.emulator.as_ref().map(EmulatorSettings::to_emulator_config);
        self.monitor.to_monitor_config(emulator)
    }
}

/// Default config path under a base directory
pub fn default_config_path(base: &Path) -> PathBuf {
    base.join(DROIDMON_DIR).join(CONFIG_FILENAME)
}

/// Load settings from an explicit path; missing file is an error
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::config(e.to_string()))
}

/// Load settings from the default location, falling back to defaults when no
/// config file exists
pub fn load_or_default(base: &Path) -> Result<Settings> {
    let path = default_config_path(base);
    match load_settings(&path) {
        Ok(settings) => Ok(settings),
        Err(Error::ConfigNotFound { .. }) => {
            debug!("no config at {}, using defaults", path.display());
            Ok(Settings::default())
        }
        Err(e) => Err(e),
    }
}

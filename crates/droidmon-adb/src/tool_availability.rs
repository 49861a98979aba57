//! Tool availability checking for device management
//!
//! Probes for the external tools droidmon drives: `adb` (platform-tools) and
//! the Android SDK `emulator`. Checked once at startup; the result decides
//! which recovery paths are even offered.

use std::process::Stdio;
use tokio::process::Command;

/// Cached availability of external tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Whether `adb` responds
    pub adb: bool,

    /// Resolved adb binary if found
    pub adb_path: Option<String>,

    /// Whether the `emulator` command is available (Android SDK)
    pub emulator: bool,

    /// Path to emulator command if found
    pub emulator_path: Option<String>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check() -> Self {
        let (adb, adb_path) = Self::check_adb().await;
        let (emulator, emulator_path) = Self::check_emulator().await;

        Self {
            adb,
            adb_path,
            emulator,
            emulator_path,
        }
    }

    /// Check if adb is available
    async fn check_adb() -> (bool, Option<String>) {
        for path in Self::adb_candidates() {
            if Command::new(&path)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("adb check failed for {}: {}", path, e))
                .unwrap_or(false)
            {
                return (true, Some(path));
            }
        }

        (false, None)
    }

    /// Check if the Android emulator is available
    async fn check_emulator() -> (bool, Option<String>) {
        for path in Self::emulator_candidates() {
            if Command::new(&path)
                .arg("-list-avds")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("emulator check failed for {}: {}", path, e))
                .unwrap_or(false)
            {
                return (true, Some(path));
            }
        }

        (false, None)
    }

    /// Candidate adb binaries: PATH resolution first, then SDK env vars
    fn adb_candidates() -> Vec<String> {
        let mut paths = Vec::new();

        if let Ok(resolved) = which::which("adb") {
            paths.push(resolved.to_string_lossy().to_string());
        }
        paths.push("adb".to_string());

        if let Ok(android_home) = std::env::var("ANDROID_HOME") {
            paths.push(format!("{}/platform-tools/adb", android_home));
        }
        if let Ok(sdk_root) = std::env::var("ANDROID_SDK_ROOT") {
            paths.push(format!("{}/platform-tools/adb", sdk_root));
        }

        paths
    }

    /// Candidate emulator binaries
    fn emulator_candidates() -> Vec<String> {
        let mut paths = vec!["emulator".to_string()];

        if let Ok(android_home) = std::env::var("ANDROID_HOME") {
            paths.push(format!("{}/emulator/emulator", android_home));
        }
        if let Ok(sdk_root) = std::env::var("ANDROID_SDK_ROOT") {
            paths.push(format!("{}/emulator/emulator", sdk_root));
        }

        paths
    }

    /// Get user-friendly message when adb is unavailable
    pub fn adb_unavailable_message(&self) -> Option<&'static str> {
        if self.adb {
            None
        } else {
            Some("adb not found. Install the Android platform-tools and add them to PATH.")
        }
    }

    /// Get user-friendly message when the emulator is unavailable
    pub fn emulator_unavailable_message(&self) -> Option<&'static str> {
        if self.emulator {
            None
        } else {
            Some("Android SDK emulator not found. Set ANDROID_HOME or install Android Studio.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(!availability.adb);
        assert!(!availability.emulator);
        assert!(availability.adb_path.is_none());
        assert!(availability.emulator_path.is_none());
    }

    #[test]
    fn test_adb_unavailable_message() {
        let availability = ToolAvailability::default();
        assert!(availability.adb_unavailable_message().is_some());
    }

    #[test]
    fn test_emulator_unavailable_message() {
        let availability = ToolAvailability::default();
        assert!(availability.emulator_unavailable_message().is_some());
    }

    #[test]
    #[serial]
    fn test_adb_candidates_includes_env_vars() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        let paths = ToolAvailability::adb_candidates();
        assert!(paths.iter().any(|p| p.contains("/test/android/platform-tools")));
        std::env::remove_var("ANDROID_HOME");
    }

    #[test]
    #[serial]
    fn test_emulator_candidates_includes_sdk_root() {
        std::env::set_var("ANDROID_SDK_ROOT", "/test/sdk");
        let paths = ToolAvailability::emulator_candidates();
        assert!(paths.iter().any(|p| p.contains("/test/sdk/emulator")));
        std::env::remove_var("ANDROID_SDK_ROOT");
    }

    #[test]
    fn test_emulator_candidates_includes_default() {
        let paths = ToolAvailability::emulator_candidates();
        assert!(paths.contains(&"emulator".to_string()));
    }

    #[test]
    fn test_adb_available_no_message() {
        let availability = ToolAvailability {
            adb: true,
            adb_path: Some("/usr/bin/adb".to_string()),
            emulator: false,
            emulator_path: None,
        };
        assert!(availability.adb_unavailable_message().is_none());
    }
}

//! Android emulator lifecycle
//!
//! Launches the SDK emulator as a detached background process and records its
//! PID. Used only by the recovery path when no physical device is configured.

use std::path::PathBuf;
use std::process::Stdio;

use droidmon_core::prelude::*;
use tokio::process::Command;

/// How to (re)start a virtual device.
///
/// Immutable once constructed; the monitor clones it into each recovery
/// attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorConfig {
    /// AVD name (used for the boot command)
    pub avd_name: String,
    /// Android SDK root containing `emulator/emulator`
    pub sdk_path: PathBuf,
    /// GPU mode passed to `-gpu` ("auto" uses KVM acceleration when available)
    pub gpu_mode: String,
    /// RAM budget in megabytes
    pub memory_mb: u32,
    /// Start without loading a snapshot
    pub no_snapshot: bool,
    /// Disable audio emulation
    pub no_audio: bool,
    /// Skip the boot animation
    pub no_boot_anim: bool,
    /// Extra arguments appended verbatim
    pub extra_args: Vec<String>,
}

impl EmulatorConfig {
    pub fn new(avd_name: impl Into<String>, sdk_path: impl Into<PathBuf>) -> Self {
        Self {
            avd_name: avd_name.into(),
            sdk_path: sdk_path.into(),
            gpu_mode: "auto".to_string(),
            memory_mb: 2048,
            no_snapshot: true,
            no_audio: true,
            no_boot_anim: true,
            extra_args: Vec::new(),
        }
    }

    /// Path to the emulator binary inside the SDK
    pub fn emulator_binary(&self) -> PathBuf {
        self.sdk_path.join("emulator").join("emulator")
    }

    /// Build the emulator command line
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-avd".to_string(),
            self.avd_name.clone(),
            "-memory".to_string(),
            self.memory_mb.to_string(),
            "-gpu".to_string(),
            self.gpu_mode.clone(),
        ];
        if self.no_snapshot {
            args.push("-no-snapshot".to_string());
        }
        if self.no_audio {
            args.push("-no-audio".to_string());
        }
        if self.no_boot_anim {
            args.push("-no-boot-anim".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Launch the emulator in the background and return its PID.
///
/// The child runs detached: a spawned task reaps it so it never zombies, and
/// the caller is expected to follow up with the same wait-for-device
/// handshake used for physical devices before declaring success.
pub async fn spawn_emulator(config: &EmulatorConfig) -> Result<u32> {
    let binary = config.emulator_binary();
    if !binary.exists() {
        return Err(Error::emulator_not_found(binary));
    }

    let args = config.to_args();
    info!("Starting emulator: {} {}", binary.display(), args.join(" "));

    let mut child = Command::new(&binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::ProcessSpawn {
            reason: e.to_string(),
        })?;

    let pid = child.id().ok_or_else(|| Error::ProcessSpawn {
        reason: "emulator exited before a PID was assigned".to_string(),
    })?;

    // Detach: reap the child in the background so it keeps running
    // independently of the caller
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    Ok(pid)
}

/// Best-effort process kill by PID.
///
/// Used as the fallback when `adb emu kill` does not apply. Failures are
/// ignored: stopping is best-effort, not verified.
pub async fn kill_process(pid: u32) {
    let _ = Command::new("kill").arg(pid.to_string()).output().await;
}

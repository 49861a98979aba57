//! APK install orchestration with retry and verification
//!
//! Installs packages over the same unreliable transport the monitor
//! supervises, retrying transient failures with the shared backoff policy and
//! journaling every attempt so an installation's full timeline is replayable
//! even when the call site only sees the terminal status.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use droidmon_adb::{CmdOutcome, Transport};
use droidmon_core::prelude::*;
use droidmon_core::RetryPolicy;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use url::Url;

use crate::session::SessionHandle;

/// Per-attempt timeout for a single-APK install
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Base per-attempt timeout for a split install, before size scaling
const SPLIT_BASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Ceiling for the size-scaled split-install timeout
const SPLIT_MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for read-only package queries
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for one download request
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Journaled error strings are truncated to this many bytes
const ERROR_TRUNCATE_LEN: usize = 200;

static VERSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"versionName=(\S+)").expect("invalid versionName regex"));

/// How a package was installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMethod {
    /// Single APK file
    Direct,
    /// Multiple APK files (App Bundle)
    Split,
}

impl InstallMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMethod::Direct => "direct",
            InstallMethod::Split => "split",
        }
    }
}

/// Terminal outcome of an install call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallResult {
    Success,
    AlreadyInstalled,
    Failed,
    Timeout,
    DownloadFailed,
    VerificationFailed,
}

impl InstallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallResult::Success => "success",
            InstallResult::AlreadyInstalled => "already_installed",
            InstallResult::Failed => "failed",
            InstallResult::Timeout => "timeout",
            InstallResult::DownloadFailed => "download_failed",
            InstallResult::VerificationFailed => "verification_failed",
        }
    }
}

/// Result of one install call. Produced once, never mutated.
#[derive(Debug, Clone)]
pub struct InstallStatus {
    pub result: InstallResult,
    pub method: Option<InstallMethod>,
    pub version_installed: Option<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl InstallStatus {
    fn terminal(result: InstallResult, method: Option<InstallMethod>, started: Instant) -> Self {
        Self {
            result,
            method,
            version_installed: None,
            error: None,
            duration: started.elapsed(),
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True for both `Success` and `AlreadyInstalled`
    pub fn succeeded(&self) -> bool {
        matches!(
            self.result,
            InstallResult::Success | InstallResult::AlreadyInstalled
        )
    }
}

/// Outcome of a download, keeping integrity failure distinct from
/// availability failure
#[derive(Debug)]
pub enum DownloadOutcome {
    /// File fully downloaded (and verified, when a hash was supplied)
    Complete(PathBuf),
    /// Transfer never completed; no file remains on disk
    TransferFailed(String),
    /// Transfer completed but the checksum did not match; the artifact was
    /// deleted
    HashMismatch { expected: String, actual: String },
}

/// Installs application packages onto the device.
///
/// Consults, but does not own, device state: callers are expected to have the
/// device reachable. Issues only app-level transport commands, never server
/// restarts.
pub struct AppInstaller<T> {
    transport: T,
    device_serial: Option<String>,
    download_dir: PathBuf,
    max_retries: u32,
    retry_policy: RetryPolicy,
    journal: Option<SessionHandle>,
    http: reqwest::Client,
}

impl<T: Transport + Sync> AppInstaller<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            device_serial: None,
            download_dir: std::env::temp_dir().join("droidmon-apks"),
            max_retries: 3,
            retry_policy: RetryPolicy::default(),
            journal: None,
            http: reqwest::Client::new(),
        }
    }

    /// Target a specific device instead of adb's default
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.device_serial = Some(serial.into());
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_journal(mut self, journal: SessionHandle) -> Self {
        self.journal = Some(journal);
        self
    }

    // ─────────────────────────────────────────────────────────────
    // Install operations
    // ─────────────────────────────────────────────────────────────

    /// Install a single APK file
    pub async fn install_apk(&self, apk_path: &Path, reinstall: bool) -> InstallStatus {
        let started = Instant::now();

        if !apk_path.exists() {
            let error = format!("APK not found: {}", apk_path.display());
            self.journal_event("install_failed", json!({}), false, Some(&error));
            return InstallStatus::terminal(InstallResult::Failed, None, started)
                .with_error(error);
        }

        let size_mb = file_size(apk_path) as f64 / 1024.0 / 1024.0;
        self.journal_event(
            "install_start",
            json!({ "path": apk_path.display().to_string(), "size_mb": size_mb }),
            true,
            None,
        );

        let mut args = vec!["install".to_string()];
        if reinstall {
            args.push("-r".to_string());
        }
        args.push(apk_path.display().to_string());

        self.run_install(args, INSTALL_TIMEOUT, InstallMethod::Direct, started)
            .await
    }

    /// Install split APKs (App Bundle).
    ///
    /// The per-attempt timeout scales with bundle size; large bundles take
    /// proportionally longer to stream to the device.
    pub async fn install_split_apks(&self, apk_paths: &[PathBuf], reinstall: bool) -> InstallStatus {
        let started = Instant::now();

        for path in apk_paths {
            if !path.exists() {
                let error = format!("APK not found: {}", path.display());
                self.journal_event("install_failed", json!({}), false, Some(&error));
                return InstallStatus::terminal(InstallResult::Failed, None, started)
                    .with_error(error);
            }
        }

        let total_bytes: u64 = apk_paths.iter().map(|p| file_size(p)).sum();
        let timeout = split_install_timeout(total_bytes);
        self.journal_event(
            "install_split_start",
            json!({
                "count": apk_paths.len(),
                "total_size_mb": total_bytes as f64 / 1024.0 / 1024.0,
                "timeout_secs": timeout.as_secs(),
            }),
            true,
            None,
        );

        let mut args = vec!["install-multiple".to_string()];
        if reinstall {
            args.push("-r".to_string());
        }
        args.extend(apk_paths.iter().map(|p| p.display().to_string()));

        self.run_install(args, timeout, InstallMethod::Split, started)
            .await
    }

    /// Shared retry loop for install commands.
    ///
    /// "Already exists" is a distinct terminal outcome, not a failure, and
    /// consumes no retries. `Unavailable` is terminal: retrying cannot
    /// summon a missing adb binary.
    async fn run_install(
        &self,
        args: Vec<String>,
        per_attempt_timeout: Duration,
        method: InstallMethod,
        started: Instant,
    ) -> InstallStatus {
        let args = self.device_args(args);
        let mut last_error = String::new();
        let mut last_timed_out = false;

        for attempt in 0..self.max_retries {
            let outcome = self.transport.run(&args, per_attempt_timeout).await;

            match &outcome {
                CmdOutcome::Unavailable => {
                    let error = outcome.describe();
                    self.journal_event(
                        "install_failed",
                        json!({ "method": method.as_str(), "attempt": attempt + 1 }),
                        false,
                        Some(&error),
                    );
                    return InstallStatus::terminal(InstallResult::Failed, Some(method), started)
                        .with_error(error);
                }
                CmdOutcome::TimedOut => {
                    last_error = outcome.describe();
                    last_timed_out = true;
                }
                CmdOutcome::Completed { .. } => {
                    let output = outcome.combined_output();

                    if outcome.success() && output.contains("Success") {
                        self.journal_event(
                            "install_success",
                            json!({ "method": method.as_str(), "attempt": attempt + 1 }),
                            true,
                            None,
                        );
                        return InstallStatus::terminal(
                            InstallResult::Success,
                            Some(method),
                            started,
                        );
                    }

                    if output.contains("INSTALL_FAILED_ALREADY_EXISTS") {
                        self.journal_event(
                            "install_already_installed",
                            json!({ "method": method.as_str(), "attempt": attempt + 1 }),
                            true,
                            None,
                        );
                        return InstallStatus::terminal(
                            InstallResult::AlreadyInstalled,
                            Some(method),
                            started,
                        );
                    }

                    last_error = truncate_for_journal(&outcome.describe());
                    last_timed_out = false;
                }
            }

            if attempt + 1 < self.max_retries {
                let delay = self.retry_policy.delay(attempt);
                self.journal_event(
                    "install_retry",
                    json!({
                        "method": method.as_str(),
                        "attempt": attempt + 1,
                        "delay_secs": delay.as_secs_f64(),
                        "error": &last_error,
                    }),
                    false,
                    Some(&last_error),
                );
                tokio::time::sleep(delay).await;
            }
        }

        let result = if last_timed_out {
            InstallResult::Timeout
        } else {
            InstallResult::Failed
        };
        let error = format!("failed after {} attempts: {}", self.max_retries, last_error);
        self.journal_event(
            "install_failed",
            json!({ "method": method.as_str(), "attempts": self.max_retries }),
            false,
            Some(&error),
        );
        InstallStatus::terminal(result, Some(method), started).with_error(error)
    }

    // ─────────────────────────────────────────────────────────────
    // Download
    // ─────────────────────────────────────────────────────────────

    /// Stream an APK to the download directory, optionally verifying its
    /// SHA-256 checksum.
    ///
    /// Never leaves a partial or unverified artifact behind: transfer errors
    /// and hash mismatches both delete the file before returning.
    pub async fn download_apk(
        &self,
        url: &str,
        filename: Option<&str>,
        expected_hash: Option<&str>,
    ) -> DownloadOutcome {
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| filename_from_url(url));

        if let Err(e) = std::fs::create_dir_all(&self.download_dir) {
            return DownloadOutcome::TransferFailed(e.to_string());
        }
        let dest = self.download_dir.join(&filename);

        self.journal_event(
            "download_start",
            json!({ "url": truncate_for_journal(url), "dest": dest.display().to_string() }),
            true,
            None,
        );

        if let Err(e) = self.fetch_to_file(url, &dest).await {
            let _ = std::fs::remove_file(&dest);
            let error = e.to_string();
            self.journal_event("download_failed", json!({}), false, Some(&error));
            return DownloadOutcome::TransferFailed(error);
        }

        if let Some(expected) = expected_hash {
            let actual = match sha256_file(&dest) {
                Ok(hash) => hash,
                Err(e) => {
                    let _ = std::fs::remove_file(&dest);
                    let error = e.to_string();
                    self.journal_event("download_failed", json!({}), false, Some(&error));
                    return DownloadOutcome::TransferFailed(error);
                }
            };

            if !actual.eq_ignore_ascii_case(expected) {
                let _ = std::fs::remove_file(&dest);
                self.journal_event(
                    "download_hash_mismatch",
                    json!({ "expected": expected.chars().take(16).collect::<String>(),
                            "actual": &actual[..16] }),
                    false,
                    Some("sha256 mismatch"),
                );
                return DownloadOutcome::HashMismatch {
                    expected: expected.to_string(),
                    actual,
                };
            }
        }

        self.journal_event(
            "download_success",
            json!({ "path": dest.display().to_string(), "size_bytes": file_size(&dest) }),
            true,
            None,
        );
        DownloadOutcome::Complete(dest)
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::download(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::download(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(downloaded)
    }

    /// Download, install, and clean up.
    ///
    /// The downloaded artifact is deleted afterwards regardless of install
    /// outcome, so transient installs never leak disk.
    pub async fn install_from_url(
        &self,
        url: &str,
        package: Option<&str>,
        expected_hash: Option<&str>,
        reinstall: bool,
    ) -> InstallStatus {
        let started = Instant::now();
        self.journal_event(
            "install_from_url_start",
            json!({ "url": truncate_for_journal(url), "package": package }),
            true,
            None,
        );

        let apk_path = match self.download_apk(url, None, expected_hash).await {
            DownloadOutcome::Complete(path) => path,
            DownloadOutcome::TransferFailed(error) => {
                return InstallStatus::terminal(InstallResult::DownloadFailed, None, started)
                    .with_error(truncate_for_journal(&error));
            }
            DownloadOutcome::HashMismatch { expected, actual } => {
                return InstallStatus::terminal(InstallResult::VerificationFailed, None, started)
                    .with_error(format!(
                        "sha256 mismatch: expected {}, got {}",
                        expected, actual
                    ));
            }
        };

        let mut status = self.install_apk(&apk_path, reinstall).await;
        if status.result == InstallResult::Success {
            if let Some(package) = package {
                status.version_installed = self.get_installed_version(package).await;
            }
        }

        let _ = std::fs::remove_file(&apk_path);
        status
    }

    // ─────────────────────────────────────────────────────────────
    // Read-only package queries
    // ─────────────────────────────────────────────────────────────

    /// Installed version of a package; `None` if absent or unparsable
    pub async fn get_installed_version(&self, package: &str) -> Option<String> {
        let args = self.device_args(vec![
            "shell".to_string(),
            "dumpsys".to_string(),
            "package".to_string(),
            package.to_string(),
        ]);
        let outcome = self.transport.run(&args, QUERY_TIMEOUT).await;
        if !outcome.success() {
            return None;
        }
        parse_version_name(outcome.stdout()?)
    }

    /// Whether a package is installed; `false` on any transport failure
    pub async fn is_installed(&self, package: &str) -> bool {
        let args = self.device_args(vec![
            "shell".to_string(),
            "pm".to_string(),
            "list".to_string(),
            "packages".to_string(),
            package.to_string(),
        ]);
        let outcome = self.transport.run(&args, QUERY_TIMEOUT).await;
        if !outcome.success() {
            return false;
        }
        let needle = format!("package:{}", package);
        outcome
            .stdout()
            .map(|out| out.lines().any(|line| line.trim() == needle))
            .unwrap_or(false)
    }

    /// Remove a package; true only on a confirmed success
    pub async fn uninstall(&self, package: &str) -> bool {
        self.journal_event("uninstall_start", json!({ "package": package }), true, None);

        let args = self.device_args(vec!["uninstall".to_string(), package.to_string()]);
        let outcome = self.transport.run(&args, QUERY_TIMEOUT).await;
        let success = outcome.success() && outcome.combined_output().contains("Success");

        let error = (!success).then(|| truncate_for_journal(&outcome.describe()));
        self.journal_event(
            "uninstall_complete",
            json!({ "package": package }),
            success,
            error.as_deref(),
        );
        success
    }

    // ─────────────────────────────────────────────────────────────

    /// Prepend `-s <serial>` when a target device is set
    fn device_args(&self, tail: Vec<String>) -> Vec<String> {
        match &self.device_serial {
            Some(serial) => {
                let mut args = vec!["-s".to_string(), serial.clone()];
                args.extend(tail);
                args
            }
            None => tail,
        }
    }

    fn journal_event(&self, event_type: &str, data: Value, success: bool, error: Option<&str>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.log_event(event_type, data, success, error) {
                error!("journal write failed for '{}': {}", event_type, e);
            }
        }
    }
}

/// Per-attempt timeout for a split install: base plus one second per MiB,
/// clamped to the ceiling
fn split_install_timeout(total_bytes: u64) -> Duration {
    let mib = total_bytes / (1024 * 1024);
    let secs = (SPLIT_BASE_TIMEOUT.as_secs() + mib).min(SPLIT_MAX_TIMEOUT.as_secs());
    Duration::from_secs(secs)
}

/// Extract `versionName=` from dumpsys output
fn parse_version_name(output: &str) -> Option<String> {
    VERSION_NAME
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Derive a filename from the URL path, falling back to a generic name
fn filename_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .filter(|s| !s.is_empty())
                .next_back()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "download.apk".to_string())
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Clamp an error string for journal readability, respecting char boundaries
fn truncate_for_journal(s: &str) -> String {
    if s.len() <= ERROR_TRUNCATE_LEN {
        return s.to_string();
    }
    let mut end = ERROR_TRUNCATE_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{read_events, Session, SessionHandle};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Transport that replays a scripted queue of outcomes and records the
    /// commands it received
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<CmdOutcome>>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<CmdOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.commands.lock().unwrap().len()
        }

        fn command(&self, index: usize) -> Vec<String> {
            self.commands.lock().unwrap()[index].clone()
        }
    }

    impl Transport for &ScriptedTransport {
        async fn run(&self, args: &[String], _timeout: Duration) -> CmdOutcome {
            self.commands.lock().unwrap().push(args.to_vec());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(CmdOutcome::Unavailable)
        }
    }

    fn completed(exit_code: i32, stdout: &str, stderr: &str) -> CmdOutcome {
        CmdOutcome::Completed {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn write_apk(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Minimal one-shot HTTP server serving a fixed body on every request
    async fn spawn_http_server(body: Vec<u8>) -> std::net::SocketAddr {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let header = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                });
            }
        });

        addr
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    #[tokio::test]
    async fn test_install_apk_success_first_attempt() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![completed(0, "Success\n", "")]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::Success);
        assert_eq!(status.method, Some(InstallMethod::Direct));
        assert!(status.succeeded());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_install_apk_already_exists_consumes_no_retries() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![
            completed(1, "", "Failure [INSTALL_FAILED_ALREADY_EXISTS]"),
            completed(1, "", "Failure [INSTALL_FAILED_ALREADY_EXISTS]"),
        ]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::AlreadyInstalled);
        assert!(status.succeeded());
        // Terminal on the first attempt: exactly one transport call
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_apk_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![
            completed(1, "", "adb: connection reset"),
            completed(0, "Success\n", ""),
        ]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::Success);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_apk_exhausts_retries() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![
            completed(1, "", "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]"),
            completed(1, "", "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]"),
            completed(1, "", "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]"),
        ]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::Failed);
        assert_eq!(transport.calls(), 3);
        assert!(status
            .error
            .as_deref()
            .unwrap()
            .contains("INSTALL_FAILED_INSUFFICIENT_STORAGE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_apk_timeout_result() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![
            CmdOutcome::TimedOut,
            CmdOutcome::TimedOut,
            CmdOutcome::TimedOut,
        ]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::Timeout);
    }

    #[tokio::test]
    async fn test_install_apk_unavailable_is_terminal() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![CmdOutcome::Unavailable]);
        let installer = AppInstaller::new(&transport);

        let status = installer.install_apk(&apk, false).await;
        assert_eq!(status.result, InstallResult::Failed);
        // No retries against a missing binary
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_install_apk_missing_file() {
        let transport = ScriptedTransport::new(vec![]);
        let installer = AppInstaller::new(&transport);

        let status = installer
            .install_apk(Path::new("/nonexistent/app.apk"), false)
            .await;
        assert_eq!(status.result, InstallResult::Failed);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_install_apk_reinstall_flag_and_serial() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![completed(0, "Success\n", "")]);
        let installer = AppInstaller::new(&transport).with_serial("emulator-5554");

        installer.install_apk(&apk, true).await;
        let cmd = transport.command(0);
        assert_eq!(cmd[0], "-s");
        assert_eq!(cmd[1], "emulator-5554");
        assert_eq!(cmd[2], "install");
        assert_eq!(cmd[3], "-r");
    }

    #[tokio::test]
    async fn test_install_split_apks() {
        let dir = TempDir::new().unwrap();
        let base = write_apk(&dir, "base.apk", b"base");
        let split = write_apk(&dir, "split.apk", b"split");

        let transport = ScriptedTransport::new(vec![completed(0, "Success\n", "")]);
        let installer = AppInstaller::new(&transport);

        let status = installer
            .install_split_apks(&[base, split], false)
            .await;
        assert_eq!(status.result, InstallResult::Success);
        assert_eq!(status.method, Some(InstallMethod::Split));
        assert_eq!(transport.command(0)[0], "install-multiple");
    }

    #[test]
    fn test_split_install_timeout_scales_with_size() {
        assert_eq!(split_install_timeout(0), Duration::from_secs(300));
        assert_eq!(
            split_install_timeout(100 * 1024 * 1024),
            Duration::from_secs(400)
        );
        // Clamped at the ceiling
        assert_eq!(
            split_install_timeout(1024 * 1024 * 1024),
            Duration::from_secs(600)
        );
    }

    #[tokio::test]
    async fn test_get_installed_version() {
        let dumpsys = "Packages:\n  Package [com.tplink.iot]\n    versionCode=1234\n    versionName=4.2.18\n";
        let transport = ScriptedTransport::new(vec![completed(0, dumpsys, "")]);
        let installer = AppInstaller::new(&transport);

        let version = installer.get_installed_version("com.tplink.iot").await;
        assert_eq!(version.as_deref(), Some("4.2.18"));
    }

    #[tokio::test]
    async fn test_get_installed_version_not_installed() {
        let transport = ScriptedTransport::new(vec![completed(0, "no output here", "")]);
        let installer = AppInstaller::new(&transport);
        assert_eq!(installer.get_installed_version("com.missing").await, None);

        let transport = ScriptedTransport::new(vec![CmdOutcome::TimedOut]);
        let installer = AppInstaller::new(&transport);
        assert_eq!(installer.get_installed_version("com.missing").await, None);
    }

    #[tokio::test]
    async fn test_is_installed() {
        let transport =
            ScriptedTransport::new(vec![completed(0, "package:com.tplink.iot\n", "")]);
        let installer = AppInstaller::new(&transport);
        assert!(installer.is_installed("com.tplink.iot").await);

        // Prefix matches from pm are not the package itself
        let transport =
            ScriptedTransport::new(vec![completed(0, "package:com.tplink.iot.extra\n", "")]);
        let installer = AppInstaller::new(&transport);
        assert!(!installer.is_installed("com.tplink.iot").await);

        let transport = ScriptedTransport::new(vec![CmdOutcome::Unavailable]);
        let installer = AppInstaller::new(&transport);
        assert!(!installer.is_installed("com.tplink.iot").await);
    }

    #[tokio::test]
    async fn test_uninstall() {
        let transport = ScriptedTransport::new(vec![completed(0, "Success\n", "")]);
        let installer = AppInstaller::new(&transport);
        assert!(installer.uninstall("com.tplink.iot").await);

        let transport = ScriptedTransport::new(vec![completed(1, "", "Failure")]);
        let installer = AppInstaller::new(&transport);
        assert!(!installer.uninstall("com.tplink.iot").await);
    }

    #[test]
    fn test_parse_version_name() {
        assert_eq!(
            parse_version_name("    versionName=1.2.3\n"),
            Some("1.2.3".to_string())
        );
        assert_eq!(parse_version_name("versionCode=77"), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/downloads/tapo-4.2.18.apk?token=abc"),
            "tapo-4.2.18.apk"
        );
        assert_eq!(filename_from_url("https://example.com/"), "download.apk");
        assert_eq!(filename_from_url("not a url"), "download.apk");
    }

    #[test]
    fn test_truncate_for_journal() {
        let short = "short error";
        assert_eq!(truncate_for_journal(short), short);

        let long = "x".repeat(500);
        let truncated = truncate_for_journal(&long);
        assert!(truncated.len() <= ERROR_TRUNCATE_LEN + 3);
        assert!(truncated.ends_with("..."));

        // Multi-byte chars never split
        let unicode = "é".repeat(300);
        let truncated = truncate_for_journal(&unicode);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_download_apk_verified() {
        let body = b"fake apk contents".to_vec();
        let hash = sha256_hex(&body);
        let addr = spawn_http_server(body.clone()).await;

        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let installer = AppInstaller::new(&transport).with_download_dir(dir.path());

        let url = format!("http://{}/files/app.apk", addr);
        match installer.download_apk(&url, None, Some(&hash)).await {
            DownloadOutcome::Complete(path) => {
                assert!(path.ends_with("app.apk"));
                assert_eq!(std::fs::read(&path).unwrap(), body);
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_apk_hash_mismatch_deletes_artifact() {
        let addr = spawn_http_server(b"tampered contents".to_vec()).await;

        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let installer = AppInstaller::new(&transport).with_download_dir(dir.path());

        let url = format!("http://{}/app.apk", addr);
        let wrong_hash = "0".repeat(64);
        match installer.download_apk(&url, None, Some(&wrong_hash)).await {
            DownloadOutcome::HashMismatch { expected, actual } => {
                assert_eq!(expected, wrong_hash);
                assert_ne!(actual, wrong_hash);
            }
            other => panic!("expected HashMismatch, got {:?}", other),
        }

        // No partial or unverified file remains
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_download_apk_transfer_failure() {
        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let installer = AppInstaller::new(&transport).with_download_dir(dir.path());

        // Nothing listens on this port
        let outcome = installer
            .download_apk("http://127.0.0.1:1/app.apk", None, None)
            .await;
        assert!(matches!(outcome, DownloadOutcome::TransferFailed(_)));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_install_from_url_verification_failed() {
        let addr = spawn_http_server(b"tampered contents".to_vec()).await;

        let dir = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let installer = AppInstaller::new(&transport).with_download_dir(dir.path());

        let url = format!("http://{}/app.apk", addr);
        let status = installer
            .install_from_url(&url, Some("com.tplink.iot"), Some(&"f".repeat(64)), false)
            .await;

        assert_eq!(status.result, InstallResult::VerificationFailed);
        // The install command never ran and no file was left behind
        assert_eq!(transport.calls(), 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_install_from_url_success_cleans_up_and_reports_version() {
        let body = b"good apk".to_vec();
        let hash = sha256_hex(&body);
        let addr = spawn_http_server(body).await;

        let dir = TempDir::new().unwrap();
        let dumpsys = "    versionName=4.2.18\n";
        let transport = ScriptedTransport::new(vec![
            completed(0, "Success\n", ""),
            completed(0, dumpsys, ""),
        ]);
        let installer = AppInstaller::new(&transport).with_download_dir(dir.path());

        let url = format!("http://{}/app.apk", addr);
        let status = installer
            .install_from_url(&url, Some("com.tplink.iot"), Some(&hash), false)
            .await;

        assert_eq!(status.result, InstallResult::Success);
        assert_eq!(status.version_installed.as_deref(), Some("4.2.18"));
        // Downloaded artifact always removed afterwards
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_journaled() {
        let session_dir = TempDir::new().unwrap();
        let journal =
            SessionHandle::new(Session::open("install", session_dir.path()).unwrap());

        let apk_dir = TempDir::new().unwrap();
        let apk = write_apk(&apk_dir, "app.apk", b"apk-bytes");

        let transport = ScriptedTransport::new(vec![
            completed(1, "", "adb: connection reset"),
            completed(0, "Success\n", ""),
        ]);
        let installer = AppInstaller::new(&transport).with_journal(journal.clone());

        installer.install_apk(&apk, false).await;

        let events = read_events(&journal.events_file()).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&"install_start"));
        assert!(types.contains(&"install_retry"));
        assert!(types.contains(&"install_success"));

        let retry = events
            .iter()
            .find(|e| e.event_type == "install_retry")
            .unwrap();
        assert_eq!(retry.data["attempt"], 1);
        assert!(!retry.success);
    }
}

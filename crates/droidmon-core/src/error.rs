//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Transport/Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Ensure the Android platform-tools are in your PATH.")]
    AdbNotFound,

    #[error("Android emulator not found at: {path}")]
    EmulatorNotFound { path: PathBuf },

    #[error("Device process error: {message}")]
    Process { message: String },

    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Session Journal Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Session error: {message}")]
    Session { message: String },

    // ─────────────────────────────────────────────────────────────
    // Download Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Download error: {message}")]
    Download { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn emulator_not_found(path: impl Into<PathBuf>) -> Self {
        Self::EmulatorNotFound { path: path.into() }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Process { .. } | Error::Download { .. })
    }

    /// Check if this error should trigger application exit
    ///
    /// `Session` is fatal on purpose: losing journal entries defeats the
    /// postmortem purpose of the journal, so storage failures must surface.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound
                | Error::EmulatorNotFound { .. }
                | Error::ProcessSpawn { .. }
                | Error::Session { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::process("device went away");
        assert_eq!(err.to_string(), "Device process error: device went away");

        let err = Error::AdbNotFound;
        assert!(err.to_string().contains("adb not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::AdbNotFound.is_fatal());
        assert!(Error::session("events.jsonl unwritable").is_fatal());
        assert!(Error::emulator_not_found("/sdk/emulator/emulator").is_fatal());
        assert!(!Error::process("test").is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::process("timed out").is_recoverable());
        assert!(Error::download("connection reset").is_recoverable());
        assert!(!Error::AdbNotFound.is_recoverable());
        assert!(!Error::session("disk full").is_recoverable());
    }

    #[test]
    fn test_error_constructors() {
        let _ = Error::process("test");
        let _ = Error::session("test");
        let _ = Error::download("test");
        let _ = Error::config("test");
    }

    #[test]
    fn test_emulator_not_found_error() {
        let err = Error::emulator_not_found("/opt/android/emulator/emulator");
        assert!(err.to_string().contains("/opt/android/emulator/emulator"));
    }
}

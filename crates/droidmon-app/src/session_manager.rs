//! Manages the active session and the on-disk session archive

use std::path::{Path, PathBuf};

use droidmon_core::prelude::*;

use super::session::{Session, SessionHandle, SessionMeta, SessionStatus, METADATA_FILE};

/// Owns at most one active session at a time.
///
/// Starting a new session while one is open force-ends the previous one with
/// `aborted` status: explicit abandonment, never silent loss. Also the query
/// surface over the archive for reporting tools.
#[derive(Debug)]
pub struct SessionManager {
    base_dir: PathBuf,
    current: Option<SessionHandle>,
}

impl SessionManager {
    /// Create a manager rooted at `base_dir`, creating it if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            current: None,
        })
    }

    /// Start a new session, aborting a still-active previous one
    pub fn start_session(&mut self, name: &str) -> Result<SessionHandle> {
        if let Some(previous) = self.current.take() {
            if previous.is_active() {
                warn!("session {} still active, aborting it", previous.id());
                previous.end(SessionStatus::Aborted)?;
            }
        }

        let handle = SessionHandle::new(Session::open(name, &self.base_dir)?);
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// End the current session, if any
    pub fn end_session(&mut self, status: SessionStatus) -> Result<()> {
        if let Some(current) = self.current.take() {
            current.end(status)?;
        }
        Ok(())
    }

    /// The active session handle, if one is open
    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Metadata of every recorded session, oldest first.
    ///
    /// Directories without a readable `session.json` are skipped, not raised:
    /// a half-written archive entry must not break reporting.
    pub fn list_sessions(&self) -> Vec<SessionMeta> {
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return Vec::new();
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.iter()
            .filter_map(|dir| read_meta(&dir.join(METADATA_FILE)))
            .collect()
    }

    /// Metadata for one session by id; `None` if missing or unreadable
    pub fn get_session(&self, session_id: &str) -> Option<SessionMeta> {
        read_meta(&self.base_dir.join(session_id).join(METADATA_FILE))
    }
}

fn read_meta(path: &Path) -> Option<SessionMeta> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

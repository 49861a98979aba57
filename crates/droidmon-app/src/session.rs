//! Append-only session journal
//!
//! Every component writes its notable actions into the session. Each event is
//! flushed to `events.jsonl` before the logging call returns, so the trail
//! survives a process crash mid-run. `summary.md` and `session.json` are
//! projections over that log, regenerable from it at any time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use droidmon_core::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Append-only event log, one JSON object per line
pub const EVENTS_FILE: &str = "events.jsonl";
/// Session metadata, rewritten on open and end
pub const METADATA_FILE: &str = "session.json";
/// Human-readable report generated at end()
pub const SUMMARY_FILE: &str = "summary.md";

/// One journaled event. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// ISO-8601 creation time
    pub timestamp: DateTime<Local>,
    /// Free-form tag, e.g. "state_change", "install_retry"
    pub event_type: String,
    /// Structured payload
    #[serde(default)]
    pub data: Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session metadata as persisted in `session.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub name: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub status: SessionStatus,
    pub screenshot_count: u32,
    pub ui_dump_count: u32,
    pub error_count: u32,
    pub event_count: usize,
}

/// One bounded automation run with a durable event trail.
///
/// Owned explicitly and passed to collaborators (via [`SessionHandle`]);
/// never process-wide state. Lifecycle: [`Session::open`] → active →
/// [`Session::end`]. A reopened session gets a fresh identifier.
#[derive(Debug)]
pub struct Session {
    name: String,
    session_id: String,
    session_dir: PathBuf,
    screenshots_dir: PathBuf,
    ui_dumps_dir: PathBuf,
    start_time: DateTime<Local>,
    end_time: Option<DateTime<Local>>,
    status: SessionStatus,
    events: Vec<SessionEvent>,
    screenshot_count: u32,
    ui_dump_count: u32,
    error_count: u32,
}

impl Session {
    /// Start a new session under `base_dir`.
    ///
    /// The identifier combines the start timestamp with the caller-supplied
    /// name. Directory creation failure is fatal and propagates: without the
    /// namespace nothing can be journaled.
    pub fn open(name: &str, base_dir: &Path) -> Result<Self> {
        let start_time = Local::now();
        let session_id = format!("{}_{}", start_time.format("%Y-%m-%d_%H-%M-%S"), name);
        let session_dir = base_dir.join(&session_id);
        let screenshots_dir = session_dir.join("screenshots");
        let ui_dumps_dir = session_dir.join("ui_dumps");

        std::fs::create_dir_all(&screenshots_dir)?;
        std::fs::create_dir_all(&ui_dumps_dir)?;

        let mut session = Self {
            name: name.to_string(),
            session_id: session_id.clone(),
            session_dir,
            screenshots_dir,
            ui_dumps_dir,
            start_time,
            end_time: None,
            status: SessionStatus::Running,
            events: Vec::new(),
            screenshot_count: 0,
            ui_dump_count: 0,
            error_count: 0,
        };

        session.write_metadata()?;
        session.log_event(
            "session_start",
            json!({ "name": name, "session_id": session_id }),
            true,
            None,
        )?;

        info!("Session started: {}", session.session_id);
        Ok(session)
    }

    /// Journal one event.
    ///
    /// The line is appended to `events.jsonl` before the event is recorded in
    /// memory or returned; a storage failure surfaces as `Err` so entries are
    /// never silently dropped. Rejects events once the session has ended.
    pub fn log_event(
        &mut self,
        event_type: &str,
        data: Value,
        success: bool,
        error: Option<&str>,
    ) -> Result<SessionEvent> {
        if self.end_time.is_some() {
            return Err(Error::session(format!(
                "session {} already ended, refusing event '{}'",
                self.session_id, event_type
            )));
        }

        let event = SessionEvent {
            timestamp: Local::now(),
            event_type: event_type.to_string(),
            data,
            success,
            error: error.map(str::to_string),
        };

        let line = serde_json::to_string(&event)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_file())?;
        use std::io::Write;
        writeln!(file, "{}", line)?;

        if !success {
            self.error_count += 1;
        }
        self.events.push(event.clone());
        Ok(event)
    }

    /// Copy a screenshot into the session namespace.
    ///
    /// The counter is incremented before the copy, so sequence numbers are
    /// never reused even when a copy fails.
    pub fn save_screenshot(&mut self, source: &Path) -> Result<PathBuf> {
        self.screenshot_count += 1;
        let dest = self
            .screenshots_dir
            .join(format!("{:03}.png", self.screenshot_count));
        std::fs::copy(source, &dest)?;
        self.log_event(
            "screenshot",
            json!({ "path": dest.display().to_string(), "index": self.screenshot_count }),
            true,
            None,
        )?;
        Ok(dest)
    }

    /// Copy a UI hierarchy dump into the session namespace
    pub fn save_ui_dump(&mut self, source: &Path) -> Result<PathBuf> {
        self.ui_dump_count += 1;
        let dest = self
            .ui_dumps_dir
            .join(format!("{:03}.xml", self.ui_dump_count));
        std::fs::copy(source, &dest)?;
        self.log_event(
            "ui_dump",
            json!({ "path": dest.display().to_string(), "index": self.ui_dump_count }),
            true,
            None,
        )?;
        Ok(dest)
    }

    /// Close the session: final event, metadata, and the summary report.
    ///
    /// Idempotent: a second call is a warn-and-no-op so reporting can never be
    /// corrupted by double shutdown paths.
    pub fn end(&mut self, status: SessionStatus) -> Result<()> {
        if self.end_time.is_some() {
            warn!(
                "session {} already ended, ignoring end({})",
                self.session_id, status
            );
            return Ok(());
        }

        self.log_event("session_end", json!({ "status": status.as_str() }), true, None)?;
        self.end_time = Some(Local::now());
        self.status = status;
        self.write_metadata()?;
        std::fs::write(self.summary_file(), self.generate_summary())?;

        info!("Session ended: {} ({})", self.session_id, status);
        Ok(())
    }

    /// Render the markdown report.
    ///
    /// Pure presentation over the event sequence; contains no state of its
    /// own and can be regenerated from `events.jsonl` alone.
    pub fn generate_summary(&self) -> String {
        let end = self.end_time.unwrap_or_else(Local::now);
        let duration = end.signed_duration_since(self.start_time);
        let secs = duration.num_seconds().max(0);
        let duration_str = format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);

        let mut event_types: std::collections::BTreeMap<&str, usize> =
            std::collections::BTreeMap::new();
        for event in &self.events {
            *event_types.entry(event.event_type.as_str()).or_default() += 1;
        }

        let mut summary = format!(
            "# Session Summary: {}\n\n\
             ## Overview\n\
             - **Session ID**: {}\n\
             - **Status**: {}\n\
             - **Duration**: {}\n\
             - **Start**: {}\n\
             - **End**: {}\n\n\
             ## Statistics\n\
             - **Total Events**: {}\n\
             - **Screenshots**: {}\n\
             - **UI Dumps**: {}\n\
             - **Errors**: {}\n\n\
             ## Event Breakdown\n\
             | Event Type | Count |\n\
             |------------|-------|\n",
            self.name,
            self.session_id,
            self.status,
            duration_str,
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.end_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            self.events.len(),
            self.screenshot_count,
            self.ui_dump_count,
            self.error_count,
        );

        for (event_type, count) in &event_types {
            summary.push_str(&format!("| {} | {} |\n", event_type, count));
        }

        let failures: Vec<&SessionEvent> = self.events.iter().filter(|e| !e.success).collect();
        if !failures.is_empty() {
            summary.push_str("\n## Errors\n");
            for (i, event) in failures.iter().enumerate() {
                summary.push_str(&format!(
                    "\n### Error {}: {}\n- **Time**: {}\n- **Error**: {}\n",
                    i + 1,
                    event.event_type,
                    event.timestamp.to_rfc3339(),
                    event.error.as_deref().unwrap_or("Unknown"),
                ));
                if !event.data.is_null() {
                    summary.push_str(&format!("- **Data**: {}\n", event.data));
                }
            }
        }

        summary.push_str(&format!(
            "\n## Files\n\
             - Events log: `{}`\n\
             - Screenshots: `screenshots/` ({} files)\n\
             - UI Dumps: `ui_dumps/` ({} files)\n",
            EVENTS_FILE, self.screenshot_count, self.ui_dump_count,
        ));

        summary
    }

    fn write_metadata(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.meta())?;
        std::fs::write(self.metadata_file(), json)?;
        Ok(())
    }

    /// Current metadata snapshot
    pub fn meta(&self) -> SessionMeta {
        SessionMeta {
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            screenshot_count: self.screenshot_count,
            ui_dump_count: self.ui_dump_count,
            error_count: self.error_count,
            event_count: self.events.len(),
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn events_file(&self) -> PathBuf {
        self.session_dir.join(EVENTS_FILE)
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.session_dir.join(METADATA_FILE)
    }

    pub fn summary_file(&self) -> PathBuf {
        self.session_dir.join(SUMMARY_FILE)
    }
}

/// Replay an `events.jsonl` file into the event sequence it was written from.
///
/// Round-trips losslessly with [`Session::log_event`]: order and content are
/// preserved. Used by reporting tools and tests.
pub fn read_events(path: &Path) -> Result<Vec<SessionEvent>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect()
}

/// Shared, clonable handle to a session.
///
/// The monitor and installer journal through clones of the same handle; the
/// underlying file stays single-writer because every append goes through the
/// one inner session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.inner.lock().expect("session lock poisoned")
    }

    pub fn log_event(
        &self,
        event_type: &str,
        data: Value,
        success: bool,
        error: Option<&str>,
    ) -> Result<SessionEvent> {
        self.lock().log_event(event_type, data, success, error)
    }

    pub fn save_screenshot(&self, source: &Path) -> Result<PathBuf> {
        self.lock().save_screenshot(source)
    }

    pub fn save_ui_dump(&self, source: &Path) -> Result<PathBuf> {
        self.lock().save_ui_dump(source)
    }

    pub fn end(&self, status: SessionStatus) -> Result<()> {
        self.lock().end(status)
    }

    pub fn id(&self) -> String {
        self.lock().id().to_string()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_active()
    }

    pub fn meta(&self) -> SessionMeta {
        self.lock().meta()
    }

    pub fn events_file(&self) -> PathBuf {
        self.lock().events_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_session(dir: &TempDir) -> Session {
        Session::open("test", dir.path()).expect("session open")
    }

    #[test]
    fn test_open_creates_namespace() {
        let dir = TempDir::new().unwrap();
        let session = open_session(&dir);

        assert!(session.dir().join("screenshots").is_dir());
        assert!(session.dir().join("ui_dumps").is_dir());
        assert!(session.metadata_file().is_file());
        assert!(session.events_file().is_file());
        assert!(session.id().ends_with("_test"));
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_open_fails_on_unwritable_base() {
        // A file where the directory should go makes creation fail loudly
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("base");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = Session::open("test", &blocker);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_log_event_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);

        session
            .log_event("tap", json!({ "x": 120, "y": 450 }), true, None)
            .unwrap();
        session
            .log_event("adb_command", json!({ "command": "shell input tap" }), false, Some("timed out"))
            .unwrap();

        let replayed = read_events(&session.events_file()).unwrap();
        assert_eq!(replayed.len(), session.events().len());
        assert_eq!(replayed, session.events());
        // session_start is always first
        assert_eq!(replayed[0].event_type, "session_start");
    }

    #[test]
    fn test_error_counter() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);

        session.log_event("ok", json!({}), true, None).unwrap();
        assert_eq!(session.error_count(), 0);

        session
            .log_event("bad", json!({}), false, Some("boom"))
            .unwrap();
        session.log_event("worse", json!({}), false, None).unwrap();
        assert_eq!(session.error_count(), 2);
    }

    #[test]
    fn test_events_rejected_after_end() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session.end(SessionStatus::Completed).unwrap();

        let result = session.log_event("late", json!({}), true, None);
        assert!(matches!(result, Err(Error::Session { .. })));

        // The rejected event must not be on disk either
        let replayed = read_events(&session.events_file()).unwrap();
        assert!(replayed.iter().all(|e| e.event_type != "late"));
    }

    #[test]
    fn test_end_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);

        session.end(SessionStatus::Completed).unwrap();
        let summary_once = std::fs::read_to_string(session.summary_file()).unwrap();
        let events_once = session.events().len();

        // Second end must not change status, duplicate events, or corrupt the
        // summary
        session.end(SessionStatus::Failed).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.events().len(), events_once);
        let summary_twice = std::fs::read_to_string(session.summary_file()).unwrap();
        assert_eq!(summary_once, summary_twice);
    }

    #[test]
    fn test_end_writes_metadata_and_summary() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session
            .log_event("install_retry", json!({ "attempt": 1 }), false, Some("Failure [X]"))
            .unwrap();
        session.end(SessionStatus::Failed).unwrap();

        let meta: SessionMeta =
            serde_json::from_str(&std::fs::read_to_string(session.metadata_file()).unwrap())
                .unwrap();
        assert_eq!(meta.status, SessionStatus::Failed);
        assert_eq!(meta.error_count, 1);
        assert!(meta.end_time.is_some());

        let summary = std::fs::read_to_string(session.summary_file()).unwrap();
        assert!(summary.contains("# Session Summary: test"));
        assert!(summary.contains("| install_retry | 1 |"));
        assert!(summary.contains("Failure [X]"));
    }

    #[test]
    fn test_screenshot_numbering_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);

        let src = dir.path().join("shot.png");
        std::fs::write(&src, b"png-bytes").unwrap();

        let first = session.save_screenshot(&src).unwrap();
        assert!(first.ends_with("001.png"));

        // A failed copy still consumes a sequence number
        let missing = dir.path().join("missing.png");
        assert!(session.save_screenshot(&missing).is_err());

        let third = session.save_screenshot(&src).unwrap();
        assert!(third.ends_with("003.png"));
    }

    #[test]
    fn test_ui_dump_saved_and_logged() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);

        let src = dir.path().join("dump.xml");
        std::fs::write(&src, b"<hierarchy/>").unwrap();

        let dest = session.save_ui_dump(&src).unwrap();
        assert!(dest.ends_with("001.xml"));
        assert!(dest.is_file());
        assert!(session
            .events()
            .iter()
            .any(|e| e.event_type == "ui_dump"));
    }

    #[test]
    fn test_summary_is_projection_of_events() {
        let dir = TempDir::new().unwrap();
        let mut session = open_session(&dir);
        session.log_event("tap", json!({}), true, None).unwrap();
        session.log_event("tap", json!({}), true, None).unwrap();

        let summary = session.generate_summary();
        assert!(summary.contains("| tap | 2 |"));
        assert!(summary.contains("| session_start | 1 |"));
    }

    #[test]
    fn test_handle_shared_logging() {
        let dir = TempDir::new().unwrap();
        let handle = SessionHandle::new(open_session(&dir));
        let other = handle.clone();

        handle.log_event("from_monitor", json!({}), true, None).unwrap();
        other.log_event("from_installer", json!({}), true, None).unwrap();

        let replayed = read_events(&handle.events_file()).unwrap();
        let types: Vec<&str> = replayed.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["session_start", "from_monitor", "from_installer"]);
    }
}

//! # droidmon-app - Supervision and Orchestration
//!
//! The automation core: durable session journaling, the device connection
//! state machine with auto-recovery, and the retrying install orchestrator.
//!
//! Depends on [`droidmon_core`] for errors and the retry policy, and on
//! [`droidmon_adb`] for the transport.
//!
//! ## Public API
//!
//! ### Session Journal (`session`)
//! - [`Session`] - One bounded automation run with an append-only event trail
//! - [`SessionEvent`] - Immutable journal record
//! - [`SessionHandle`] - Shared, clonable handle for concurrent writers
//! - [`SessionManager`] - At most one active session; list/get queries
//!
//! ### Device Supervision (`monitor`)
//! - [`DeviceState`] - Connection state machine variants
//! - [`DeviceMonitor`] - Owns the state, runs the supervision loop, recovers
//! - [`MonitorConfig`] - Polling interval, recovery ceiling, emulator config
//!
//! ### Install Orchestration (`installer`)
//! - [`AppInstaller`] - Retrying APK install/download/verify
//! - [`InstallStatus`], [`InstallResult`], [`InstallMethod`]
//!
//! ### Configuration (`config`)
//! - [`Settings`] - `.droidmon/config.toml` sections with serde defaults

pub mod config;
pub mod installer;
pub mod monitor;
pub mod session;
pub mod session_manager;

pub use config::{load_or_default, load_settings, Settings};
pub use installer::{
    AppInstaller, DownloadOutcome, InstallMethod, InstallResult, InstallStatus,
};
pub use monitor::{DeviceMonitor, DeviceState, MonitorConfig};
pub use session::{read_events, Session, SessionEvent, SessionHandle, SessionMeta, SessionStatus};
pub use session_manager::SessionManager;

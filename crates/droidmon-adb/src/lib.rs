//! # droidmon-adb - ADB Transport Layer
//!
//! The control channel to Android devices and emulators. Wraps the `adb`
//! command-line tool behind the [`Transport`] trait, exposes bounded-timeout
//! health probes, and manages emulator processes.
//!
//! Depends on [`droidmon_core`] for error handling.
//!
//! ## Public API
//!
//! ### Transport
//! - [`Transport`] - Async command interface with exactly one production
//!   implementation, [`AdbTransport`]
//! - [`CmdOutcome`] - Tri-state result of every transport command
//!   (completed / timed out / unavailable)
//!
//! ### Probes
//! - [`list_devices()`], [`first_ready_device()`] - Device enumeration
//! - [`shell_property()`], [`boot_completed()`] - Boot-completion probe
//! - [`restart_server()`] - ADB server restart (recovery path only)
//!
//! ### Emulator Management
//! - [`EmulatorConfig`] - How to (re)start a virtual device
//! - [`spawn_emulator()`] - Fire-and-forget background launch
//!
//! ### Platform Utilities
//! - [`ToolAvailability`] - Check for adb and the Android SDK emulator

pub mod emulator;
pub mod probe;
pub mod tool_availability;
pub mod transport;

// Public API re-exports
pub use emulator::{kill_process, spawn_emulator, EmulatorConfig};
pub use probe::{
    boot_completed, emu_kill, first_ready_device, list_devices, parse_device_list,
    restart_server, shell_property, AdbDevice,
};
pub use tool_availability::ToolAvailability;
pub use transport::{AdbTransport, CmdOutcome, LocalTransport, Transport};

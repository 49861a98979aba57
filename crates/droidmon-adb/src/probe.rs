//! Bounded-timeout health probes against the device transport
//!
//! Stateless query functions used by the device monitor. Each probe returns a
//! [`CmdOutcome`] (or a value derived from one) and never raises.

use std::time::Duration;

use crate::transport::{argv, CmdOutcome, Transport};

/// Timeout for device enumeration
pub const DEVICES_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single shell property read
pub const PROP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for adb server kill/start commands
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a server kill/start so the daemon can settle
const SERVER_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// One row of `adb devices` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
    /// Device serial (e.g. "emulator-5554")
    pub serial: String,
    /// Transport-reported state: "device", "offline", "unauthorized", ...
    pub state: String,
}

impl AdbDevice {
    /// True when the transport considers the device usable
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }
}

/// List devices known to the transport
pub async fn list_devices<T: Transport>(transport: &T) -> CmdOutcome {
    transport.run(&argv(&["devices"]), DEVICES_TIMEOUT).await
}

/// Parse the output of `adb devices`
///
/// Output format is a header line followed by one `serial\tstate` row per
/// device.
pub fn parse_device_list(output: &str) -> Vec<AdbDevice> {
    output
        .lines()
        .skip(1) // "List of devices attached"
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AdbDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Serial of the first device in the "device" state, if any
pub async fn first_ready_device<T: Transport>(transport: &T) -> Option<String> {
    let outcome = list_devices(transport).await;
    if !outcome.success() {
        return None;
    }
    parse_device_list(outcome.stdout()?)
        .into_iter()
        .find(AdbDevice::is_ready)
        .map(|d| d.serial)
}

/// Read one system property from a device
pub async fn shell_property<T: Transport>(transport: &T, serial: &str, key: &str) -> CmdOutcome {
    transport
        .run(&argv(&["-s", serial, "shell", "getprop", key]), PROP_TIMEOUT)
        .await
}

/// Whether the device has finished booting (`sys.boot_completed == 1`)
pub async fn boot_completed<T: Transport>(transport: &T, serial: &str) -> bool {
    let outcome = shell_property(transport, serial, "sys.boot_completed").await;
    outcome.success()
        && outcome
            .stdout()
            .map(|s| s.trim() == "1")
            .unwrap_or(false)
}

/// Restart the adb server (`kill-server` then `start-server`).
///
/// The device monitor is the only caller: the server is a process-wide shared
/// resource and restarting it drops every client's connection.
pub async fn restart_server<T: Transport>(transport: &T) {
    let killed = transport
        .run(&argv(&["kill-server"]), SERVER_TIMEOUT)
        .await;
    tracing::debug!("kill-server: {}", killed.describe());
    tokio::time::sleep(SERVER_SETTLE_DELAY).await;

    let started = transport
        .run(&argv(&["start-server"]), SERVER_TIMEOUT)
        .await;
    tracing::debug!("start-server: {}", started.describe());
    tokio::time::sleep(SERVER_SETTLE_DELAY).await;
}

/// Ask a running emulator to shut down through the transport
pub async fn emu_kill<T: Transport>(transport: &T, serial: &str) -> CmdOutcome {
    transport
        .run(&argv(&["-s", serial, "emu", "kill"]), SERVER_TIMEOUT)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "List of devices attached\nemulator-5554\tdevice\n192.168.1.20:5555\toffline\n";
        let devices = parse_device_list(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].state, "device");
        assert!(devices[0].is_ready());
        assert_eq!(devices[1].serial, "192.168.1.20:5555");
        assert!(!devices[1].is_ready());
    }

    #[test]
    fn test_parse_device_list_empty() {
        let output = "List of devices attached\n\n";
        assert!(parse_device_list(output).is_empty());
    }

    #[test]
    fn test_parse_device_list_unauthorized() {
        let output = "List of devices attached\nR58M123ABC\tunauthorized\n";
        let devices = parse_device_list(output);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].state, "unauthorized");
        assert!(!devices[0].is_ready());
    }

    #[test]
    fn test_parse_device_list_long_format() {
        // `adb devices -l` style rows carry extra columns; the first two are
        // all we need
        let output = "List of devices attached\nemulator-5554          device product:sdk_gphone64_x86_64 model:sdk_gphone64_x86_64\n";
        let devices = parse_device_list(output);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_ready());
    }

    // Async probes are exercised through a scripted fake transport.

    struct FixedTransport(CmdOutcome);

    impl crate::transport::Transport for FixedTransport {
        async fn run(&self, _args: &[String], _timeout: Duration) -> CmdOutcome {
            self.0.clone()
        }
    }

    fn completed(stdout: &str) -> CmdOutcome {
        CmdOutcome::Completed {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn test_first_ready_device() {
        let transport = FixedTransport(completed(
            "List of devices attached\noffline-1\toffline\nemulator-5554\tdevice\n",
        ));
        assert_eq!(
            first_ready_device(&transport).await,
            Some("emulator-5554".to_string())
        );
    }

    #[tokio::test]
    async fn test_first_ready_device_none_listed() {
        let transport = FixedTransport(completed("List of devices attached\n"));
        assert_eq!(first_ready_device(&transport).await, None);
    }

    #[tokio::test]
    async fn test_first_ready_device_transport_down() {
        let transport = FixedTransport(CmdOutcome::TimedOut);
        assert_eq!(first_ready_device(&transport).await, None);

        let transport = FixedTransport(CmdOutcome::Unavailable);
        assert_eq!(first_ready_device(&transport).await, None);
    }

    #[tokio::test]
    async fn test_boot_completed_true() {
        let transport = FixedTransport(completed("1\n"));
        assert!(boot_completed(&transport, "emulator-5554").await);
    }

    #[tokio::test]
    async fn test_boot_completed_still_booting() {
        // getprop returns empty while the property is unset
        let transport = FixedTransport(completed("\n"));
        assert!(!boot_completed(&transport, "emulator-5554").await);
    }

    #[tokio::test]
    async fn test_boot_completed_timeout() {
        let transport = FixedTransport(CmdOutcome::TimedOut);
        assert!(!boot_completed(&transport, "emulator-5554").await);
    }
}

//! Device connection state machine and auto-recovery supervision
//!
//! Owns the authoritative belief about device availability. A background loop
//! re-verifies reachability while connected, demotes to `Offline` on failure,
//! and drives recovery (adb server restart, then emulator restart) with a
//! bounded attempt ceiling. Every transition and recovery decision is written
//! to the session journal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use droidmon_adb::{emulator, probe, EmulatorConfig, Transport};
use droidmon_core::prelude::*;
use droidmon_core::RetryPolicy;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::session::SessionHandle;

/// Ceiling for the boot-completion poll after a device is first listed
const BOOT_WAIT: Duration = Duration::from_secs(60);

/// Pause between reachability/boot polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Pause between stopping and restarting the emulator during recovery
const EMULATOR_RESTART_DELAY: Duration = Duration::from_secs(3);

/// Device connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    Offline,
    Recovering,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Connected => "connected",
            DeviceState::Offline => "offline",
            DeviceState::Recovering => "recovering",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervision parameters
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between background health checks
    pub check_interval: Duration,
    /// Consecutive recovery attempts before recovery is abandoned
    pub max_recovery_attempts: u32,
    /// Ceiling for `wait_for_device` / `ensure_connected`
    pub wait_timeout: Duration,
    /// Backoff shared with the installer, applied between recovery attempts
    pub retry_policy: RetryPolicy,
    /// How to restart a virtual device; `None` for physical-only setups
    pub emulator: Option<EmulatorConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            max_recovery_attempts: 3,
            wait_timeout: Duration::from_secs(120),
            retry_policy: RetryPolicy::default(),
            emulator: None,
        }
    }
}

type StateCallback = Box<dyn Fn(DeviceState, DeviceState) + Send + Sync>;

/// Supervises one device's availability.
///
/// The transition function is the sole writer of the state: transitions are
/// serialized under a dedicated lock, so concurrent health checks and caller
/// queries can never interleave two transitions. Construct behind an [`Arc`]
/// and call [`DeviceMonitor::start_monitoring`] to run the background loop.
pub struct DeviceMonitor<T> {
    transport: T,
    config: MonitorConfig,
    journal: Option<SessionHandle>,
    /// Serializes state transitions including observer fan-out
    transition_lock: Mutex<()>,
    state: Mutex<DeviceState>,
    device_serial: Mutex<Option<String>>,
    emulator_pid: Mutex<Option<u32>>,
    recovery_attempts: AtomicU32,
    callbacks: Mutex<Vec<StateCallback>>,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl<T: Transport + Sync + 'static> DeviceMonitor<T> {
    pub fn new(transport: T, config: MonitorConfig) -> Self {
        Self {
            transport,
            config,
            journal: None,
            transition_lock: Mutex::new(()),
            state: Mutex::new(DeviceState::Disconnected),
            device_serial: Mutex::new(None),
            emulator_pid: Mutex::new(None),
            recovery_attempts: AtomicU32::new(0),
            callbacks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Attach a session journal for event logging
    pub fn with_journal(mut self, journal: SessionHandle) -> Self {
        self.journal = Some(journal);
        self
    }

    // ─────────────────────────────────────────────────────────────
    // Queries (safe to call concurrently with the loop)
    // ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> DeviceState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn device_serial(&self) -> Option<String> {
        self.device_serial
            .lock()
            .expect("serial lock poisoned")
            .clone()
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts.load(Ordering::Acquire)
    }

    /// Operator escape hatch: re-arm recovery after it was abandoned.
    ///
    /// The next supervisor tick in `Offline`/`Disconnected` will attempt
    /// recovery again from attempt 1.
    pub fn reset_recovery_attempts(&self) {
        self.recovery_attempts.store(0, Ordering::Release);
        self.journal_event("recovery_reset", json!({}), true, None);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Register an observer invoked synchronously on every transition with
    /// `(old_state, new_state)`.
    ///
    /// A panicking observer is contained and journaled as `callback_error`;
    /// it never breaks the supervision loop. Observers must not register
    /// further observers from within the callback.
    pub fn on_state_change(
        &self,
        callback: impl Fn(DeviceState, DeviceState) + Send + Sync + 'static,
    ) {
        self.callbacks
            .lock()
            .expect("callbacks lock poisoned")
            .push(Box::new(callback));
    }

    // ─────────────────────────────────────────────────────────────
    // Health checks
    // ─────────────────────────────────────────────────────────────

    /// Whether the transport currently lists a usable device.
    ///
    /// Remembers the serial for subsequent per-device commands.
    pub async fn check_device_connected(&self) -> bool {
        match probe::first_ready_device(&self.transport).await {
            Some(serial) => {
                *self.device_serial.lock().expect("serial lock poisoned") = Some(serial);
                true
            }
            None => false,
        }
    }

    /// Whether the listed device answers the boot-completion probe
    pub async fn check_device_responsive(&self) -> bool {
        let serial = self.device_serial();
        match serial {
            Some(serial) => probe::boot_completed(&self.transport, &serial).await,
            None => false,
        }
    }

    async fn device_healthy(&self) -> bool {
        self.check_device_connected().await && self.check_device_responsive().await
    }

    // ─────────────────────────────────────────────────────────────
    // Connection establishment
    // ─────────────────────────────────────────────────────────────

    /// Block until the device is listed and has finished booting.
    ///
    /// Polls every 2s up to `timeout`; once listed, polls boot completion for
    /// up to 60s. Interruptible by [`DeviceMonitor::stop`].
    pub async fn wait_for_device(&self, timeout: Duration) -> bool {
        self.set_state(DeviceState::Connecting);
        self.journal_event(
            "wait_for_device",
            json!({ "timeout_secs": timeout.as_secs() }),
            true,
            None,
        );

        let start = Instant::now();
        'outer: while start.elapsed() < timeout && !self.is_stopped() {
            if self.check_device_connected().await {
                let boot_start = Instant::now();
                while boot_start.elapsed() < BOOT_WAIT {
                    if self.check_device_responsive().await {
                        self.set_state(DeviceState::Connected);
                        self.journal_event(
                            "device_ready",
                            json!({ "serial": self.device_serial() }),
                            true,
                            None,
                        );
                        return true;
                    }
                    if !self.pause(POLL_INTERVAL).await {
                        break 'outer;
                    }
                }
            }
            if !self.pause(POLL_INTERVAL).await {
                break;
            }
        }

        self.set_state(DeviceState::Disconnected);
        self.journal_event(
            "wait_timeout",
            json!({ "timeout_secs": timeout.as_secs() }),
            false,
            Some("device did not become ready"),
        );
        false
    }

    /// Ensure the device is reachable, starting the emulator if configured
    pub async fn ensure_connected(&self) -> bool {
        if self.device_healthy().await {
            self.set_state(DeviceState::Connected);
            return true;
        }

        if self.config.emulator.is_some() {
            return self.start_emulator().await;
        }

        self.wait_for_device(self.config.wait_timeout).await
    }

    // ─────────────────────────────────────────────────────────────
    // Emulator lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Launch the configured emulator and perform the device handshake.
    ///
    /// A missing emulator config is journaled and reported as failure; the
    /// caller falls through to its next option rather than aborting.
    pub async fn start_emulator(&self) -> bool {
        let Some(config) = self.config.emulator.clone() else {
            warn!("emulator start requested without an emulator config");
            self.journal_event(
                "start_emulator_failed",
                json!({}),
                false,
                Some("no emulator config"),
            );
            return false;
        };

        match emulator::spawn_emulator(&config).await {
            Ok(pid) => {
                *self.emulator_pid.lock().expect("pid lock poisoned") = Some(pid);
                self.journal_event(
                    "emulator_started",
                    json!({ "pid": pid, "avd": config.avd_name }),
                    true,
                    None,
                );
                self.wait_for_device(self.config.wait_timeout).await
            }
            Err(e) => {
                self.journal_event(
                    "start_emulator_failed",
                    json!({ "avd": config.avd_name }),
                    false,
                    Some(&e.to_string()),
                );
                false
            }
        }
    }

    /// Stop the emulator: `adb emu kill` first, then the recorded PID.
    ///
    /// Best-effort and unverified; the state is forced to `Disconnected`
    /// even if both kills fail.
    pub async fn stop_emulator(&self) {
        if let Some(serial) = self.device_serial() {
            let outcome = probe::emu_kill(&self.transport, &serial).await;
            debug!("emu kill ({}): {}", serial, outcome.describe());
        }

        let pid = self.emulator_pid.lock().expect("pid lock poisoned").take();
        if let Some(pid) = pid {
            emulator::kill_process(pid).await;
        }

        self.set_state(DeviceState::Disconnected);
        self.journal_event("emulator_stopped", json!({}), true, None);
    }

    // ─────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────

    /// One recovery attempt: adb server restart, then emulator restart.
    ///
    /// Once the attempt ceiling is reached no further restarts are issued;
    /// the device is only passively probed until it comes back on its own or
    /// [`DeviceMonitor::reset_recovery_attempts`] re-arms recovery.
    pub async fn recover(&self) -> bool {
        if self.recovery_attempts.load(Ordering::Acquire) >= self.config.max_recovery_attempts {
            if self.device_healthy().await {
                self.recovery_attempts.store(0, Ordering::Release);
                self.set_state(DeviceState::Connected);
                self.journal_event(
                    "recovery_success",
                    json!({ "method": "external" }),
                    true,
                    None,
                );
                return true;
            }
            return false;
        }

        let attempt = self.recovery_attempts.fetch_add(1, Ordering::AcqRel) + 1;
        self.set_state(DeviceState::Recovering);
        self.journal_event("recovery_start", json!({ "attempt": attempt }), true, None);

        // Cheapest path first: the adb server itself is often what died
        probe::restart_server(&self.transport).await;
        if self.device_healthy().await {
            self.recovery_attempts.store(0, Ordering::Release);
            self.set_state(DeviceState::Connected);
            self.journal_event(
                "recovery_success",
                json!({ "method": "adb_restart" }),
                true,
                None,
            );
            return true;
        }

        if self.config.emulator.is_some() {
            self.stop_emulator().await;
            if self.pause(EMULATOR_RESTART_DELAY).await && self.start_emulator().await {
                self.recovery_attempts.store(0, Ordering::Release);
                self.journal_event(
                    "recovery_success",
                    json!({ "method": "emulator_restart" }),
                    true,
                    None,
                );
                return true;
            }
        }

        self.set_state(DeviceState::Disconnected);
        if attempt >= self.config.max_recovery_attempts {
            self.journal_event(
                "recovery_failed",
                json!({ "attempts": attempt }),
                false,
                Some("max recovery attempts exceeded"),
            );
        } else {
            self.journal_event("recovery_failed", json!({ "attempt": attempt }), false, None);
        }
        false
    }

    // ─────────────────────────────────────────────────────────────
    // Supervision loop
    // ─────────────────────────────────────────────────────────────

    /// One supervision step, as run by the background loop
    async fn tick(&self) {
        match self.state() {
            DeviceState::Connected => {
                if !self.check_device_connected().await {
                    self.set_state(DeviceState::Offline);
                    self.journal_event(
                        "device_disconnected",
                        json!({}),
                        false,
                        Some("device went offline"),
                    );
                } else if !self.check_device_responsive().await {
                    self.set_state(DeviceState::Offline);
                    self.journal_event(
                        "device_unresponsive",
                        json!({}),
                        false,
                        Some("device not responding"),
                    );
                }
            }
            DeviceState::Offline | DeviceState::Disconnected => {
                self.recover().await;
            }
            // Connecting/Recovering are transient states owned by an
            // in-flight operation; the loop leaves them alone
            _ => {}
        }
    }

    /// Spawn the background supervision loop.
    ///
    /// Runs until [`DeviceMonitor::stop`] is called; after stop the loop
    /// exits within one polling interval and never starts a new recovery
    /// attempt.
    pub fn start_monitoring(self: Arc<Self>) -> JoinHandle<()> {
        self.journal_event(
            "monitoring_started",
            json!({ "interval_secs": self.config.check_interval.as_secs() }),
            true,
            None,
        );

        let monitor = self;
        tokio::spawn(async move {
            loop {
                if monitor.is_stopped() {
                    break;
                }
                monitor.tick().await;
                if !monitor.pause(monitor.next_check_delay()).await {
                    break;
                }
            }
            monitor.journal_event("monitoring_stopped", json!({}), true, None);
            info!("device supervision loop stopped");
        })
    }

    /// Signal the supervision loop (and any in-flight wait) to stop.
    ///
    /// In-flight transport calls are allowed to complete; cancellation is
    /// best-effort, not preemptive.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    /// Delay before the next supervision tick.
    ///
    /// While failed recovery attempts accumulate, the shared backoff policy
    /// stretches the pause so repeated restarts do not hammer the transport.
    fn next_check_delay(&self) -> Duration {
        let attempts = self.recovery_attempts();
        if attempts == 0 || self.state() == DeviceState::Connected {
            return self.config.check_interval;
        }
        self.config
            .check_interval
            .max(self.config.retry_policy.delay(attempts))
    }

    /// Interruptible sleep; returns false once the stop signal is set
    async fn pause(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = self.stop_notify.notified() => false,
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Transition function (sole writer of the state)
    // ─────────────────────────────────────────────────────────────

    fn set_state(&self, new_state: DeviceState) {
        let _guard = self
            .transition_lock
            .lock()
            .expect("transition lock poisoned");

        let old_state = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let old = *state;
            if old == new_state {
                return;
            }
            *state = new_state;
            old
        };

        info!("device state: {} -> {}", old_state, new_state);
        self.journal_event(
            "state_change",
            json!({ "from": old_state.as_str(), "to": new_state.as_str() }),
            true,
            None,
        );

        let callbacks = self.callbacks.lock().expect("callbacks lock poisoned");
        for callback in callbacks.iter() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(old_state, new_state))) {
                let message = panic_message(&panic);
                error!("state observer panicked: {}", message);
                self.journal_event(
                    "callback_error",
                    json!({ "error": message }),
                    false,
                    Some(&message),
                );
            }
        }
    }

    fn journal_event(&self, event_type: &str, data: Value, success: bool, error: Option<&str>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.log_event(event_type, data, success, error) {
                // Supervision must outlive a sick journal; the failure is
                // still surfaced through process logging
                error!("journal write failed for '{}': {}", event_type, e);
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "observer panicked".to_string()
    }
}

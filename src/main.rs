//! droidmon - Supervised Android device automation over ADB
//!
//! This is the binary entry point. All logic lives in the workspace crates;
//! every collaborator is constructed here and passed by reference -- no
//! process-wide singletons.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use droidmon_adb::{probe, AdbTransport, ToolAvailability};
use droidmon_app::{
    load_or_default, AppInstaller, DeviceMonitor, InstallStatus, SessionManager, SessionStatus,
    Settings,
};
use droidmon_core::prelude::*;

/// Supervised Android device automation over ADB
#[derive(Parser, Debug)]
#[command(name = "droidmon")]
#[command(about = "Supervised Android device automation over ADB", long_about = None)]
struct Args {
    /// Base directory containing .droidmon/config.toml (defaults to the
    /// current directory)
    #[arg(long, value_name = "PATH")]
    base: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise the device until interrupted (Ctrl-C)
    Monitor {
        /// Session name recorded in the journal
        #[arg(long, default_value = "monitor")]
        name: String,
    },

    /// Install a local APK
    Install {
        /// Path to the APK file
        apk: PathBuf,

        /// Allow reinstall/downgrade (-r)
        #[arg(long)]
        reinstall: bool,

        /// Target device serial
        #[arg(short = 's', long)]
        serial: Option<String>,
    },

    /// Download, verify, and install an APK from a URL
    InstallUrl {
        /// Download URL
        url: String,

        /// Package name, used to report the installed version
        #[arg(long)]
        package: Option<String>,

        /// Expected SHA-256 of the download
        #[arg(long)]
        sha256: Option<String>,

        /// Allow reinstall/downgrade (-r)
        #[arg(long)]
        reinstall: bool,
    },

    /// List recorded sessions
    Sessions,

    /// One-shot device health check
    Status,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    droidmon_core::logging::init()?;

    let args = Args::parse();
    let base = args
        .base
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let settings = load_or_default(&base)?;
    let transport = AdbTransport::new();

    match args.command {
        Command::Monitor { name } => run_monitor(transport, &settings, &base, &name).await,
        Command::Install {
            apk,
            reinstall,
            serial,
        } => run_install(transport, &settings, &apk, reinstall, serial).await,
        Command::InstallUrl {
            url,
            package,
            sha256,
            reinstall,
        } => run_install_url(transport, &settings, &url, package, sha256, reinstall).await,
        Command::Sessions => run_sessions(&settings, &base),
        Command::Status => run_status(transport).await,
    }
}

async fn run_monitor(
    transport: AdbTransport,
    settings: &Settings,
    base: &std::path::Path,
    name: &str,
) -> color_eyre::Result<()> {
    let tools = ToolAvailability::check().await;
    if let Some(message) = tools.adb_unavailable_message() {
        eprintln!("⚠ {}", message);
    }

    let mut sessions = SessionManager::new(base.join(&settings.sessions.base_dir))?;
    let journal = sessions.start_session(name)?;
    println!("Session: {}", journal.id());

    let monitor = Arc::new(
        DeviceMonitor::new(transport, settings.monitor_config()).with_journal(journal.clone()),
    );
    monitor.on_state_change(|old, new| println!("  {} -> {}", old, new));

    if !monitor.ensure_connected().await {
        eprintln!("Device not reachable yet; supervision will keep trying.");
    }
    let handle = Arc::clone(&monitor).start_monitoring();

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping supervision");
    println!("Stopping...");
    monitor.stop();
    let _ = handle.await;

    sessions.end_session(SessionStatus::Completed)?;
    Ok(())
}

async fn run_install(
    transport: AdbTransport,
    settings: &Settings,
    apk: &std::path::Path,
    reinstall: bool,
    serial: Option<String>,
) -> color_eyre::Result<()> {
    let mut installer =
        AppInstaller::new(transport).with_max_retries(settings.installer.max_retries);
    if let Some(dir) = &settings.installer.download_dir {
        installer = installer.with_download_dir(dir);
    }
    if let Some(serial) = serial {
        installer = installer.with_serial(serial);
    }

    let status = installer.install_apk(apk, reinstall).await;
    print_install_status(&status);
    if !status.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_install_url(
    transport: AdbTransport,
    settings: &Settings,
    url: &str,
    package: Option<String>,
    sha256: Option<String>,
    reinstall: bool,
) -> color_eyre::Result<()> {
    let mut installer =
        AppInstaller::new(transport).with_max_retries(settings.installer.max_retries);
    if let Some(dir) = &settings.installer.download_dir {
        installer = installer.with_download_dir(dir);
    }

    let status = installer
        .install_from_url(url, package.as_deref(), sha256.as_deref(), reinstall)
        .await;
    print_install_status(&status);
    if !status.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_sessions(settings: &Settings, base: &std::path::Path) -> color_eyre::Result<()> {
    let manager = SessionManager::new(base.join(&settings.sessions.base_dir))?;
    let sessions = manager.list_sessions();

    if sessions.is_empty() {
        println!("No sessions recorded.");
        return Ok(());
    }

    for meta in sessions {
        println!(
            "{}  {:9}  events: {:4}  errors: {}",
            meta.session_id, meta.status, meta.event_count, meta.error_count
        );
    }
    Ok(())
}

async fn run_status(transport: AdbTransport) -> color_eyre::Result<()> {
    let tools = ToolAvailability::check().await;
    println!(
        "adb:      {}",
        tools.adb_path.as_deref().unwrap_or("not found")
    );
    println!(
        "emulator: {}",
        tools.emulator_path.as_deref().unwrap_or("not found")
    );

    match probe::first_ready_device(&transport).await {
        Some(serial) => {
            let booted = probe::boot_completed(&transport, &serial).await;
            println!(
                "device:   {} ({})",
                serial,
                if booted { "ready" } else { "still booting" }
            );
        }
        None => println!("device:   none"),
    }
    Ok(())
}

fn print_install_status(status: &InstallStatus) {
    println!("result:   {}", status.result.as_str());
    if let Some(method) = status.method {
        println!("method:   {}", method.as_str());
    }
    if let Some(version) = &status.version_installed {
        println!("version:  {}", version);
    }
    if let Some(error) = &status.error {
        eprintln!("error:    {}", error);
    }
    println!("duration: {:.1}s", status.duration.as_secs_f64());
}

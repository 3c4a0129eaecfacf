// Warn on unused code to catch dead code early
#![warn(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod compat;
pub mod config;
pub mod device;
pub mod filter;
mod ignore_poison;
pub mod logging;
pub mod router;
pub mod session;
pub mod sink;
pub mod transfer;

use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use compat::HostCompatibility;
use config::AgentConfig;
use device::local::LocalMountDriver;
use device::permission::MountAccessPermission;
use device::watcher::MountWatcher;
use router::{Collaborators, DeviceEventRouter, RouterContext, TokioJobScheduler, event_channel};
use session::{KeepAlive, NoWakeLock, SessionEnv, SessionRegistry};
use sink::LogNotificationSink;

/// Runs the agent until Ctrl-C (or SIGTERM on Unix).
pub fn run() -> ExitCode {
    let config = AgentConfig::load();
    logging::init_logging(&config.log_dir, &config.log_level);
    for warning in &config.warnings {
        warn!("{}", warning);
    }
    info!("drivecopy {} starting, backing up to {}", env!("CARGO_PKG_VERSION"), config.backup_root.display());

    let compat = HostCompatibility::check(&config);
    for warning in compat.warnings() {
        warn!("{}", warning);
    }
    if !compat.is_compatible() {
        for reason in compat.incompatibility_reasons() {
            error!("Can't run on this host: {}", reason);
        }
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(config));
    info!("drivecopy stopped");
    ExitCode::SUCCESS
}

async fn serve(config: AgentConfig) {
    let (events_tx, events_rx) = event_channel();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handle = Handle::current();

    let env = Arc::new(SessionEnv {
        driver: Arc::new(LocalMountDriver::new()),
        filter: config.filter(),
        engine: config.engine(),
        destinations: config.planner(),
    });
    let collaborators = Collaborators {
        permissions: Arc::new(MountAccessPermission::new(handle.clone(), events_tx.clone())),
        scheduler: Arc::new(TokioJobScheduler::new(handle)),
        sink: Arc::new(LogNotificationSink),
        keep_alive: KeepAlive::new(Box::new(NoWakeLock)),
    };
    let ctx = RouterContext::new(
        Arc::new(SessionRegistry::new()),
        env,
        collaborators,
        config.retry,
        events_tx.clone(),
    );
    let router = tokio::spawn(DeviceEventRouter::new(ctx).run(events_rx, shutdown_tx.subscribe()));

    let watcher = MountWatcher::new(
        config.mount_parents.clone(),
        config.poll_interval,
        events_tx,
        config.backup_existing_on_start,
    );
    let watcher = tokio::spawn(watcher.run(shutdown_tx.subscribe()));

    wait_for_shutdown_signal().await;
    info!("Shutting down, cancelling active backups");
    let _ = shutdown_tx.send(());
    if let Err(e) = watcher.await {
        error!("Mount watcher crashed: {}", e);
    }
    if let Err(e) = router.await {
        error!("Router crashed: {}", e);
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => log_ctrl_c(result),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!("Can't listen for SIGTERM: {}", e),
        }
    }
    log_ctrl_c(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => error!("Can't listen for Ctrl-C, stopping: {}", e),
    }
}

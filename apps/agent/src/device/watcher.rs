//! Attach/detach detection for removable drives.
//!
//! The source of truth is the host's disk list (`sysinfo`): a mount counts as a device if the host
//! flags it removable, or if it sits under one of the configured mount parents (`/media`,
//! `/run/media`, `/Volumes`). The list is polled, and re-checked early whenever something changes
//! under a mount parent (`notify`) or a USB device comes or goes (`nusb` hotplug). Every check diffs
//! the current mounts against the known set and emits `Attached`/`Detached` for the difference.

use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::Disks;
use tokio::sync::{broadcast, mpsc};

use super::DeviceId;
use crate::ignore_poison::IgnorePoison;
use crate::router::{DeviceEvent, EventSender};

/// How long to let a freshly connected USB device settle before looking for its mount.
const USB_SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct MountWatcher {
    mount_parents: Vec<PathBuf>,
    poll_interval: Duration,
    events: EventSender,
    known: Mutex<HashSet<DeviceId>>,
    /// Treat drives already mounted at startup as new attachments
    backup_existing_on_start: bool,
}

impl MountWatcher {
    pub fn new(
        mount_parents: Vec<PathBuf>,
        poll_interval: Duration,
        events: EventSender,
        backup_existing_on_start: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            mount_parents,
            poll_interval,
            events,
            known: Mutex::new(HashSet::new()),
            backup_existing_on_start,
        })
    }

    /// Removable mounts the host currently reports.
    pub fn current_removable_mounts(&self) -> HashSet<DeviceId> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| disk.is_removable() || is_under_parents(disk.mount_point(), &self.mount_parents))
            .map(|disk| DeviceId::new(disk.mount_point().to_string_lossy()))
            .collect()
    }

    /// Takes the startup snapshot. Existing mounts are either reported as attachments or silently
    /// remembered, depending on configuration.
    fn prime(&self, current: HashSet<DeviceId>) {
        info!("Found {} removable drive(s) at startup", current.len());
        if self.backup_existing_on_start {
            self.check_for_device_changes(current);
        } else {
            *self.known.lock_ignore_poison() = current;
        }
    }

    /// Emits events for mounts that appeared or vanished since the last check.
    fn check_for_device_changes(&self, current: HashSet<DeviceId>) {
        let mut known = self.known.lock_ignore_poison();

        let mut attached: Vec<&DeviceId> = current.difference(&known).collect();
        attached.sort();
        for id in attached {
            debug!("Removable drive mounted: {}", id);
            self.emit(DeviceEvent::Attached(id.clone()));
        }

        let mut detached: Vec<&DeviceId> = known.difference(&current).collect();
        detached.sort();
        for id in detached {
            debug!("Removable drive unmounted: {}", id);
            self.emit(DeviceEvent::Detached(id.clone()));
        }

        *known = current;
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            warn!("Router is gone, dropping device event");
        }
    }

    async fn rescan(self: &Arc<Self>) {
        let watcher = Arc::clone(self);
        match tokio::task::spawn_blocking(move || watcher.current_removable_mounts()).await {
            Ok(current) => self.check_for_device_changes(current),
            Err(e) => error!("Disk scan failed: {}", e),
        }
    }

    /// Watches until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let watcher = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || watcher.current_removable_mounts()).await {
            Ok(current) => self.prime(current),
            Err(e) => error!("Initial disk scan failed: {}", e),
        }

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<()>();
        // Kept alive for as long as the loop runs
        let _fs_watcher = self.watch_mount_parents(trigger_tx.clone());
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let usb_task = tokio::spawn(watch_usb_hotplug(trigger_tx));
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        drop(trigger_tx);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!("Mount watcher started (polling every {:?})", self.poll_interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("Mount watcher shutting down");
                    break;
                }

                _ = poll.tick() => self.rescan().await,

                Some(()) = trigger_rx.recv() => {
                    // Collapse a burst of triggers into one scan
                    while trigger_rx.try_recv().is_ok() {}
                    self.rescan().await;
                }
            }
        }

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        usb_task.abort();
    }

    /// Watches each mount parent, plus the per-user folders inside it (`/media/<user>`), without
    /// descending into mounted drives. Per-user folders created later are picked up by polling.
    fn watch_mount_parents(&self, trigger: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
        let dirs = self.watch_targets();
        if dirs.is_empty() {
            debug!("No mount parents to watch, relying on polling");
            return None;
        }

        let watcher_result = notify::recommended_watcher(move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)
                ) {
                    let _ = trigger.send(());
                }
            }
            Err(e) => error!("Mount watcher error: {}", e),
        });

        let mut watcher = match watcher_result {
            Ok(watcher) => watcher,
            Err(e) => {
                error!("Failed to create mount watcher: {}", e);
                return None;
            }
        };
        for dir in dirs {
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => debug!("Watching {}", dir.display()),
                Err(e) => warn!("Failed to watch {}: {}", dir.display(), e),
            }
        }
        Some(watcher)
    }

    /// Existing mount parents and their subfolders that aren't known mounts themselves.
    fn watch_targets(&self) -> Vec<PathBuf> {
        let known = self.known.lock_ignore_poison();
        let mut targets = Vec::new();
        for parent in self.mount_parents.iter().filter(|p| p.is_dir()) {
            targets.push(parent.clone());
            let Ok(entries) = fs::read_dir(parent) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
                if is_dir && !known.contains(&DeviceId::new(path.to_string_lossy())) {
                    targets.push(path);
                }
            }
        }
        targets
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
async fn watch_usb_hotplug(trigger: mpsc::UnboundedSender<()>) {
    use futures_util::StreamExt;
    use nusb::hotplug::HotplugEvent;

    let mut stream = match nusb::watch_devices() {
        Ok(stream) => stream,
        Err(e) => {
            warn!("USB hotplug unavailable, relying on polling: {}", e);
            return;
        }
    };
    debug!("USB hotplug watcher started");

    while let Some(event) = stream.next().await {
        match event {
            HotplugEvent::Connected(info) => {
                debug!("USB device connected: {:04x}:{:04x}", info.vendor_id(), info.product_id());
                // The mount shows up a little after the device does
                tokio::time::sleep(USB_SETTLE_DELAY).await;
            }
            HotplugEvent::Disconnected(id) => debug!("USB device disconnected: {:?}", id),
        }
        if trigger.send(()).is_err() {
            break;
        }
    }
    debug!("USB hotplug watcher stopped");
}

/// True if `mount` is strictly below one of `parents` (the parent directory itself never counts).
fn is_under_parents(mount: &Path, parents: &[PathBuf]) -> bool {
    parents.iter().any(|parent| mount != parent && mount.starts_with(parent))
}

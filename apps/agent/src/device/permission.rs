//! Asking the host for access to a device.
//!
//! Requests never block the caller. The answer comes back later as a
//! [`DeviceEvent::PermissionResult`] on the router's event channel.

use log::{debug, warn};
use std::fs;
use std::path::Path;
use tokio::runtime::Handle;

use super::DeviceId;
use crate::router::{DeviceEvent, EventSender};

pub trait PermissionRequester: Send + Sync {
    fn request_permission(&self, id: &DeviceId);
}

/// Grants access to a mounted drive when its root can be listed. Mounts the user can't read (or
/// that are still settling) are denied and retried with backoff by the router.
pub struct MountAccessPermission {
    runtime: Handle,
    events: EventSender,
}

impl MountAccessPermission {
    pub fn new(runtime: Handle, events: EventSender) -> Self {
        Self { runtime, events }
    }
}

impl PermissionRequester for MountAccessPermission {
    fn request_permission(&self, id: &DeviceId) {
        let id = id.clone();
        let events = self.events.clone();
        // A hung mount must not stall the caller
        self.runtime.spawn_blocking(move || {
            let granted = is_readable(Path::new(id.as_str()));
            debug!("Access to {} {}", id, if granted { "granted" } else { "denied" });
            if events.send(DeviceEvent::PermissionResult { id, granted }).is_err() {
                warn!("Router is gone, dropping permission result");
            }
        });
    }
}

fn is_readable(root: &Path) -> bool {
    match fs::read_dir(root) {
        Ok(_) => true,
        Err(e) => {
            debug!("Can't list {}: {}", root.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::event_channel;

    #[tokio::test]
    async fn test_readable_mount_is_granted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (tx, mut rx) = event_channel();
        let id = DeviceId::new(dir.path().to_string_lossy());

        MountAccessPermission::new(Handle::current(), tx).request_permission(&id);

        let event = rx.recv().await.expect("permission result");
        assert_eq!(event, DeviceEvent::PermissionResult { id, granted: true });
    }

    #[tokio::test]
    async fn test_missing_mount_is_denied() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (tx, mut rx) = event_channel();
        let id = DeviceId::new(dir.path().join("unplugged").to_string_lossy());

        MountAccessPermission::new(Handle::current(), tx).request_permission(&id);

        let event = rx.recv().await.expect("permission result");
        assert_eq!(event, DeviceEvent::PermissionResult { id, granted: false });
    }
}

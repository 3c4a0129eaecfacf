//! One backup session per attached device.
//!
//! A session allocates its destination folder, opens the device, walks every partition and closes
//! the device again. It runs on a blocking thread and never returns an error: every way it can end
//! is a [`SessionOutcome`].
//!
//! ```text
//! Created ──► Initializing ──► Walking ──► Completed
//!    │             │              │
//!    ▼             ▼              ▼
//!  Failed        Failed       Cancelled   (Cancelled is reachable from any non-terminal state)
//! ```

mod destination;
mod errors;
mod keep_alive;
mod registry;

pub use destination::{DestinationLayout, DestinationPlanner};
pub use errors::SessionFailure;
pub use keep_alive::{KeepAlive, KeepAliveGuard, NoWakeLock, WakeLock};
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};

use chrono::Local;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::device::{DeviceError, DeviceHandle, DeviceId, FileNode, MassStorageDriver};
use crate::filter::SupportedFileFilter;
use crate::transfer::{DirectoryWalker, FileCopyEngine, TransferStats, WalkEnd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Created,
    Initializing,
    Walking,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    Completed(TransferStats),
    /// Detached (or shut down) mid-session, with whatever was done so far.
    Cancelled(TransferStats),
    Failed(SessionFailure),
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed(_) => SessionState::Completed,
            Self::Cancelled(_) => SessionState::Cancelled,
            Self::Failed(_) => SessionState::Failed,
        }
    }

    pub fn stats(&self) -> Option<&TransferStats> {
        match self {
            Self::Completed(stats) | Self::Cancelled(stats) => Some(stats),
            Self::Failed(_) => None,
        }
    }
}

/// What a finished session hands back to whoever started it.
#[derive(Debug)]
pub struct SessionReport {
    pub device_id: DeviceId,
    pub session: SessionHandle,
    /// Set once the destination folder exists.
    pub destination: Option<PathBuf>,
    pub outcome: SessionOutcome,
}

/// Everything sessions share: the driver and how files are picked, copied and placed.
pub struct SessionEnv {
    pub driver: Arc<dyn MassStorageDriver>,
    pub filter: SupportedFileFilter,
    pub engine: FileCopyEngine,
    pub destinations: DestinationPlanner,
}

pub struct DeviceSession {
    id: DeviceId,
    handle: SessionHandle,
    env: Arc<SessionEnv>,
    registry: Arc<SessionRegistry>,
}

impl DeviceSession {
    /// `handle` must come from `registry.try_register(&id)`. The registration is released when the
    /// session ends, however it ends.
    pub fn new(id: DeviceId, handle: SessionHandle, env: Arc<SessionEnv>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            id,
            handle,
            env,
            registry,
        }
    }

    /// Runs the session to a terminal state. Blocks for as long as the copy takes.
    pub fn run(self) -> SessionReport {
        let _registration = Registration {
            id: &self.id,
            handle: &self.handle,
            registry: &self.registry,
        };

        let mut destination = None;
        let outcome = self.drive(&mut destination);
        self.handle.set_state(outcome.state());

        debug!("Session for {} ended as {:?}", self.id, outcome.state());

        SessionReport {
            device_id: self.id.clone(),
            session: self.handle.clone(),
            destination,
            outcome,
        }
    }

    fn drive(&self, destination: &mut Option<PathBuf>) -> SessionOutcome {
        let cancel = &self.handle.token;
        if cancel.is_cancelled() {
            return SessionOutcome::Cancelled(TransferStats::new());
        }

        // Created → Initializing
        let dest = match self.env.destinations.allocate(&self.id, Local::now()) {
            Ok(dest) => dest,
            Err(failure) => return SessionOutcome::Failed(failure),
        };
        info!("Starting backup of {} into {}", self.id, dest.display());
        *destination = Some(dest.clone());
        self.handle.set_state(SessionState::Initializing);

        let device = match self.env.driver.open_device(&self.id) {
            Ok(device) => OpenDevice {
                id: &self.id,
                handle: device,
            },
            Err(error) => return SessionOutcome::Failed(SessionFailure::DeviceOpen { error }),
        };
        if cancel.is_cancelled() {
            return SessionOutcome::Cancelled(TransferStats::new());
        }

        let roots = match device.roots() {
            Ok(roots) => roots,
            Err(failure) => return SessionOutcome::Failed(failure),
        };

        // Initializing → Walking
        self.handle.set_state(SessionState::Walking);
        let walker = DirectoryWalker::new(&self.env.filter, &self.env.engine);
        let mut stats = TransferStats::new();
        let single = roots.len() == 1;
        for (index, root) in roots {
            let target = if single {
                dest.clone()
            } else {
                dest.join(format!("partition-{}", index + 1))
            };
            debug!("Walking partition {} of {} into {}", index + 1, self.id, target.display());
            if walker.walk_into(root.as_ref(), &target, cancel, &mut stats) == WalkEnd::Cancelled {
                return SessionOutcome::Cancelled(stats);
            }
        }

        SessionOutcome::Completed(stats)
    }
}

/// An opened device, closed when dropped. Close errors are logged and swallowed.
struct OpenDevice<'a> {
    id: &'a DeviceId,
    handle: Box<dyn DeviceHandle>,
}

impl OpenDevice<'_> {
    /// Root directories of every partition that has one, with the partition's position.
    fn roots(&self) -> Result<Vec<(usize, Box<dyn FileNode>)>, SessionFailure> {
        let partitions = self
            .handle
            .partitions()
            .map_err(|error| SessionFailure::NoReadablePartition { error })?;
        if partitions.is_empty() {
            return Err(SessionFailure::NoPartitions {
                device_id: self.id.to_string(),
            });
        }

        let mut roots = Vec::with_capacity(partitions.len());
        let mut last_error: Option<DeviceError> = None;
        for (index, partition) in partitions.iter().enumerate() {
            match partition.root_directory() {
                Ok(root) => roots.push((index, root)),
                Err(e) => {
                    warn!("Skipping partition {} of {}: {}", partition.label(), self.id, e);
                    last_error = Some(e);
                }
            }
        }

        match (roots.is_empty(), last_error) {
            (true, Some(error)) => Err(SessionFailure::NoReadablePartition { error }),
            _ => Ok(roots),
        }
    }
}

impl Drop for OpenDevice<'_> {
    fn drop(&mut self) {
        match self.handle.close() {
            Ok(()) => debug!("Closed device {}", self.id),
            Err(e) => warn!("Failed to close device {}: {}", self.id, e),
        }
    }
}

/// Releases the registry entry when the session ends, unless a newer session has taken it over.
struct Registration<'a> {
    id: &'a DeviceId,
    handle: &'a SessionHandle,
    registry: &'a SessionRegistry,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.registry.release(self.id, self.handle) {
            debug!("Registry entry for {} already gone or replaced", self.id);
        }
    }
}

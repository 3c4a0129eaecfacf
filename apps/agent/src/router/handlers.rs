//! Event handlers and the state they share.
//!
//! Handlers run inside a device's actor, one event at a time per device. They never block: the
//! only long-running work (a session) is handed to the blocking pool.

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use super::scheduler::JobScheduler;
use super::{DeviceEvent, DeviceOpenRetry, EventSender, RetryPolicy};
use crate::device::DeviceId;
use crate::device::permission::PermissionRequester;
use crate::ignore_poison::IgnorePoison;
use crate::session::{DeviceSession, KeepAlive, SessionEnv, SessionOutcome, SessionRegistry, SessionReport};
use crate::sink::NotificationSink;

/// The router's external collaborators.
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionRequester>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub sink: Arc<dyn NotificationSink>,
    pub keep_alive: Arc<KeepAlive>,
}

pub struct RouterContext {
    registry: Arc<SessionRegistry>,
    env: Arc<SessionEnv>,
    collaborators: Collaborators,
    policy: RetryPolicy,
    /// Fed back into the router by scheduled retries
    events: EventSender,
    /// Devices seen attached and not yet detached
    known: Mutex<HashSet<DeviceId>>,
    /// Retries scheduled since the last successful permission grant
    attempts: Mutex<HashMap<DeviceId, u32>>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
}

impl RouterContext {
    pub fn new(
        registry: Arc<SessionRegistry>,
        env: Arc<SessionEnv>,
        collaborators: Collaborators,
        policy: RetryPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            registry,
            env,
            collaborators,
            policy,
            events,
            known: Mutex::new(HashSet::new()),
            attempts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn is_known(&self, id: &DeviceId) -> bool {
        self.known.lock_ignore_poison().contains(id)
    }

    pub fn retry_attempts(&self, id: &DeviceId) -> u32 {
        self.attempts.lock_ignore_poison().get(id).copied().unwrap_or(0)
    }

    pub(super) fn handle(self: Arc<Self>, event: DeviceEvent) {
        debug!("Handling {:?}", event);
        match event {
            DeviceEvent::Attached(id) => self.on_attached(id),
            DeviceEvent::PermissionResult { id, granted: true } => self.on_permission_granted(id),
            DeviceEvent::PermissionResult { id, granted: false } => self.on_permission_denied(id),
            DeviceEvent::Detached(id) => self.on_detached(id),
            DeviceEvent::RetryRequested(id) => self.on_retry_requested(id),
        }
    }

    fn on_attached(&self, id: DeviceId) {
        if !self.known.lock_ignore_poison().insert(id.clone()) {
            debug!("{} is already known, ignoring attach", id);
            return;
        }
        self.collaborators
            .sink
            .log_event(&format!("Device attached: {}", id));
        self.collaborators.permissions.request_permission(&id);
    }

    fn on_permission_granted(self: Arc<Self>, id: DeviceId) {
        if !self.is_known(&id) {
            debug!("Permission granted for {} after it was detached, ignoring", id);
            return;
        }
        self.attempts.lock_ignore_poison().remove(&id);
        self.collaborators.scheduler.cancel(id.as_str());
        self.start_session(id);
    }

    fn on_permission_denied(&self, id: DeviceId) {
        if !self.is_known(&id) {
            debug!("Permission denied for {} after it was detached, ignoring", id);
            return;
        }
        self.collaborators
            .sink
            .notify("Permission needed", &format!("Access to {} was denied. Will retry.", id));
        self.schedule_retry(&id);
    }

    fn on_detached(&self, id: DeviceId) {
        // Remove rather than just flag, so a quick re-attach can register a fresh session while the
        // old one winds down. The old one only releases its own entry.
        if self.registry.set_cancelled(&id) {
            self.registry.unregister(&id);
            info!("Device {} detached, cancelling its session", id);
        }
        self.known.lock_ignore_poison().remove(&id);
        self.attempts.lock_ignore_poison().remove(&id);
        if self.collaborators.scheduler.cancel(id.as_str()) {
            debug!("Dropped pending retry for {}", id);
        }
        self.collaborators
            .sink
            .log_event(&format!("Device detached: {}", id));
    }

    fn on_retry_requested(&self, id: DeviceId) {
        if !self.is_known(&id) {
            debug!("Retry for {} after it was detached, ignoring", id);
            return;
        }
        if self.registry.contains(&id) {
            debug!("Retry for {} while a session is active, ignoring", id);
            return;
        }
        info!("Retrying permission request for {}", id);
        self.collaborators.permissions.request_permission(&id);
    }

    fn schedule_retry(&self, id: &DeviceId) {
        let attempt = {
            let mut attempts = self.attempts.lock_ignore_poison();
            let attempt = attempts.entry(id.clone()).or_insert(0);
            if let Some(max) = self.policy.max_attempts
                && *attempt >= max
            {
                None
            } else {
                *attempt += 1;
                Some(*attempt - 1)
            }
        };

        let Some(attempt) = attempt else {
            warn!("Giving up on {} after {} retries", id, self.retry_attempts(id));
            self.collaborators
                .sink
                .notify("Backup stopped", &format!("Gave up on {} after repeated failures.", id));
            return;
        };

        let delay = self.policy.backoff.delay(attempt);
        info!("Retry {} for {} scheduled in {:?}", attempt + 1, id, delay);
        let events = self.events.clone();
        let retry_id = id.clone();
        self.collaborators.scheduler.schedule_once(
            id.as_str(),
            delay,
            Box::new(move || {
                let _ = events.send(DeviceEvent::RetryRequested(retry_id));
            }),
        );
    }

    fn start_session(self: Arc<Self>, id: DeviceId) {
        let Some(handle) = self.registry.try_register(&id) else {
            info!("A session for {} is already running, ignoring", id);
            return;
        };

        self.collaborators
            .sink
            .notify("Backup started", &format!("Backing up {}", id));
        let keep_alive = self.collaborators.keep_alive.hold();
        let session = DeviceSession::new(id.clone(), handle, Arc::clone(&self.env), Arc::clone(&self.registry));

        let ctx = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                let _keep_alive = keep_alive;
                session.run()
            })
            .await;
            match result {
                Ok(report) => ctx.finish(report),
                Err(e) => ctx.collaborators.sink.log_error(&format!("Session for {} crashed", id), Some(&e)),
            }
        });

        let mut sessions = self.sessions.lock_ignore_poison();
        sessions.retain(|task| !task.is_finished());
        sessions.push(task);
    }

    fn finish(&self, report: SessionReport) {
        let sink = &self.collaborators.sink;
        let id = &report.device_id;
        match &report.outcome {
            SessionOutcome::Completed(stats) => {
                let summary = stats.summary();
                sink.log_event(&format!("Backup of {} finished.\n{}", id, summary));
                sink.notify("Backup complete", &summary.short());
            }
            SessionOutcome::Cancelled(stats) => {
                let summary = stats.summary();
                sink.log_event(&format!("Backup of {} cancelled.\n{}", id, summary));
                sink.notify("Backup cancelled", &format!("{} was removed: {}", id, summary.short()));
            }
            SessionOutcome::Failed(failure) => {
                sink.log_error(&format!("Backup of {} failed", id), Some(failure));
                sink.notify("Backup failed", &failure.user_message());
                if failure.is_retryable() && self.policy.device_open_retry == DeviceOpenRetry::Backoff && self.is_known(id) {
                    self.schedule_retry(id);
                }
            }
        }
    }

    pub(super) fn cancel_pending_retries(&self) {
        self.collaborators.scheduler.cancel_all();
    }

    pub(super) async fn wait_for_sessions(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.sessions.lock_ignore_poison());
        for task in tasks {
            let _ = task.await;
        }
    }
}

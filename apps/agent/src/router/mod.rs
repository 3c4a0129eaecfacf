//! Device event routing.
//!
//! Every event is handled by a per-device actor task fed through its own queue, so events for one
//! device are processed strictly in arrival order while different devices proceed concurrently.
//! Sessions run on the blocking pool and never hold up an actor.
//!
//! ```text
//! watcher / permission requester / scheduler ──► event channel ──► DeviceEventRouter
//!                                                                    │ (one actor per device)
//!                                                                    ▼
//!                                                    handlers ──► SessionRegistry / DeviceSession
//! ```
//!
//! When a device detaches its actor is retired. If the device comes back before the old actor has
//! drained, the new actor waits for it, so a re-attach can never overtake the detach before it.

mod handlers;
mod scheduler;

pub use handlers::{Collaborators, RouterContext};
pub use scheduler::{Backoff, Job, JobScheduler, TokioJobScheduler};

use futures_util::FutureExt;
use log::{debug, error, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::device::DeviceId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(DeviceId),
    PermissionResult { id: DeviceId, granted: bool },
    Detached(DeviceId),
    RetryRequested(DeviceId),
}

impl DeviceEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::Attached(id) | Self::Detached(id) | Self::RetryRequested(id) => id,
            Self::PermissionResult { id, .. } => id,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// What to do when opening a device fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOpenRetry {
    /// The attach is over; re-plug to try again.
    #[default]
    Never,
    /// Retryable failures go through the same backoff as permission denials.
    Backoff,
}

impl DeviceOpenRetry {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => Some(Self::Never),
            "backoff" => Some(Self::Backoff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Stop retrying after this many attempts. `None` retries for as long as the device is attached.
    pub max_attempts: Option<u32>,
    pub device_open_retry: DeviceOpenRetry,
}

struct Actor {
    queue: mpsc::UnboundedSender<DeviceEvent>,
    task: JoinHandle<()>,
}

/// Dispatches events to per-device actors.
pub struct DeviceEventRouter {
    ctx: Arc<RouterContext>,
    actors: HashMap<DeviceId, Actor>,
    /// Actors of detached devices that may still be draining.
    retiring: HashMap<DeviceId, JoinHandle<()>>,
}

impl DeviceEventRouter {
    pub fn new(ctx: RouterContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            actors: HashMap::new(),
            retiring: HashMap::new(),
        }
    }

    pub fn context(&self) -> Arc<RouterContext> {
        Arc::clone(&self.ctx)
    }

    /// Routes events until the channel closes or `shutdown` fires, then cancels every session and
    /// waits for actors and sessions to wind down.
    pub async fn run(mut self, mut events: EventReceiver, mut shutdown: broadcast::Receiver<()>) {
        info!("Device event router started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("Router shutting down (signal)");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        debug!("Router shutting down (event channel closed)");
                        break;
                    }
                }
            }
        }
        self.shut_down().await;
        info!("Device event router stopped");
    }

    fn dispatch(&mut self, event: DeviceEvent) {
        self.retiring.retain(|_, task| !task.is_finished());

        let id = event.device_id().clone();
        let detached = matches!(event, DeviceEvent::Detached(_));

        let actor = match self.actors.remove(&id) {
            Some(actor) => actor,
            None => self.spawn_actor(&id),
        };
        if actor.queue.send(event).is_err() {
            error!("Actor for {} is gone, event dropped", id);
        }

        if detached {
            // Dropping the queue lets the actor finish what it has and exit
            self.retiring.insert(id, actor.task);
        } else {
            self.actors.insert(id, actor);
        }
    }

    fn spawn_actor(&mut self, id: &DeviceId) -> Actor {
        let (queue, mut inbox) = mpsc::unbounded_channel::<DeviceEvent>();
        let predecessor = self.retiring.remove(id);
        let ctx = Arc::clone(&self.ctx);
        let actor_id = id.clone();

        let task = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }
            debug!("Actor started for {}", actor_id);
            while let Some(event) = inbox.recv().await {
                let description = format!("{:?}", event);
                let ctx = Arc::clone(&ctx);
                // A panicking handler only loses this one event
                let result = AssertUnwindSafe(async move { ctx.handle(event) }).catch_unwind().await;
                if result.is_err() {
                    error!("Handler panicked while processing {}", description);
                }
            }
            debug!("Actor exited for {}", actor_id);
        });

        Actor { queue, task }
    }

    async fn shut_down(self) {
        let cancelled = self.ctx.registry().cancel_all();
        if cancelled > 0 {
            info!("Cancelling {} active session(s)", cancelled);
        }
        self.ctx.cancel_pending_retries();

        let tasks: Vec<JoinHandle<()>> = self
            .actors
            .into_values()
            .map(|actor| actor.task)
            .chain(self.retiring.into_values())
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        self.ctx.wait_for_sessions().await;
    }
}

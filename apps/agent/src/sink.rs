//! Where user-facing notifications and session log events go.
//!
//! The router reports one notification per milestone (started, finished, failed, permission
//! denied). Details only go to the log.

use log::{error, info};

/// Receives notifications and log events. Implementations must not fail or block for long: they are
/// called from the router's per-device tasks.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str);

    fn log_event(&self, message: &str);

    fn log_error(&self, message: &str, error: Option<&(dyn std::error::Error + 'static)>);
}

/// Sends everything to the `log` facade, which the agent tees into the daily log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, title: &str, message: &str) {
        info!(target: "drivecopy::notify", "{}: {}", title, message);
    }

    fn log_event(&self, message: &str) {
        info!("{}", message);
    }

    fn log_error(&self, message: &str, error: Option<&(dyn std::error::Error + 'static)>) {
        match error {
            Some(e) => error!("{}: {}", message, e),
            None => error!("{}", message),
        }
    }
}

//! Error type for device and filesystem access.

use std::path::Path;

/// Errors reported by a mass-storage driver or one of its file nodes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum DeviceError {
    /// Device or path not found (may have been unplugged).
    NotFound { path: String },
    /// The host refused access.
    PermissionDenied { path: String },
    /// Device went away while it was being read.
    Disconnected { device_id: String },
    /// Device opened fine but exposes no filesystem.
    NoPartitions { device_id: String },
    /// Expected a directory.
    NotADirectory { path: String },
    /// Expected a regular file.
    NotAFile { path: String },
    /// Device is busy (retryable).
    Busy { device_id: String },
    /// Any other I/O failure.
    Io { path: String, message: String },
}

impl DeviceError {
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            _ => Self::Io {
                path,
                message: err.to_string(),
            },
        }
    }

    /// Returns true if the operation may succeed if retried later.
    ///
    /// Missing devices and structural problems (no partitions, wrong node kind) are not retryable:
    /// they only change when the device is re-attached.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Busy { .. } | Self::Disconnected { .. })
    }

    /// Returns a short message suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => "Device not found. It may have been unplugged.".to_string(),
            Self::PermissionDenied { .. } => "Access to the device was denied.".to_string(),
            Self::Disconnected { .. } => "Device was disconnected. Reconnect it to continue.".to_string(),
            Self::NoPartitions { .. } => "The device has no readable filesystem.".to_string(),
            Self::NotADirectory { path } => format!("{} is not a folder.", path),
            Self::NotAFile { path } => format!("{} is not a file.", path),
            Self::Busy { .. } => "Device is busy. Wait a moment and try again.".to_string(),
            Self::Io { message, .. } => format!("Read error: {}", message),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "Not found: {path}"),
            Self::PermissionDenied { path } => write!(f, "Permission denied: {path}"),
            Self::Disconnected { device_id } => write!(f, "Device disconnected: {device_id}"),
            Self::NoPartitions { device_id } => write!(f, "No partitions on device: {device_id}"),
            Self::NotADirectory { path } => write!(f, "Not a directory: {path}"),
            Self::NotAFile { path } => write!(f, "Not a file: {path}"),
            Self::Busy { device_id } => write!(f, "Device busy: {device_id}"),
            Self::Io { path, message } => write!(f, "I/O error on {path}: {message}"),
        }
    }
}

impl std::error::Error for DeviceError {}

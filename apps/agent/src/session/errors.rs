//! Why a session ended without walking its device.

use serde::Serialize;

use crate::device::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum SessionFailure {
    /// The destination folder couldn't be created. Nothing on the device was touched.
    Destination { path: String, message: String },
    /// The driver refused to open the device.
    DeviceOpen { error: DeviceError },
    /// The device opened but has no partitions.
    NoPartitions { device_id: String },
    /// Partitions exist but none of their roots could be obtained.
    NoReadablePartition { error: DeviceError },
}

impl SessionFailure {
    /// Device-side open and read failures may clear up on another attempt. An unwritable backup
    /// folder and a device without filesystems stay broken until someone fixes them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeviceOpen { .. } | Self::NoReadablePartition { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Destination { path, .. } => format!("Couldn't create the backup folder {}.", path),
            Self::DeviceOpen { error } => format!("Couldn't open the device. {}", error.user_message()),
            Self::NoPartitions { .. } => "The device has no readable filesystem.".to_string(),
            Self::NoReadablePartition { error } => format!("Couldn't read the device. {}", error.user_message()),
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destination { path, message } => write!(f, "Failed to create destination {path}: {message}"),
            Self::DeviceOpen { error } => write!(f, "Failed to open device: {error}"),
            Self::NoPartitions { device_id } => write!(f, "No partitions on device {device_id}"),
            Self::NoReadablePartition { error } => write!(f, "No readable partition: {error}"),
        }
    }
}

impl std::error::Error for SessionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeviceOpen { error } | Self::NoReadablePartition { error } => Some(error),
            _ => None,
        }
    }
}

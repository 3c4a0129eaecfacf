//! Removable mass-storage devices.
//!
//! The agent never talks to block devices itself. It consumes a driver that can open an attached
//! device, list its partitions and expose each partition's file tree as [`FileNode`]s.
//!
//! # Architecture
//!
//! - `errors`: error type shared by every driver
//! - `local`: driver backed by a mounted filesystem (`std::fs`)
//! - `in_memory`: scripted devices with failure injection (tests only)
//! - `permission`: permission requester that grants access when the mount root is readable
//! - `watcher`: the attach/detach event source (removable disk polling, mount and USB triggers)

mod errors;
#[cfg(test)]
pub mod in_memory;
pub mod local;
pub mod permission;
pub mod watcher;

pub use errors::DeviceError;

use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// Stable identity of one attached device (for mounted drives, the mount path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe name for the device, used as the destination folder prefix.
    ///
    /// Takes the last path component (`/media/anna/KINGSTON` → `KINGSTON`) and replaces anything
    /// outside `[A-Za-z0-9._-]`.
    pub fn dir_name(&self) -> String {
        let last = self
            .0
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();

        let sanitized: String = last
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
            "UnknownDevice".to_string()
        } else {
            sanitized
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A stream of file contents read in chunks.
///
/// Blocking, iterator-style. `None` means end of stream. `Some(Ok(empty))` means the read timed out
/// without error and should simply be retried.
pub trait ChunkStream: Send {
    fn next_chunk(&mut self) -> Option<Result<Vec<u8>, DeviceError>>;
}

/// A file or directory on a device's filesystem. A transient view, nothing is cached locally.
pub trait FileNode: Send + Sync {
    fn name(&self) -> &str;

    fn is_directory(&self) -> bool;

    /// Size in bytes as reported by the driver. Zero for directories.
    fn size(&self) -> u64;

    fn modified(&self) -> Option<SystemTime> {
        None
    }

    /// Lists children in the order the driver reports them.
    fn list_children(&self) -> Result<Vec<Box<dyn FileNode>>, DeviceError>;

    /// Opens the file for reading, yielding chunks of at most `chunk_size` bytes.
    fn open_stream(&self, chunk_size: usize) -> Result<Box<dyn ChunkStream>, DeviceError>;
}

/// One filesystem on a device.
pub trait Partition: Send {
    /// Human-readable label, for logs.
    fn label(&self) -> String;

    fn root_directory(&self) -> Result<Box<dyn FileNode>, DeviceError>;
}

/// An opened device. Owned exclusively by one session and closed on every exit path.
pub trait DeviceHandle: Send {
    fn partitions(&self) -> Result<Vec<Box<dyn Partition>>, DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Opens attached devices by identity.
pub trait MassStorageDriver: Send + Sync {
    fn open_device(&self, id: &DeviceId) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_name_takes_last_component() {
        assert_eq!(DeviceId::new("/media/anna/KINGSTON").dir_name(), "KINGSTON");
        assert_eq!(DeviceId::new("/Volumes/NO NAME/").dir_name(), "NO_NAME");
        assert_eq!(DeviceId::new("usb-0781:5567").dir_name(), "usb-0781_5567");
    }

    #[test]
    fn test_dir_name_never_escapes() {
        assert_eq!(DeviceId::new("/").dir_name(), "UnknownDevice");
        assert_eq!(DeviceId::new("..").dir_name(), "UnknownDevice");
        assert_eq!(DeviceId::new("").dir_name(), "UnknownDevice");
    }

    #[test]
    fn test_device_id_serializes_as_string() {
        let json = serde_json::to_string(&DeviceId::new("/media/stick")).unwrap();
        assert_eq!(json, "\"/media/stick\"");
    }
}

//! Driver for drives the host has already mounted.
//!
//! A mounted removable drive is treated as a device with a single partition whose root is the mount
//! point. File nodes wrap `std::fs`. Symlinks are never followed, so a link loop on a stick can't
//! trap the walker.

use log::debug;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{ChunkStream, DeviceError, DeviceHandle, DeviceId, FileNode, MassStorageDriver, Partition};

/// Opens mount points as devices. The device identity is the mount path.
#[derive(Debug, Default, Clone)]
pub struct LocalMountDriver;

impl LocalMountDriver {
    pub fn new() -> Self {
        Self
    }
}

impl MassStorageDriver for LocalMountDriver {
    fn open_device(&self, id: &DeviceId) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let root = PathBuf::from(id.as_str());
        let metadata = fs::metadata(&root).map_err(|e| DeviceError::from_io(e, &root))?;
        if !metadata.is_dir() {
            return Err(DeviceError::NotADirectory {
                path: root.display().to_string(),
            });
        }
        debug!("Opened mounted device {} at {}", id, root.display());
        Ok(Box::new(LocalMountHandle {
            id: id.clone(),
            root,
            closed: false,
        }))
    }
}

struct LocalMountHandle {
    id: DeviceId,
    root: PathBuf,
    closed: bool,
}

impl DeviceHandle for LocalMountHandle {
    fn partitions(&self) -> Result<Vec<Box<dyn Partition>>, DeviceError> {
        if self.closed {
            return Err(DeviceError::Disconnected {
                device_id: self.id.to_string(),
            });
        }
        // The mount may have vanished between open and now
        match fs::metadata(&self.root) {
            Ok(m) if m.is_dir() => Ok(vec![Box::new(LocalPartition {
                root: self.root.clone(),
            })]),
            Ok(_) => Ok(Vec::new()),
            Err(e) => Err(DeviceError::from_io(e, &self.root)),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        // Nothing to release for a host mount; the flag only guards against use after close
        self.closed = true;
        Ok(())
    }
}

struct LocalPartition {
    root: PathBuf,
}

impl Partition for LocalPartition {
    fn label(&self) -> String {
        self.root.display().to_string()
    }

    fn root_directory(&self) -> Result<Box<dyn FileNode>, DeviceError> {
        Ok(Box::new(LocalFileNode::from_path(&self.root)?))
    }
}

/// A file or directory on a mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileNode {
    path: PathBuf,
    name: String,
    is_directory: bool,
    size: u64,
    modified: Option<SystemTime>,
}

impl LocalFileNode {
    /// Stats `path` (without following a final symlink).
    pub fn from_path(path: &Path) -> Result<Self, DeviceError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| DeviceError::from_io(e, path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            is_directory: metadata.is_dir(),
            size: if metadata.is_file() { metadata.len() } else { 0 },
            modified: metadata.modified().ok(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileNode for LocalFileNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_directory(&self) -> bool {
        self.is_directory
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    fn list_children(&self) -> Result<Vec<Box<dyn FileNode>>, DeviceError> {
        if !self.is_directory {
            return Err(DeviceError::NotADirectory {
                path: self.path.display().to_string(),
            });
        }

        let entries = fs::read_dir(&self.path).map_err(|e| DeviceError::from_io(e, &self.path))?;
        let mut children: Vec<Box<dyn FileNode>> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DeviceError::from_io(e, &self.path))?;
            let child_path = entry.path();
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    debug!("Skipping {}: {}", child_path.display(), e);
                    continue;
                }
            };
            if file_type.is_symlink() {
                debug!("Skipping symlink {}", child_path.display());
                continue;
            }
            match LocalFileNode::from_path(&child_path) {
                Ok(node) => children.push(Box::new(node)),
                // Entry vanished or became unreadable between listing and stat
                Err(e) => debug!("Skipping {}: {}", child_path.display(), e),
            }
        }
        Ok(children)
    }

    fn open_stream(&self, chunk_size: usize) -> Result<Box<dyn ChunkStream>, DeviceError> {
        if self.is_directory {
            return Err(DeviceError::NotAFile {
                path: self.path.display().to_string(),
            });
        }
        let file = File::open(&self.path).map_err(|e| DeviceError::from_io(e, &self.path))?;
        Ok(Box::new(LocalChunkStream {
            file,
            path: self.path.clone(),
            buffer: vec![0u8; chunk_size.max(1)],
        }))
    }
}

struct LocalChunkStream {
    file: File,
    path: PathBuf,
    buffer: Vec<u8>,
}

impl ChunkStream for LocalChunkStream {
    fn next_chunk(&mut self) -> Option<Result<Vec<u8>, DeviceError>> {
        match self.file.read(&mut self.buffer) {
            Ok(0) => None,
            Ok(n) => Some(Ok(self.buffer[..n].to_vec())),
            // Nothing read this round, the copy loop retries
            Err(e) if e.kind() == ErrorKind::Interrupted => Some(Ok(Vec::new())),
            Err(e) => Some(Err(DeviceError::from_io(e, &self.path))),
        }
    }
}

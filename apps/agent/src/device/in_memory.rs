//! Scripted in-memory devices.
//!
//! Used by the test suite. Every file can be told to lie about its
//! size, fail after N bytes, stall for a few reads, or call a hook after each chunk (handy for
//! pulling the plug mid-copy).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ChunkStream, DeviceError, DeviceHandle, DeviceId, FileNode, MassStorageDriver, Partition};
use crate::ignore_poison::IgnorePoison;

/// Called after each delivered chunk with the number of bytes delivered so far.
pub type ChunkHook = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
pub struct MemoryFile {
    name: String,
    data: Arc<Vec<u8>>,
    reported_size: Option<u64>,
    fail_after: Option<u64>,
    idle_reads: usize,
    on_chunk: Option<ChunkHook>,
}

impl MemoryFile {
    /// Reports a size different from the actual contents.
    pub fn with_reported_size(mut self, size: u64) -> Self {
        self.reported_size = Some(size);
        self
    }

    /// Fails the read once `bytes` have been delivered.
    pub fn failing_after(mut self, bytes: u64) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    /// Returns `reads` empty chunks (timeouts) before the data.
    pub fn with_idle_reads(mut self, reads: usize) -> Self {
        self.idle_reads = reads;
        self
    }

    pub fn on_chunk(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Arc::new(hook));
        self
    }
}

#[derive(Clone)]
pub enum MemoryEntry {
    File(MemoryFile),
    Dir {
        name: String,
        children: Vec<MemoryEntry>,
        unreadable: bool,
    },
}

impl MemoryEntry {
    pub fn file(name: &str, data: impl Into<Vec<u8>>) -> MemoryFile {
        MemoryFile {
            name: name.to_string(),
            data: Arc::new(data.into()),
            reported_size: None,
            fail_after: None,
            idle_reads: 0,
            on_chunk: None,
        }
    }

    /// A file of `len` filler bytes.
    pub fn sized(name: &str, len: usize) -> MemoryFile {
        Self::file(name, vec![0xA5; len])
    }

    pub fn dir(name: &str, children: Vec<MemoryEntry>) -> Self {
        Self::Dir {
            name: name.to_string(),
            children,
            unreadable: false,
        }
    }

    /// A directory whose listing always fails.
    pub fn unreadable_dir(name: &str) -> Self {
        Self::Dir {
            name: name.to_string(),
            children: Vec::new(),
            unreadable: true,
        }
    }
}

impl From<MemoryFile> for MemoryEntry {
    fn from(file: MemoryFile) -> Self {
        Self::File(file)
    }
}

/// Script for one device: its partitions (each a root directory) and injected open/close errors.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    partitions: Vec<MemoryEntry>,
    open_error: Option<DeviceError>,
    close_error: Option<DeviceError>,
}

impl MemoryDevice {
    /// Single-partition device with the given root contents.
    pub fn with_root(children: Vec<MemoryEntry>) -> Self {
        Self {
            partitions: vec![MemoryEntry::dir("", children)],
            ..Self::default()
        }
    }

    pub fn with_partitions(partitions: Vec<Vec<MemoryEntry>>) -> Self {
        Self {
            partitions: partitions.into_iter().map(|c| MemoryEntry::dir("", c)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_open(error: DeviceError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    pub fn failing_close(mut self, error: DeviceError) -> Self {
        self.close_error = Some(error);
        self
    }
}

/// Driver over scripted devices. Counts opens and closes so tests can check handles are released.
#[derive(Default)]
pub struct InMemoryDriver {
    devices: Mutex<HashMap<DeviceId, MemoryDevice>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<DeviceId>, device: MemoryDevice) {
        self.devices.lock_ignore_poison().insert(id.into(), device);
    }

    pub fn remove(&self, id: &DeviceId) {
        self.devices.lock_ignore_poison().remove(id);
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MassStorageDriver for InMemoryDriver {
    fn open_device(&self, id: &DeviceId) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let device = self
            .devices
            .lock_ignore_poison()
            .get(id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound { path: id.to_string() })?;
        if let Some(error) = device.open_error {
            return Err(error);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            partitions: device.partitions,
            close_error: device.close_error,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MemoryHandle {
    partitions: Vec<MemoryEntry>,
    close_error: Option<DeviceError>,
    closed: Arc<AtomicUsize>,
}

impl DeviceHandle for MemoryHandle {
    fn partitions(&self) -> Result<Vec<Box<dyn Partition>>, DeviceError> {
        Ok(self
            .partitions
            .iter()
            .enumerate()
            .map(|(index, root)| {
                Box::new(MemoryPartition {
                    label: format!("memory-{}", index + 1),
                    root: root.clone(),
                }) as Box<dyn Partition>
            })
            .collect())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        match self.close_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct MemoryPartition {
    label: String,
    root: MemoryEntry,
}

impl Partition for MemoryPartition {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn root_directory(&self) -> Result<Box<dyn FileNode>, DeviceError> {
        Ok(Box::new(MemoryNode(self.root.clone())))
    }
}

/// A root directory node over `children`, for driving the walker without a device.
pub fn memory_root(children: Vec<MemoryEntry>) -> Box<dyn FileNode> {
    Box::new(MemoryNode(MemoryEntry::dir("", children)))
}

struct MemoryNode(MemoryEntry);

impl FileNode for MemoryNode {
    fn name(&self) -> &str {
        match &self.0 {
            MemoryEntry::File(file) => &file.name,
            MemoryEntry::Dir { name, .. } => name,
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self.0, MemoryEntry::Dir { .. })
    }

    fn size(&self) -> u64 {
        match &self.0 {
            MemoryEntry::File(file) => file.reported_size.unwrap_or(file.data.len() as u64),
            MemoryEntry::Dir { .. } => 0,
        }
    }

    fn list_children(&self) -> Result<Vec<Box<dyn FileNode>>, DeviceError> {
        match &self.0 {
            MemoryEntry::Dir { unreadable: true, name, .. } => Err(DeviceError::PermissionDenied { path: name.clone() }),
            MemoryEntry::Dir { children, .. } => Ok(children
                .iter()
                .map(|child| Box::new(MemoryNode(child.clone())) as Box<dyn FileNode>)
                .collect()),
            MemoryEntry::File(file) => Err(DeviceError::NotADirectory {
                path: file.name.clone(),
            }),
        }
    }

    fn open_stream(&self, chunk_size: usize) -> Result<Box<dyn ChunkStream>, DeviceError> {
        match &self.0 {
            MemoryEntry::File(file) => Ok(Box::new(MemoryStream {
                file: file.clone(),
                position: 0,
                chunk_size: chunk_size.max(1),
                idle_left: file.idle_reads,
            })),
            MemoryEntry::Dir { name, .. } => Err(DeviceError::NotAFile { path: name.clone() }),
        }
    }
}

struct MemoryStream {
    file: MemoryFile,
    position: usize,
    chunk_size: usize,
    idle_left: usize,
}

impl ChunkStream for MemoryStream {
    fn next_chunk(&mut self) -> Option<Result<Vec<u8>, DeviceError>> {
        if self.idle_left > 0 {
            self.idle_left -= 1;
            return Some(Ok(Vec::new()));
        }

        let mut end = self.file.data.len();
        if let Some(limit) = self.file.fail_after {
            let limit = limit as usize;
            if self.position >= limit {
                return Some(Err(DeviceError::Io {
                    path: self.file.name.clone(),
                    message: "simulated read failure".to_string(),
                }));
            }
            end = end.min(limit);
        }
        if self.position >= end {
            return None;
        }

        let next = (self.position + self.chunk_size).min(end);
        let chunk = self.file.data[self.position..next].to_vec();
        self.position = next;
        if let Some(hook) = &self.file.on_chunk {
            hook(self.position as u64);
        }
        Some(Ok(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(stream: &mut dyn ChunkStream) -> (Vec<usize>, Option<DeviceError>) {
        let mut sizes = Vec::new();
        while let Some(chunk) = stream.next_chunk() {
            match chunk {
                Ok(bytes) => sizes.push(bytes.len()),
                Err(e) => return (sizes, Some(e)),
            }
        }
        (sizes, None)
    }

    #[test]
    fn test_idle_reads_then_data() {
        let node = MemoryNode(MemoryEntry::sized("a.pdf", 5).with_idle_reads(2).into());
        let mut stream = node.open_stream(4).unwrap();
        assert_eq!(drain(stream.as_mut()), (vec![0, 0, 4, 1], None));
    }

    #[test]
    fn test_fail_after() {
        let node = MemoryNode(MemoryEntry::sized("a.pdf", 10).failing_after(6).into());
        let mut stream = node.open_stream(4).unwrap();
        let (sizes, error) = drain(stream.as_mut());
        assert_eq!(sizes, vec![4, 2]);
        assert!(matches!(error, Some(DeviceError::Io { .. })));
    }

    #[test]
    fn test_driver_counts_open_and_close() {
        let driver = InMemoryDriver::new();
        driver.insert("stick", MemoryDevice::with_root(vec![]));

        let mut handle = driver.open_device(&DeviceId::new("stick")).unwrap();
        assert_eq!(driver.open_count(), 1);
        handle.close().unwrap();
        assert_eq!(driver.close_count(), 1);

        assert!(matches!(
            driver.open_device(&DeviceId::new("other")),
            Err(DeviceError::NotFound { .. })
        ));
    }
}

//! Chunked, verified, cancellable single-file copy.
//!
//! Streams one device file to one local path. Cancellation is checked before every chunk, so the
//! worst-case latency after a detach is one chunk read. Whatever happens, the destination is either
//! absent or exactly the source's length afterwards: every non-success exit removes the partial file.

use filetime::FileTime;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use super::cancel::CancellationToken;
use crate::device::{DeviceError, FileNode};

/// Smallest accepted chunk size (8 KiB).
pub const MIN_CHUNK_SIZE: usize = 8 * 1024;
/// Largest accepted chunk size (8 MiB).
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// Default chunk size (1 MiB). Bounds both memory per session and cancellation latency.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Source is zero bytes long, nothing was created
    Empty,
    /// A file of the same size is already at the destination
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Bytes written didn't match the size the driver reported
    SizeMismatch { expected: u64, actual: u64 },
    Io(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch (expected {expected} bytes, wrote {actual})")
            }
            Self::Io(message) => f.write_str(message),
        }
    }
}

/// What happened to one file. The engine always hands back one of these, it never errors out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyResult {
    Copied { bytes: u64 },
    Skipped(SkipReason),
    Failed(FailureReason),
    Cancelled,
}

enum StreamOutcome {
    Finished(u64),
    Cancelled,
}

/// Copies device files to local paths.
#[derive(Debug, Clone, Copy)]
pub struct FileCopyEngine {
    chunk_size: usize,
    preserve_modified_time: bool,
}

impl FileCopyEngine {
    /// Creates an engine; `chunk_size` is clamped to [`MIN_CHUNK_SIZE`]..=[`MAX_CHUNK_SIZE`].
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            preserve_modified_time: true,
        }
    }

    pub fn preserve_modified_time(mut self, preserve: bool) -> Self {
        self.preserve_modified_time = preserve;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Copies `source` to `dest`. The parent of `dest` must exist.
    pub fn copy(&self, source: &dyn FileNode, dest: &Path, cancel: &CancellationToken) -> CopyResult {
        if source.is_directory() {
            return CopyResult::Failed(FailureReason::Io(format!("{} is a directory", source.name())));
        }

        let expected = source.size();
        if expected == 0 {
            debug!("copy: skipping empty file {}", source.name());
            return CopyResult::Skipped(SkipReason::Empty);
        }

        // Size equality is the only duplicate check, no bytes are compared
        match fs::metadata(dest) {
            Ok(existing) if existing.is_file() && existing.len() == expected => {
                debug!("copy: {} already present with {} bytes", dest.display(), expected);
                return CopyResult::Skipped(SkipReason::Duplicate);
            }
            Ok(existing) if existing.is_file() => {
                debug!(
                    "copy: replacing stale {} ({} bytes, source has {})",
                    dest.display(),
                    existing.len(),
                    expected
                );
                if let Err(e) = fs::remove_file(dest) {
                    return CopyResult::Failed(FailureReason::Io(format!(
                        "Failed to remove stale {}: {}",
                        dest.display(),
                        e
                    )));
                }
            }
            Ok(_) => {
                return CopyResult::Failed(FailureReason::Io(format!(
                    "{} exists and is not a regular file",
                    dest.display()
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return CopyResult::Failed(FailureReason::Io(format!("Failed to inspect {}: {}", dest.display(), e)));
            }
        }

        match self.stream_to(source, dest, cancel) {
            Ok(StreamOutcome::Finished(written)) if written == expected => {
                if self.preserve_modified_time {
                    apply_modified_time(source, dest);
                }
                CopyResult::Copied { bytes: written }
            }
            Ok(StreamOutcome::Finished(written)) => {
                warn!(
                    "copy: {} size mismatch, expected {} bytes but got {}",
                    source.name(),
                    expected,
                    written
                );
                remove_partial(dest);
                CopyResult::Failed(FailureReason::SizeMismatch {
                    expected,
                    actual: written,
                })
            }
            Ok(StreamOutcome::Cancelled) => {
                debug!("copy: cancelled while copying {}, removing partial file", source.name());
                remove_partial(dest);
                CopyResult::Cancelled
            }
            Err(e) => {
                remove_partial(dest);
                CopyResult::Failed(FailureReason::Io(e.to_string()))
            }
        }
    }

    /// Streams chunks from `source` into a fresh `dest`, checking cancellation before each read.
    /// The destination file is closed when this returns, so the caller can delete it.
    fn stream_to(
        &self,
        source: &dyn FileNode,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, DeviceError> {
        // Open the source first so a failing device never leaves an empty destination behind
        let mut stream = source.open_stream(self.chunk_size)?;
        let mut out = File::create(dest).map_err(|e| DeviceError::from_io(e, dest))?;
        let mut written = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled);
            }

            match stream.next_chunk() {
                None => break,
                // A timed-out read, try again
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    out.write_all(&chunk).map_err(|e| DeviceError::from_io(e, dest))?;
                    written += chunk.len() as u64;
                }
                Some(Err(e)) => return Err(e),
            }
        }

        out.flush().map_err(|e| DeviceError::from_io(e, dest))?;
        Ok(StreamOutcome::Finished(written))
    }
}

impl Default for FileCopyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

fn apply_modified_time(source: &dyn FileNode, dest: &Path) {
    if let Some(modified) = source.modified()
        && let Err(e) = filetime::set_file_mtime(dest, FileTime::from_system_time(modified))
    {
        debug!("copy: failed to set modification time on {}: {}", dest.display(), e);
    }
}

fn remove_partial(dest: &Path) {
    if let Err(e) = fs::remove_file(dest)
        && e.kind() != ErrorKind::NotFound
    {
        warn!("copy: failed to remove partial file {}: {}", dest.display(), e);
    }
}

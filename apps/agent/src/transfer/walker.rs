//! Iterative traversal of a device's file tree.
//!
//! Uses an explicit work-list instead of recursion, so a deeply nested stick can't blow the stack.
//! Within a directory, files are copied in the order the driver lists them, then subdirectories are
//! visited depth-first in the same order. The destination tree mirrors the source tree, and a
//! destination folder is only created once a supported file actually needs it.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use super::cancel::CancellationToken;
use super::copy::{CopyResult, FileCopyEngine};
use super::stats::TransferStats;
use crate::device::FileNode;
use crate::filter::SupportedFileFilter;

/// Result of walking a single root.
#[derive(Debug)]
pub struct WalkOutcome {
    pub stats: TransferStats,
    pub cancelled: bool,
}

/// How a walk into shared stats ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    Finished,
    Cancelled,
}

enum Visit {
    /// Subdirectories still to walk, in driver order, each with its destination.
    Continue(Vec<(Box<dyn FileNode>, PathBuf)>),
    Cancelled,
}

/// Lazily created destination folder for one source directory.
enum DestDir {
    Pending,
    Ready,
    Unavailable,
}

pub struct DirectoryWalker<'a> {
    filter: &'a SupportedFileFilter,
    engine: &'a FileCopyEngine,
}

impl<'a> DirectoryWalker<'a> {
    pub fn new(filter: &'a SupportedFileFilter, engine: &'a FileCopyEngine) -> Self {
        Self { filter, engine }
    }

    /// Walks `root` into `dest_root` with fresh stats.
    pub fn walk(&self, root: &dyn FileNode, dest_root: &Path, cancel: &CancellationToken) -> WalkOutcome {
        let mut stats = TransferStats::new();
        let end = self.walk_into(root, dest_root, cancel, &mut stats);
        WalkOutcome {
            stats,
            cancelled: end == WalkEnd::Cancelled,
        }
    }

    /// Walks `root` into `dest_root`, adding to `stats`. Sessions use this to accumulate several
    /// partitions into one set of counters.
    pub fn walk_into(
        &self,
        root: &dyn FileNode,
        dest_root: &Path,
        cancel: &CancellationToken,
        stats: &mut TransferStats,
    ) -> WalkEnd {
        if cancel.is_cancelled() {
            return WalkEnd::Cancelled;
        }

        let mut pending = match self.visit_directory(root, dest_root, cancel, stats) {
            Visit::Continue(subdirs) => subdirs,
            Visit::Cancelled => return WalkEnd::Cancelled,
        };
        // The work-list is a stack, so push in reverse to pop in driver order
        pending.reverse();

        while let Some((dir, dest)) = pending.pop() {
            if cancel.is_cancelled() {
                return WalkEnd::Cancelled;
            }
            match self.visit_directory(dir.as_ref(), &dest, cancel, stats) {
                Visit::Continue(subdirs) => pending.extend(subdirs.into_iter().rev()),
                Visit::Cancelled => return WalkEnd::Cancelled,
            }
        }

        WalkEnd::Finished
    }

    /// Copies the files directly inside `dir` and returns its subdirectories.
    fn visit_directory(
        &self,
        dir: &dyn FileNode,
        dest: &Path,
        cancel: &CancellationToken,
        stats: &mut TransferStats,
    ) -> Visit {
        let children = match dir.list_children() {
            Ok(children) => children,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", display_name(dir), e);
                return Visit::Continue(Vec::new());
            }
        };

        let mut subdirs = Vec::new();
        let mut dest_dir = DestDir::Pending;

        for child in children {
            if cancel.is_cancelled() {
                return Visit::Cancelled;
            }

            let name = child.name();
            if !is_safe_name(name) {
                warn!("Skipping entry with unusable name {:?} in {}", name, display_name(dir));
                if !child.is_directory() {
                    stats.record_seen();
                    stats.record_failed();
                }
                continue;
            }

            if child.is_directory() {
                let child_dest = dest.join(name);
                subdirs.push((child, child_dest));
                continue;
            }

            if !self.filter.is_supported(name) {
                debug!("Skipping unsupported file {}", name);
                stats.record_seen();
                stats.record_unsupported();
                continue;
            }

            if !ensure_dir(&mut dest_dir, dest) {
                stats.record_seen();
                stats.record_failed();
                continue;
            }

            let result = self.engine.copy(child.as_ref(), &dest.join(name), cancel);
            match &result {
                CopyResult::Cancelled => return Visit::Cancelled,
                CopyResult::Failed(reason) => warn!("Failed to copy {}: {}", name, reason),
                CopyResult::Copied { bytes } => debug!("Copied {} ({} bytes)", name, bytes),
                CopyResult::Skipped(reason) => debug!("Skipped {}: {:?}", name, reason),
            }
            stats.record_seen();
            stats.record(&result);
        }

        Visit::Continue(subdirs)
    }
}

fn ensure_dir(state: &mut DestDir, dest: &Path) -> bool {
    match state {
        DestDir::Ready => true,
        DestDir::Unavailable => false,
        DestDir::Pending => match fs::create_dir_all(dest) {
            Ok(()) => {
                *state = DestDir::Ready;
                true
            }
            Err(e) => {
                warn!("Failed to create destination folder {}: {}", dest.display(), e);
                *state = DestDir::Unavailable;
                false
            }
        },
    }
}

/// Names that would escape or alias the destination folder when joined onto it.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn display_name(node: &dyn FileNode) -> &str {
    match node.name() {
        "" => "<root>",
        name => name,
    }
}

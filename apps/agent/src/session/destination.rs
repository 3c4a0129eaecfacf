//! Where a session's files go.

use chrono::{DateTime, Local};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::SessionFailure;
use crate::device::DeviceId;

/// Collision suffixes tried before giving up (`_2` … `_99`).
const MAX_SUFFIX: u32 = 99;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationLayout {
    /// A fresh `{device}_{yyyyMMdd_HHmmss}` folder per session.
    #[default]
    Timestamped,
    /// One `{device}` folder reused across sessions, so re-plugging only copies new files.
    PerDevice,
}

impl DestinationLayout {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "timestamped" => Some(Self::Timestamped),
            "per_device" => Some(Self::PerDevice),
            _ => None,
        }
    }
}

/// Allocates destination folders under the backup root.
#[derive(Debug, Clone)]
pub struct DestinationPlanner {
    root: PathBuf,
    layout: DestinationLayout,
}

impl DestinationPlanner {
    pub fn new(root: impl Into<PathBuf>, layout: DestinationLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the destination folder for a session on `id` started at `now`, parents included.
    ///
    /// With the timestamped layout the folder is always new: if two sessions start in the same
    /// second, the later one gets a `_2`, `_3`… suffix.
    pub fn allocate(&self, id: &DeviceId, now: DateTime<Local>) -> Result<PathBuf, SessionFailure> {
        fs::create_dir_all(&self.root).map_err(|e| failure(&self.root, e))?;

        match self.layout {
            DestinationLayout::PerDevice => {
                let dir = self.root.join(id.dir_name());
                fs::create_dir_all(&dir).map_err(|e| failure(&dir, e))?;
                Ok(dir)
            }
            DestinationLayout::Timestamped => {
                let base = format!("{}_{}", id.dir_name(), now.format("%Y%m%d_%H%M%S"));
                let mut candidate = self.root.join(&base);
                let mut suffix = 1;
                loop {
                    match fs::create_dir(&candidate) {
                        Ok(()) => return Ok(candidate),
                        Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_SUFFIX => {
                            suffix += 1;
                            debug!("{} already exists, trying suffix _{}", candidate.display(), suffix);
                            candidate = self.root.join(format!("{}_{}", base, suffix));
                        }
                        Err(e) => return Err(failure(&candidate, e)),
                    }
                }
            }
        }
    }
}

fn failure(path: &Path, err: std::io::Error) -> SessionFailure {
    SessionFailure::Destination {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

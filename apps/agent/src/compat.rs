//! Startup check that the host can run the agent at all.

use log::debug;
use std::fs;
use std::io;
use std::path::Path;
use sysinfo::Disks;

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCompatibility {
    /// The backup root exists (or could be created) and accepts new files
    pub backup_root_writable: bool,
    pub log_dir_available: bool,
    /// The host lists its disks, so removable drives can be detected
    pub disk_enumeration: bool,
    /// At least one configured mount parent exists. Only a warning: removable flags may suffice.
    pub mount_parents_present: bool,
}

impl HostCompatibility {
    pub fn check(config: &AgentConfig) -> Self {
        let disk_enumeration = !Disks::new_with_refreshed_list().list().is_empty();
        Self::evaluate(config, disk_enumeration)
    }

    fn evaluate(config: &AgentConfig, disk_enumeration: bool) -> Self {
        Self {
            backup_root_writable: probe_writable(&config.backup_root),
            log_dir_available: fs::create_dir_all(&config.log_dir).is_ok(),
            disk_enumeration,
            mount_parents_present: config.mount_parents.iter().any(|p| p.is_dir()),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.backup_root_writable && self.log_dir_available && self.disk_enumeration
    }

    pub fn incompatibility_reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if !self.backup_root_writable {
            reasons.push("Backup folder can't be created or written to");
        }
        if !self.log_dir_available {
            reasons.push("Log folder can't be created");
        }
        if !self.disk_enumeration {
            reasons.push("Host doesn't report any disks, so drives can't be detected");
        }
        reasons
    }

    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if !self.mount_parents_present {
            warnings.push("None of the mount folders exist, relying on removable flags only");
        }
        warnings
    }
}

fn probe_writable(root: &Path) -> bool {
    let attempt = || -> io::Result<()> {
        fs::create_dir_all(root)?;
        let probe = root.join(format!(".drivecopy-probe-{}", uuid::Uuid::new_v4()));
        fs::write(&probe, b"")?;
        fs::remove_file(&probe)
    };
    match attempt() {
        Ok(()) => true,
        Err(e) => {
            debug!("Backup root {} isn't writable: {}", root.display(), e);
            false
        }
    }
}

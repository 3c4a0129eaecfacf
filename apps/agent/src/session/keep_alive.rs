//! Keeps the host awake while any session runs.

use log::{debug, warn};
use std::io;
use std::sync::{Arc, Mutex};

use crate::ignore_poison::IgnorePoison;

/// Host wake lock. Acquire and release are only ever called in matched pairs.
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> io::Result<()>;
    fn release(&self) -> io::Result<()>;
}

/// For hosts that don't sleep on their own, or where the agent shouldn't stop them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn acquire(&self) -> io::Result<()> {
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Reference-counted wrapper around a [`WakeLock`]: acquired when the first guard is taken,
/// released when the last one drops.
pub struct KeepAlive {
    lock: Box<dyn WakeLock>,
    holders: Mutex<usize>,
}

impl KeepAlive {
    pub fn new(lock: Box<dyn WakeLock>) -> Arc<Self> {
        Arc::new(Self {
            lock,
            holders: Mutex::new(0),
        })
    }

    pub fn hold(self: &Arc<Self>) -> KeepAliveGuard {
        let mut holders = self.holders.lock_ignore_poison();
        if *holders == 0 {
            debug!("Acquiring wake lock");
            if let Err(e) = self.lock.acquire() {
                warn!("Failed to acquire wake lock: {}", e);
            }
        }
        *holders += 1;
        KeepAliveGuard {
            keep_alive: Arc::clone(self),
        }
    }

    pub fn holders(&self) -> usize {
        *self.holders.lock_ignore_poison()
    }

    fn drop_holder(&self) {
        let mut holders = self.holders.lock_ignore_poison();
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            debug!("Releasing wake lock");
            if let Err(e) = self.lock.release() {
                warn!("Failed to release wake lock: {}", e);
            }
        }
    }
}

#[must_use = "the host may sleep as soon as the guard is dropped"]
pub struct KeepAliveGuard {
    keep_alive: Arc<KeepAlive>,
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.keep_alive.drop_holder();
    }
}

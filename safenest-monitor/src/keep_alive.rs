//! Keep the device awake while monitoring.
//!
//! A [`KeepAliveGuard`] holds a [`WakeLock`] for as long as it lives and
//! releases it exactly once when dropped, including while unwinding.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::tracing::prelude::*;

pub const SYSFS_POWER_ROOT: &str = "/sys/power";

pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> io::Result<()>;
    fn release(&self) -> io::Result<()>;
}

/// Kernel wake lock via `/sys/power/wake_lock` and `/sys/power/wake_unlock`.
#[derive(Debug, Clone)]
pub struct SysfsWakeLock {
    root: PathBuf,
    name: String,
}

impl SysfsWakeLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_root(SYSFS_POWER_ROOT, name)
    }

    pub fn with_root(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    /// Whether this kernel exposes the wake lock interface.
    pub fn is_supported(&self) -> bool {
        self.root.join("wake_lock").exists()
    }
}

impl WakeLock for SysfsWakeLock {
    fn acquire(&self) -> io::Result<()> {
        std::fs::write(self.root.join("wake_lock"), &self.name)
    }

    fn release(&self) -> io::Result<()> {
        std::fs::write(self.root.join("wake_unlock"), &self.name)
    }
}

/// For hosts that do not suspend, or have no wake lock interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> io::Result<()> {
        Ok(())
    }

    fn release(&self) -> io::Result<()> {
        Ok(())
    }
}

#[must_use = "the wake lock is released when the guard is dropped"]
pub struct KeepAliveGuard {
    lock: Option<Arc<dyn WakeLock>>,
}

impl KeepAliveGuard {
    pub fn acquire(lock: Arc<dyn WakeLock>) -> io::Result<Self> {
        lock.acquire()?;
        debug!("Wake lock acquired");
        Ok(Self { lock: Some(lock) })
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            match lock.release() {
                Ok(()) => debug!("Wake lock released"),
                Err(e) => warn!(error = %e, "Failed to release wake lock"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingLock {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl WakeLock for CountingLock {
        fn acquire(&self) -> io::Result<()> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> io::Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RefusingLock;

    impl WakeLock for RefusingLock {
        fn acquire(&self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }

        fn release(&self) -> io::Result<()> {
            panic!("released a lock that was never acquired");
        }
    }

    #[test]
    fn releases_exactly_once_on_drop() {
        let lock = Arc::new(CountingLock::default());
        let guard = KeepAliveGuard::acquire(lock.clone()).unwrap();
        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 0);

        drop(guard);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn releases_while_unwinding() {
        let lock = Arc::new(CountingLock::default());
        let held = lock.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = KeepAliveGuard::acquire(held).unwrap();
            panic!("monitoring crashed");
        });

        assert!(result.is_err());
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_acquire_never_releases() {
        assert!(KeepAliveGuard::acquire(Arc::new(RefusingLock)).is_err());
    }

    #[test]
    fn sysfs_lock_writes_name() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("wake_lock"), "").unwrap();
        std::fs::write(root.path().join("wake_unlock"), "").unwrap();
        let lock = Arc::new(SysfsWakeLock::with_root(root.path(), "safenest-test"));
        assert!(lock.is_supported());

        let guard = KeepAliveGuard::acquire(lock).unwrap();
        let locked = std::fs::read_to_string(root.path().join("wake_lock")).unwrap();
        assert_eq!(locked, "safenest-test");

        drop(guard);
        let unlocked = std::fs::read_to_string(root.path().join("wake_unlock")).unwrap();
        assert_eq!(unlocked, "safenest-test");
    }
}

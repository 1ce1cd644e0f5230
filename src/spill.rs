//! Spill-file allocation and cleanup.
//!
//! Sort runs and intermediate merge outputs live in uniquely named files
//! under the configured temp directory. Every file is tracked in a
//! process-wide registry so they can all be removed on normal exit or on
//! a fatal signal, not just when their owner remembers to.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};

lazy_static! {
    static ref REGISTRY: SpillRegistry = SpillRegistry {
        inner: Mutex::new(Inner {
            files: BTreeSet::new(),
            seq: 0,
        }),
        hooked: AtomicBool::new(false),
    };
}

struct Inner {
    files: BTreeSet<PathBuf>,
    seq: u64,
}

/// The process-wide spill registry.
pub struct SpillRegistry {
    inner: Mutex<Inner>,
    hooked: AtomicBool,
}

/// Access the process-wide registry.
pub fn registry() -> &'static SpillRegistry {
    &REGISTRY
}

impl SpillRegistry {
    /// Allocate a fresh, uniquely named spill file under `dir` and track
    /// it. The file is created empty so the name is reserved.
    pub fn create_in(&self, dir: &Path) -> Result<PathBuf> {
        let path = {
            let mut inner = self.inner.lock();
            inner.seq += 1;
            let name = format!("rowpipe.{}.{}", std::process::id(), inner.seq);
            let path = dir.join(name);
            inner.files.insert(path.clone());
            path
        };
        std::fs::File::create(&path).map_err(|e| {
            self.inner.lock().files.remove(&path);
            Error::Resource(format!(
                "cannot create spill file {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("allocated spill file {}", path.display());
        Ok(path)
    }

    /// Delete one file and forget it. Also accepts paths the registry
    /// never tracked (caller-owned inputs consumed by `--removeinputs`);
    /// a file already gone is not an error.
    pub fn release(&self, path: &Path) {
        self.inner.lock().files.remove(path);
        match std::fs::remove_file(path) {
            Ok(_) => debug!("removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot remove {}: {}", path.display(), e),
        }
    }

    /// Delete every outstanding spill file.
    pub fn cleanup(&self) {
        let files: Vec<PathBuf> = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.files).into_iter().collect()
        };
        for path in files {
            match std::fs::remove_file(&path) {
                Ok(_) => debug!("cleaned up {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("cannot remove {}: {}", path.display(), e),
            }
        }
    }

    /// Number of files currently tracked.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().files.len()
    }

    /// Install the signal hooks (`HUP`, `INT`, `TERM`) that clean up
    /// spill files before the process dies. Safe to call more than once;
    /// only the first call installs anything.
    pub fn install_signal_hooks(&'static self) -> Result<()> {
        if self.hooked.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut signals = signal_hook::iterator::Signals::new([
            signal_hook::consts::SIGHUP,
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
        ])
        .map_err(|e| Error::Resource(format!("cannot install signal handler: {}", e)))?;
        std::thread::Builder::new()
            .name("spill-signals".into())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    self.cleanup();
                    std::process::exit(128 + sig);
                }
            })
            .expect("failed to spawn signal handler thread");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_release_cleanup() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = registry().create_in(dir.path()).unwrap();
        let b = registry().create_in(dir.path()).unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());

        registry().release(&a);
        assert!(!a.exists());
        // releasing twice is fine
        registry().release(&a);

        registry().cleanup();
        assert!(!b.exists());
        assert_eq!(registry().outstanding(), 0);
    }

    #[test]
    fn test_release_untracked_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("caller-owned");
        std::fs::write(&path, b"x").unwrap();
        registry().release(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let err = registry().create_in(Path::new("/nonexistent/spill/dir"));
        assert!(matches!(err, Err(Error::Resource(_))));
    }
}

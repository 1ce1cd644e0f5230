use std::path::{Path, PathBuf};

/// Tuning knobs shared by the engine filters.
///
/// Every filter takes a `Settings` at construction; `Settings::default()`
/// is right for almost all uses. The temp directory resolution order is
/// the explicit override (`-T` on the command line), then `$TMPDIR`, then
/// the system default.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Capacity, in items, of the pipes created by this filter.
    pub pipe_capacity: usize,
    /// In-memory run budget of the external sort, in bytes.
    pub sort_run_bytes: usize,
    /// Upper bound on concurrently running two-way merges.
    pub parallelism: usize,
    /// Whether the merge driver may switch to streaming pipes once the
    /// remaining tree fits under `parallelism`.
    pub endgame: bool,
    /// Explicit spill directory; `None` falls back to `$TMPDIR`.
    pub tmp_dir: Option<PathBuf>,
    /// Right-run length past which the merge-join logs a warning.
    pub join_run_warn: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pipe_capacity: crate::pipe::default_capacity(),
            sort_run_bytes: 256 * 1024 * 1024,
            parallelism: num_cpus::get(),
            endgame: true,
            tmp_dir: None,
            join_run_warn: 2000,
        }
    }
}

impl Settings {
    /// The directory spill files go to.
    pub fn spill_dir(&self) -> PathBuf {
        if let Some(dir) = &self.tmp_dir {
            return dir.clone();
        }
        match std::env::var_os("TMPDIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir(),
        }
    }

    pub fn tmp_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.tmp_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn endgame(mut self, endgame: bool) -> Self {
        self.endgame = endgame;
        self
    }

    pub fn pipe_capacity(mut self, cap: usize) -> Self {
        self.pipe_capacity = cap.max(1);
        self
    }

    pub fn sort_run_bytes(mut self, bytes: usize) -> Self {
        self.sort_run_bytes = bytes.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.parallelism >= 1);
        assert!(settings.endgame);
        assert_eq!(settings.join_run_warn, 2000);
    }

    #[test]
    fn test_explicit_tmp_dir_wins() {
        let settings = Settings::default().tmp_dir("/nonexistent/spills");
        assert_eq!(settings.spill_dir(), PathBuf::from("/nonexistent/spills"));
    }
}

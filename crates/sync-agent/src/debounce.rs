use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sync_core::FsAction;

/// Coalesces bursts of [`sync_core::FsEvent`]s for the same path into one
/// effective event within a configurable window. Delete always invalidates
/// a path's pending entry so the next create/modify is delivered fresh.
pub struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Returns `true` when the event for `path` should be delivered.
    pub fn admit(&mut self, path: &PathBuf, action: FsAction) -> bool {
        if action == FsAction::Deleted {
            self.last_seen.remove(path);
            return true;
        }

        let now = Instant::now();
        if let Some(last) = self.last_seen.get(path) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_seen.insert(path.clone(), now);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn suppresses_rapid_repeats_for_same_path() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let path = PathBuf::from("/a/b.txt");
        assert!(debouncer.admit(&path, FsAction::Modified));
        assert!(!debouncer.admit(&path, FsAction::Modified));
    }

    #[test]
    fn delivers_after_window_elapses() {
        let mut debouncer = Debouncer::new(Duration::from_millis(20));
        let path = PathBuf::from("/a/b.txt");
        assert!(debouncer.admit(&path, FsAction::Modified));
        sleep(Duration::from_millis(40));
        assert!(debouncer.admit(&path, FsAction::Modified));
    }

    #[test]
    fn does_not_coalesce_across_distinct_paths() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        assert!(debouncer.admit(&PathBuf::from("/a"), FsAction::Modified));
        assert!(debouncer.admit(&PathBuf::from("/b"), FsAction::Modified));
    }

    #[test]
    fn delete_invalidates_pending_entry() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let path = PathBuf::from("/a/b.txt");
        assert!(debouncer.admit(&path, FsAction::Modified));
        assert!(debouncer.admit(&path, FsAction::Deleted));
        assert!(debouncer.admit(&path, FsAction::Created));
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::tracked::{FileKind, TrackedFile};

/// Default interval between two polling passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to spawn file watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

type FileKey = (PathBuf, String);

struct Shared {
    tracked: Mutex<BTreeMap<FileKey, TrackedFile>>,
    updated: Mutex<BTreeSet<TrackedFile>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls a set of files on a background thread and collects the ones whose
/// modification time moved forward.
///
/// The tracked map and the updated set sit behind independent locks, so
/// `watch`/`unwatch` from any thread and `drain_updated` from the render
/// thread each hold at most one lock for one short critical section.
pub struct FileWatcher {
    shared: Arc<Shared>,
    interval: Duration,
    /// Dropping the sender wakes the polling thread and stops it.
    shutdown: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Starts a watcher with the default 250 ms interval.
    pub fn new() -> Result<Self, WatchError> {
        Self::with_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Result<Self, WatchError> {
        let shared = Arc::new(Shared {
            tracked: Mutex::new(BTreeMap::new()),
            updated: Mutex::new(BTreeSet::new()),
        });

        let (shutdown, stop) = bounded(1);
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("shadebox-watch".into())
            .spawn(move || poll_loop(worker, interval, stop))
            .map_err(WatchError::Spawn)?;

        debug!(interval_ms = interval.as_millis() as u64, "file watcher started");
        Ok(Self {
            shared,
            interval,
            shutdown: Some(shutdown),
            join_handle: Some(handle),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval
    }

    /// Registers `path` under `tag`. Returns `false` (and logs) when the path
    /// is empty, cannot be stat'ed, or is already tracked under the same tag.
    pub fn watch(&self, path: impl AsRef<Path>, kind: FileKind, tag: &str) -> bool {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            warn!(tag, "refusing to watch an empty path");
            return false;
        }

        let canonical = canonical_path(path);
        let modified = match modification_time(&canonical) {
            Ok(modified) => modified,
            Err(err) => {
                warn!(path = %canonical.display(), tag, error = %err, "cannot watch file");
                return false;
            }
        };

        let key = (canonical.clone(), tag.to_string());
        let mut tracked = lock(&self.shared.tracked);
        if tracked.contains_key(&key) {
            warn!(path = %canonical.display(), tag, "file is already watched");
            return false;
        }
        tracked.insert(key, TrackedFile::new(canonical.clone(), tag, kind, modified));
        debug!(path = %canonical.display(), tag, %kind, "watching file");
        true
    }

    /// Stops tracking `(path, tag)`. Returns `false` (and logs) if it was not tracked.
    pub fn unwatch(&self, path: impl AsRef<Path>, tag: &str) -> bool {
        let canonical = canonical_path(path.as_ref());
        let key = (canonical.clone(), tag.to_string());
        let removed = lock(&self.shared.tracked).remove(&key).is_some();
        if removed {
            lock(&self.shared.updated).retain(|file| !file.is(&canonical, tag));
            debug!(path = %canonical.display(), tag, "stopped watching file");
        } else {
            warn!(path = %canonical.display(), tag, "unwatch requested for a file that is not watched");
        }
        removed
    }

    /// Moves out every file seen changing since the previous drain.
    ///
    /// The set is cleared by this call; dropping the result loses those
    /// notifications for good.
    #[must_use = "drained updates are not re-queued; dropping them loses change notifications"]
    pub fn drain_updated(&self) -> BTreeSet<TrackedFile> {
        std::mem::take(&mut *lock(&self.shared.updated))
    }

    /// Snapshot of every tracked `(path, tag)` identity.
    pub fn list_tracked(&self) -> Vec<(PathBuf, String)> {
        lock(&self.shared.tracked).keys().cloned().collect()
    }

    /// Snapshot of every tracked entry including kind and stored timestamp.
    pub fn tracked_files(&self) -> Vec<TrackedFile> {
        lock(&self.shared.tracked).values().cloned().collect()
    }

    pub fn is_tracked(&self, path: impl AsRef<Path>, tag: &str) -> bool {
        let key = (canonical_path(path.as_ref()), tag.to_string());
        lock(&self.shared.tracked).contains_key(&key)
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.tracked).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs one polling pass on the calling thread.
    pub fn poll_now(&self) {
        scan(&self.shared);
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                warn!("file watcher thread panicked");
            }
        }
    }
}

fn poll_loop(shared: Arc<Shared>, interval: Duration, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => scan(&shared),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("file watcher stopped");
}

/// One polling pass: snapshot, stat without locks, then commit.
fn scan(shared: &Shared) {
    let snapshot: Vec<(FileKey, SystemTime)> = lock(&shared.tracked)
        .iter()
        .map(|(key, file)| (key.clone(), file.modified()))
        .collect();

    let observed: Vec<(FileKey, SystemTime, std::io::Result<SystemTime>)> = snapshot
        .into_iter()
        .map(|(key, stored)| {
            let current = modification_time(&key.0);
            (key, stored, current)
        })
        .collect();

    let mut changed = Vec::new();
    {
        let mut tracked = lock(&shared.tracked);
        for (key, stored, current) in observed {
            match current {
                Ok(current) if current > stored => {
                    if let Some(file) = tracked.get_mut(&key) {
                        // Another pass may already have advanced the stamp.
                        if current > file.modified() {
                            file.set_modified(current);
                            changed.push(file.clone());
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    if tracked.remove(&key).is_some() {
                        warn!(
                            path = %key.0.display(),
                            tag = %key.1,
                            error = %err,
                            "watched file disappeared; no longer tracking it"
                        );
                    }
                }
            }
        }
    }

    if changed.is_empty() {
        return;
    }

    let mut updated = lock(&shared.updated);
    for file in changed {
        trace!(file = %file, "file modified");
        updated.replace(file);
    }
}

fn modification_time(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(path: &Path, modified: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn at(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + seconds)
    }

    fn quiet_watcher() -> FileWatcher {
        // Long enough that the background pass never runs during a test.
        FileWatcher::with_interval(Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn drain_reports_change_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shader.frag");
        fs::write(&path, "void main(){}").unwrap();
        touch(&path, at(100));

        let watcher = quiet_watcher();
        assert!(watcher.watch(&path, FileKind::Shader, "scene"));
        watcher.poll_now();
        assert!(watcher.drain_updated().is_empty());

        touch(&path, at(150));
        watcher.poll_now();
        let first = watcher.drain_updated();
        assert_eq!(first.len(), 1);
        let file = first.iter().next().unwrap();
        assert_eq!(file.tag(), "scene");
        assert_eq!(file.modified(), at(150));

        let second = watcher.drain_updated();
        assert!(second.is_empty());
    }

    #[test]
    fn unchanged_files_are_never_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.frag");
        fs::write(&path, "").unwrap();
        touch(&path, at(10));

        let watcher = quiet_watcher();
        watcher.watch(&path, FileKind::Shader, "scene");
        for _ in 0..5 {
            watcher.poll_now();
            assert!(watcher.drain_updated().is_empty());
        }
    }

    #[test]
    fn older_timestamp_is_not_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.frag");
        fs::write(&path, "").unwrap();
        touch(&path, at(100));

        let watcher = quiet_watcher();
        watcher.watch(&path, FileKind::Shader, "scene");
        touch(&path, at(50));
        watcher.poll_now();
        assert!(watcher.drain_updated().is_empty());
    }

    #[test]
    fn repeated_changes_before_drain_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.frag");
        fs::write(&path, "").unwrap();
        touch(&path, at(1));

        let watcher = quiet_watcher();
        watcher.watch(&path, FileKind::Shader, "scene");
        touch(&path, at(2));
        watcher.poll_now();
        touch(&path, at(3));
        watcher.poll_now();

        let drained = watcher.drain_updated();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained.iter().next().unwrap().modified(), at(3));
    }

    #[test]
    fn duplicate_watch_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.frag");
        fs::write(&path, "").unwrap();

        let watcher = quiet_watcher();
        assert!(watcher.watch(&path, FileKind::Shader, "scene"));
        assert!(!watcher.watch(&path, FileKind::Shader, "scene"));
        assert!(watcher.watch(&path, FileKind::Shader, "background"));
        assert_eq!(watcher.len(), 2);
    }

    #[test]
    fn empty_and_missing_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = quiet_watcher();
        assert!(!watcher.watch("", FileKind::Shader, "scene"));
        assert!(!watcher.watch(dir.path().join("nope.frag"), FileKind::Shader, "scene"));
        assert!(watcher.is_empty());
    }

    #[test]
    fn unwatch_removes_entry_and_pending_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.frag");
        fs::write(&path, "").unwrap();
        touch(&path, at(1));

        let watcher = quiet_watcher();
        watcher.watch(&path, FileKind::Shader, "scene");
        touch(&path, at(2));
        watcher.poll_now();

        assert!(watcher.unwatch(&path, "scene"));
        assert!(!watcher.unwatch(&path, "scene"));
        assert!(watcher.drain_updated().is_empty());
        assert!(watcher.list_tracked().is_empty());
    }

    #[test]
    fn deleted_file_is_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.frag");
        let doomed = dir.path().join("doomed.frag");
        fs::write(&keep, "").unwrap();
        fs::write(&doomed, "").unwrap();

        let watcher = quiet_watcher();
        watcher.watch(&keep, FileKind::Shader, "scene");
        watcher.watch(&doomed, FileKind::Shader, "scene");
        fs::remove_file(&doomed).unwrap();
        watcher.poll_now();

        let tracked = watcher.list_tracked();
        assert_eq!(tracked.len(), 1);
        assert!(tracked[0].0.ends_with("keep.frag"));
        assert!(watcher.drain_updated().is_empty());
    }

    #[test]
    fn list_tracked_uses_canonical_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        let path = dir.path().join("sub/a.frag");
        fs::write(&path, "").unwrap();

        let watcher = quiet_watcher();
        watcher.watch(dir.path().join("sub/../sub/a.frag"), FileKind::Shader, "scene");
        let canonical = fs::canonicalize(&path).unwrap();
        assert_eq!(watcher.list_tracked(), vec![(canonical, "scene".to_string())]);
        assert!(watcher.is_tracked(&path, "scene"));
    }

    #[test]
    fn background_thread_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.frag");
        fs::write(&path, "").unwrap();
        touch(&path, at(100));

        let watcher = FileWatcher::with_interval(Duration::from_millis(20)).unwrap();
        watcher.watch(&path, FileKind::Shader, "scene");
        touch(&path, at(150));

        let mut drained = BTreeSet::new();
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(20));
            drained = watcher.drain_updated();
            if !drained.is_empty() {
                break;
            }
        }
        assert_eq!(drained.len(), 1);
        thread::sleep(Duration::from_millis(60));
        assert!(watcher.drain_updated().is_empty());
    }

    #[test]
    fn drop_stops_the_thread_without_waiting_an_interval() {
        let watcher = quiet_watcher();
        let started = std::time::Instant::now();
        drop(watcher);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

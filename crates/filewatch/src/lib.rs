//! Polling file watcher used by shadebox to notice edits to shaders, meshes
//! and textures.
//!
//! A background thread wakes every poll interval, stats every tracked file and
//! records the ones whose modification time moved forward. The render thread
//! collects them with [`FileWatcher::drain_updated`]. Polling trades a bounded
//! detection latency (one interval) for having no platform-specific
//! notification backend.

mod tracked;
mod watcher;

pub use tracked::{FileKind, TrackedFile};
pub use watcher::{FileWatcher, WatchError, DEFAULT_POLL_INTERVAL};

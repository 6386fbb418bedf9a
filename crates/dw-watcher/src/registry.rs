//! Dynamic collection of buffering watchers.
//!
//! A [`WatcherRegistry`] owns one [`BufferedWatcher`] per watched
//! directory, keyed by canonical path, and supports adding and removing
//! paths at runtime. Every watcher flushes into the one [`BatchSink`]
//! the registry was built with.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use dw_core::{BufferConfig, RetryConfig};

use crate::buffer::{BatchSink, BufferedWatcher};
use crate::error::WatchError;

/// A dynamic set of buffering watchers, one per directory.
///
/// Replacing the watcher at an existing path stops the previous one
/// first (flushing its queued events through the sink); closing the
/// registry stops every managed watcher. Operations are serialized
/// per registry by the `&mut self` receivers, so no two watchers for
/// the same path ever run concurrently.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dw_core::{BufferConfig, RetryConfig};
/// use dw_watcher::{BatchSink, EventBatch, WatcherRegistry};
///
/// struct PrintSink;
///
/// impl BatchSink for PrintSink {
///     fn on_batch(&self, batch: EventBatch) {
///         for event in &batch {
///             println!("{event}");
///         }
///     }
/// }
///
/// # fn main() -> Result<(), dw_watcher::WatchError> {
/// let mut registry = WatcherRegistry::new(
///     BufferConfig::default(),
///     RetryConfig::default(),
///     Arc::new(PrintSink),
/// );
/// registry.add("/var/spool/incoming")?;
/// registry.add("/var/spool/outgoing")?;
/// // ... later ...
/// registry.close();
/// # Ok(())
/// # }
/// ```
pub struct WatcherRegistry<S: BatchSink> {
    watchers: FxHashMap<Utf8PathBuf, BufferedWatcher<S>>,
    buffer: BufferConfig,
    retry: RetryConfig,
    sink: Arc<S>,
    closed: bool,
}

impl<S: BatchSink> WatcherRegistry<S> {
    /// Creates an empty registry; every watcher added to it flushes
    /// into `sink`.
    #[must_use]
    pub fn new(buffer: BufferConfig, retry: RetryConfig, sink: Arc<S>) -> Self {
        Self {
            watchers: FxHashMap::default(),
            buffer,
            retry,
            sink,
            closed: false,
        }
    }

    /// Returns `true` if no paths are being watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Number of paths being watched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// The paths currently being watched.
    #[must_use]
    pub fn paths_watching(&self) -> Vec<Utf8PathBuf> {
        self.watchers.keys().cloned().collect()
    }

    /// Starts watching a directory.
    ///
    /// The directory is keyed by its canonical path when it exists (so
    /// two spellings of the same directory share one watcher); a path
    /// that does not exist yet is keyed as given and registered once it
    /// appears. If a watcher already exists at the path it is stopped
    /// (flushing its queue) and replaced.
    ///
    /// # Errors
    ///
    /// [`WatchError::Closed`] after [`close`](Self::close),
    /// [`WatchError::NotADirectory`] if the path exists but is not a
    /// directory, [`WatchError::Io`] / [`WatchError::NonUtf8Path`] if
    /// canonicalization fails.
    pub fn add(&mut self, path: impl Into<Utf8PathBuf>) -> Result<(), WatchError> {
        if self.closed {
            return Err(WatchError::Closed);
        }
        let path = canonical_key(path.into())?;

        let mut watcher = BufferedWatcher::new(
            path.clone(),
            self.buffer,
            self.retry,
            Arc::clone(&self.sink),
        );
        if let Some(mut old) = self.watchers.remove(&path) {
            warn!(dir = %path, "replacing existing watcher");
            old.stop();
        }
        watcher.start();
        self.watchers.insert(path, watcher);
        Ok(())
    }

    /// Adds every path in `paths`.
    ///
    /// Stops at the first failure; paths added before it stay watched.
    pub fn add_all<I, P>(&mut self, paths: I) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        for path in paths {
            self.add(path)?;
        }
        Ok(())
    }

    /// Stops watching a directory.
    ///
    /// Returns `true` if a watcher was present. Queued events are
    /// flushed through the sink before the watcher stops.
    pub fn remove(&mut self, path: &Utf8Path) -> bool {
        let key = lookup_key(path);
        match self.watchers.remove(key.as_ref()) {
            Some(mut watcher) => {
                watcher.stop();
                debug!(dir = %key, "watcher removed");
                true
            }
            None => false,
        }
    }

    /// Stops every managed watcher.
    ///
    /// The map is detached first, so a sink that calls back into the
    /// registry cannot observe half-closed state. Idempotent; `add`
    /// calls after `close` return [`WatchError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
        let detached = std::mem::take(&mut self.watchers);
        for (dir, mut watcher) in detached {
            debug!(dir = %dir, "stopping watcher");
            watcher.stop();
        }
    }
}

impl<S: BatchSink> Drop for WatcherRegistry<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: BatchSink> std::fmt::Debug for WatcherRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("paths", &self.paths_watching())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Resolves the registry key for a path being added: the canonical path
/// when the directory exists, the path as given while it does not.
fn canonical_key(path: Utf8PathBuf) -> Result<Utf8PathBuf, WatchError> {
    if !path.as_std_path().exists() {
        return Ok(path);
    }
    if !path.is_dir() {
        return Err(WatchError::not_a_directory(path));
    }
    let canonical = path.as_std_path().canonicalize()?;
    Utf8PathBuf::from_path_buf(canonical).map_err(WatchError::NonUtf8Path)
}

/// Best-effort key resolution for lookups; falls back to the path as
/// given when canonicalization is impossible.
fn lookup_key(path: &Utf8Path) -> std::borrow::Cow<'_, Utf8Path> {
    match path
        .as_std_path()
        .canonicalize()
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
    {
        Some(canonical) => std::borrow::Cow::Owned(canonical),
        None => std::borrow::Cow::Borrowed(path),
    }
}

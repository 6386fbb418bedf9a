//! Async consumption of the damped event stream.
//!
//! [`ChangeStream`] wraps a [`DampedRegistry`] whose sink forwards each
//! quiescent batch into a bounded tokio channel, so async code can
//! `recv().await` settled batches instead of implementing a
//! [`DamperSink`] on a dedicated thread.

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::mpsc;
use tracing::warn;

use dw_core::Config;

use crate::damper::{DampedRegistry, DamperSink};
use crate::error::WatchError;
use crate::events::EventBatch;

use std::sync::Arc;

/// Default bound of the batch channel.
///
/// Damped batches are rare by construction (one per burst), so a small
/// buffer is plenty; if the consumer falls this far behind, dropping
/// the newest batch and logging beats unbounded growth.
const DEFAULT_CAPACITY: usize = 16;

/// Forwards quiescent batches from the damper thread into the channel.
struct StreamForward {
    tx: mpsc::Sender<EventBatch>,
}

impl DamperSink for StreamForward {
    fn on_quiescent(&self, events: EventBatch) {
        // Runs on the damper thread, so the blocking variant is the
        // right call; the send only blocks while the channel is full.
        if let Err(e) = self.tx.blocking_send(events) {
            warn!(events = e.0.len(), "batch receiver gone, dropping batch");
        }
    }
}

/// An async stream of settled event batches.
///
/// # Examples
///
/// ```no_run
/// use dw_core::Config;
/// use dw_watcher::ChangeStream;
///
/// # async fn demo() -> Result<(), dw_watcher::WatchError> {
/// let mut stream = ChangeStream::new(Config::default());
/// stream.add("/srv/uploads")?;
/// while let Some(batch) = stream.recv().await {
///     println!("{} changes settled", batch.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChangeStream {
    registry: DampedRegistry<StreamForward>,
    rx: mpsc::Receiver<EventBatch>,
}

impl ChangeStream {
    /// Creates a stream with the default channel capacity.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_capacity(config, DEFAULT_CAPACITY)
    }

    /// Creates a stream whose channel buffers up to `capacity` batches.
    #[must_use]
    pub fn with_capacity(config: Config, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let registry = DampedRegistry::new(config, Arc::new(StreamForward { tx }));
        Self { registry, rx }
    }

    /// Starts watching a directory. See [`WatcherRegistry::add`].
    ///
    /// [`WatcherRegistry::add`]: crate::registry::WatcherRegistry::add
    pub fn add(&mut self, path: impl Into<Utf8PathBuf>) -> Result<(), WatchError> {
        self.registry.add(path)
    }

    /// Adds every path in `paths`.
    pub fn add_all<I, P>(&mut self, paths: I) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.registry.add_all(paths)
    }

    /// Stops watching a directory.
    pub fn remove(&mut self, path: &Utf8Path) -> bool {
        self.registry.remove(path)
    }

    /// The paths currently being watched.
    #[must_use]
    pub fn paths_watching(&self) -> Vec<Utf8PathBuf> {
        self.registry.paths_watching()
    }

    /// Waits for the next settled batch.
    ///
    /// Returns `None` once the stream is [`close`](Self::close)d and
    /// every buffered batch has been consumed.
    pub async fn recv(&mut self) -> Option<EventBatch> {
        self.rx.recv().await
    }

    /// Takes a settled batch if one is already buffered.
    pub fn try_recv(&mut self) -> Option<EventBatch> {
        self.rx.try_recv().ok()
    }

    /// Stops all watching.
    ///
    /// Pending events are flushed through the damper as a final batch,
    /// which stays receivable until drained.
    pub fn close(&mut self) {
        self.registry.close();
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("paths", &self.paths_watching())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dw_core::{BufferConfig, DamperConfig, RetryConfig};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> Config {
        Config {
            buffer: BufferConfig {
                flush_timeout_ms: 200,
                max_events: 100,
            },
            retry: RetryConfig::default(),
            damper: DamperConfig { quiet_ms: 100 },
        }
    }

    fn utf8_dir(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stream_delivers_settled_batch() {
        let tmp = TempDir::new().unwrap();
        let mut stream = ChangeStream::new(fast_config());
        stream.add(utf8_dir(&tmp)).unwrap();

        // Give the backend a moment to register before writing.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(tmp.path().join("a.txt"), b"one").unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"two").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(10), stream.recv())
            .await
            .expect("timed out waiting for batch")
            .expect("stream closed early");
        assert!(!batch.is_empty());
        assert!(batch.iter().all(|event| event.dir == utf8_dir(&tmp)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_flushes_then_ends_stream() {
        let tmp = TempDir::new().unwrap();
        // Long windows so nothing flushes on its own.
        let config = Config {
            buffer: BufferConfig {
                flush_timeout_ms: 60_000,
                max_events: 1_000,
            },
            retry: RetryConfig::default(),
            damper: DamperConfig { quiet_ms: 60_000 },
        };
        let mut stream = ChangeStream::new(config);
        stream.add(utf8_dir(&tmp)).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(tmp.path().join("pending.txt"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // close() runs blocking joins; keep it off the async runtime.
        let mut stream = tokio::task::spawn_blocking(move || {
            stream.close();
            stream
        })
        .await
        .unwrap();

        // The pending write arrives as the final batch, then None.
        let batch = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .expect("timed out waiting for final batch");
        assert!(batch.is_some_and(|b| !b.is_empty()));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_remove_reflected_in_paths() {
        let tmp = TempDir::new().unwrap();
        let mut stream = ChangeStream::new(fast_config());

        stream.add(utf8_dir(&tmp)).unwrap();
        assert_eq!(stream.paths_watching().len(), 1);
        assert!(stream.remove(&utf8_dir(&tmp)));
        assert!(stream.paths_watching().is_empty());

        tokio::task::spawn_blocking(move || drop(stream))
            .await
            .unwrap();
    }
}

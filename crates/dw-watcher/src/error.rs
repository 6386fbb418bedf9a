//! Error types for the dw-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while registering and operating filesystem watches.

use camino::Utf8PathBuf;

/// Errors that can occur during watch registration and operation.
///
/// Most failures inside the pipeline are handled asynchronously by the
/// worker threads (retried or logged, per the configured retry policy)
/// and never surface to the caller. This type covers the cases that do:
/// target validation in [`add`], and OS-level registration errors the
/// worker classifies to decide between retrying and terminating.
///
/// # Error Recovery Strategy
///
/// - **Notify errors** ([`WatchError::Notify`]): classified by the worker;
///   a missing path is retried indefinitely, anything else follows the
///   after-error retry policy
/// - **Not a directory** ([`WatchError::NotADirectory`]): fatal for that
///   `add` call - only directories can be watched
/// - **Registry closed** ([`WatchError::Closed`]): fatal - the registry
///   no longer accepts paths
/// - **Non-UTF-8 path** ([`WatchError::NonUtf8Path`]): recoverable - the
///   offending event is logged and skipped
/// - **I/O errors** ([`WatchError::Io`]): fatal for that `add` call
///
/// [`add`]: crate::WatcherRegistry::add
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to initialize or operate the notify watcher.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The watch target exists but is not a directory.
    ///
    /// Watches register interest in a directory's immediate children;
    /// a plain file cannot be watched.
    #[error("watch target is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// The registry has been closed and no longer accepts paths.
    #[error("registry is closed")]
    Closed,

    /// A path is not valid UTF-8.
    ///
    /// This crate uses UTF-8 paths throughout. If a non-UTF-8 path is
    /// encountered in a file event, it is logged and skipped.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred during path validation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::NotADirectory`] error.
    #[inline]
    pub fn not_a_directory(path: impl Into<Utf8PathBuf>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Returns `true` if this error means the watch target does not
    /// exist (yet).
    ///
    /// The registration worker treats this as transient and retries at
    /// a fixed interval until the directory appears.
    #[must_use]
    pub fn is_missing_path(&self) -> bool {
        match self {
            Self::Notify(e) => match &e.kind {
                notify::ErrorKind::PathNotFound => true,
                notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
                _ => false,
            },
            Self::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns `true` if this error is recoverable (watching can continue).
    ///
    /// Recoverable errors are event-specific issues that don't prevent
    /// watching other files.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NonUtf8Path(_)) || self.is_missing_path()
    }

    /// Returns `true` if this error is fatal (the operation failed).
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }
}

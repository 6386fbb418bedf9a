//! Event types for filesystem change notifications.
//!
//! This module provides the typed, normalized view of raw OS
//! notifications that flows through the pipeline:
//!
//! ```text
//! notify::Event (platform notification)
//!        │
//!        ▼  map_notify_event (classify kind, file vs directory)
//!   ChangeEvent
//!        │
//!        ▼  per-path buffering
//!   EventBatch (ordered, capped at max_events)
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::Instant;

use crate::error::WatchError;

/// The kind of change a filesystem notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A child entry was created (or renamed into the directory).
    Created,
    /// A child entry's contents or metadata changed.
    Modified,
    /// A child entry was deleted (or renamed out of the directory).
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Whether the affected child is a file or a directory.
///
/// Deletions often cannot be classified (the entry is gone by the time
/// it is inspected); they default to [`PathKind::File`] unless the
/// platform notification carried a directory hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// A regular file (or unknown).
    File,
    /// A directory.
    Directory,
}

/// A single, typed filesystem change notification.
///
/// Produced by the raw watch layer, never mutated afterwards. Identifies
/// the watched directory and the affected immediate child by name.
///
/// # Examples
///
/// ```
/// use dw_watcher::{ChangeEvent, ChangeKind, PathKind};
/// use camino::Utf8PathBuf;
///
/// let event = ChangeEvent::new(
///     ChangeKind::Created,
///     PathKind::File,
///     Utf8PathBuf::from("/watched/dir"),
///     "report.pdf",
/// );
/// assert_eq!(event.full_path().as_str(), "/watched/dir/report.pdf");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,

    /// Whether the affected entry is a file or a directory.
    pub path_kind: PathKind,

    /// The watched directory this event was observed under.
    pub dir: Utf8PathBuf,

    /// Name of the affected immediate child of `dir`.
    pub name: String,

    /// When this event was received.
    ///
    /// Uses [`Instant`] for monotonic timing, suitable for measuring
    /// elapsed time but not for wall-clock display.
    pub timestamp: Instant,
}

impl ChangeEvent {
    /// Creates a new change event, timestamped now.
    #[inline]
    #[must_use]
    pub fn new(
        kind: ChangeKind,
        path_kind: PathKind,
        dir: Utf8PathBuf,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path_kind,
            dir,
            name: name.into(),
            timestamp: Instant::now(),
        }
    }

    /// The full path of the affected entry (`dir` joined with `name`).
    #[inline]
    #[must_use]
    pub fn full_path(&self) -> Utf8PathBuf {
        self.dir.join(&self.name)
    }

    /// Returns `true` if the affected entry is a directory.
    #[inline]
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.path_kind == PathKind::Directory
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.full_path())
    }
}

/// An ordered batch of change events delivered together.
///
/// Events appear in the order they were received from the OS layer,
/// never reordered. A batch handed to a callback is owned by the
/// recipient; the pipeline does not touch it again.
///
/// # Memory Efficiency
///
/// Uses [`SmallVec`] with inline storage for up to 8 events, avoiding
/// heap allocation in the common case of small batches.
///
/// # Examples
///
/// ```
/// use dw_watcher::{ChangeEvent, ChangeKind, EventBatch, PathKind};
/// use camino::Utf8PathBuf;
///
/// let mut batch = EventBatch::new();
/// batch.push(ChangeEvent::new(
///     ChangeKind::Created,
///     PathKind::File,
///     Utf8PathBuf::from("/dir"),
///     "a.txt",
/// ));
/// assert_eq!(batch.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// The events in this batch, in arrival order.
    pub events: SmallVec<[ChangeEvent; 8]>,

    /// The timestamp when this batch was created.
    pub received_at: Instant,
}

impl EventBatch {
    /// Creates a new empty batch, timestamped now.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: SmallVec::new(),
            received_at: Instant::now(),
        }
    }

    /// Creates a batch from an ordered sequence of events.
    #[inline]
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            received_at: Instant::now(),
        }
    }

    /// Appends an event to the batch.
    #[inline]
    pub fn push(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    /// Returns the number of events in this batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch contains no events.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns an iterator over the events.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ChangeEvent> {
        self.events.iter()
    }

    /// Returns the unique full paths affected by this batch, sorted.
    ///
    /// Useful when multiple events for the same entry are batched
    /// together.
    #[must_use]
    pub fn unique_paths(&self) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<Utf8PathBuf> = self.events.iter().map(ChangeEvent::full_path).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for EventBatch {
    type Item = ChangeEvent;
    type IntoIter = smallvec::IntoIter<[ChangeEvent; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a ChangeEvent;
    type IntoIter = std::slice::Iter<'a, ChangeEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<ChangeEvent> for EventBatch {
    fn from_iter<T: IntoIterator<Item = ChangeEvent>>(iter: T) -> Self {
        Self::from_events(iter)
    }
}

/// Summary statistics for a batch of events.
///
/// Provides a quick overview of what changed in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Total number of events in the batch.
    pub total_events: usize,

    /// Number of creation events.
    pub created: usize,

    /// Number of modification events.
    pub modified: usize,

    /// Number of deletion events.
    pub deleted: usize,

    /// Number of unique paths affected.
    pub unique_paths: usize,
}

impl BatchStats {
    /// Computes statistics for a batch of events.
    #[must_use]
    pub fn from_batch(batch: &EventBatch) -> Self {
        let count = |kind| batch.iter().filter(|e| e.kind == kind).count();
        Self {
            total_events: batch.len(),
            created: count(ChangeKind::Created),
            modified: count(ChangeKind::Modified),
            deleted: count(ChangeKind::Deleted),
            unique_paths: batch.unique_paths().len(),
        }
    }
}

/// Converts a raw notify event into typed change events.
///
/// One notification can reference several paths (a rename carries both
/// sides), so this returns zero or more events. Notifications about the
/// watched directory itself and access notifications are dropped; the
/// raw layer detects directory disappearance separately.
///
/// # Errors
///
/// Returns [`WatchError::NonUtf8Path`] if any referenced path is not
/// valid UTF-8; the caller logs and skips the notification.
pub(crate) fn map_notify_event(
    dir: &Utf8Path,
    event: &notify::Event,
) -> Result<SmallVec<[ChangeEvent; 2]>, WatchError> {
    use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};

    let mut out = SmallVec::new();

    // Renames carry the from-side and to-side as successive paths.
    if let EventKind::Modify(ModifyKind::Name(mode)) = &event.kind {
        let kinds: &[ChangeKind] = match mode {
            RenameMode::From => &[ChangeKind::Deleted],
            RenameMode::To => &[ChangeKind::Created],
            _ => &[ChangeKind::Deleted, ChangeKind::Created],
        };
        for (path, kind) in event.paths.iter().zip(kinds.iter().cycle()) {
            if let Some(name) = child_name(dir, path)? {
                out.push(make_event(*kind, dir, name));
            }
        }
        return Ok(out);
    }

    let kind = match &event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => ChangeKind::Modified,
        EventKind::Access(_) => return Ok(out),
    };

    // Directory hints are only trustworthy on the notification kind;
    // stat the path when the platform did not say.
    let hinted = match &event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            Some(PathKind::Directory)
        }
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
            Some(PathKind::File)
        }
        EventKind::Remove(_) => Some(PathKind::File),
        _ => None,
    };

    for path in &event.paths {
        if let Some(name) = child_name(dir, path)? {
            let path_kind = hinted.unwrap_or_else(|| stat_kind(dir, &name));
            let mut ev = make_event(kind, dir, name);
            ev.path_kind = path_kind;
            out.push(ev);
        }
    }
    Ok(out)
}

/// Extracts the child name of `path` relative to `dir`.
///
/// Returns `None` for the watched directory itself or for paths outside
/// it (both can appear in platform notifications).
fn child_name(dir: &Utf8Path, path: &std::path::Path) -> Result<Option<String>, WatchError> {
    let utf8 =
        Utf8Path::from_path(path).ok_or_else(|| WatchError::non_utf8_path(path.to_path_buf()))?;
    match utf8.strip_prefix(dir) {
        Ok(rel) if !rel.as_str().is_empty() => Ok(Some(rel.as_str().to_owned())),
        _ => Ok(None),
    }
}

fn make_event(kind: ChangeKind, dir: &Utf8Path, name: String) -> ChangeEvent {
    let path_kind = stat_kind(dir, &name);
    ChangeEvent::new(kind, path_kind, dir.to_path_buf(), name)
}

fn stat_kind(dir: &Utf8Path, name: &str) -> PathKind {
    if dir.join(name).is_dir() {
        PathKind::Directory
    } else {
        PathKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
    use std::path::PathBuf;

    fn dir() -> Utf8PathBuf {
        Utf8PathBuf::from("/watched")
    }

    fn notify_event(kind: EventKind, names: &[&str]) -> notify::Event {
        let mut event = notify::Event::new(kind);
        for name in names {
            event = event.add_path(PathBuf::from(format!("/watched/{name}")));
        }
        event
    }

    #[test]
    fn test_change_event_full_path() {
        let event = ChangeEvent::new(
            ChangeKind::Modified,
            PathKind::File,
            dir(),
            "notes.txt",
        );
        assert_eq!(event.full_path().as_str(), "/watched/notes.txt");
        assert!(!event.is_directory());
        assert_eq!(event.to_string(), "modified /watched/notes.txt");
    }

    #[test]
    fn test_map_create_file() {
        let raw = notify_event(EventKind::Create(CreateKind::File), &["a.txt"]);
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert_eq!(events[0].path_kind, PathKind::File);
        assert_eq!(events[0].name, "a.txt");
    }

    #[test]
    fn test_map_create_folder_hint() {
        let raw = notify_event(EventKind::Create(CreateKind::Folder), &["sub"]);
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert_eq!(events[0].path_kind, PathKind::Directory);
    }

    #[test]
    fn test_map_remove_defaults_to_file() {
        // The entry is gone; without a folder hint it classifies as a file.
        let raw = notify_event(EventKind::Remove(RemoveKind::Any), &["gone.txt"]);
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert_eq!(events[0].kind, ChangeKind::Deleted);
        assert_eq!(events[0].path_kind, PathKind::File);
    }

    #[test]
    fn test_map_rename_both_sides() {
        let raw = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["old.txt", "new.txt"],
        );
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ChangeKind::Deleted);
        assert_eq!(events[0].name, "old.txt");
        assert_eq!(events[1].kind, ChangeKind::Created);
        assert_eq!(events[1].name, "new.txt");
    }

    #[test]
    fn test_map_access_dropped() {
        let raw = notify_event(
            EventKind::Access(notify::event::AccessKind::Read),
            &["a.txt"],
        );
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_map_skips_watch_dir_itself() {
        let raw = notify::Event::new(EventKind::Remove(RemoveKind::Folder))
            .add_path(PathBuf::from("/watched"));
        let events = map_notify_event(&dir(), &raw).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_map_non_utf8_path_errors() {
        #[cfg(unix)]
        {
            use std::ffi::OsString;
            use std::os::unix::ffi::OsStringExt;

            let bad = PathBuf::from(OsString::from_vec(vec![0x2f, 0x77, 0xff, 0xfe]));
            let raw = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(bad);
            let err = map_notify_event(&dir(), &raw).unwrap_err();
            assert!(matches!(err, WatchError::NonUtf8Path(_)));
        }
    }

    #[test]
    fn test_event_batch_ordering() {
        let mut batch = EventBatch::new();
        for name in ["a", "b", "c"] {
            batch.push(ChangeEvent::new(
                ChangeKind::Created,
                PathKind::File,
                dir(),
                name,
            ));
        }
        let names: Vec<_> = batch.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_event_batch_unique_paths() {
        let mut batch = EventBatch::new();
        batch.push(ChangeEvent::new(ChangeKind::Created, PathKind::File, dir(), "a"));
        batch.push(ChangeEvent::new(ChangeKind::Modified, PathKind::File, dir(), "a"));
        batch.push(ChangeEvent::new(ChangeKind::Created, PathKind::File, dir(), "b"));
        assert_eq!(batch.unique_paths().len(), 2);
    }

    #[test]
    fn test_event_batch_into_iter() {
        let batch: EventBatch = (0..3)
            .map(|i| ChangeEvent::new(ChangeKind::Created, PathKind::File, dir(), format!("{i}")))
            .collect();
        assert_eq!(batch.into_iter().count(), 3);
    }

    #[test]
    fn test_batch_stats() {
        let mut batch = EventBatch::new();
        batch.push(ChangeEvent::new(ChangeKind::Created, PathKind::File, dir(), "a"));
        batch.push(ChangeEvent::new(ChangeKind::Modified, PathKind::File, dir(), "a"));
        batch.push(ChangeEvent::new(ChangeKind::Deleted, PathKind::File, dir(), "b"));

        let stats = BatchStats::from_batch(&batch);
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.modified, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.unique_paths, 2);

        let json = serde_json::to_string(&stats).unwrap();
        let parsed: BatchStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, parsed);
    }
}

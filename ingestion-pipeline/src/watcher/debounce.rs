//! Collapses bursts of filesystem notifications into one settled signal per
//! filename. Every qualifying event restarts that filename's timer, so a file
//! that keeps changing never settles.

use std::{
    collections::HashMap,
    future::poll_fn,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use notify::{event::ModifyKind, EventKind};
use tokio_util::time::{delay_queue::Key, DelayQueue};
use tracing::trace;

/// Raw notification kinds that can mean "a file showed up or changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Renamed,
    Written,
}

impl FileEventKind {
    /// Access, removal and metadata-only changes map to `None`.
    pub fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(Self::Written),
            _ => None,
        }
    }
}

/// A file whose notifications have been quiet for a full debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledFile {
    pub filename: String,
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

struct Pending {
    key: Key,
    path: PathBuf,
    detected_at: DateTime<Utc>,
}

pub struct EventDebouncer {
    window: Duration,
    extension: String,
    queue: DelayQueue<String>,
    pending: HashMap<String, Pending>,
}

impl EventDebouncer {
    pub fn new(window: Duration, extension: impl Into<String>) -> Self {
        Self {
            window,
            extension: extension.into(),
            queue: DelayQueue::new(),
            pending: HashMap::new(),
        }
    }

    /// Exact, case-sensitive match on the final extension.
    pub fn is_ingestible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.extension)
    }

    /// Schedules or restarts the settle timer for `path`. Returns whether
    /// the event qualified.
    pub fn on_event(&mut self, path: &Path, kind: FileEventKind) -> bool {
        if !self.is_ingestible(path) {
            return false;
        }
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };

        if let Some(pending) = self.pending.get_mut(filename) {
            self.queue.reset(&pending.key, self.window);
            pending.path = path.to_path_buf();
            trace!(%filename, ?kind, "debounce timer restarted");
        } else {
            let key = self.queue.insert(filename.to_string(), self.window);
            self.pending.insert(
                filename.to_string(),
                Pending {
                    key,
                    path: path.to_path_buf(),
                    detected_at: Utc::now(),
                },
            );
            trace!(%filename, ?kind, "debounce timer started");
        }
        true
    }

    /// No timers are running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Waits for the next filename whose window elapses. Resolves to `None`
    /// right away when idle, so callers should check [`Self::is_idle`] first.
    pub async fn next_settled(&mut self) -> Option<SettledFile> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let filename = expired.into_inner();
        let pending = self.pending.remove(&filename)?;

        Some(SettledFile {
            filename,
            path: pending.path,
            detected_at: pending.detected_at,
        })
    }
}

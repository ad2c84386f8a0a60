pub mod debounce;
pub mod guard;

use std::{path::Path, sync::Arc, time::Duration};

use common::error::AppError;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::IngestionPipeline;

use self::{
    debounce::{EventDebouncer, FileEventKind, SettledFile},
    guard::{Admission, DedupGuard},
};

pub type NotifyEvents = mpsc::UnboundedReceiver<notify::Result<notify::Event>>;

/// Owns the drop folder. Raw notifications go through the debouncer, settled
/// files through the dedup guard, and admitted files get their own task.
pub struct IngestionWatcher {
    pipeline: Arc<IngestionPipeline>,
    guard: DedupGuard,
}

impl IngestionWatcher {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self::with_guard(pipeline, DedupGuard::new())
    }

    pub fn with_guard(pipeline: Arc<IngestionPipeline>, guard: DedupGuard) -> Self {
        Self { pipeline, guard }
    }

    pub fn guard(&self) -> &DedupGuard {
        &self.guard
    }

    /// Creates the watched directory if needed and processes notifications
    /// until `shutdown` fires, the notification stream fails, or the watched
    /// directory itself is removed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let watch_dir = self.pipeline.config().watch_dir.clone();
        tokio::fs::create_dir_all(&watch_dir).await.map_err(|err| {
            AppError::Filesystem(format!(
                "failed to create {}: {err}",
                watch_dir.display()
            ))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            },
        )
        .map_err(|err| AppError::Filesystem(format!("failed to create watcher: {err}")))?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Filesystem(format!(
                    "failed to watch {}: {err}",
                    watch_dir.display()
                ))
            })?;

        info!(watch_dir = %watch_dir.display(), "watcher started");

        // The notify handle must outlive the event loop.
        let outcome = self.run_events(rx, shutdown).await;
        drop(watcher);
        outcome
    }

    /// Event loop over an already established notification stream.
    pub async fn run_events(
        self,
        mut events: NotifyEvents,
        shutdown: CancellationToken,
    ) -> Result<(), AppError> {
        let config = self.pipeline.config();
        let mut debouncer =
            EventDebouncer::new(config.tuning.debounce_window, config.extension.clone());
        let mut cycles: JoinSet<()> = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("watcher shutting down");
                    break Ok(());
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        let notified = Self::on_notify(&mut debouncer, &config.watch_dir, &event);
                        if let Err(err) = notified {
                            error!(error = %err, "watched directory lost");
                            break Err(err);
                        }
                    }
                    Some(Err(err)) => {
                        error!(error = %err, "filesystem notification error");
                        break Err(AppError::Filesystem(err.to_string()));
                    }
                    None => {
                        warn!("notification stream closed");
                        break Ok(());
                    }
                },
                Some(settled) = debouncer.next_settled(), if !debouncer.is_idle() => {
                    self.dispatch(settled, &mut cycles).await;
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "ingestion cycle task failed");
                    }
                }
            }
        };

        if !cycles.is_empty() {
            debug!(in_flight = cycles.len(), "waiting for running cycles");
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "ingestion cycle task failed");
            }
        }
        self.guard.clear();

        outcome
    }

    fn on_notify(
        debouncer: &mut EventDebouncer,
        watch_dir: &Path,
        event: &notify::Event,
    ) -> Result<(), AppError> {
        if matches!(event.kind, EventKind::Remove(_))
            && event.paths.iter().any(|path| path == watch_dir)
        {
            return Err(AppError::Filesystem(format!(
                "watched directory {} was removed",
                watch_dir.display()
            )));
        }
        let Some(kind) = FileEventKind::from_notify(&event.kind) else {
            return Ok(());
        };
        for path in &event.paths {
            if !debouncer.on_event(path, kind) {
                debug!(path = %path.display(), "ignoring non-ingestible file");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, settled: SettledFile, cycles: &mut JoinSet<()>) {
        match tokio::fs::try_exists(&settled.path).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(filename = %settled.filename, "settled file is gone");
                return;
            }
            Err(err) => {
                debug!(filename = %settled.filename, error = %err, "settled file is unreadable");
                return;
            }
        }

        match self.guard.try_admit(&settled) {
            Admission::Busy(state) => {
                info!(filename = %settled.filename, %state, "skipped as duplicate");
            }
            Admission::Admitted => {
                info!(filename = %settled.filename, "file accepted");
                cycles.spawn(run_cycle(
                    Arc::clone(&self.pipeline),
                    self.guard.clone(),
                    settled,
                ));
            }
        }
    }
}

async fn run_cycle(pipeline: Arc<IngestionPipeline>, guard: DedupGuard, file: SettledFile) {
    let cooldown = pipeline.config().tuning.cooldown_window;

    match pipeline.process_file(&file, &guard).await {
        Ok(record) => {
            info!(filename = %file.filename, record_id = %record.id, "record committed");
            guard.release(&file.filename, cooldown);
        }
        Err(err) if err.needs_cooldown() => {
            error!(filename = %file.filename, error = %err, "commit failed");
            guard.release(&file.filename, cooldown);
        }
        Err(err) => {
            warn!(filename = %file.filename, error = %err, "parse failed");
            guard.release(&file.filename, Duration::ZERO);
        }
    }
}

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use common::error::AppError;
use state_machines::state_machine;
use tracing::{debug, warn};

use super::debounce::SettledFile;

/// Where an admitted file currently sits in its processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Processing,
    Committing,
    CoolingDown,
    Released,
}

impl ProcessingState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Committing => "committing",
            Self::CoolingDown => "cooling_down",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileTransition {
    Parsed,
    CoolDown,
    Release,
}

impl FileTransition {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::CoolDown => "cool_down",
            Self::Release => "release",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: WatchedFileMachine,
        initial: Processing,
        states: [Processing, Committing, CoolingDown, Released],
        events {
            parsed {
                transition: { from: Processing, to: Committing }
            }
            cool_down {
                transition: { from: Processing, to: CoolingDown }
                transition: { from: Committing, to: CoolingDown }
            }
            release {
                transition: { from: Processing, to: Released }
                transition: { from: Committing, to: Released }
                transition: { from: CoolingDown, to: Released }
            }
        }
    }

    pub(super) fn processing() -> WatchedFileMachine<(), Processing> {
        WatchedFileMachine::new(())
    }

    pub(super) fn committing() -> Option<WatchedFileMachine<(), Committing>> {
        processing().parsed().ok()
    }

    pub(super) fn cooling_down() -> Option<WatchedFileMachine<(), CoolingDown>> {
        processing().cool_down().ok()
    }
}

fn invalid_transition(state: ProcessingState, event: FileTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid file transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(
    state: ProcessingState,
    event: FileTransition,
) -> Result<ProcessingState, AppError> {
    use lifecycle::*;
    let invalid = || invalid_transition(state, event);
    match (state, event) {
        (ProcessingState::Processing, FileTransition::Parsed) => processing()
            .parsed()
            .map(|_| ProcessingState::Committing)
            .map_err(|_| invalid()),
        (ProcessingState::Processing, FileTransition::CoolDown) => processing()
            .cool_down()
            .map(|_| ProcessingState::CoolingDown)
            .map_err(|_| invalid()),
        (ProcessingState::Committing, FileTransition::CoolDown) => committing()
            .ok_or_else(invalid)?
            .cool_down()
            .map(|_| ProcessingState::CoolingDown)
            .map_err(|_| invalid()),
        (ProcessingState::Processing, FileTransition::Release) => processing()
            .release()
            .map(|_| ProcessingState::Released)
            .map_err(|_| invalid()),
        (ProcessingState::Committing, FileTransition::Release) => committing()
            .ok_or_else(invalid)?
            .release()
            .map(|_| ProcessingState::Released)
            .map_err(|_| invalid()),
        (ProcessingState::CoolingDown, FileTransition::Release) => cooling_down()
            .ok_or_else(invalid)?
            .release()
            .map(|_| ProcessingState::Released)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Bookkeeping for one admitted filename.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub filename: String,
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
    pub state: ProcessingState,
    cycle: u64,
}

/// Outcome of [`DedupGuard::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Busy(ProcessingState),
}

#[derive(Default)]
struct GuardInner {
    files: HashMap<String, WatchedFile>,
    next_cycle: u64,
}

/// Filenames that are in flight or cooling down. Admission is an atomic
/// check-and-insert, so at most one cycle per filename runs at a time.
#[derive(Clone, Default)]
pub struct DedupGuard {
    inner: Arc<Mutex<GuardInner>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_admit(&self, file: &SettledFile) -> Admission {
        let mut inner = self.lock();
        if let Some(existing) = inner.files.get(&file.filename) {
            return Admission::Busy(existing.state);
        }

        inner.next_cycle = inner.next_cycle.wrapping_add(1);
        let cycle = inner.next_cycle;
        inner.files.insert(
            file.filename.clone(),
            WatchedFile {
                filename: file.filename.clone(),
                path: file.path.clone(),
                detected_at: file.detected_at,
                state: ProcessingState::Processing,
                cycle,
            },
        );
        Admission::Admitted
    }

    /// Records that the file parsed and its record is being written.
    pub fn mark_committing(&self, filename: &str) -> Result<(), AppError> {
        let mut inner = self.lock();
        let entry = inner
            .files
            .get_mut(filename)
            .ok_or_else(|| AppError::NotFound(format!("{filename} is not being processed")))?;
        entry.state = compute_next_state(entry.state, FileTransition::Parsed)?;
        Ok(())
    }

    /// Frees `filename` for new work. A zero delay releases it now,
    /// otherwise the entry cools down first and is dropped after `after`.
    pub fn release(&self, filename: &str, after: Duration) {
        let mut inner = self.lock();
        let Some(entry) = inner.files.get_mut(filename) else {
            debug!(%filename, "release requested for unknown file");
            return;
        };

        if after.is_zero() {
            match compute_next_state(entry.state, FileTransition::Release) {
                Ok(_) => {
                    inner.files.remove(filename);
                }
                Err(err) => warn!(%filename, error = %err, "refusing to release file"),
            }
            return;
        }

        match compute_next_state(entry.state, FileTransition::CoolDown) {
            Ok(next) => entry.state = next,
            Err(err) => {
                warn!(%filename, error = %err, "refusing to start cooldown");
                return;
            }
        }

        let cycle = entry.cycle;
        let guard = self.clone();
        let filename = filename.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            guard.expire(&filename, cycle);
        });
    }

    fn expire(&self, filename: &str, cycle: u64) {
        let mut inner = self.lock();
        let Some(entry) = inner.files.get(filename) else {
            return;
        };
        // A newer cycle owns the entry; leave it alone.
        if entry.cycle != cycle {
            return;
        }
        match compute_next_state(entry.state, FileTransition::Release) {
            Ok(_) => {
                inner.files.remove(filename);
                debug!(%filename, "cooldown elapsed");
            }
            Err(err) => warn!(%filename, error = %err, "cooldown expiry rejected"),
        }
    }

    pub fn state_of(&self, filename: &str) -> Option<ProcessingState> {
        self.lock().files.get(filename).map(|file| file.state)
    }

    pub fn snapshot(&self, filename: &str) -> Option<WatchedFile> {
        self.lock().files.get(filename).cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().files.len()
    }

    /// Drops every entry, including pending cooldowns.
    pub fn clear(&self) {
        self.lock().files.clear();
    }
}

//! Resumable, batch-oriented phase execution.
//!
//! A collection is split into ordered phases (discovery, then enrichment),
//! each walking the planned channel order in fixed-size batches. Progress is
//! persisted in a versioned cursor record:
//!
//! - `remaining` shrinks as each channel finishes,
//! - `completed` grows only when a whole batch finishes,
//! - `in_flight` holds the batch being processed.
//!
//! A process that dies mid-batch leaves `in_flight` set; on resume the whole
//! batch is re-run (at-least-once). Completed batches are never re-run.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::ChannelId;
use crate::persistence::{MemoryStore, PersistenceError, StateStore};
use crate::{CoreError, ValidationError};

pub const CURSOR_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Discovery,
    Enrichment,
}

impl PhaseId {
    pub const ALL: [PhaseId; 2] = [PhaseId::Discovery, PhaseId::Enrichment];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Enrichment => "enrichment",
        }
    }

    /// Channels per batch when the caller does not override it.
    pub const fn default_batch_size(self) -> usize {
        match self {
            Self::Discovery => 5,
            Self::Enrichment => 25,
        }
    }
}

impl Display for PhaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "discovery" => Ok(Self::Discovery),
            "enrichment" => Ok(Self::Enrichment),
            _ => Err(ValidationError::InvalidPhase {
                value: value.to_owned(),
            }),
        }
    }
}

/// Persisted progress of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub phase_id: PhaseId,
    pub batch_index: usize,
    pub remaining: Vec<ChannelId>,
    pub completed: Vec<ChannelId>,
    pub in_flight: Option<Vec<ChannelId>>,
}

impl Cursor {
    pub fn new(phase_id: PhaseId, channels: &[ChannelId]) -> Self {
        Self {
            phase_id,
            batch_index: 0,
            remaining: channels.to_vec(),
            completed: Vec::new(),
            in_flight: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty() && self.in_flight.is_none()
    }
}

/// Whole persisted scheduler record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub channel_order: Vec<ChannelId>,
    pub phases: Vec<Cursor>,
}

impl SchedulerState {
    pub fn planned(channels: &[ChannelId]) -> Self {
        Self {
            channel_order: channels.to_vec(),
            phases: PhaseId::ALL
                .iter()
                .map(|phase| Cursor::new(*phase, channels))
                .collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phases.iter().all(Cursor::is_complete)
    }

    fn cursor(&self, phase: PhaseId) -> Option<&Cursor> {
        self.phases.iter().find(|cursor| cursor.phase_id == phase)
    }

    fn cursor_mut(&mut self, phase: PhaseId) -> Option<&mut Cursor> {
        self.phases.iter_mut().find(|cursor| cursor.phase_id == phase)
    }
}

/// Channels handed to a [`BatchHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub phase: PhaseId,
    pub index: usize,
    pub channels: Vec<ChannelId>,
    /// Re-run of a batch that was in flight when a previous process stopped.
    pub resumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchDisposition {
    Completed,
    /// Stopped early; the batch stays in flight and is re-run next time.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub phase: PhaseId,
    pub index: usize,
    pub channels: Vec<ChannelId>,
    pub resumed: bool,
    pub disposition: BatchDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: PhaseId,
    pub batches: Vec<BatchReport>,
    pub complete: bool,
}

/// Per-channel progress sink passed to handlers.
pub struct BatchProgress<'s> {
    scheduler: &'s PhaseScheduler,
    phase: PhaseId,
}

impl BatchProgress<'_> {
    pub fn channel_done(&self, channel: &ChannelId) {
        self.scheduler.record_progress(self.phase, channel);
    }
}

pub type BatchFuture<'a> = Pin<Box<dyn Future<Output = BatchDisposition> + Send + 'a>>;

/// Work performed for each batch.
pub trait BatchHandler: Send + Sync {
    fn handle<'a>(&'a self, batch: &'a Batch, progress: &'a BatchProgress<'a>) -> BatchFuture<'a>;

    /// Checked before each new batch of [`PhaseScheduler::run_phase`].
    fn should_continue(&self, _phase: PhaseId) -> bool {
        true
    }
}

/// Owner of the cursor record.
pub struct PhaseScheduler {
    store: Arc<dyn StateStore<SchedulerState>>,
    state: Mutex<Option<SchedulerState>>,
}

impl std::fmt::Debug for PhaseScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseScheduler")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl PhaseScheduler {
    /// Load persisted cursors. An incompatible or corrupt record is an error,
    /// never silently reinterpreted.
    pub fn open(store: Arc<dyn StateStore<SchedulerState>>) -> Result<Self, PersistenceError> {
        let state = store.load()?;
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            state: Mutex::new(None),
        }
    }

    /// Adopt `channels` as the plan. Unfinished progress for the same channel
    /// order is kept; anything else starts over. Returns whether it resumed.
    pub fn plan(&self, channels: &[ChannelId]) -> bool {
        let mut state = self.lock();
        if let Some(existing) = state.as_ref() {
            if existing.channel_order == channels && !existing.is_complete() {
                info!(channels = channels.len(), "resuming unfinished phases");
                return true;
            }
        }

        let planned = SchedulerState::planned(channels);
        self.persist(&planned);
        *state = Some(planned);
        false
    }

    /// Drop every cursor.
    pub fn reset(&self) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        self.store.clear()?;
        *state = None;
        Ok(())
    }

    /// Cursor snapshot; no I/O.
    pub fn status(&self) -> Vec<Cursor> {
        self.lock()
            .as_ref()
            .map(|state| state.phases.clone())
            .unwrap_or_default()
    }

    pub fn channel_order(&self) -> Vec<ChannelId> {
        self.lock()
            .as_ref()
            .map(|state| state.channel_order.clone())
            .unwrap_or_default()
    }

    pub fn is_planned(&self) -> bool {
        self.lock().is_some()
    }

    /// First phase with work left.
    pub fn current_phase(&self) -> Option<PhaseId> {
        self.lock().as_ref().and_then(|state| {
            state
                .phases
                .iter()
                .find(|cursor| !cursor.is_complete())
                .map(|cursor| cursor.phase_id)
        })
    }

    /// Claim the next batch of `phase`, or re-issue the batch left in flight.
    pub fn next_batch(&self, phase: PhaseId, batch_size: usize) -> Result<Option<Batch>, CoreError> {
        if batch_size == 0 {
            return Err(ValidationError::ZeroValue { field: "batch_size" }.into());
        }

        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(ValidationError::NoCollectionPlanned)?;

        if let Some(pending) = PhaseId::ALL
            .iter()
            .take_while(|earlier| **earlier < phase)
            .find(|earlier| state.cursor(**earlier).is_some_and(|cursor| !cursor.is_complete()))
        {
            return Err(ValidationError::PhaseOutOfOrder {
                phase: phase.as_str(),
                pending: pending.as_str(),
            }
            .into());
        }

        let Some(cursor) = state.cursor_mut(phase) else {
            return Ok(None);
        };

        if let Some(in_flight) = &cursor.in_flight {
            warn!(
                phase = phase.as_str(),
                batch = cursor.batch_index,
                channels = in_flight.len(),
                "re-running batch left in flight"
            );
            return Ok(Some(Batch {
                phase,
                index: cursor.batch_index,
                channels: in_flight.clone(),
                resumed: true,
            }));
        }

        if cursor.remaining.is_empty() {
            return Ok(None);
        }

        let take = batch_size.min(cursor.remaining.len());
        let channels: Vec<ChannelId> = cursor.remaining[..take].to_vec();
        cursor.in_flight = Some(channels.clone());
        let batch = Batch {
            phase,
            index: cursor.batch_index,
            channels,
            resumed: false,
        };

        let snapshot = state.clone();
        self.persist(&snapshot);
        Ok(Some(batch))
    }

    /// Mark one channel of the in-flight batch as processed.
    pub fn record_progress(&self, phase: PhaseId, channel: &ChannelId) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };
        let Some(cursor) = state.cursor_mut(phase) else {
            return;
        };
        let before = cursor.remaining.len();
        cursor.remaining.retain(|id| id != channel);
        if cursor.remaining.len() != before {
            let snapshot = state.clone();
            self.persist(&snapshot);
        }
    }

    /// Close the in-flight batch: its channels become completed.
    pub fn complete_batch(&self, phase: PhaseId) {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            return;
        };
        let Some(cursor) = state.cursor_mut(phase) else {
            return;
        };
        let Some(in_flight) = cursor.in_flight.take() else {
            return;
        };

        cursor.remaining.retain(|id| !in_flight.contains(id));
        for channel in in_flight {
            if !cursor.completed.contains(&channel) {
                cursor.completed.push(channel);
            }
        }
        cursor.batch_index += 1;
        debug!(
            phase = phase.as_str(),
            batch_index = cursor.batch_index,
            remaining = cursor.remaining.len(),
            "batch completed"
        );

        let snapshot = state.clone();
        self.persist(&snapshot);
    }

    /// Process one batch of `phase` (or the current phase) with `handler`.
    pub async fn run_next_batch(
        &self,
        phase: Option<PhaseId>,
        batch_size: Option<usize>,
        handler: &dyn BatchHandler,
    ) -> Result<Option<BatchReport>, CoreError> {
        let Some(phase) = phase.or_else(|| self.current_phase()) else {
            return Ok(None);
        };
        let batch_size = batch_size.unwrap_or(phase.default_batch_size());
        let Some(batch) = self.next_batch(phase, batch_size)? else {
            return Ok(None);
        };

        info!(
            phase = phase.as_str(),
            batch = batch.index,
            channels = batch.channels.len(),
            resumed = batch.resumed,
            "running batch"
        );
        let progress = BatchProgress {
            scheduler: self,
            phase,
        };
        let disposition = handler.handle(&batch, &progress).await;
        if disposition == BatchDisposition::Completed {
            self.complete_batch(phase);
        } else {
            info!(phase = phase.as_str(), batch = batch.index, "batch interrupted; will re-run on resume");
        }

        Ok(Some(BatchReport {
            phase,
            index: batch.index,
            channels: batch.channels,
            resumed: batch.resumed,
            disposition,
        }))
    }

    /// Run batches of `phase` until it completes or a batch is interrupted.
    pub async fn run_phase(
        &self,
        phase: PhaseId,
        batch_size: Option<usize>,
        handler: &dyn BatchHandler,
    ) -> Result<PhaseReport, CoreError> {
        let mut batches = Vec::new();

        while handler.should_continue(phase) {
            let Some(report) = self.run_next_batch(Some(phase), batch_size, handler).await? else {
                break;
            };
            let interrupted = report.disposition == BatchDisposition::Interrupted;
            batches.push(report);
            if interrupted {
                break;
            }
        }

        let complete = self
            .lock()
            .as_ref()
            .and_then(|state| state.cursor(phase).map(Cursor::is_complete))
            .unwrap_or(false);
        Ok(PhaseReport {
            phase,
            batches,
            complete,
        })
    }

    fn persist(&self, state: &SchedulerState) {
        if let Err(error) = self.store.save(state) {
            warn!(error = %error, "failed to persist phase cursor; progress kept in memory");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SchedulerState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    fn ids(raw: &[&str]) -> Vec<ChannelId> {
        raw.iter()
            .map(|id| ChannelId::parse(id).expect("valid"))
            .collect()
    }

    struct Recorder {
        seen: StdMutex<Vec<Vec<ChannelId>>>,
        interrupt_on: Option<usize>,
    }

    impl Recorder {
        fn new(interrupt_on: Option<usize>) -> Self {
            Self {
                seen: StdMutex::new(Vec::new()),
                interrupt_on,
            }
        }
    }

    impl BatchHandler for Recorder {
        fn handle<'a>(&'a self, batch: &'a Batch, progress: &'a BatchProgress<'a>) -> BatchFuture<'a> {
            Box::pin(async move {
                self.seen.lock().expect("lock").push(batch.channels.clone());
                if self.interrupt_on == Some(batch.index) {
                    if let Some(first) = batch.channels.first() {
                        progress.channel_done(first);
                    }
                    return BatchDisposition::Interrupted;
                }
                for channel in &batch.channels {
                    progress.channel_done(channel);
                }
                BatchDisposition::Completed
            })
        }
    }

    #[test]
    fn phase_ids_parse() {
        assert_eq!("Discovery".parse::<PhaseId>().expect("valid"), PhaseId::Discovery);
        assert!("ranking".parse::<PhaseId>().is_err());
    }

    #[test]
    fn next_batch_claims_in_order_and_marks_in_flight() {
        let scheduler = PhaseScheduler::in_memory();
        scheduler.plan(&ids(&["A", "B", "C", "D"]));

        let batch = scheduler
            .next_batch(PhaseId::Discovery, 3)
            .expect("valid")
            .expect("batch available");
        assert_eq!(batch.channels, ids(&["A", "B", "C"]));

        let cursor = &scheduler.status()[0];
        assert_eq!(cursor.in_flight.as_deref(), Some(ids(&["A", "B", "C"]).as_slice()));
        assert_eq!(cursor.remaining.len(), 4);
    }

    #[test]
    fn enrichment_waits_for_discovery() {
        let scheduler = PhaseScheduler::in_memory();
        scheduler.plan(&ids(&["A"]));

        let err = scheduler
            .next_batch(PhaseId::Enrichment, 5)
            .expect_err("discovery pending");
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::PhaseOutOfOrder { .. })
        ));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let scheduler = PhaseScheduler::in_memory();
        scheduler.plan(&ids(&["A"]));
        assert!(scheduler.next_batch(PhaseId::Discovery, 0).is_err());
    }

    #[tokio::test]
    async fn interrupted_batch_is_rerun_whole() {
        let scheduler = PhaseScheduler::in_memory();
        scheduler.plan(&ids(&["A", "B", "C"]));

        let interrupting = Recorder::new(Some(0));
        let report = scheduler
            .run_phase(PhaseId::Discovery, Some(3), &interrupting)
            .await
            .expect("runs");
        assert!(!report.complete);
        assert_eq!(scheduler.status()[0].remaining, ids(&["B", "C"]));

        let recorder = Recorder::new(None);
        let report = scheduler
            .run_phase(PhaseId::Discovery, Some(3), &recorder)
            .await
            .expect("runs");

        assert!(report.complete);
        assert!(report.batches[0].resumed);
        assert_eq!(
            *recorder.seen.lock().expect("lock"),
            vec![ids(&["A", "B", "C"])]
        );
        assert_eq!(scheduler.status()[0].completed, ids(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn replanning_same_channels_resumes() {
        let scheduler = PhaseScheduler::in_memory();
        let channels = ids(&["A", "B"]);
        assert!(!scheduler.plan(&channels));

        scheduler
            .run_next_batch(None, Some(1), &Recorder::new(None))
            .await
            .expect("runs");

        assert!(scheduler.plan(&channels));
        assert_eq!(scheduler.status()[0].completed, ids(&["A"]));

        assert!(!scheduler.plan(&ids(&["A", "B", "C"])));
        assert!(scheduler.status()[0].completed.is_empty());
    }
}

mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use error::EngineError;
pub use store::{AppointmentStore, SharedSlot, SlotStore};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::WAL_APPEND_TIMEOUT_MS;
use crate::model::*;
use crate::notify::{LogNotifier, Notifier, NotifyHub};
use crate::reference::{RandomReferenceGenerator, ReferenceGenerator};
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Batch = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

fn commit_batch(wal: &mut Wal, batch: &mut Batch) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

/// All or nothing: a batch that fails anywhere is cut back out of the file,
/// since every sender in it is told the append failed.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        if let Err(e) = wal.rollback() {
            error!("WAL rollback failed, refusing further appends: {e}");
        }
    }
    result
}

fn respond_batch(batch: &mut Batch, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Hand one event to the group-commit writer and wait for its verdict.
///
/// Only enqueueing is bounded: a command still in the channel when the
/// timeout fires was never sent. Once queued, the writer always answers.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    let command = WalCommand::Append { event, response: tx };
    match tokio::time::timeout(Duration::from_millis(WAL_APPEND_TIMEOUT_MS), wal_tx.send(command)).await {
        Err(_) => return Err(EngineError::Storage("WAL writer backlogged, append not queued".into())),
        Ok(Err(_)) => return Err(EngineError::Storage("WAL writer shut down".into())),
        Ok(Ok(())) => {}
    }
    rx.await
        .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Storage(e.to_string()))
}

/// Which customer notice to send after a commit.
#[derive(Debug, Clone, Copy)]
pub(super) enum Notice {
    Confirmation,
    Cancellation,
}

/// The booking engine: branches, slots and appointments in memory, every
/// mutation journaled to the WAL before it is applied.
pub struct Engine {
    pub(super) branches: Arc<DashMap<Ulid, Branch>>,
    pub slots: Arc<SlotStore>,
    pub appointments: Arc<AppointmentStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) references: Arc<dyn ReferenceGenerator>,
    /// Serializes branch and slot creation so uniqueness checks hold.
    pub(super) catalog: Arc<Mutex<()>>,
}

/// Apply a slot-scoped event. The caller holds the slot's write lock.
fn apply_to_slot(slot: &mut TimeSlot, appointments: &AppointmentStore, event: &Event) {
    match event {
        Event::SlotCorrected {
            booked_count,
            available,
            ..
        } => {
            slot.booked_count = *booked_count;
            slot.available = *available;
        }
        Event::AppointmentBooked {
            appointment,
            booked_count,
            available,
        } => {
            appointments.save(appointment.clone());
            slot.booked_count = *booked_count;
            slot.available = *available;
        }
        Event::AppointmentCancelled {
            id,
            booked_count,
            available,
            ..
        } => {
            appointments.mark_cancelled(id);
            slot.booked_count = *booked_count;
            slot.available = *available;
        }
        // Catalog events are applied at the map level, not here
        Event::BranchCreated { .. } | Event::SlotCreated { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(path = %wal_path.display(), valid_len = replay.valid_len, "discarded torn WAL tail during replay");
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            branches: Arc::new(DashMap::new()),
            slots: Arc::new(SlotStore::new()),
            appointments: Arc::new(AppointmentStore::new()),
            wal_tx,
            notify,
            notifier: Arc::new(LogNotifier),
            references: Arc::new(RandomReferenceGenerator),
            catalog: Arc::new(Mutex::new(())),
        };

        // Sole owner of every slot lock here, so try_write never contends.
        for event in &replay.events {
            match event {
                Event::BranchCreated { branch } => {
                    engine.branches.insert(branch.id, branch.clone());
                }
                Event::SlotCreated { slot } => engine.slots.insert(slot.clone()),
                other => {
                    let Some(slot_id) = other.slot_id() else {
                        continue;
                    };
                    let Some(shared) = engine.slots.get(&slot_id) else {
                        warn!(%slot_id, "WAL event for unknown slot skipped");
                        continue;
                    };
                    let mut guard = shared
                        .try_write()
                        .map_err(|_| io::Error::other("replay: slot lock contended"))?;
                    apply_to_slot(&mut guard, &engine.appointments, other);
                }
            }
        }

        info!(
            events = replay.events.len(),
            branches = engine.branches.len(),
            slots = engine.slots.len(),
            appointments = engine.appointments.len(),
            "engine state restored"
        );
        Ok(engine)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_reference_generator(mut self, references: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = references;
        self
    }

    /// Append `event`, then run `apply` once it is durable.
    ///
    /// Both halves run on their own task, so a caller that stops waiting
    /// (dropped future, client gone) cannot leave an event on disk that
    /// memory never saw. Whatever `apply` captures, slot or catalog guards
    /// included, is held until the outcome is settled.
    pub(super) async fn commit<T, F>(&self, event: Event, apply: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, event).await?;
            Ok::<T, EngineError>(apply())
        })
        .await
        .map_err(|e| EngineError::Storage(format!("commit task failed: {e}")))?
    }

    pub(super) async fn wal_request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))
    }

    /// WAL-append + apply + publish under the slot's write lock. The guard
    /// comes back once the event is applied.
    pub(super) async fn persist_and_apply(
        &self,
        mut slot: OwnedRwLockWriteGuard<TimeSlot>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<TimeSlot>, EngineError> {
        let appointments = self.appointments.clone();
        let notify = self.notify.clone();
        let applied = event.clone();
        self.commit(event, move || {
            apply_to_slot(&mut slot, &appointments, &applied);
            notify.send(&SlotChange::from(&*slot));
            slot
        })
        .await
    }

    pub fn get_branch(&self, id: &Ulid) -> Option<Branch> {
        self.branches.get(id).map(|e| e.value().clone())
    }

    pub(super) fn project(&self, appointment: &Appointment, slot: &TimeSlot) -> Result<AppointmentRecord, EngineError> {
        let branch = self
            .get_branch(&slot.branch_id)
            .ok_or_else(|| EngineError::Storage(format!("branch {} missing for slot {}", slot.branch_id, slot.id)))?;
        Ok(AppointmentRecord::project(appointment, slot, &branch))
    }

    /// Hand a committed record to the notifier on its own task.
    pub(super) fn dispatch(&self, notice: Notice, record: AppointmentRecord) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let result = match notice {
                Notice::Confirmation => notifier.send_confirmation(&record).await,
                Notice::Cancellation => notifier.send_cancellation(&record).await,
            };
            if let Err(e) = result {
                warn!(reference = %record.reference, ?notice, "customer notification failed: {e}");
                metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            }
        });
    }
}

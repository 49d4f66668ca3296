mod assignment;
mod availability;
mod conflict;
mod duration;
mod error;
mod lease;
mod mutations;
mod queries;

pub use assignment::{assign_automatic, rank, select, validate_manual};
pub use availability::{ResolveOptions, resolve};
pub use conflict::{find_conflicts, slot_from_parts, validate_request};
pub use duration::{DEFAULT_MIN_HOURS, validate_duration, window_hours};
pub use error::{EngineError, ErrorClass, Rejection};
pub use queries::BookingFilter;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Dispatcher, NotifyHub};
use crate::observability;
use crate::wal::Wal;

pub type SharedNannyState = Arc<RwLock<NannyState>>;

/// What to do when a stored booking's window can't be parsed during an overlap check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Treat as no conflict.
    #[default]
    FailOpen,
    /// Treat as a conflict.
    FailClosed,
}

/// Knobs that change scheduling decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingPolicy {
    pub min_booking_hours: f64,
    pub overlap_on_bad_token: OverlapPolicy,
    /// Manual assignment ignores blocked dates unless this is set.
    pub manual_honors_blocked_dates: bool,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            min_booking_hours: DEFAULT_MIN_HOURS,
            overlap_on_bad_token: OverlapPolicy::FailOpen,
            manual_honors_blocked_dates: false,
        }
    }
}

/// Result of a booking request. Every caller has to handle both arms.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Assigned(Booking),
    Rejected(Rejection),
}

impl BookingOutcome {
    pub fn assigned(&self) -> Option<&Booking> {
        match self {
            BookingOutcome::Assigned(b) => Some(b),
            BookingOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BookingOutcome::Assigned(_) => None,
            BookingOutcome::Rejected(r) => Some(r),
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't ride
    // along with the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

pub struct Engine {
    pub(super) nannies: DashMap<NannyId, SharedNannyState>,
    /// Reverse lookup: booking id → assigned nanny.
    pub(super) booking_to_nanny: DashMap<Ulid, NannyId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: SchedulingPolicy,
    pub(super) dispatchers: Vec<Arc<dyn Dispatcher>>,
    /// Serializes registration against compaction so a snapshot never
    /// misses a nanny whose registration is already journaled.
    pub(super) roster_gate: Mutex<()>,
}

/// Apply an event to one nanny's state (no locking: caller holds the lock).
fn apply_to_nanny(rs: &mut NannyState, event: &Event, index: &DashMap<Ulid, NannyId>) {
    match event {
        Event::NannyAvailabilityChanged { available, .. } => rs.nanny.available = *available,
        Event::NannyStatusChanged { status, .. } => rs.nanny.status = *status,
        Event::DateBlocked { entry } => {
            rs.blocked.insert(entry.date, entry.clone());
        }
        Event::DateUnblocked { date, .. } => {
            rs.blocked.remove(date);
        }
        Event::BookingCreated { booking } => {
            index.insert(booking.id, rs.id());
            rs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = *status;
            }
        }
        Event::BookingRescheduled {
            id,
            start_time,
            end_time,
            ..
        } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.start_time = start_time.clone();
                b.end_time = end_time.clone();
            }
        }
        Event::ClockedIn { id, at, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.clock_in = Some(at.clone());
            }
        }
        Event::ClockedOut { id, at, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.clock_out = Some(at.clone());
                b.status = BookingStatus::Completed;
            }
        }
        // Registration creates the state itself, see `register_nanny`.
        Event::NannyRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: SchedulingPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let booking_to_nanny = DashMap::new();
        // Replay into plain maps first; locks only appear once state is shared.
        let mut states: HashMap<NannyId, NannyState> = HashMap::new();
        for event in &events {
            match event {
                Event::NannyRegistered { nanny } => {
                    states.insert(nanny.id, NannyState::new(nanny.clone()));
                }
                other => match states.get_mut(&other.nanny_id()) {
                    Some(rs) => apply_to_nanny(rs, other, &booking_to_nanny),
                    None => warn!(nanny = other.nanny_id(), "replay: event for unknown nanny skipped"),
                },
            }
        }

        let nannies = DashMap::new();
        for (id, rs) in states {
            nannies.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(Self {
            nannies,
            booking_to_nanny,
            wal_tx,
            notify,
            policy,
            dispatchers: Vec::new(),
            roster_gate: Mutex::new(()),
        })
    }

    /// Register a collaborator to run after every committed booking.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatchers.push(dispatcher);
        self
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    /// Write event to the journal via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_nanny_state(&self, id: NannyId) -> Option<SharedNannyState> {
        self.nannies.get(&id).map(|e| e.value().clone())
    }

    pub fn nanny_for_booking(&self, booking_id: &Ulid) -> Option<NannyId> {
        self.booking_to_nanny.get(booking_id).map(|e| *e.value())
    }

    /// Journal + apply + notify.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut NannyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_nanny(rs, event, &self.booking_to_nanny);
        self.notify.send(rs.id(), event);
        Ok(())
    }

    /// Lookup nanny by id and acquire its write lock.
    pub(super) async fn nanny_write(
        &self,
        id: NannyId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<NannyState>, EngineError> {
        let rs = self
            .get_nanny_state(id)
            .ok_or(EngineError::NannyNotFound(id))?;
        Ok(rs.write_owned().await)
    }

    /// Lookup booking → nanny and acquire that nanny's write lock.
    pub(super) async fn booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<NannyState>, EngineError> {
        let nanny_id = self
            .nanny_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        self.nanny_write(nanny_id).await
    }
}

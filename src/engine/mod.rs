mod availability;
mod bookings;
mod conflict;
mod directory;
mod error;
mod lifecycle;
mod payments;
mod queries;
mod reviews;
mod store;

pub use availability::{merge_overlapping, subtract_intervals};
pub use directory::NewSpot;
pub use error::{EngineError, ErrorClass};
pub use lifecycle::{Actor, Party};
pub use payments::Reconciliation;
pub use queries::BookingFilter;
pub use store::Store;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::gateway::PaymentGateway;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

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

type Queued = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every append that is already queued when the first one
/// arrives joins its batch, and the batch shares one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before touching the file otherwise.
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    info!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<Queued>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes do not ride along with
    // the next batch; the callers of this one are told it failed.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
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
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Event application ────────────────────────────────────

/// The spot an event belongs to. Directory events (users, listing, delisting)
/// are applied at the store level and return `None`.
fn event_spot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SpotChanged { id, .. } => Some(*id),
        Event::SlotDeclared { slot } => Some(slot.spot_id),
        Event::SlotChanged { spot_id, .. }
        | Event::SlotRemoved { spot_id, .. }
        | Event::BookingTransitioned { spot_id, .. }
        | Event::PaymentStatusChanged { spot_id, .. }
        | Event::TransactionRecorded { spot_id, .. }
        | Event::TransactionSettled { spot_id, .. } => Some(*spot_id),
        Event::BookingCreated { booking, .. } => Some(booking.spot_id),
        Event::ReviewPosted { review } => Some(review.spot_id),
        Event::UserRegistered { .. } | Event::SpotListed { .. } | Event::SpotDelisted { .. } => None,
    }
}

/// Apply a spot-scoped event. The caller holds the spot's lock (or owns the
/// state outright during replay).
fn apply_to_spot(ss: &mut SpotState, event: &Event, store: &Store) {
    let spot_id = ss.id();
    match event {
        Event::SpotChanged { changes, .. } => {
            for change in changes {
                match change {
                    SpotChange::Status(status) => ss.spot.status = *status,
                    SpotChange::Availability(available) => ss.spot.is_available = *available,
                    SpotChange::HourlyPrice(price) => ss.spot.hourly_price = *price,
                }
            }
        }
        Event::SlotDeclared { slot } => {
            store.map_entity(slot.id, spot_id);
            ss.insert_slot(slot.clone());
        }
        Event::SlotChanged { id, span, is_booked, .. } => {
            ss.remove_slot(*id);
            ss.insert_slot(AvailabilitySlot {
                id: *id,
                spot_id,
                span: *span,
                is_booked: *is_booked,
            });
        }
        Event::SlotRemoved { id, .. } => {
            ss.remove_slot(*id);
            store.unmap_entity(id);
        }
        Event::BookingCreated { booking, carve } => {
            if let Some(carve) = carve {
                for gone in ss.carve(carve, booking.span) {
                    store.unmap_entity(&gone);
                }
                for id in std::iter::once(carve.booked).chain(carve.tail) {
                    if ss.slot(id).is_some() {
                        store.map_entity(id, spot_id);
                    }
                }
            }
            store.map_entity(booking.id, spot_id);
            ss.insert_booking(booking.clone());
        }
        Event::BookingTransitioned { id, to, at, .. } => {
            let Some(booking) = ss.booking_mut(*id) else {
                return;
            };
            lifecycle::stamp(booking, *to, *at);
            let span = booking.span;
            if to.releases_slot() {
                for absorbed in ss.release(span) {
                    store.unmap_entity(&absorbed);
                }
            }
        }
        Event::PaymentStatusChanged { booking_id, status, reference, at, .. } => {
            if let Some(booking) = ss.booking_mut(*booking_id) {
                booking.payment_status = *status;
                if reference.is_some() {
                    booking.gateway_reference = reference.clone();
                }
                booking.updated_at = *at;
            }
        }
        Event::TransactionRecorded { tx, .. } => {
            store.map_entity(tx.id, spot_id);
            ss.transactions.push(tx.clone());
        }
        Event::TransactionSettled { id, status, .. } => {
            if let Some(tx) = ss.transactions.iter_mut().find(|t| t.id == *id) {
                tx.status = *status;
            }
        }
        Event::ReviewPosted { review } => {
            store.map_entity(review.id, spot_id);
            ss.reviews.push(review.clone());
        }
        Event::UserRegistered { .. } | Event::SpotListed { .. } | Event::SpotDelisted { .. } => {}
    }
}

/// Drop every index entry that points at a delisted spot.
fn unmap_spot(ss: &SpotState, store: &Store) {
    let ids = ss
        .slots
        .iter()
        .map(|s| s.id)
        .chain(ss.bookings.iter().map(|b| b.id))
        .chain(ss.transactions.iter().map(|t| t.id))
        .chain(ss.reviews.iter().map(|r| r.id));
    for id in ids {
        store.unmap_entity(&id);
    }
}

// ── Engine ───────────────────────────────────────────────

/// The booking/availability coordinator: one write lock per spot covers the
/// ledger and the bookings together, and every change is logged before it is
/// applied.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) gateway_timeout: Duration,
    /// Serializes directory writes (users, listing, delisting) against compaction.
    pub(super) registry: Mutex<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Store::new();
        // Replay into owned states; they are shared only once complete.
        let mut spots: HashMap<Ulid, SpotState> = HashMap::new();
        for event in &events {
            match event {
                Event::UserRegistered { user } => store.insert_user(user.clone()),
                Event::SpotListed { spot } => {
                    spots.insert(spot.id, SpotState::new(spot.clone()));
                }
                Event::SpotDelisted { id } => {
                    if let Some(ss) = spots.remove(id) {
                        unmap_spot(&ss, &store);
                    }
                }
                other => {
                    if let Some(ss) = event_spot_id(other).and_then(|id| spots.get_mut(&id)) {
                        apply_to_spot(ss, other, &store);
                    }
                }
            }
        }
        for (id, ss) in spots {
            store.insert_spot(id, Arc::new(RwLock::new(ss)));
        }
        info!(
            "replayed {} events: {} users, {} spots",
            events.len(),
            store.users().len(),
            store.spot_count()
        );

        Ok(Self {
            store,
            wal_tx,
            notify,
            gateway,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            registry: Mutex::new(()),
        })
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Write event to WAL via the background group-commit writer.
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

    /// Log the event, then apply it to the locked spot. Nothing changes if the
    /// append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_spot(ss, event, &self.store);
        Ok(())
    }

    /// Like `persist_and_apply`, for events that introduce `id`. The id is
    /// claimed first so a concurrent create of the same id on another spot
    /// loses; the claim is dropped again if the append fails.
    pub(super) async fn persist_new(
        &self,
        ss: &mut SpotState,
        id: Ulid,
        event: &Event,
    ) -> Result<(), EngineError> {
        if !self.store.claim_entity(id, ss.id()) {
            return Err(EngineError::AlreadyExists(id));
        }
        let result = self.persist_and_apply(ss, event).await;
        if result.is_err() {
            self.store.unmap_entity(&id);
        }
        result
    }

    pub(super) fn spot_shard(&self, spot_id: &Ulid) -> Result<SharedSpotState, EngineError> {
        self.store.get_spot(spot_id).ok_or(EngineError::NotFound(*spot_id))
    }

    /// Lookup entity → spot, then take the spot's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let spot_id = self
            .store
            .spot_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let shard = self.spot_shard(&spot_id)?;
        Ok(shard.write_owned().await)
    }

    /// The caller's identity. Unknown callers are refused outright.
    pub(super) fn caller(&self, user_id: &Ulid) -> Result<User, EngineError> {
        self.store
            .user(user_id)
            .ok_or(EngineError::Forbidden("unknown user"))
    }

    pub(super) fn notify_user(&self, user_id: Ulid, kind: EntityKind, entity_id: Ulid, message: String) {
        self.notify
            .notify(user_id, kind, entity_id, message, conflict::now_ms());
    }

    /// Rewrite the WAL with just the events needed to rebuild current state.
    ///
    /// Holds the registry lock and a read lock on every spot until the new file
    /// is in place, so no append can land in the old file after the snapshot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;

        let mut events: Vec<Event> = self
            .store
            .users()
            .into_iter()
            .map(|user| Event::UserRegistered { user })
            .collect();

        let mut spot_ids = self.store.spot_ids();
        spot_ids.sort();
        let mut guards = Vec::with_capacity(spot_ids.len());
        for id in spot_ids {
            if let Some(shard) = self.store.get_spot(&id) {
                guards.push(shard.read_owned().await);
            }
        }

        for ss in &guards {
            let spot_id = ss.id();
            events.push(Event::SpotListed { spot: ss.spot.clone() });
            events.extend(ss.slots.iter().map(|slot| Event::SlotDeclared { slot: slot.clone() }));
            events.extend(ss.bookings.iter().map(|booking| Event::BookingCreated {
                booking: booking.clone(),
                carve: None,
            }));
            events.extend(ss.transactions.iter().map(|tx| Event::TransactionRecorded {
                spot_id,
                tx: tx.clone(),
            }));
            events.extend(ss.reviews.iter().map(|review| Event::ReviewPosted { review: review.clone() }));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

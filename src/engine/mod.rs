mod availability;
mod error;
pub mod guard;
mod mutations;
pub mod overlap;
mod queries;

pub use availability::{free_intervals, merge_overlapping};
pub use error::EngineError;
pub use guard::{reserve, Accepted, GuardError};
pub use mutations::{now_ms, BookingRequest};
pub use overlap::find_conflict;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

/// Owns the WAL. Appends that arrive while a flush is being prepared share
/// one fsync; every sender is answered with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
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
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
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
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// One tenant's hotels, rooms and bookings.
///
/// Each room's state sits behind its own lock. Every booking mutation holds
/// that write lock across check, WAL append and apply, so the conflict check
/// and the write are atomic per room.
pub struct Engine {
    hotels: DashMap<Ulid, HotelInfo>,
    rooms: DashMap<Ulid, SharedRoomState>,
    /// hotel id → room ids
    hotel_rooms: DashMap<Ulid, Vec<Ulid>>,
    /// (hotel id, room number) → room id
    room_numbers: DashMap<(Ulid, String), Ulid>,
    /// booking id → room id
    booking_to_room: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes hotel and room creation and hotel deletion, so existence
    /// checks and inserts on the catalog maps see each other.
    catalog_lock: Mutex<()>,
    /// Mutations hold it shared; compaction holds it exclusively so no event
    /// can land in the log between the snapshot and the file swap.
    commit_gate: RwLock<()>,
}

/// Apply a booking event to its room (caller holds the room lock).
fn apply_booking_event(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingPlaced {
            id,
            room_id,
            interval,
            status,
            guest,
        } => {
            rs.insert_booking(BookingRecord {
                id: *id,
                room_id: *room_id,
                interval: *interval,
                status: *status,
                guest: guest.clone(),
            });
            index.insert(*id, *room_id);
        }
        Event::BookingConfirmed { id, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
            }
        }
        Event::BookingCancelled { id, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
            }
        }
        Event::RoomUpdated {
            number,
            capacity,
            price_per_night,
            ..
        } => {
            rs.number = number.clone();
            rs.capacity = *capacity;
            rs.price_per_night = *price_per_night;
        }
        // Catalog-level events are handled on the maps, not the room.
        Event::HotelCreated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => {}
    }
}

/// Room targeted by a room-scoped event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingPlaced { room_id, .. }
        | Event::BookingConfirmed { room_id, .. }
        | Event::BookingCancelled { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::HotelCreated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => None,
    }
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task. Must run inside
    /// a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            hotels: DashMap::new(),
            rooms: DashMap::new(),
            hotel_rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            booking_to_room: DashMap::new(),
            wal_tx,
            catalog_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!("replayed {} events from {}", events.len(), wal_path.display());
        Ok(engine)
    }

    // Nobody else holds these Arcs during replay, so try_read/try_write never
    // fail. blocking_* would panic inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::HotelCreated {
                id,
                name,
                city,
                country,
                rating,
            } => {
                self.hotels.insert(
                    *id,
                    HotelInfo {
                        id: *id,
                        name: name.clone(),
                        city: city.clone(),
                        country: country.clone(),
                        rating: *rating,
                    },
                );
            }
            Event::HotelDeleted { id } => {
                self.hotels.remove(id);
                self.hotel_rooms.remove(id);
            }
            Event::RoomCreated {
                id,
                hotel_id,
                number,
                capacity,
                price_per_night,
            } => self.register_room(RoomState::new(
                *id,
                *hotel_id,
                number.clone(),
                *capacity,
                *price_per_night,
            )),
            Event::RoomDeleted { id } => {
                if let Some(rs) = self.get_room_state(id)
                    && let Ok(guard) = rs.try_read()
                {
                    self.forget_room(&guard);
                }
            }
            other => {
                let Some(room_id) = event_room_id(other) else { return };
                let Some(rs) = self.get_room_state(&room_id) else { return };
                if let Ok(mut guard) = rs.try_write() {
                    if let Event::RoomUpdated { number, .. } = other {
                        self.room_numbers.remove(&(guard.hotel_id, guard.number.clone()));
                        self.room_numbers.insert((guard.hotel_id, number.clone()), room_id);
                    }
                    apply_booking_event(&mut guard, other, &self.booking_to_room);
                }
            }
        }
    }

    fn register_room(&self, rs: RoomState) {
        let (id, hotel_id) = (rs.id, rs.hotel_id);
        self.room_numbers.insert((hotel_id, rs.number.clone()), id);
        self.hotel_rooms.entry(hotel_id).or_default().push(id);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
    }

    /// Drop a room and every index entry pointing at it.
    fn forget_room(&self, rs: &RoomState) {
        for b in &rs.bookings {
            self.booking_to_room.remove(&b.id);
        }
        self.room_numbers.remove(&(rs.hotel_id, rs.number.clone()));
        if let Some(mut ids) = self.hotel_rooms.get_mut(&rs.hotel_id) {
            ids.retain(|r| *r != rs.id);
        }
        self.rooms.remove(&rs.id);
    }

    /// Append through the group-commit writer and wait for fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    /// WAL append, then apply to the locked room.
    async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_booking_event(rs, event, &self.booking_to_room);
        Ok(())
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Write-lock a room. A room deleted while we waited for the lock is
    /// `NotFound`, since its state is no longer reachable from the maps.
    async fn lock_room(&self, id: &Ulid) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self.get_room_state(id).ok_or(EngineError::NotFound(*id))?;
        let guard = rs.clone().write_owned().await;
        let live = self.rooms.get(id).is_some_and(|e| Arc::ptr_eq(e.value(), &rs));
        if !live {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Booking id → room id → room write lock.
    async fn lock_booking_room(&self, booking_id: &Ulid) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        self.lock_room(&room_id)
            .await
            .map_err(|_| EngineError::NotFound(*booking_id))
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::guard::{check_interval, reserve};
use super::{apply_booking_event, Engine, EngineError, WalCommand};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Build the stay and check it against engine limits. Range errors come
/// first so a reversed stay is always reported as such.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Interval, EngineError> {
    let interval = Interval::new(check_in, check_out)?;
    if check_in < min_valid_date() || check_out > max_valid_date() {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if interval.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(interval)
}

fn validate_name(name: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidValue(what));
    }
    if name.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_optional(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// One entry of a batch booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest: Option<String>,
    /// Pending until this instant; `None` books as confirmed.
    pub hold_until: Option<Ms>,
}

fn initial_status(hold_until: Option<Ms>, now: Ms) -> Result<BookingStatus, EngineError> {
    match hold_until {
        Some(t) if t <= now => Err(EngineError::InvalidValue("hold_until already passed")),
        Some(t) => Ok(BookingStatus::Pending { expires_at: t }),
        None => Ok(BookingStatus::Confirmed),
    }
}

impl Engine {
    // ── Hotels ───────────────────────────────────────────────

    pub async fn create_hotel(
        &self,
        id: Ulid,
        name: String,
        city: Option<String>,
        country: Option<String>,
        rating: u8,
    ) -> Result<(), EngineError> {
        validate_name(&name, MAX_NAME_LEN, "hotel name")?;
        validate_optional(&city, MAX_NAME_LEN, "city")?;
        validate_optional(&country, MAX_NAME_LEN, "country")?;
        if rating > MAX_RATING {
            return Err(EngineError::InvalidValue("rating must be between 0 and 5"));
        }
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.hotels.len() >= MAX_HOTELS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }
        if self.hotels.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::HotelCreated {
            id,
            name: name.clone(),
            city: city.clone(),
            country: country.clone(),
            rating,
        };
        self.wal_append(&event).await?;
        self.hotels.insert(
            id,
            HotelInfo {
                id,
                name,
                city,
                country,
                rating,
            },
        );
        Ok(())
    }

    pub async fn delete_hotel(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if !self.hotels.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.hotel_rooms.get(&id).is_some_and(|ids| !ids.is_empty()) {
            return Err(EngineError::HasRooms(id));
        }
        self.wal_append(&Event::HotelDeleted { id }).await?;
        self.hotels.remove(&id);
        self.hotel_rooms.remove(&id);
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────

    /// Claim `(hotel_id, number)` for `room_id`. Released again if the
    /// caller fails before committing.
    fn claim_room_number(&self, hotel_id: Ulid, number: &str, room_id: Ulid) -> Result<(), EngineError> {
        match self.room_numbers.entry((hotel_id, number.to_string())) {
            Entry::Occupied(e) if *e.get() != room_id => Err(EngineError::DuplicateRoomNumber {
                hotel_id,
                number: number.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(e) => {
                e.insert(room_id);
                Ok(())
            }
        }
    }

    fn release_room_number(&self, hotel_id: Ulid, number: &str, room_id: Ulid) {
        self.room_numbers
            .remove_if(&(hotel_id, number.to_string()), |_, owner| *owner == room_id);
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    ) -> Result<(), EngineError> {
        validate_name(&number, MAX_ROOM_NUMBER_LEN, "room number")?;
        if capacity == 0 {
            return Err(EngineError::InvalidValue("capacity must be at least 1"));
        }
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if !self.hotels.contains_key(&hotel_id) {
            return Err(EngineError::NotFound(hotel_id));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.claim_room_number(hotel_id, &number, id)?;

        let event = Event::RoomCreated {
            id,
            hotel_id,
            number: number.clone(),
            capacity,
            price_per_night,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.release_room_number(hotel_id, &number, id);
            return Err(e);
        }
        self.hotel_rooms.entry(hotel_id).or_default().push(id);
        self.rooms.insert(
            id,
            Arc::new(RwLock::new(RoomState::new(id, hotel_id, number, capacity, price_per_night))),
        );
        Ok(())
    }

    pub async fn update_room(
        &self,
        id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    ) -> Result<(), EngineError> {
        validate_name(&number, MAX_ROOM_NUMBER_LEN, "room number")?;
        if capacity == 0 {
            return Err(EngineError::InvalidValue("capacity must be at least 1"));
        }
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_room(&id).await?;
        let (hotel_id, old_number) = (guard.hotel_id, guard.number.clone());
        self.claim_room_number(hotel_id, &number, id)?;

        let event = Event::RoomUpdated {
            id,
            number: number.clone(),
            capacity,
            price_per_night,
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            if number != old_number {
                self.release_room_number(hotel_id, &number, id);
            }
            return Err(e);
        }
        if number != old_number {
            self.release_room_number(hotel_id, &old_number, id);
        }
        Ok(())
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let guard = self.lock_room(&id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings(id));
        }
        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.forget_room(&guard);
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Book `[check_in, check_out)` on a room. The conflict check and the
    /// write happen under the room's write lock.
    pub async fn place_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guest: Option<String>,
        hold_until: Option<Ms>,
    ) -> Result<(), EngineError> {
        let interval = validate_stay(check_in, check_out)?;
        validate_optional(&guest, MAX_GUEST_LEN, "guest too long")?;
        let status = initial_status(hold_until, now_ms())?;

        let _gate = self.commit_gate.read().await;
        self.claim_booking_id(id, room_id)?;
        let placed = self.place_claimed(id, room_id, interval, status, guest).await;
        if placed.is_err() {
            self.booking_to_room.remove(&id);
        }
        placed
    }

    /// Claim a booking id before its room is locked. Released again if the
    /// booking is not committed.
    fn claim_booking_id(&self, id: Ulid, room_id: Ulid) -> Result<(), EngineError> {
        match self.booking_to_room.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(e) => {
                e.insert(room_id);
                Ok(())
            }
        }
    }

    async fn place_claimed(
        &self,
        id: Ulid,
        room_id: Ulid,
        interval: Interval,
        status: BookingStatus,
        guest: Option<String>,
    ) -> Result<(), EngineError> {
        let mut guard = self.lock_room(&room_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let existing = guard.overlapping(&interval);
        let accepted = reserve(room_id, interval.check_in(), interval.check_out(), existing)
            .inspect_err(|_| metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1))?;

        let event = Event::BookingPlaced {
            id,
            room_id,
            interval: accepted.interval,
            status,
            guest,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// All-or-nothing booking of several stays, possibly across rooms. Stays
    /// in the same batch must not overlap each other either.
    pub async fn batch_place_bookings(&self, requests: Vec<BookingRequest>) -> Result<(), EngineError> {
        if requests.is_empty() {
            return Ok(());
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let now = now_ms();
        let mut prepared = Vec::with_capacity(requests.len());
        for req in requests {
            let interval = validate_stay(req.check_in, req.check_out)?;
            validate_optional(&req.guest, MAX_GUEST_LEN, "guest too long")?;
            let status = initial_status(req.hold_until, now)?;
            prepared.push(BookingRecord {
                id: req.id,
                room_id: req.room_id,
                interval,
                status,
                guest: req.guest,
            });
        }

        let _gate = self.commit_gate.read().await;
        let mut claimed = Vec::with_capacity(prepared.len());
        for b in &prepared {
            if let Err(e) = self.claim_booking_id(b.id, b.room_id) {
                self.release_booking_ids(&claimed);
                return Err(e);
            }
            claimed.push(b.id);
        }

        let mut committed = 0;
        let result = self.batch_place_claimed(prepared, &mut committed).await;
        if result.is_err() {
            self.release_booking_ids(&claimed[committed..]);
        }
        result
    }

    fn release_booking_ids(&self, ids: &[Ulid]) {
        for id in ids {
            self.booking_to_room.remove(id);
        }
    }

    /// Lock, check and commit a batch whose ids are already claimed.
    /// `committed` counts the bookings written so far, in order.
    async fn batch_place_claimed(
        &self,
        prepared: Vec<BookingRecord>,
        committed: &mut usize,
    ) -> Result<(), EngineError> {
        // Lock rooms in id order so concurrent batches cannot deadlock.
        let mut room_ids: Vec<Ulid> = prepared.iter().map(|b| b.room_id).collect();
        room_ids.sort();
        room_ids.dedup();
        let mut guards = HashMap::with_capacity(room_ids.len());
        for rid in &room_ids {
            let guard = self.lock_room(rid).await?;
            let incoming = prepared.iter().filter(|b| b.room_id == *rid).count();
            if guard.bookings.len() + incoming > MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            guards.insert(*rid, guard);
        }

        // Phase 1: check every stay against stored bookings and earlier
        // entries of this batch.
        for (i, b) in prepared.iter().enumerate() {
            let guard = &guards[&b.room_id];
            let earlier = prepared[..i].iter();
            check_interval(b.room_id, &b.interval, guard.overlapping(&b.interval).chain(earlier))
                .inspect_err(|_| metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1))?;
        }

        // Phase 2: commit.
        for b in prepared {
            let event = Event::BookingPlaced {
                id: b.id,
                room_id: b.room_id,
                interval: b.interval,
                status: b.status,
                guest: b.guest,
            };
            self.wal_append(&event).await?;
            if let Some(guard) = guards.get_mut(&b.room_id) {
                apply_booking_event(guard, &event, &self.booking_to_room);
            }
            *committed += 1;
        }
        Ok(())
    }

    /// Payment captured: a pending booking becomes confirmed.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_booking_room(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Pending { expires_at } if expires_at <= now_ms() => {
                return Err(EngineError::InvalidState { id, status: "expired" });
            }
            BookingStatus::Pending { .. } => {}
            other => return Err(EngineError::InvalidState { id, status: other.label() }),
        }
        let room_id = guard.id;
        self.persist_and_apply(&mut guard, &Event::BookingConfirmed { id, room_id })
            .await?;
        Ok(room_id)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_booking_room(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.is_active() {
            return Err(EngineError::InvalidState { id, status: booking.status.label() });
        }
        let room_id = guard.id;
        self.persist_and_apply(&mut guard, &Event::BookingCancelled { id, room_id })
            .await?;
        Ok(room_id)
    }

    /// Pending bookings whose hold ran out, as `(booking_id, room_id)`.
    /// Rooms locked by a writer are skipped until the next sweep.
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.rooms.iter() {
            if let Ok(guard) = entry.value().try_read() {
                for b in &guard.bookings {
                    if let BookingStatus::Pending { expires_at } = b.status
                        && expires_at <= now
                    {
                        expired.push((b.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Cancel a pending booking if it is still pending and expired at `now`.
    /// Returns whether it was cancelled.
    pub async fn expire_booking(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_booking_room(&id).await?;
        let still_expired = matches!(
            guard.booking(id).map(|b| b.status),
            Some(BookingStatus::Pending { expires_at }) if expires_at <= now
        );
        if !still_expired {
            return Ok(false);
        }
        let room_id = guard.id;
        self.persist_and_apply(&mut guard, &Event::BookingCancelled { id, room_id })
            .await?;
        metrics::counter!(crate::observability::BOOKINGS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut hotels: Vec<HotelInfo> = self.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.id);
        let mut events: Vec<Event> = hotels
            .into_iter()
            .map(|h| Event::HotelCreated {
                id: h.id,
                name: h.name,
                city: h.city,
                country: h.country,
                rating: h.rating,
            })
            .collect();

        let mut rooms: Vec<_> = self.rooms.iter().map(|e| (*e.key(), e.value().clone())).collect();
        rooms.sort_by_key(|(id, _)| *id);
        for (_, rs) in rooms {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                hotel_id: guard.hotel_id,
                number: guard.number.clone(),
                capacity: guard.capacity,
                price_per_night: guard.price_per_night,
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingPlaced {
                id: b.id,
                room_id: b.room_id,
                interval: b.interval,
                status: b.status,
                guest: b.guest.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
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

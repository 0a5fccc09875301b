use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_intervals;
use super::{Engine, EngineError};

impl Engine {
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn get_hotel(&self, id: &Ulid) -> Option<HotelInfo> {
        self.hotels.get(id).map(|e| e.value().clone())
    }

    /// Hotels in creation order (ULIDs sort by time).
    pub fn list_hotels(&self, page: Page) -> Vec<HotelInfo> {
        let mut all: Vec<HotelInfo> = self.hotels.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|h| h.id);
        page.slice(&all).to_vec()
    }

    pub async fn get_room(&self, id: &Ulid) -> Option<RoomInfo> {
        let rs = self.get_room_state(id)?;
        let guard = rs.read().await;
        Some(guard.info())
    }

    /// Rooms of one hotel, or of all hotels, in creation order.
    pub async fn list_rooms(&self, hotel_id: Option<Ulid>, page: Page) -> Result<Vec<RoomInfo>, EngineError> {
        let mut ids: Vec<Ulid> = match hotel_id {
            Some(hid) => {
                if !self.hotels.contains_key(&hid) {
                    return Err(EngineError::NotFound(hid));
                }
                self.hotel_rooms.get(&hid).map(|e| e.value().clone()).unwrap_or_default()
            }
            None => self.rooms.iter().map(|e| *e.key()).collect(),
        };
        ids.sort();

        let mut rooms = Vec::with_capacity(page.size);
        for id in page.slice(&ids) {
            if let Some(info) = self.get_room(id).await {
                rooms.push(info);
            }
        }
        Ok(rooms)
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<BookingRecord> {
        let room_id = self.room_for_booking(id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.booking(*id).cloned()
    }

    /// Non-cancelled bookings of a room, by check-in date.
    pub async fn list_active_bookings(&self, room_id: Ulid) -> Result<Vec<BookingRecord>, EngineError> {
        let rs = self.get_room_state(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.active_bookings().cloned().collect())
    }

    /// Bookings of one room or of every room, by check-in date then id.
    pub async fn list_bookings(
        &self,
        room_id: Option<Ulid>,
        active_only: bool,
        page: Page,
    ) -> Result<Vec<BookingRecord>, EngineError> {
        let room_ids: Vec<Ulid> = match room_id {
            Some(rid) => {
                if !self.rooms.contains_key(&rid) {
                    return Err(EngineError::NotFound(rid));
                }
                vec![rid]
            }
            None => self.rooms.iter().map(|e| *e.key()).collect(),
        };

        let mut all = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room_state(&rid) else { continue };
            let guard = rs.read().await;
            all.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| !active_only || b.is_active())
                    .cloned(),
            );
        }
        all.sort_by_key(|b| (b.interval.check_in(), b.id));
        Ok(page.slice(&all).to_vec())
    }

    /// Free stays of a room inside `[from, to)`.
    pub async fn availability(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Interval>, EngineError> {
        let window = Interval::new(from, to)?;
        if window.nights() > MAX_AVAILABILITY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("availability window too wide"));
        }
        let rs = self.get_room_state(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(free_intervals(&guard, &window))
    }
}

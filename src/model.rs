use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Unix milliseconds. Used for pending-booking expiry only; stays are dates.
pub type Ms = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stay: check-out {check_out} must be after check-in {check_in}")]
pub struct InvalidRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

/// Half-open stay `[check_in, check_out)`. The guest occupies the room for the
/// nights starting on `check_in` up to, but not including, `check_out`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub struct Interval {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct RawInterval {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl TryFrom<RawInterval> for Interval {
    type Error = InvalidRange;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Interval::new(raw.check_in, raw.check_out)
    }
}

impl From<Interval> for RawInterval {
    fn from(i: Interval) -> Self {
        Self {
            check_in: i.check_in,
            check_out: i.check_out,
        }
    }
}

impl Interval {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Result<Self, InvalidRange> {
        if check_out <= check_in {
            return Err(InvalidRange { check_in, check_out });
        }
        Ok(Self { check_in, check_out })
    }

    /// Caller guarantees `check_in < check_out`.
    pub(crate) fn from_ordered(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Interval check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Back-to-back stays (one ends the day the other starts) do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.check_in <= d && d < self.check_out
    }

    /// Overlapping part of two stays, if any.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let check_in = self.check_in.max(other.check_in);
        let check_out = self.check_out.min(other.check_out);
        (check_in < check_out).then(|| Interval::from_ordered(check_in, check_out))
    }
}

impl AsRef<Interval> for Interval {
    fn as_ref(&self) -> &Interval {
        self
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Lifecycle of a booking. Dates never change; a new stay is cancel + recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Awaiting payment. Blocks the room until paid or expired.
    Pending { expires_at: Ms },
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending { .. } => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub room_id: Ulid,
    pub interval: Interval,
    pub status: BookingStatus,
    pub guest: Option<String>,
}

impl BookingRecord {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl AsRef<Interval> for BookingRecord {
    fn as_ref(&self) -> &Interval {
        &self.interval
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelInfo {
    pub id: Ulid,
    pub name: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub number: String,
    pub capacity: u32,
    pub price_per_night: u64,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub hotel_id: Ulid,
    pub number: String,
    /// Max guests per stay.
    pub capacity: u32,
    /// Minor currency units.
    pub price_per_night: u64,
    /// Every booking ever placed on the room, sorted by `interval.check_in`.
    pub bookings: Vec<BookingRecord>,
}

impl RoomState {
    pub fn new(id: Ulid, hotel_id: Ulid, number: String, capacity: u32, price_per_night: u64) -> Self {
        Self {
            id,
            hotel_id,
            number,
            capacity,
            price_per_night,
            bookings: Vec::new(),
        }
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            hotel_id: self.hotel_id,
            number: self.number.clone(),
            capacity: self.capacity,
            price_per_night: self.price_per_night,
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: BookingRecord) {
        let check_in = booking.interval.check_in();
        let pos = self
            .bookings
            .partition_point(|b| b.interval.check_in() <= check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.check_out()`.
    pub fn overlapping(&self, query: &Interval) -> impl Iterator<Item = &BookingRecord> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.interval.check_in() < query.check_out());
        let query_start = query.check_in();
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.interval.check_out() > query_start)
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &BookingRecord> {
        self.bookings.iter().filter(|b| b.is_active())
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.is_active())
    }
}

/// WAL record format. Flat; every mutation is exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        id: Ulid,
        name: String,
        city: Option<String>,
        country: Option<String>,
        rating: u8,
    },
    HotelDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    },
    RoomUpdated {
        id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingPlaced {
        id: Ulid,
        room_id: Ulid,
        interval: Interval,
        status: BookingStatus,
        guest: Option<String>,
    },
    BookingConfirmed {
        id: Ulid,
        room_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
}

/// Page request. Out-of-range values fall back to sane defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    pub fn new(number: i64, size: i64) -> Self {
        let number = if number < 1 { 1 } else { number as usize };
        let size = if size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            (size as usize).min(MAX_PAGE_SIZE)
        };
        Self { number, size }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = self.offset().min(items.len());
        let end = start.saturating_add(self.size).min(items.len());
        &items[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, n).unwrap()
    }

    fn stay(a: u32, b: u32) -> Interval {
        Interval::new(day(a), day(b)).unwrap()
    }

    fn booking(a: u32, b: u32, status: BookingStatus) -> BookingRecord {
        BookingRecord {
            id: Ulid::new(),
            room_id: Ulid::nil(),
            interval: stay(a, b),
            status,
            guest: None,
        }
    }

    #[test]
    fn interval_rejects_empty_and_reversed() {
        assert_eq!(
            Interval::new(day(5), day(5)),
            Err(InvalidRange { check_in: day(5), check_out: day(5) })
        );
        assert!(Interval::new(day(7), day(3)).is_err());
    }

    #[test]
    fn interval_basics() {
        let s = stay(5, 8);
        assert_eq!(s.nights(), 3);
        assert!(s.contains_date(day(5)));
        assert!(s.contains_date(day(7)));
        assert!(!s.contains_date(day(8))); // check-out day is free
        assert_eq!(s.to_string(), "[2030-03-05, 2030-03-08)");
    }

    #[test]
    fn back_to_back_does_not_overlap() {
        let a = stay(5, 7);
        let b = stay(7, 9);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn overlap_is_symmetric_and_reflexive() {
        let stays: Vec<Interval> = [(1, 3), (2, 5), (3, 4), (5, 9), (1, 10), (9, 10)]
            .into_iter()
            .map(|(a, b)| stay(a, b))
            .collect();
        for a in &stays {
            assert!(a.overlaps(a));
            for b in &stays {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn one_night_overlap_counts() {
        assert!(stay(1, 6).overlaps(&stay(5, 9)));
    }

    #[test]
    fn intersect_clamps() {
        assert_eq!(stay(1, 6).intersect(&stay(4, 9)), Some(stay(4, 6)));
        assert_eq!(stay(1, 4).intersect(&stay(4, 9)), None);
    }

    #[test]
    fn deserialize_rejects_reversed_interval() {
        let raw = RawInterval { check_in: day(9), check_out: day(2) };
        let bytes = bincode::serialize(&raw).unwrap();
        assert!(bincode::deserialize::<Interval>(&bytes).is_err());

        let ok = bincode::serialize(&stay(2, 9)).unwrap();
        assert_eq!(bincode::deserialize::<Interval>(&ok).unwrap(), stay(2, 9));
    }

    #[test]
    fn status_activity() {
        assert!(BookingStatus::Confirmed.is_active());
        assert!(BookingStatus::Pending { expires_at: 0 }.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
        assert_eq!(BookingStatus::Pending { expires_at: 1 }.label(), "pending");
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), 2, 500);
        rs.insert_booking(booking(20, 22, BookingStatus::Confirmed));
        rs.insert_booking(booking(1, 3, BookingStatus::Confirmed));
        rs.insert_booking(booking(10, 12, BookingStatus::Cancelled));
        let starts: Vec<u32> = rs
            .bookings
            .iter()
            .map(|b| chrono::Datelike::day(&b.interval.check_in()))
            .collect();
        assert_eq!(starts, vec![1, 10, 20]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), 2, 500);
        rs.insert_booking(booking(1, 3, BookingStatus::Confirmed));
        rs.insert_booking(booking(4, 8, BookingStatus::Confirmed));
        rs.insert_booking(booking(20, 22, BookingStatus::Confirmed));
        let hits: Vec<_> = rs.overlapping(&stay(5, 10)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].interval, stay(4, 8));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), 2, 500);
        rs.insert_booking(booking(1, 5, BookingStatus::Confirmed));
        rs.insert_booking(booking(9, 12, BookingStatus::Confirmed));
        assert_eq!(rs.overlapping(&stay(5, 9)).count(), 0);
    }

    #[test]
    fn overlapping_long_stay_spanning_query() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), 2, 500);
        rs.insert_booking(booking(1, 28, BookingStatus::Confirmed));
        assert_eq!(rs.overlapping(&stay(10, 11)).count(), 1);
    }

    #[test]
    fn active_bookings_exclude_cancelled() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), 2, 500);
        rs.insert_booking(booking(1, 3, BookingStatus::Cancelled));
        assert!(!rs.has_active_bookings());
        rs.insert_booking(booking(4, 6, BookingStatus::Pending { expires_at: 10 }));
        assert!(rs.has_active_bookings());
        assert_eq!(rs.active_bookings().count(), 1);
    }

    #[test]
    fn page_normalizes_input() {
        assert_eq!(Page::new(0, 0), Page { number: 1, size: DEFAULT_PAGE_SIZE });
        assert_eq!(Page::new(-3, 5), Page { number: 1, size: 5 });
        assert_eq!(Page::new(2, 10_000).size, MAX_PAGE_SIZE);
    }

    #[test]
    fn page_slices() {
        let items: Vec<u32> = (0..25).collect();
        assert_eq!(Page::new(1, 10).slice(&items), &items[0..10]);
        assert_eq!(Page::new(3, 10).slice(&items), &items[20..25]);
        assert!(Page::new(4, 10).slice(&items).is_empty());
    }
}

//! Booking-conflict decision. Pure: the caller supplies the room's existing
//! bookings and persists the result itself.
//!
//! The engine calls [`reserve`] while holding the room's write lock, which is
//! what makes check-then-write atomic. Called without that lock, two
//! overlapping requests can both be accepted.

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingRecord, Interval, InvalidRange};

use super::overlap::find_conflict;

/// A stay that passed the conflict check and may now be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub room_id: Ulid,
    pub interval: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("room already booked: conflicts with booking {booking_id}")]
    Conflict { booking_id: Ulid },
}

/// Decide whether `[check_in, check_out)` can be booked on `room_id`.
///
/// Cancelled bookings and bookings of other rooms in `existing` are ignored.
/// A malformed range is rejected before `existing` is looked at.
pub fn reserve<'a, I>(
    room_id: Ulid,
    check_in: NaiveDate,
    check_out: NaiveDate,
    existing: I,
) -> Result<Accepted, GuardError>
where
    I: IntoIterator<Item = &'a BookingRecord>,
{
    let interval = Interval::new(check_in, check_out)?;
    check_interval(room_id, &interval, existing)?;
    Ok(Accepted { room_id, interval })
}

/// Same decision for an already validated interval.
pub fn check_interval<'a, I>(
    room_id: Ulid,
    interval: &Interval,
    existing: I,
) -> Result<(), GuardError>
where
    I: IntoIterator<Item = &'a BookingRecord>,
{
    let active = existing
        .into_iter()
        .filter(|b| b.room_id == room_id && b.is_active());
    match find_conflict(interval, active) {
        Some(hit) => Err(GuardError::Conflict { booking_id: hit.id }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2032, 1, n).unwrap()
    }

    fn booked(room_id: Ulid, a: u32, b: u32, status: BookingStatus) -> BookingRecord {
        BookingRecord {
            id: Ulid::new(),
            room_id,
            interval: Interval::new(day(a), day(b)).unwrap(),
            status,
            guest: None,
        }
    }

    #[test]
    fn same_dates_conflict() {
        let room = Ulid::new();
        let existing = vec![booked(room, 5, 7, BookingStatus::Confirmed)];
        let result = reserve(room, day(5), day(7), &existing);
        assert_eq!(
            result,
            Err(GuardError::Conflict { booking_id: existing[0].id })
        );
    }

    #[test]
    fn back_to_back_is_accepted() {
        let room = Ulid::new();
        let existing = vec![booked(room, 5, 7, BookingStatus::Confirmed)];
        let accepted = reserve(room, day(7), day(9), &existing).unwrap();
        assert_eq!(accepted.room_id, room);
        assert_eq!(accepted.interval, Interval::new(day(7), day(9)).unwrap());
    }

    #[test]
    fn reversed_range_is_invalid_regardless_of_existing() {
        let room = Ulid::new();
        let existing = vec![booked(room, 1, 3, BookingStatus::Confirmed)];
        assert!(matches!(
            reserve(room, day(3), day(1), &existing),
            Err(GuardError::InvalidRange(_))
        ));
        assert!(matches!(
            reserve(room, day(3), day(1), &[]),
            Err(GuardError::InvalidRange(_))
        ));
    }

    #[test]
    fn zero_night_stay_is_invalid() {
        assert!(matches!(
            reserve(Ulid::new(), day(4), day(4), &[]),
            Err(GuardError::InvalidRange(_))
        ));
    }

    #[test]
    fn cancelled_booking_does_not_block() {
        let room = Ulid::new();
        let existing = vec![booked(room, 5, 7, BookingStatus::Cancelled)];
        assert!(reserve(room, day(5), day(7), &existing).is_ok());
    }

    #[test]
    fn pending_booking_blocks() {
        let room = Ulid::new();
        let existing = vec![booked(room, 5, 7, BookingStatus::Pending { expires_at: 0 })];
        assert!(matches!(
            reserve(room, day(6), day(8), &existing),
            Err(GuardError::Conflict { .. })
        ));
    }

    #[test]
    fn other_rooms_are_ignored() {
        let room = Ulid::new();
        let existing = vec![booked(Ulid::new(), 5, 7, BookingStatus::Confirmed)];
        assert!(reserve(room, day(5), day(7), &existing).is_ok());
    }

    #[test]
    fn reports_the_active_conflict_not_the_cancelled_one() {
        let room = Ulid::new();
        let cancelled = booked(room, 4, 8, BookingStatus::Cancelled);
        let live = booked(room, 6, 9, BookingStatus::Confirmed);
        let existing = vec![cancelled, live.clone()];
        assert_eq!(
            reserve(room, day(5), day(7), &existing),
            Err(GuardError::Conflict { booking_id: live.id })
        );
    }
}

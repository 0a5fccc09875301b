use crate::model::*;

/// Free stays inside `window` once every active booking of the room is
/// removed. Result is sorted and disjoint; adjacent free nights are merged.
pub fn free_intervals(room: &RoomState, window: &Interval) -> Vec<Interval> {
    let mut taken: Vec<Interval> = room
        .overlapping(window)
        .filter(|b| b.is_active())
        .filter_map(|b| b.interval.intersect(window))
        .collect();
    taken.sort_by_key(|i| i.check_in());
    let taken = merge_overlapping(&taken);
    subtract_intervals(window, &taken)
}

/// Merge sorted overlapping or touching stays into disjoint ones.
pub fn merge_overlapping(sorted: &[Interval]) -> Vec<Interval> {
    let mut merged: Vec<Interval> = Vec::new();
    for &stay in sorted {
        if let Some(last) = merged.last_mut()
            && stay.check_in() <= last.check_out()
        {
            let check_out = last.check_out().max(stay.check_out());
            *last = Interval::from_ordered(last.check_in(), check_out);
            continue;
        }
        merged.push(stay);
    }
    merged
}

/// `base` minus sorted, disjoint `holes`.
fn subtract_intervals(base: &Interval, holes: &[Interval]) -> Vec<Interval> {
    let mut free = Vec::new();
    let mut cursor = base.check_in();
    for hole in holes {
        if hole.check_out() <= cursor {
            continue;
        }
        if hole.check_in() >= base.check_out() {
            break;
        }
        if hole.check_in() > cursor {
            free.push(Interval::from_ordered(cursor, hole.check_in()));
        }
        cursor = cursor.max(hole.check_out());
    }
    if cursor < base.check_out() {
        free.push(Interval::from_ordered(cursor, base.check_out()));
    }
    free
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;

    fn stay(a: u32, b: u32) -> Interval {
        Interval::new(
            NaiveDate::from_ymd_opt(2030, 8, a).unwrap(),
            NaiveDate::from_ymd_opt(2030, 8, b).unwrap(),
        )
        .unwrap()
    }

    fn room_with(bookings: &[(u32, u32, BookingStatus)]) -> RoomState {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "12".into(), 2, 900);
        for &(a, b, status) in bookings {
            rs.insert_booking(BookingRecord {
                id: Ulid::new(),
                room_id: rs.id,
                interval: stay(a, b),
                status,
                guest: None,
            });
        }
        rs
    }

    #[test]
    fn empty_room_is_fully_free() {
        let rs = room_with(&[]);
        assert_eq!(free_intervals(&rs, &stay(1, 10)), vec![stay(1, 10)]);
    }

    #[test]
    fn booking_in_the_middle_splits_window() {
        let rs = room_with(&[(4, 6, BookingStatus::Confirmed)]);
        assert_eq!(free_intervals(&rs, &stay(1, 10)), vec![stay(1, 4), stay(6, 10)]);
    }

    #[test]
    fn bookings_past_the_edges_are_clamped() {
        let rs = room_with(&[
            (1, 5, BookingStatus::Confirmed),
            (8, 20, BookingStatus::Pending { expires_at: 1 }),
        ]);
        assert_eq!(free_intervals(&rs, &stay(3, 12)), vec![stay(5, 8)]);
    }

    #[test]
    fn back_to_back_bookings_leave_no_gap() {
        let rs = room_with(&[
            (2, 4, BookingStatus::Confirmed),
            (4, 7, BookingStatus::Confirmed),
        ]);
        assert_eq!(free_intervals(&rs, &stay(1, 9)), vec![stay(1, 2), stay(7, 9)]);
    }

    #[test]
    fn cancelled_bookings_free_their_nights() {
        let rs = room_with(&[(4, 6, BookingStatus::Cancelled)]);
        assert_eq!(free_intervals(&rs, &stay(1, 10)), vec![stay(1, 10)]);
    }

    #[test]
    fn fully_booked_window_has_nothing_free() {
        let rs = room_with(&[(1, 15, BookingStatus::Confirmed)]);
        assert!(free_intervals(&rs, &stay(3, 9)).is_empty());
    }

    #[test]
    fn merge_joins_touching_and_overlapping() {
        let merged = merge_overlapping(&[stay(1, 3), stay(3, 5), stay(4, 8), stay(10, 12)]);
        assert_eq!(merged, vec![stay(1, 8), stay(10, 12)]);
    }
}

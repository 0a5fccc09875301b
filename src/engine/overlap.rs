use crate::model::Interval;

/// Return an element of `existing` whose stay overlaps `candidate`, if any.
///
/// The scan is lazy and stops at the first hit. `existing` needs no
/// particular order, so the hit is *some* conflicting element, not
/// necessarily the earliest one. Sort `existing` first when a specific
/// tie-break matters.
pub fn find_conflict<'a, T, I>(candidate: &Interval, existing: I) -> Option<&'a T>
where
    T: AsRef<Interval> + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    existing
        .into_iter()
        .find(|e| e.as_ref().overlaps(candidate))
}

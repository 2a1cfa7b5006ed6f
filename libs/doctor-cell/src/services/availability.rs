use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;

use crate::models::{
    AvailabilityError, AvailableSlot, DateRange, Practitioner, TimeInterval, WeeklyWindow,
};

/// Open time for one practitioner over a range of local dates.
///
/// Nothing is computed until `slots()` is iterated, and each call to
/// `slots()` starts over from the first day, so the same window can be
/// walked any number of times.
pub struct AvailabilityWindow<'a> {
    template: &'a [WeeklyWindow],
    offset: FixedOffset,
    range: DateRange,
    commitments: Vec<TimeInterval>,
    granularity_minutes: u32,
}

impl<'a> AvailabilityWindow<'a> {
    pub fn new(
        template: &'a [WeeklyWindow],
        offset: FixedOffset,
        range: DateRange,
        commitments: &[TimeInterval],
        granularity_minutes: u32,
    ) -> Self {
        Self {
            template,
            offset,
            range,
            commitments: normalize_intervals(commitments.to_vec()),
            granularity_minutes,
        }
    }

    /// Build a window straight from a practitioner record.
    pub fn for_practitioner(
        practitioner: &'a Practitioner,
        range: DateRange,
        commitments: &[TimeInterval],
        granularity_minutes: u32,
    ) -> Result<Self, AvailabilityError> {
        let offset = parse_utc_offset(&practitioner.timezone)?;
        Ok(Self::new(
            &practitioner.availability_template,
            offset,
            range,
            commitments,
            granularity_minutes,
        ))
    }

    pub fn slots(&self) -> impl Iterator<Item = TimeInterval> + '_ {
        self.range.days().flat_map(move |day| self.slots_for_day(day))
    }

    fn slots_for_day(&self, day: NaiveDate) -> Vec<TimeInterval> {
        let working: Vec<TimeInterval> = self
            .template
            .iter()
            .filter(|window| window.weekday == day.weekday())
            .filter_map(|window| {
                let start = local_to_utc(day, window.start_time, self.offset)?;
                let end = local_to_utc(day, window.end_time, self.offset)?;
                Some(TimeInterval::new(start, end))
            })
            .collect();

        if working.is_empty() {
            return Vec::new();
        }

        let working = normalize_intervals(working);
        let remainder = subtract_intervals(&working, &self.commitments);

        let snapped = remainder
            .into_iter()
            .filter_map(|interval| snap_to_granularity(interval, self.granularity_minutes))
            .collect();

        normalize_intervals(snapped)
    }
}

/// Eagerly collect the open slots of a practitioner over a date range.
pub fn compute_available_slots(
    practitioner: &Practitioner,
    range: DateRange,
    commitments: &[TimeInterval],
    granularity_minutes: u32,
) -> Result<Vec<AvailableSlot>, AvailabilityError> {
    let window =
        AvailabilityWindow::for_practitioner(practitioner, range, commitments, granularity_minutes)?;
    let slots: Vec<AvailableSlot> = window.slots().map(AvailableSlot::from).collect();

    debug!(
        "Practitioner {} has {} open slots between {} and {}",
        practitioner.id,
        slots.len(),
        range.from(),
        range.to()
    );

    Ok(slots)
}

/// True when `interval` fits entirely inside one open slot of the
/// practitioner's template once `commitments` are taken out.
pub fn is_bookable(
    practitioner: &Practitioner,
    interval: TimeInterval,
    commitments: &[TimeInterval],
    granularity_minutes: u32,
) -> Result<bool, AvailabilityError> {
    let offset = parse_utc_offset(&practitioner.timezone)?;
    let first_day = interval.start.with_timezone(&offset).date_naive();
    let last_day = interval.end.with_timezone(&offset).date_naive();
    let span = (last_day - first_day).num_days() + 1;
    let range = DateRange::new(first_day, last_day, span.max(1))?;

    let window = AvailabilityWindow::new(
        &practitioner.availability_template,
        offset,
        range,
        commitments,
        granularity_minutes,
    );
    let fits = window.slots().any(|slot| slot.contains(&interval));
    Ok(fits)
}

fn local_to_utc(day: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&day.and_time(time))
        .single()
        .map(|instant| instant.with_timezone(&Utc))
}

// ==============================================================================
// INTERVAL ARITHMETIC
// ==============================================================================

/// Sort and union overlapping or touching intervals; empty ones are dropped.
pub fn normalize_intervals(mut intervals: Vec<TimeInterval>) -> Vec<TimeInterval> {
    intervals.retain(|interval| !interval.is_empty());
    intervals.sort();

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Remove `cuts` from `base`. Both inputs must be normalized.
pub fn subtract_intervals(base: &[TimeInterval], cuts: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut remainder = Vec::new();

    for interval in base {
        let mut cursor = interval.start;

        for cut in cuts.iter().filter(|cut| cut.overlaps(interval)) {
            if cut.start > cursor {
                remainder.push(TimeInterval::new(cursor, cut.start));
            }
            if cut.end > cursor {
                cursor = cut.end;
            }
            if cursor >= interval.end {
                break;
            }
        }

        if cursor < interval.end {
            remainder.push(TimeInterval::new(cursor, interval.end));
        }
    }

    remainder
}

/// Shrink an interval onto the minute grid: start rounds up, end rounds
/// down. `None` if nothing is left.
pub fn snap_to_granularity(interval: TimeInterval, granularity_minutes: u32) -> Option<TimeInterval> {
    let step = grid_step(granularity_minutes)?;
    let start = ceil_to_grid(interval.start, step)?;
    let end = floor_to_grid(interval.end, step)?;

    let snapped = TimeInterval::new(start, end);
    (!snapped.is_empty()).then_some(snapped)
}

/// The grid is anchored at UTC midnight.
pub fn is_aligned(instant: DateTime<Utc>, granularity_minutes: u32) -> bool {
    match grid_step(granularity_minutes) {
        Some(step) => {
            instant.timestamp_subsec_nanos() == 0 && instant.timestamp().rem_euclid(step) == 0
        }
        None => false,
    }
}

fn grid_step(granularity_minutes: u32) -> Option<i64> {
    (granularity_minutes > 0).then(|| i64::from(granularity_minutes) * 60)
}

fn floor_to_grid(instant: DateTime<Utc>, step: i64) -> Option<DateTime<Utc>> {
    let seconds = instant.timestamp();
    DateTime::from_timestamp(seconds - seconds.rem_euclid(step), 0)
}

fn ceil_to_grid(instant: DateTime<Utc>, step: i64) -> Option<DateTime<Utc>> {
    let floor = floor_to_grid(instant, step)?;
    if floor == instant {
        Some(floor)
    } else {
        Some(floor + Duration::seconds(step))
    }
}

// ==============================================================================
// TEMPLATE AND TIMEZONE PARSING
// ==============================================================================

/// Parse `UTC`, `Z`, `GMT`, `+02:00`, `-0530`, `+05` or `UTC+02:00`.
pub fn parse_utc_offset(timezone: &str) -> Result<FixedOffset, AvailabilityError> {
    let invalid = || AvailabilityError::InvalidTimezone(timezone.to_string());
    let trimmed = timezone.trim();

    let rest = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(trimmed);

    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, digits) = match rest.as_bytes().first() {
        Some(b'+') => (1, &rest[1..]),
        Some(b'-') => (-1, &rest[1..]),
        _ => return Err(invalid()),
    };

    if !digits.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return Err(invalid());
    }

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None if digits.len() <= 2 => (digits, "0"),
        None => return Err(invalid()),
    };

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

pub fn validate_template(template: &[WeeklyWindow]) -> Result<(), AvailabilityError> {
    for window in template {
        if window.start_time >= window.end_time {
            return Err(AvailabilityError::InvalidTemplate(format!(
                "{} window starts at {} but ends at {}",
                window.weekday, window.start_time, window.end_time
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, h, m, 0).unwrap()
    }

    // 2025-06-02 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn commitment_splits_morning_window() {
        let template = vec![WeeklyWindow::new(Weekday::Mon, t(9, 0), t(12, 0))];
        let range = DateRange::new(monday(), monday(), 31).unwrap();
        let commitments = vec![TimeInterval::new(at(2, 10, 0), at(2, 10, 30))];
        let utc = FixedOffset::east_opt(0).unwrap();

        let window = AvailabilityWindow::new(&template, utc, range, &commitments, 15);
        let slots: Vec<_> = window.slots().collect();

        assert_eq!(
            slots,
            vec![
                TimeInterval::new(at(2, 9, 0), at(2, 10, 0)),
                TimeInterval::new(at(2, 10, 30), at(2, 12, 0)),
            ]
        );
    }

    #[test]
    fn slots_can_be_walked_twice() {
        let template = vec![
            WeeklyWindow::new(Weekday::Mon, t(9, 0), t(10, 0)),
            WeeklyWindow::new(Weekday::Tue, t(9, 0), t(10, 0)),
        ];
        let range = DateRange::new(monday(), monday() + Duration::days(6), 31).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let window = AvailabilityWindow::new(&template, utc, range, &[], 15);

        let first: Vec<_> = window.slots().collect();
        let second: Vec<_> = window.slots().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn overlapping_template_entries_are_unioned() {
        let template = vec![
            WeeklyWindow::new(Weekday::Mon, t(9, 0), t(11, 0)),
            WeeklyWindow::new(Weekday::Mon, t(10, 0), t(12, 0)),
            WeeklyWindow::new(Weekday::Mon, t(12, 0), t(13, 0)),
        ];
        let range = DateRange::new(monday(), monday(), 31).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let slots: Vec<_> = AvailabilityWindow::new(&template, utc, range, &[], 15)
            .slots()
            .collect();

        assert_eq!(slots, vec![TimeInterval::new(at(2, 9, 0), at(2, 13, 0))]);
    }

    #[test]
    fn range_outside_template_is_empty() {
        let template = vec![WeeklyWindow::new(Weekday::Mon, t(9, 0), t(12, 0))];
        let tuesday = monday() + Duration::days(1);
        let range = DateRange::new(tuesday, tuesday + Duration::days(4), 31).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();

        assert_eq!(AvailabilityWindow::new(&template, utc, range, &[], 15).slots().count(), 0);
        assert_eq!(AvailabilityWindow::new(&[], utc, range, &[], 15).slots().count(), 0);
    }

    #[test]
    fn local_template_is_shifted_by_offset() {
        let template = vec![WeeklyWindow::new(Weekday::Mon, t(9, 0), t(10, 0))];
        let range = DateRange::new(monday(), monday(), 31).unwrap();
        let plus_two = parse_utc_offset("+02:00").unwrap();
        let slots: Vec<_> = AvailabilityWindow::new(&template, plus_two, range, &[], 15)
            .slots()
            .collect();

        assert_eq!(slots, vec![TimeInterval::new(at(2, 7, 0), at(2, 8, 0))]);
    }

    #[test]
    fn remainders_are_snapped_inward() {
        let template = vec![WeeklyWindow::new(Weekday::Mon, t(9, 0), t(12, 0))];
        let range = DateRange::new(monday(), monday(), 31).unwrap();
        let commitments = vec![TimeInterval::new(at(2, 9, 50), at(2, 10, 5))];
        let utc = FixedOffset::east_opt(0).unwrap();
        let slots: Vec<_> = AvailabilityWindow::new(&template, utc, range, &commitments, 15)
            .slots()
            .collect();

        assert_eq!(
            slots,
            vec![
                TimeInterval::new(at(2, 9, 0), at(2, 9, 45)),
                TimeInterval::new(at(2, 10, 15), at(2, 12, 0)),
            ]
        );
    }

    #[test]
    fn subtract_handles_cut_covering_everything() {
        let base = vec![TimeInterval::new(at(2, 9, 0), at(2, 10, 0))];
        let cuts = vec![TimeInterval::new(at(2, 8, 0), at(2, 11, 0))];
        assert!(subtract_intervals(&base, &cuts).is_empty());
    }

    #[test]
    fn alignment_uses_utc_grid() {
        assert!(is_aligned(at(2, 9, 15), 15));
        assert!(!is_aligned(at(2, 9, 10), 15));
        assert!(!is_aligned(at(2, 9, 15) + Duration::milliseconds(1), 15));
        assert!(!is_aligned(at(2, 9, 0), 0));
    }

    #[test]
    fn parses_fixed_offsets() {
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -19800);
        assert_eq!(parse_utc_offset("UTC+01").unwrap().local_minus_utc(), 3600);
        assert!(parse_utc_offset("Europe/Paris").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn rejects_non_digit_offsets_without_panicking() {
        assert!(parse_utc_offset("+1é1").is_err());
        assert!(parse_utc_offset("+é").is_err());
        assert!(parse_utc_offset("UTC-ab:cd").is_err());
        assert!(parse_utc_offset("+-1").is_err());
    }

    #[test]
    fn date_range_limits() {
        assert!(DateRange::new(monday(), monday() - Duration::days(1), 31).is_err());
        assert!(DateRange::new(monday(), monday() + Duration::days(31), 31).is_err());
        assert_eq!(
            DateRange::new(monday(), monday() + Duration::days(30), 31).unwrap().days().count(),
            31
        );
    }

    #[test]
    fn template_validation_rejects_inverted_window() {
        let template = vec![WeeklyWindow::new(Weekday::Fri, t(12, 0), t(9, 0))];
        assert!(matches!(
            validate_template(&template),
            Err(AvailabilityError::InvalidTemplate(_))
        ));
    }
}

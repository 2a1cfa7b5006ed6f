use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::models::Appointment;

/// Half-open intervals `[start, end)` conflict iff they intersect.
pub fn intervals_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

/// Commitments of `practitioner_id` that intersect `[start, end)`. The
/// patient plays no part: a practitioner cannot be in two places at once.
pub fn find_conflicts<'a>(
    practitioner_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    existing: impl IntoIterator<Item = &'a Appointment>,
    exclude: Option<Uuid>,
) -> Vec<&'a Appointment> {
    let conflicts: Vec<&Appointment> = existing
        .into_iter()
        .filter(|appointment| appointment.practitioner_id == practitioner_id)
        .filter(|appointment| Some(appointment.id) != exclude)
        .filter(|appointment| appointment.is_commitment())
        .filter(|appointment| intervals_overlap(start, end, appointment.start_time, appointment.end_time))
        .collect();

    if !conflicts.is_empty() {
        warn!(
            "Conflict detected for practitioner {} - {} conflicting appointments",
            practitioner_id,
            conflicts.len()
        );
    }

    conflicts
}

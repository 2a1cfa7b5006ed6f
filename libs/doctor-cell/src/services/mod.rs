pub mod availability;
pub mod doctor;

pub use availability::{
    compute_available_slots, is_aligned, is_bookable, normalize_intervals, parse_utc_offset,
    snap_to_granularity, subtract_intervals, validate_template, AvailabilityWindow,
};
pub use doctor::DoctorService;

//! Appointment slot rules.

use chrono::{DateTime, Utc};

use crate::error::ConsistencyError;

/// Rejects slots that do not end after they start.
pub fn validate_slot(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<(), ConsistencyError> {
    if ends_at <= starts_at {
        return Err(ConsistencyError::InvalidSchedule);
    }
    Ok(())
}

/// Half-open interval overlap: back-to-back slots do not collide.
pub fn overlaps(
    a: (DateTime<Utc>, DateTime<Utc>),
    b: (DateTime<Utc>, DateTime<Utc>),
) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_validate_slot() {
        assert!(validate_slot(at(9), at(10)).is_ok());
        assert!(validate_slot(at(10), at(10)).is_err());
        assert!(validate_slot(at(11), at(10)).is_err());
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps((at(9), at(11)), (at(10), at(12))));
        assert!(!overlaps((at(9), at(10)), (at(10), at(11))));
        assert!(overlaps((at(9), at(12)), (at(10), at(11))));
    }
}

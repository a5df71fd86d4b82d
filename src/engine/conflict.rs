use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// True iff any existing window intersects `span` under strict half-open
/// semantics: `[s1, e1)` and `[s2, e2)` overlap iff `s1 < e2 && e1 > s2`.
/// Touching windows do not overlap. Linear scan, no ordering assumption.
pub fn has_overlapping_booking(span: &Span, existing: &[Span]) -> bool {
    existing.iter().any(|b| b.overlaps(span))
}

/// Stateful variant over a mentor's calendar: skips booking requests that
/// have expired, prunes the scan via the sorted index, and reports the
/// conflicting booking's id.
pub(crate) fn check_no_conflict(
    mentor: &MentorState,
    span: &Span,
    now: Ms,
) -> Result<(), EngineError> {
    for booking in mentor.overlapping(span) {
        if booking.blocks_time(now) {
            return Err(EngineError::Conflict(booking.id));
        }
    }
    Ok(())
}

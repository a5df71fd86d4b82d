use crate::model::{utc, Ms, Span};

use super::error::WindowError;

/// A booking window that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidWindow {
    pub span: Span,
    pub duration_ms: Ms,
}

/// Check a proposed booking window for temporal sanity.
///
/// Rules, in order: strictly positive duration, start not before `now`,
/// start and end on the same UTC calendar day. Pure — the caller supplies
/// the clock.
pub fn validate_booking_window(
    start_at: Ms,
    end_at: Ms,
    now: Ms,
) -> Result<ValidWindow, WindowError> {
    if end_at <= start_at {
        return Err(WindowError::EndNotAfterStart);
    }
    if start_at < now {
        return Err(WindowError::StartInPast);
    }
    let (start, end) = match (utc(start_at), utc(end_at)) {
        (Some(s), Some(e)) => (s, e),
        _ => return Err(WindowError::OutOfRange),
    };
    if start.date_naive() != end.date_naive() {
        return Err(WindowError::CrossesMidnight);
    }
    Ok(ValidWindow {
        span: Span::new(start_at, end_at),
        duration_ms: end_at - start_at,
    })
}

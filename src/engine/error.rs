use ulid::Ulid;

use crate::model::{SessionStatus, Span};

/// Window Validator failures. Display strings are the user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    EndNotAfterStart,
    StartInPast,
    CrossesMidnight,
    OutOfRange,
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowError::EndNotAfterStart => write!(f, "End time must be after start time."),
            WindowError::StartInPast => write!(f, "Cannot book a past time slot."),
            WindowError::CrossesMidnight => write!(f, "Booking must be within a single day."),
            WindowError::OutOfRange => write!(f, "Timestamp out of representable range."),
        }
    }
}

impl std::error::Error for WindowError {}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Conflict(Ulid),
    OutsideAvailability(Span),
    InvalidWindow(WindowError),
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },
    InvalidSlot(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl From<WindowError> for EngineError {
    fn from(e: WindowError) -> Self {
        EngineError::InvalidWindow(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with existing booking: {id}"),
            EngineError::OutsideAvailability(span) => {
                write!(
                    f,
                    "window [{}, {}) is outside mentor availability",
                    span.start, span.end
                )
            }
            EngineError::InvalidWindow(e) => write!(f, "{e}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a {} session", from.as_str())
            }
            EngineError::InvalidSlot(msg) => write!(f, "invalid slot: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

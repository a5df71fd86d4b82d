use crate::model::{PaymentStatus, SessionStatus};

/// A status/payment transition observed on a session booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub current_status: SessionStatus,
    pub current_payment: PaymentStatus,
    pub next_payment: PaymentStatus,
    pub price_cents: i64,
}

/// Increments to apply to a mentor's session count and earnings ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionDeltas {
    pub session_increment: u64,
    pub earnings_increment: i64,
}

/// Compute ledger deltas for a completion or payment-settling transition.
///
/// The session counter bumps only on the first transition into completed, so
/// re-applying the same completion is a no-op for it. Earnings are credited
/// exactly when payment flips to paid; negative prices clamp to 0.
pub fn completion_deltas(t: &StatusTransition) -> CompletionDeltas {
    let session_increment = if t.current_status != SessionStatus::Completed {
        1
    } else {
        0
    };
    let earnings_increment =
        if t.current_payment != PaymentStatus::Paid && t.next_payment == PaymentStatus::Paid {
            t.price_cents.max(0)
        } else {
            0
        };
    CompletionDeltas {
        session_increment,
        earnings_increment,
    }
}

//! Hard caps checked before any mutation. Generous for real workloads,
//! small enough to stop a runaway client from exhausting the process.

use crate::model::Ms;

/// Earliest accepted timestamp: 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// Latest accepted timestamp: 3000-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// A session never spans more than one UTC day.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * 3_600_000;

/// Widest availability query window: 90 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 90 * 24 * 3_600_000;

pub const MAX_MENTORS_PER_TENANT: usize = 100_000;
pub const MAX_SLOTS_PER_MENTOR: usize = 256;
pub const MAX_BOOKINGS_PER_MENTOR: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

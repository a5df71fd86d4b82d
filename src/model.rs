use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only absolute time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Convert a millisecond timestamp to a UTC datetime.
/// `None` outside chrono's representable range.
pub fn utc(ms: Ms) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Milliseconds elapsed since UTC midnight of `dt`'s date.
pub fn ms_of_day(dt: &DateTime<Utc>) -> Ms {
    dt.num_seconds_from_midnight() as Ms * 1_000 + dt.timestamp_subsec_millis() as Ms
}

/// UTC midnight of `date` as a millisecond timestamp.
/// `None` outside chrono's representable range.
pub fn midnight_ms(date: NaiveDate) -> Option<Ms> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Minutes since UTC midnight. `1440` (24:00) is allowed as an end-of-day bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);
    pub const END_OF_DAY: MinuteOfDay = MinuteOfDay(24 * 60);

    pub fn new(minutes: u16) -> Option<Self> {
        (minutes <= 24 * 60).then_some(Self(minutes))
    }

    pub fn as_minutes(self) -> u16 {
        self.0
    }

    pub fn as_ms_of_day(self) -> Ms {
        self.0 as Ms * 60_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseMinuteError;

impl std::fmt::Display for ParseMinuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected HH:MM between 00:00 and 24:00")
    }
}

impl std::error::Error for ParseMinuteError {}

impl std::str::FromStr for MinuteOfDay {
    type Err = ParseMinuteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or(ParseMinuteError)?;
        let h: u16 = h.parse().map_err(|_| ParseMinuteError)?;
        let m: u16 = m.parse().map_err(|_| ParseMinuteError)?;
        if m > 59 || h > 24 || (h == 24 && m != 0) {
            return Err(ParseMinuteError);
        }
        Ok(Self(h * 60 + m))
    }
}

impl std::fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Weekday from the wire encoding 0–6, 0 = Sunday.
pub fn weekday_from_sunday0(n: u8) -> Option<Weekday> {
    match n {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

pub fn weekday_to_sunday0(wd: Weekday) -> u8 {
    wd.num_days_from_sunday() as u8
}

/// When a slot rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    /// Every UTC date falling on this weekday.
    Weekly(Weekday),
    /// Exactly one UTC date.
    Date(NaiveDate),
}

impl Recurrence {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self {
            Recurrence::Weekly(wd) => date.weekday() == *wd,
            Recurrence::Date(d) => *d == date,
        }
    }
}

/// A mentor's open window: recurring weekly or pinned to one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRule {
    pub id: Ulid,
    pub recurrence: Recurrence,
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

/// Session lifecycle: requested → confirmed → completed.
/// Cancellation removes the booking instead of being a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Requested,
    Confirmed,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Requested => "requested",
            SessionStatus::Confirmed => "confirmed",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(SessionStatus::Requested),
            "confirmed" => Some(SessionStatus::Confirmed),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// One mentoring session on a mentor's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBooking {
    pub id: Ulid,
    pub span: Span,
    pub price_cents: i64,
    pub status: SessionStatus,
    pub payment: PaymentStatus,
    /// Set while `status == Requested`; an expired request no longer blocks time.
    pub expires_at: Option<Ms>,
}

impl SessionBooking {
    /// Whether this booking still occupies its time range at `now`.
    pub fn blocks_time(&self, now: Ms) -> bool {
        match self.status {
            SessionStatus::Requested => self.expires_at.is_none_or(|e| e > now),
            SessionStatus::Confirmed | SessionStatus::Completed => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MentorState {
    pub id: Ulid,
    pub name: Option<String>,
    pub slots: Vec<SlotRule>,
    /// Bookings sorted by `span.start`.
    pub bookings: Vec<SessionBooking>,
    pub sessions_completed: u64,
    pub earnings_cents: i64,
}

impl MentorState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            slots: Vec::new(),
            bookings: Vec::new(),
            sessions_completed: 0,
            earnings_cents: 0,
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: SessionBooking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<SessionBooking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&SessionBooking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut SessionBooking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &SessionBooking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn insert_slot(&mut self, slot: SlotRule) {
        self.slots.push(slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<SlotRule> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot_mut(&mut self, id: Ulid) -> Option<&mut SlotRule> {
        self.slots.iter_mut().find(|s| s.id == id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MentorCreated {
        id: Ulid,
        name: Option<String>,
    },
    MentorUpdated {
        id: Ulid,
        name: Option<String>,
    },
    MentorDeleted {
        id: Ulid,
    },
    SlotAdded {
        id: Ulid,
        mentor_id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    },
    SlotUpdated {
        id: Ulid,
        mentor_id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    },
    SlotRemoved {
        id: Ulid,
        mentor_id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        mentor_id: Ulid,
        span: Span,
        price_cents: i64,
        expires_at: Ms,
    },
    BookingConfirmed {
        id: Ulid,
        mentor_id: Ulid,
    },
    BookingCompleted {
        id: Ulid,
        mentor_id: Ulid,
        payment: PaymentStatus,
    },
    BookingCancelled {
        id: Ulid,
        mentor_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentorInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub mentor_id: Ulid,
    pub recurrence: Recurrence,
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub mentor_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub price_cents: i64,
    pub status: SessionStatus,
    pub payment: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentorStatsInfo {
    pub mentor_id: Ulid,
    pub sessions_completed: u64,
    pub earnings_cents: i64,
}

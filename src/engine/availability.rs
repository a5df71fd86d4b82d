use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// True iff at least one applicable slot rule fully contains the window.
///
/// A `Date` slot applies only on its own UTC date; a `Weekly` slot applies on
/// every UTC date with a matching weekday. Containment compares the window's
/// ms-since-UTC-midnight bounds against the slot's minute-of-day bounds.
///
/// Self-defending: a window whose endpoints fall on different UTC dates (or
/// are unrepresentable) is never inside a single slot and returns false.
pub fn is_within_availability(start_at: Ms, end_at: Ms, slots: &[SlotRule]) -> bool {
    if end_at <= start_at {
        return false;
    }
    let (Some(start), Some(end)) = (utc(start_at), utc(end_at)) else {
        return false;
    };
    let date = start.date_naive();
    if date != end.date_naive() {
        return false;
    }
    let start_ms = ms_of_day(&start);
    let end_ms = ms_of_day(&end);
    slots.iter().any(|slot| {
        slot.recurrence.applies_on(date)
            && slot.start.as_ms_of_day() <= start_ms
            && end_ms <= slot.end.as_ms_of_day()
    })
}

/// Expand slot rules into concrete spans over each UTC day the query window
/// touches, clamped to the query. Returns disjoint spans sorted by start.
pub fn expand_slot_spans(slots: &[SlotRule], query: &Span) -> Vec<Span> {
    let (Some(first), Some(last)) = (utc(query.start), utc(query.end - 1)) else {
        return Vec::new();
    };
    let last = last.date_naive();

    let mut spans = Vec::new();
    let mut date = first.date_naive();
    while date <= last {
        let Some(midnight) = midnight_ms(date) else {
            break;
        };
        for slot in slots {
            if !slot.recurrence.applies_on(date) {
                continue;
            }
            let start = (midnight + slot.start.as_ms_of_day()).max(query.start);
            let end = (midnight + slot.end.as_ms_of_day()).min(query.end);
            if start < end {
                spans.push(Span::new(start, end));
            }
        }
        date = match date.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }

    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Compute raw free intervals for a mentor: slot rules expanded over the
/// query window minus bookings that still block time at `now`.
pub fn availability(mentor: &MentorState, query: &Span, now: Ms) -> Vec<Span> {
    let free = expand_slot_spans(&mentor.slots, query);
    if free.is_empty() {
        return free;
    }

    let mut busy: Vec<Span> = mentor
        .overlapping(query)
        .filter(|b| b.blocks_time(now))
        .map(|b| Span::new(b.span.start.max(query.start), b.span.end.min(query.end)))
        .collect();

    if busy.is_empty() {
        return free;
    }
    busy.sort_by_key(|s| s.start);
    subtract_intervals(&free, &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;
    // 2026-03-02T00:00:00Z, a Monday.
    const MONDAY: Ms = 1_772_409_600_000;

    fn weekly(weekday: Weekday, start: &str, end: &str) -> SlotRule {
        SlotRule {
            id: Ulid::new(),
            recurrence: Recurrence::Weekly(weekday),
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
        }
    }

    fn dated(date: &str, start: &str, end: &str) -> SlotRule {
        SlotRule {
            id: Ulid::new(),
            recurrence: Recurrence::Date(date.parse().unwrap()),
            start: start.parse().unwrap(),
            end: end.parse().unwrap(),
        }
    }

    // ── is_within_availability ────────────────────────────

    #[test]
    fn empty_slot_list_never_matches() {
        assert!(!is_within_availability(MONDAY + 9 * H, MONDAY + 10 * H, &[]));
    }

    #[test]
    fn weekly_slot_contains_window() {
        let slots = [weekly(Weekday::Mon, "09:00", "12:00")];
        assert!(is_within_availability(
            MONDAY + 9 * H + 30 * M,
            MONDAY + 11 * H,
            &slots
        ));
    }

    #[test]
    fn window_past_slot_end_rejected() {
        let slots = [weekly(Weekday::Mon, "09:00", "12:00")];
        // Ends 12:30, slot closes at 12:00.
        assert!(!is_within_availability(
            MONDAY + 11 * H,
            MONDAY + 12 * H + 30 * M,
            &slots
        ));
    }

    #[test]
    fn window_flush_with_slot_bounds_accepted() {
        let slots = [weekly(Weekday::Mon, "09:00", "12:00")];
        assert!(is_within_availability(MONDAY + 9 * H, MONDAY + 12 * H, &slots));
    }

    #[test]
    fn weekly_slot_wrong_day_rejected() {
        let slots = [weekly(Weekday::Tue, "09:00", "12:00")];
        assert!(!is_within_availability(MONDAY + 9 * H, MONDAY + 10 * H, &slots));
    }

    #[test]
    fn dated_slot_matches_regardless_of_weekday() {
        let slots = [dated("2026-03-02", "09:00", "12:00")];
        assert!(is_within_availability(MONDAY + 9 * H, MONDAY + 10 * H, &slots));
        // Next Monday: same weekday, different date.
        let next_monday = MONDAY + 7 * 24 * H;
        assert!(!is_within_availability(next_monday + 9 * H, next_monday + 10 * H, &slots));
    }

    #[test]
    fn any_matching_slot_suffices() {
        let slots = [
            weekly(Weekday::Fri, "09:00", "12:00"),
            dated("2026-03-02", "10:00", "11:00"),
        ];
        assert!(is_within_availability(
            MONDAY + 10 * H,
            MONDAY + 10 * H + 30 * M,
            &slots
        ));
    }

    #[test]
    fn cross_midnight_window_fails_closed() {
        let slots = [
            weekly(Weekday::Mon, "00:00", "24:00"),
            weekly(Weekday::Tue, "00:00", "24:00"),
        ];
        // Both days fully open, but the window itself crosses midnight.
        assert!(!is_within_availability(MONDAY + 23 * H, MONDAY + 25 * H, &slots));
    }

    #[test]
    fn end_of_day_slot_bound() {
        let slots = [weekly(Weekday::Mon, "22:00", "24:00")];
        assert!(is_within_availability(
            MONDAY + 22 * H,
            MONDAY + 23 * H + 59 * M,
            &slots
        ));
    }

    // ── expand_slot_spans ────────────────────────────────

    #[test]
    fn expand_weekly_over_two_weeks() {
        let slots = [weekly(Weekday::Mon, "09:00", "12:00")];
        let query = Span::new(MONDAY, MONDAY + 14 * 24 * H);
        let spans = expand_slot_spans(&slots, &query);
        assert_eq!(
            spans,
            vec![
                Span::new(MONDAY + 9 * H, MONDAY + 12 * H),
                Span::new(MONDAY + 7 * 24 * H + 9 * H, MONDAY + 7 * 24 * H + 12 * H),
            ]
        );
    }

    #[test]
    fn expand_clamps_to_query() {
        let slots = [weekly(Weekday::Mon, "09:00", "12:00")];
        let query = Span::new(MONDAY + 10 * H, MONDAY + 11 * H);
        let spans = expand_slot_spans(&slots, &query);
        assert_eq!(spans, vec![Span::new(MONDAY + 10 * H, MONDAY + 11 * H)]);
    }

    #[test]
    fn expand_merges_abutting_slots() {
        let slots = [
            weekly(Weekday::Mon, "09:00", "12:00"),
            weekly(Weekday::Mon, "12:00", "14:00"),
        ];
        let query = Span::new(MONDAY, MONDAY + 24 * H);
        let spans = expand_slot_spans(&slots, &query);
        assert_eq!(spans, vec![Span::new(MONDAY + 9 * H, MONDAY + 14 * H)]);
    }

    #[test]
    fn expand_includes_dated_slot_once() {
        let slots = [dated("2026-03-03", "10:00", "11:00")];
        let query = Span::new(MONDAY, MONDAY + 14 * 24 * H);
        let spans = expand_slot_spans(&slots, &query);
        let tuesday = MONDAY + 24 * H;
        assert_eq!(spans, vec![Span::new(tuesday + 10 * H, tuesday + 11 * H)]);
    }

    #[test]
    fn expand_no_slots() {
        assert!(expand_slot_spans(&[], &Span::new(MONDAY, MONDAY + 24 * H)).is_empty());
    }

    // ── merge_overlapping / subtract_intervals ───────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let spans = vec![Span::new(100, 200), Span::new(200, 300)];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 300)]);
    }

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![Span::new(100, 200)];
        let remove = vec![Span::new(50, 250)];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![Span::new(100, 150), Span::new(200, 300)]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    // ── availability (pure function) ─────────────────────

    fn booking(start: Ms, end: Ms, status: SessionStatus, expires_at: Option<Ms>) -> SessionBooking {
        SessionBooking {
            id: Ulid::new(),
            span: Span::new(start, end),
            price_cents: 0,
            status,
            payment: PaymentStatus::Pending,
            expires_at,
        }
    }

    #[test]
    fn availability_subtracts_confirmed_booking() {
        let mut mentor = MentorState::new(Ulid::new(), None);
        mentor.insert_slot(weekly(Weekday::Mon, "09:00", "12:00"));
        mentor.insert_booking(booking(
            MONDAY + 10 * H,
            MONDAY + 10 * H + 30 * M,
            SessionStatus::Confirmed,
            None,
        ));
        let free = availability(&mentor, &Span::new(MONDAY, MONDAY + 24 * H), 0);
        assert_eq!(
            free,
            vec![
                Span::new(MONDAY + 9 * H, MONDAY + 10 * H),
                Span::new(MONDAY + 10 * H + 30 * M, MONDAY + 12 * H),
            ]
        );
    }

    #[test]
    fn availability_ignores_expired_request() {
        let mut mentor = MentorState::new(Ulid::new(), None);
        mentor.insert_slot(weekly(Weekday::Mon, "09:00", "12:00"));
        mentor.insert_booking(booking(
            MONDAY + 10 * H,
            MONDAY + 11 * H,
            SessionStatus::Requested,
            Some(1_000),
        ));
        let now = 2_000; // request already expired
        let free = availability(&mentor, &Span::new(MONDAY, MONDAY + 24 * H), now);
        assert_eq!(free, vec![Span::new(MONDAY + 9 * H, MONDAY + 12 * H)]);
    }

    #[test]
    fn availability_counts_live_request() {
        let mut mentor = MentorState::new(Ulid::new(), None);
        mentor.insert_slot(weekly(Weekday::Mon, "09:00", "11:00"));
        mentor.insert_booking(booking(
            MONDAY + 9 * H,
            MONDAY + 10 * H,
            SessionStatus::Requested,
            Some(MONDAY),
        ));
        let now = 0;
        let free = availability(&mentor, &Span::new(MONDAY, MONDAY + 24 * H), now);
        assert_eq!(free, vec![Span::new(MONDAY + 10 * H, MONDAY + 11 * H)]);
    }

    #[test]
    fn availability_no_slots_is_empty() {
        let mentor = MentorState::new(Ulid::new(), None);
        assert!(availability(&mentor, &Span::new(MONDAY, MONDAY + 24 * H), 0).is_empty());
    }
}

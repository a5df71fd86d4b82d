use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::availability;
use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Free, bookable windows for a mentor: slot rules expanded over the query
    /// window minus bookings that still block time.
    pub async fn compute_availability(
        &self,
        mentor_id: Ulid,
        query_start: Ms,
        query_end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if query_end <= query_start {
            return Ok(Vec::new());
        }
        if query_end - query_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mentor = match self.get_mentor(&mentor_id) {
            Some(mentor) => mentor,
            None => return Ok(vec![]),
        };
        let guard = mentor.read().await;

        let query = Span::new(query_start, query_end);
        let mut free = availability(&guard, &query, now_ms());

        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }

        Ok(free)
    }

    pub fn list_mentors(&self) -> Vec<MentorInfo> {
        self.state
            .iter()
            .map(|entry| {
                let mentor = entry.value().clone();
                let guard = mentor.try_read().expect("list_mentors: uncontended read");
                MentorInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                }
            })
            .collect()
    }

    pub async fn get_slots(&self, mentor_id: Ulid) -> Result<Vec<SlotInfo>, EngineError> {
        let mentor = match self.get_mentor(&mentor_id) {
            Some(mentor) => mentor,
            None => return Ok(vec![]),
        };
        let guard = mentor.read().await;
        Ok(guard
            .slots
            .iter()
            .map(|s| SlotInfo {
                id: s.id,
                mentor_id,
                recurrence: s.recurrence,
                start: s.start,
                end: s.end,
            })
            .collect())
    }

    pub async fn get_bookings(&self, mentor_id: Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let mentor = match self.get_mentor(&mentor_id) {
            Some(mentor) => mentor,
            None => return Ok(vec![]),
        };
        let guard = mentor.read().await;
        Ok(guard
            .bookings
            .iter()
            .map(|b| BookingInfo {
                id: b.id,
                mentor_id,
                start: b.span.start,
                end: b.span.end,
                price_cents: b.price_cents,
                status: b.status,
                payment: b.payment,
            })
            .collect())
    }

    pub async fn mentor_stats(&self, mentor_id: Ulid) -> Result<Vec<MentorStatsInfo>, EngineError> {
        let mentor = match self.get_mentor(&mentor_id) {
            Some(mentor) => mentor,
            None => return Ok(vec![]),
        };
        let guard = mentor.read().await;
        Ok(vec![MentorStatsInfo {
            mentor_id,
            sessions_completed: guard.sessions_completed,
            earnings_cents: guard.earnings_cents,
        }])
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::is_within_availability;
use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::validate::validate_booking_window;
use super::{Engine, EngineError, SharedMentorState, WalCommand};

fn validate_slot_bounds(start: MinuteOfDay, end: MinuteOfDay) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::InvalidSlot("start must be before end"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_mentor(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_MENTORS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many mentors"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("mentor name too long"));
            }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::MentorCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        let mentor = MentorState::new(id, name);
        self.state.insert(id, Arc::new(RwLock::new(mentor)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_mentor(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("mentor name too long"));
            }
        let mentor = self.get_mentor(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = mentor.write().await;

        let event = Event::MentorUpdated { id, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn delete_mentor(&self, id: Ulid) -> Result<(), EngineError> {
        let mentor = self.get_mentor(&id).ok_or(EngineError::NotFound(id))?;

        // Drop the entity index entries before the state goes away.
        let guard = mentor.read().await;
        for slot in &guard.slots {
            self.entity_to_mentor.remove(&slot.id);
        }
        for booking in &guard.bookings {
            self.entity_to_mentor.remove(&booking.id);
        }
        drop(guard);

        let event = Event::MentorDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn add_slot(
        &self,
        id: Ulid,
        mentor_id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    ) -> Result<(), EngineError> {
        validate_slot_bounds(start, end)?;
        let mentor = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let mut guard = mentor.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_MENTOR {
            return Err(EngineError::LimitExceeded("too many slots on mentor"));
        }

        let event = Event::SlotAdded { id, mentor_id, recurrence, start, end };
        self.persist_and_apply(mentor_id, &mut guard, &event).await
    }

    pub async fn update_slot(
        &self,
        id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    ) -> Result<Ulid, EngineError> {
        validate_slot_bounds(start, end)?;
        let (mentor_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.slot_mut(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::SlotUpdated { id, mentor_id, recurrence, start, end };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        Ok(mentor_id)
    }

    pub async fn remove_slot(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (mentor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::SlotRemoved { id, mentor_id };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        Ok(mentor_id)
    }

    /// Request a booking: the Window Validator, the Availability Checker, and
    /// the Overlap Checker run in order under the mentor's write lock, so the
    /// checks and the insert are atomic — two racing requests for the same
    /// window cannot both commit.
    pub async fn request_booking(
        &self,
        id: Ulid,
        mentor_id: Ulid,
        start_at: Ms,
        end_at: Ms,
        price_cents: i64,
    ) -> Result<(), EngineError> {
        let now = now_ms();
        let window = validate_booking_window(start_at, end_at, now)?;
        validate_span(&window.span)?;

        let mentor = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let mut guard = mentor.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_MENTOR {
            return Err(EngineError::LimitExceeded("too many bookings on mentor"));
        }

        if !is_within_availability(window.span.start, window.span.end, &guard.slots) {
            return Err(EngineError::OutsideAvailability(window.span));
        }
        check_no_conflict(&guard, &window.span, now)?;

        let event = Event::BookingRequested {
            id,
            mentor_id,
            span: window.span,
            price_cents,
            expires_at: now + self.request_ttl_ms,
        };
        self.persist_and_apply(mentor_id, &mut guard, &event).await
    }

    pub async fn confirm_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (mentor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            SessionStatus::Requested => {
                // An expired request is as good as gone — the reaper just
                // hasn't gotten to it yet.
                if !booking.blocks_time(now_ms()) {
                    return Err(EngineError::NotFound(id));
                }
            }
            from @ (SessionStatus::Confirmed | SessionStatus::Completed) => {
                return Err(EngineError::InvalidTransition { from, action: "confirm" });
            }
        }

        let event = Event::BookingConfirmed { id, mentor_id };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        Ok(mentor_id)
    }

    /// Mark a session complete, or settle payment on an already-completed one.
    /// Ledger increments are computed from the booking's current state, so
    /// re-applying a completion never double-counts. `None` leaves the payment
    /// status as-is.
    pub async fn complete_booking(
        &self,
        id: Ulid,
        next_payment: Option<PaymentStatus>,
    ) -> Result<Ulid, EngineError> {
        let (mentor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status == SessionStatus::Requested {
            return Err(EngineError::InvalidTransition {
                from: SessionStatus::Requested,
                action: "complete",
            });
        }
        let payment = next_payment.unwrap_or(booking.payment);

        let event = Event::BookingCompleted { id, mentor_id, payment };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        Ok(mentor_id)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (mentor_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.status == SessionStatus::Completed {
            return Err(EngineError::InvalidTransition {
                from: SessionStatus::Completed,
                action: "cancel",
            });
        }

        let event = Event::BookingCancelled { id, mentor_id };
        self.persist_and_apply(mentor_id, &mut guard, &event).await?;
        Ok(mentor_id)
    }

    /// Booking requests whose TTL elapsed without confirmation.
    pub fn collect_expired_requests(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let mentor = entry.value().clone();
            if let Ok(guard) = mentor.try_read() {
                for booking in &guard.bookings {
                    if booking.status == SessionStatus::Requested
                        && booking.expires_at.is_some_and(|e| e <= now) {
                            expired.push((booking.id, guard.id));
                        }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut visited = HashSet::new();

        fn emit_mentor(
            id: Ulid,
            state: &dashmap::DashMap<Ulid, SharedMentorState>,
            events: &mut Vec<Event>,
            visited: &mut HashSet<Ulid>,
        ) {
            if !visited.insert(id) {
                return;
            }
            let entry = match state.get(&id) {
                Some(e) => e,
                None => return,
            };
            let mentor = entry.value().clone();
            let guard = mentor.try_read().expect("compact: uncontended read");

            events.push(Event::MentorCreated {
                id: guard.id,
                name: guard.name.clone(),
            });

            for slot in &guard.slots {
                events.push(Event::SlotAdded {
                    id: slot.id,
                    mentor_id: guard.id,
                    recurrence: slot.recurrence,
                    start: slot.start,
                    end: slot.end,
                });
            }

            for booking in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: booking.id,
                    mentor_id: guard.id,
                    span: booking.span,
                    price_cents: booking.price_cents,
                    expires_at: booking.expires_at.unwrap_or(0),
                });
                match booking.status {
                    SessionStatus::Requested => {}
                    SessionStatus::Confirmed => {
                        events.push(Event::BookingConfirmed {
                            id: booking.id,
                            mentor_id: guard.id,
                        });
                    }
                    // Replaying a completion against the fresh request rebuilds
                    // the session counter and earnings ledger.
                    SessionStatus::Completed => {
                        events.push(Event::BookingCompleted {
                            id: booking.id,
                            mentor_id: guard.id,
                            payment: booking.payment,
                        });
                    }
                }
            }
        }

        let mentor_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in mentor_ids {
            emit_mentor(id, &self.state, &mut events, &mut visited);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

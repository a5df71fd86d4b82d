mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;
mod validate;

pub use availability::{
    availability, expand_slot_spans, is_within_availability, merge_overlapping,
    subtract_intervals,
};
pub use conflict::has_overlapping_booking;
pub use error::{EngineError, WindowError};
pub use ledger::{completion_deltas, CompletionDeltas, StatusTransition};
pub use validate::{validate_booking_window, ValidWindow};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedMentorState = Arc<RwLock<MentorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedMentorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (slot/booking) id → mentor id
    pub(super) entity_to_mentor: DashMap<Ulid, Ulid>,
    /// How long an unconfirmed booking request blocks its window.
    pub(super) request_ttl_ms: Ms,
}

/// Apply an event directly to a MentorState (no locking — caller holds the lock).
fn apply_to_mentor(mentor: &mut MentorState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SlotAdded {
            id,
            mentor_id,
            recurrence,
            start,
            end,
        } => {
            mentor.insert_slot(SlotRule {
                id: *id,
                recurrence: *recurrence,
                start: *start,
                end: *end,
            });
            entity_map.insert(*id, *mentor_id);
        }
        Event::SlotUpdated {
            id,
            mentor_id,
            recurrence,
            start,
            end,
        } => {
            mentor.remove_slot(*id);
            mentor.insert_slot(SlotRule {
                id: *id,
                recurrence: *recurrence,
                start: *start,
                end: *end,
            });
            entity_map.insert(*id, *mentor_id);
        }
        Event::SlotRemoved { id, .. } => {
            mentor.remove_slot(*id);
            entity_map.remove(id);
        }
        Event::BookingRequested {
            id,
            mentor_id,
            span,
            price_cents,
            expires_at,
        } => {
            mentor.insert_booking(SessionBooking {
                id: *id,
                span: *span,
                price_cents: *price_cents,
                status: SessionStatus::Requested,
                payment: PaymentStatus::Pending,
                expires_at: Some(*expires_at),
            });
            entity_map.insert(*id, *mentor_id);
        }
        Event::BookingConfirmed { id, .. } => {
            if let Some(booking) = mentor.booking_mut(*id) {
                booking.status = SessionStatus::Confirmed;
                booking.expires_at = None;
            }
        }
        Event::BookingCompleted { id, payment, .. } => {
            let deltas = match mentor.booking_mut(*id) {
                Some(booking) => {
                    let deltas = completion_deltas(&StatusTransition {
                        current_status: booking.status,
                        current_payment: booking.payment,
                        next_payment: *payment,
                        price_cents: booking.price_cents,
                    });
                    booking.status = SessionStatus::Completed;
                    booking.payment = *payment;
                    booking.expires_at = None;
                    deltas
                }
                None => return,
            };
            mentor.sessions_completed += deltas.session_increment;
            mentor.earnings_cents += deltas.earnings_increment;
        }
        Event::BookingCancelled { id, .. } => {
            mentor.remove_booking(*id);
            entity_map.remove(id);
        }
        Event::MentorUpdated { name, .. } => {
            mentor.name = name.clone();
        }
        // MentorCreated/Deleted are handled at the DashMap level, not here
        Event::MentorCreated { .. } | Event::MentorDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, request_ttl_ms: Ms) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_mentor: DashMap::new(),
            request_ttl_ms,
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::MentorCreated { id, name } => {
                    let mentor = MentorState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(mentor)));
                }
                Event::MentorDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    if let Some(mentor_id) = event_mentor_id(other)
                        && let Some(entry) = engine.state.get(&mentor_id) {
                            let mentor_arc = entry.clone();
                            let mut guard =
                                mentor_arc.try_write().expect("replay: uncontended write");
                            apply_to_mentor(&mut guard, other, &engine.entity_to_mentor);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_mentor(&self, id: &Ulid) -> Option<SharedMentorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_mentor_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_mentor.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        mentor_id: Ulid,
        mentor: &mut MentorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_mentor(mentor, event, &self.entity_to_mentor);
        self.notify.send(mentor_id, event);
        Ok(())
    }

    /// Lookup entity → mentor, get mentor, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<MentorState>), EngineError> {
        let mentor_id = self
            .get_mentor_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let mentor = self
            .get_mentor(&mentor_id)
            .ok_or(EngineError::NotFound(mentor_id))?;
        let guard = mentor.write_owned().await;
        Ok((mentor_id, guard))
    }
}

/// Extract the mentor_id from an event (for non-Create/Delete events).
fn event_mentor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotAdded { mentor_id, .. }
        | Event::SlotUpdated { mentor_id, .. }
        | Event::SlotRemoved { mentor_id, .. }
        | Event::BookingRequested { mentor_id, .. }
        | Event::BookingConfirmed { mentor_id, .. }
        | Event::BookingCompleted { mentor_id, .. }
        | Event::BookingCancelled { mentor_id, .. } => Some(*mentor_id),
        Event::MentorUpdated { id, .. } => Some(*id),
        Event::MentorCreated { .. } | Event::MentorDeleted { .. } => None,
    }
}

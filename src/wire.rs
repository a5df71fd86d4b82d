use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use futures::{Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::auth::MentordAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// One LISTEN registration on this connection.
struct BroadcastSub {
    rx: broadcast::Receiver<Event>,
}

pub struct MentordHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<MentordQueryParser>,
    /// channel name → live subscription. Per-connection: the factory (and with
    /// it this handler) is built per accepted socket.
    subscriptions: Mutex<HashMap<String, BroadcastSub>>,
}

impl MentordHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(MentordQueryParser),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Collect everything buffered on this connection's subscriptions.
    /// Postgres delivers NOTIFY asynchronously; we deliver on the next
    /// query round-trip, which is enough for polling clients.
    fn pending_notifications(&self) -> Vec<NotificationResponse> {
        let mut subs = self.subscriptions.lock().expect("subscriptions poisoned");
        let mut out = Vec::new();
        for (channel, sub) in subs.iter_mut() {
            loop {
                match sub.rx.try_recv() {
                    Ok(event) => out.push(NotificationResponse::new(
                        0,
                        channel.clone(),
                        notification_payload(&event),
                    )),
                    // Dropped events are gone; deliver what's left.
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }
        out
    }

    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        for notification in self.pending_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(notification))
                .await?;
        }
        Ok(())
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertMentor { id, name } => {
                engine.create_mentor(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateMentor { id, name } => {
                engine.update_mentor(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteMentor { id } => {
                engine.delete_mentor(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertSlot {
                id,
                mentor_id,
                recurrence,
                start,
                end,
            } => {
                engine
                    .add_slot(id, mentor_id, recurrence, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateSlot {
                id,
                recurrence,
                start,
                end,
            } => {
                engine
                    .update_slot(id, recurrence, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSlot { id } => {
                engine.remove_slot(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                mentor_id,
                start,
                end,
                price_cents,
            } => {
                engine
                    .request_booking(id, mentor_id, start, end, price_cents)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking { id, status, payment } => {
                match status {
                    SessionStatus::Confirmed => {
                        if payment.is_some() {
                            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                                "ERROR".into(),
                                "P0001".into(),
                                "payment_status requires status = 'completed'".into(),
                            ))));
                        }
                        engine.confirm_booking(id).await.map_err(engine_err)?;
                    }
                    SessionStatus::Completed => {
                        engine
                            .complete_booking(id, payment)
                            .await
                            .map_err(engine_err)?;
                    }
                    // sql::parse_sql rejects this
                    SessionStatus::Requested => unreachable!(),
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectMentors => {
                let schema = Arc::new(mentors_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_mentors()
                    .into_iter()
                    .map(|m| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&m.id.to_string())?;
                        encoder.encode_field(&m.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectSlots { mentor_id } => {
                let slots = engine.get_slots(mentor_id).await.map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|s| {
                        let (weekday, specific_date) = match s.recurrence {
                            Recurrence::Weekly(wd) => {
                                (Some(weekday_to_sunday0(wd) as i64), None)
                            }
                            Recurrence::Date(d) => (None, Some(d.to_string())),
                        };
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.mentor_id.to_string())?;
                        encoder.encode_field(&weekday)?;
                        encoder.encode_field(&specific_date)?;
                        encoder.encode_field(&s.start.to_string())?;
                        encoder.encode_field(&s.end.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { mentor_id } => {
                let bookings = engine.get_bookings(mentor_id).await.map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.mentor_id.to_string())?;
                        encoder.encode_field(&b.start)?;
                        encoder.encode_field(&b.end)?;
                        encoder.encode_field(&b.price_cents)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.payment.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectStats { mentor_id } => {
                let stats = engine.mentor_stats(mentor_id).await.map_err(engine_err)?;
                let schema = Arc::new(stats_schema());
                let rows: Vec<PgWireResult<_>> = stats
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.mentor_id.to_string())?;
                        encoder.encode_field(&(s.sessions_completed as i64))?;
                        encoder.encode_field(&s.earnings_cents)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                mentor_id,
                start,
                end,
                min_duration,
            } => {
                let windows = engine
                    .compute_availability(mentor_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let mid_str = mentor_id.to_string();
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|window| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&mid_str)?;
                        encoder.encode_field(&window.start)?;
                        encoder.encode_field(&window.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let mentor_id = parse_mentor_channel(&channel)?;
                let rx = engine.notify.subscribe(mentor_id);
                self.subscriptions
                    .lock()
                    .expect("subscriptions poisoned")
                    .insert(channel, BroadcastSub { rx });
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                parse_mentor_channel(&channel)?;
                self.subscriptions
                    .lock()
                    .expect("subscriptions poisoned")
                    .remove(&channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    async fn run_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.flush_notifications(client).await?;

        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

fn parse_mentor_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("mentor_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected mentor_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

fn notification_payload(event: &Event) -> String {
    use serde_json::json;
    let value = match event {
        Event::MentorCreated { id, name } => {
            json!({"event": "mentor_created", "id": id.to_string(), "name": name})
        }
        Event::MentorUpdated { id, name } => {
            json!({"event": "mentor_updated", "id": id.to_string(), "name": name})
        }
        Event::MentorDeleted { id } => {
            json!({"event": "mentor_deleted", "id": id.to_string()})
        }
        Event::SlotAdded { id, mentor_id, .. } => {
            json!({"event": "slot_added", "id": id.to_string(), "mentor_id": mentor_id.to_string()})
        }
        Event::SlotUpdated { id, mentor_id, .. } => {
            json!({"event": "slot_updated", "id": id.to_string(), "mentor_id": mentor_id.to_string()})
        }
        Event::SlotRemoved { id, mentor_id } => {
            json!({"event": "slot_removed", "id": id.to_string(), "mentor_id": mentor_id.to_string()})
        }
        Event::BookingRequested {
            id,
            mentor_id,
            span,
            price_cents,
            expires_at,
        } => json!({
            "event": "booking_requested",
            "id": id.to_string(),
            "mentor_id": mentor_id.to_string(),
            "start": span.start,
            "end": span.end,
            "price_cents": price_cents,
            "expires_at": expires_at,
        }),
        Event::BookingConfirmed { id, mentor_id } => {
            json!({"event": "booking_confirmed", "id": id.to_string(), "mentor_id": mentor_id.to_string()})
        }
        Event::BookingCompleted {
            id,
            mentor_id,
            payment,
        } => json!({
            "event": "booking_completed",
            "id": id.to_string(),
            "mentor_id": mentor_id.to_string(),
            "payment_status": payment.as_str(),
        }),
        Event::BookingCancelled { id, mentor_id } => {
            json!({"event": "booking_cancelled", "id": id.to_string(), "mentor_id": mentor_id.to_string()})
        }
    };
    value.to_string()
}

fn mentors_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("weekday".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("specific_date".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start_time".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("end_time".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("price_cents".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("payment_status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("sessions_completed".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("earnings_cents".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("mentor_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

/// Result schema for a statement, derived from the table it selects from.
fn select_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("MENTOR_STATS") {
        stats_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("MENTORS") {
        mentors_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for MentordHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run_query(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MentordQueryParser;

#[async_trait]
impl QueryParser for MentordQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(select_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MentordHandler {
    type Statement = String;
    type QueryParser = MentordQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run_query(client, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(select_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MentordFactory {
    handler: Arc<MentordHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MentordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MentordFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = MentordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MentordHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MentordFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Drive one client connection to completion. The factory — and with it the
/// connection's LISTEN subscriptions — lives exactly as long as the socket.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = MentordFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertMentor {
        id: Ulid,
        name: Option<String>,
    },
    UpdateMentor {
        id: Ulid,
        name: Option<String>,
    },
    DeleteMentor {
        id: Ulid,
    },
    InsertSlot {
        id: Ulid,
        mentor_id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    },
    UpdateSlot {
        id: Ulid,
        recurrence: Recurrence,
        start: MinuteOfDay,
        end: MinuteOfDay,
    },
    DeleteSlot {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        mentor_id: Ulid,
        start: Ms,
        end: Ms,
        price_cents: i64,
    },
    UpdateBooking {
        id: Ulid,
        status: SessionStatus,
        payment: Option<PaymentStatus>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectMentors,
    SelectSlots {
        mentor_id: Ulid,
    },
    SelectBookings {
        mentor_id: Ulid,
    },
    SelectStats {
        mentor_id: Ulid,
    },
    SelectAvailability {
        mentor_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "mentors" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("mentors", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            Ok(Command::InsertMentor { id, name })
        }
        "slots" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("slots", 6, values.len()));
            }
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                mentor_id: parse_ulid(&values[1])?,
                recurrence: parse_recurrence(Some(&values[2]), Some(&values[3]))?,
                start: parse_minute(&values[4])?,
                end: parse_minute(&values[5])?,
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let price_cents = if values.len() >= 5 {
                parse_i64(&values[4])?
            } else {
                0
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                mentor_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                price_cents,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection, "id")?;

    let mut by_column = Vec::new();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty assignment column".into()))?,
            _ => return Err(SqlError::Parse("unsupported assignment target".into())),
        };
        by_column.push((col, &assignment.value));
    }
    let find = |col: &str| {
        by_column
            .iter()
            .find(|(c, _)| c.as_str() == col)
            .map(|(_, v)| *v)
    };

    match table.as_str() {
        "mentors" => {
            let name = match find("name") {
                Some(expr) => parse_string_or_null(expr)?,
                None => return Err(SqlError::MissingAssignment("name")),
            };
            Ok(Command::UpdateMentor { id, name })
        }
        "slots" => {
            let (Some(start), Some(end)) = (find("start_time"), find("end_time")) else {
                return Err(SqlError::MissingAssignment("start_time, end_time"));
            };
            Ok(Command::UpdateSlot {
                id,
                recurrence: parse_recurrence(find("weekday"), find("specific_date"))?,
                start: parse_minute(start)?,
                end: parse_minute(end)?,
            })
        }
        "bookings" => {
            let status = match find("status") {
                Some(expr) => parse_status(expr)?,
                None => return Err(SqlError::MissingAssignment("status")),
            };
            if status == SessionStatus::Requested {
                return Err(SqlError::Parse(
                    "cannot transition a booking back to requested".into(),
                ));
            }
            let payment = match find("payment_status") {
                Some(expr) => Some(parse_payment(expr)?),
                None => None,
            };
            Ok(Command::UpdateBooking { id, status, payment })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection, "id")?;

    match table.as_str() {
        "mentors" => Ok(Command::DeleteMentor { id }),
        "slots" => Ok(Command::DeleteSlot { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "mentors" => Ok(Command::SelectMentors),
        "slots" => Ok(Command::SelectSlots {
            mentor_id: extract_where_id(&select.selection, "mentor_id")?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            mentor_id: extract_where_id(&select.selection, "mentor_id")?,
        }),
        "mentor_stats" => Ok(Command::SelectStats {
            mentor_id: extract_where_id(&select.selection, "mentor_id")?,
        }),
        "availability" => {
            let (mut mentor_id, mut start, mut end, mut min_duration) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(
                    selection,
                    &mut mentor_id,
                    &mut start,
                    &mut end,
                    &mut min_duration,
                )?;
            }
            Ok(Command::SelectAvailability {
                mentor_id: mentor_id.ok_or(SqlError::MissingFilter("mentor_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                end: end.ok_or(SqlError::MissingFilter("end"))?,
                min_duration,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    mentor_id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
    min_duration: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, mentor_id, start, end, min_duration)?;
                extract_availability_filters(right, mentor_id, start, end, min_duration)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("mentor_id") {
                    *mentor_id = Some(parse_ulid(right)?);
                } else if col.as_deref() == Some("min_duration") {
                    *min_duration = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Ok(s.clone())
    } else {
        Err(SqlError::Parse(format!("expected string, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

/// Slot recurrence from the (weekday, specific_date) column pair:
/// exactly one must be present and non-NULL. Weekday is 0–6 with 0 = Sunday.
fn parse_recurrence(
    weekday: Option<&Expr>,
    specific_date: Option<&Expr>,
) -> Result<Recurrence, SqlError> {
    let weekday = weekday.filter(|e| !is_null(e));
    let specific_date = specific_date.filter(|e| !is_null(e));
    match (weekday, specific_date) {
        (Some(weekday), None) => {
            let n = parse_i64(weekday)?;
            let n = u8::try_from(n).map_err(|_| SqlError::Parse(format!("bad weekday: {n}")))?;
            let wd = weekday_from_sunday0(n)
                .ok_or_else(|| SqlError::Parse(format!("bad weekday: {n} (expected 0-6)")))?;
            Ok(Recurrence::Weekly(wd))
        }
        (None, Some(specific_date)) => {
            let s = parse_string(specific_date)?;
            let date = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| SqlError::Parse(format!("bad date: {e}")))?;
            Ok(Recurrence::Date(date))
        }
        _ => Err(SqlError::Parse(
            "slot needs exactly one of weekday and specific_date".into(),
        )),
    }
}

fn parse_minute(expr: &Expr) -> Result<MinuteOfDay, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|_| SqlError::Parse(format!("bad time: {s} (expected HH:MM)")))
}

fn parse_status(expr: &Expr) -> Result<SessionStatus, SqlError> {
    let s = parse_string(expr)?;
    SessionStatus::from_str(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

fn parse_payment(expr: &Expr) -> Result<PaymentStatus, SqlError> {
    let s = parse_string(expr)?;
    PaymentStatus::from_str(&s).ok_or_else(|| SqlError::Parse(format!("bad payment status: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingAssignment(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingAssignment(col) => write!(f, "missing assignment: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    const ULID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_mentor() {
        let sql = format!("INSERT INTO mentors (id, name) VALUES ('{ULID}', 'Asha')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertMentor { id, name } => {
                assert_eq!(id.to_string(), ULID);
                assert_eq!(name.as_deref(), Some("Asha"));
            }
            _ => panic!("expected InsertMentor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_mentor_without_name() {
        let sql = format!("INSERT INTO mentors (id) VALUES ('{ULID}')");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::InsertMentor { name: None, .. }));
    }

    #[test]
    fn parse_insert_weekly_slot() {
        let sql = format!(
            "INSERT INTO slots (id, mentor_id, weekday, specific_date, start_time, end_time) \
             VALUES ('{ULID}', '{ULID}', 1, NULL, '09:00', '12:00')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot {
                recurrence,
                start,
                end,
                ..
            } => {
                assert_eq!(recurrence, Recurrence::Weekly(Weekday::Mon));
                assert_eq!(start.as_minutes(), 540);
                assert_eq!(end.as_minutes(), 720);
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_dated_slot() {
        let sql = format!(
            "INSERT INTO slots (id, mentor_id, weekday, specific_date, start_time, end_time) \
             VALUES ('{ULID}', '{ULID}', NULL, '2026-03-14', '10:00', '11:30')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot { recurrence, .. } => {
                assert_eq!(
                    recurrence,
                    Recurrence::Date(NaiveDate::from_ymd_opt(2026, 3, 14).unwrap())
                );
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_slot_with_both_recurrences_errors() {
        let sql = format!(
            "INSERT INTO slots (id, mentor_id, weekday, specific_date, start_time, end_time) \
             VALUES ('{ULID}', '{ULID}', 1, '2026-03-14', '10:00', '11:30')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_slot_bad_weekday_errors() {
        let sql = format!(
            "INSERT INTO slots (id, mentor_id, weekday, specific_date, start_time, end_time) \
             VALUES ('{ULID}', '{ULID}', 7, NULL, '10:00', '11:30')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_booking_with_price() {
        let sql = format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\", price_cents) \
             VALUES ('{ULID}', '{ULID}', 1000, 2000, 5000)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                start,
                end,
                price_cents,
                ..
            } => {
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert_eq!(price_cents, 5000);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_price_defaults_to_zero() {
        let sql = format!(
            "INSERT INTO bookings (id, mentor_id, start, \"end\") \
             VALUES ('{ULID}', '{ULID}', 1000, 2000)"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::InsertBooking { price_cents: 0, .. }));
    }

    #[test]
    fn parse_update_mentor_name() {
        let sql = format!("UPDATE mentors SET name = 'Ravi' WHERE id = '{ULID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateMentor { name, .. } => assert_eq!(name.as_deref(), Some("Ravi")),
            _ => panic!("expected UpdateMentor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_slot() {
        let sql = format!(
            "UPDATE slots SET weekday = 3, start_time = '14:00', end_time = '16:00' \
             WHERE id = '{ULID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateSlot {
                recurrence,
                start,
                end,
                ..
            } => {
                assert_eq!(recurrence, Recurrence::Weekly(Weekday::Wed));
                assert_eq!(start.to_string(), "14:00");
                assert_eq!(end.to_string(), "16:00");
            }
            _ => panic!("expected UpdateSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_confirm_booking() {
        let sql = format!("UPDATE bookings SET status = 'confirmed' WHERE id = '{ULID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateBooking {
                id: Ulid::from_string(ULID).unwrap(),
                status: SessionStatus::Confirmed,
                payment: None,
            }
        );
    }

    #[test]
    fn parse_complete_booking_with_payment() {
        let sql = format!(
            "UPDATE bookings SET status = 'completed', payment_status = 'paid' \
             WHERE id = '{ULID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpdateBooking {
                id: Ulid::from_string(ULID).unwrap(),
                status: SessionStatus::Completed,
                payment: Some(PaymentStatus::Paid),
            }
        );
    }

    #[test]
    fn parse_update_booking_to_requested_errors() {
        let sql = format!("UPDATE bookings SET status = 'requested' WHERE id = '{ULID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_update_booking_bad_status_errors() {
        let sql = format!("UPDATE bookings SET status = 'done' WHERE id = '{ULID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ULID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteBooking { .. }));
    }

    #[test]
    fn parse_select_mentors() {
        let cmd = parse_sql("SELECT * FROM mentors").unwrap();
        assert_eq!(cmd, Command::SelectMentors);
    }

    #[test]
    fn parse_select_bookings() {
        let sql = format!("SELECT * FROM bookings WHERE mentor_id = '{ULID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectBookings { .. }));
    }

    #[test]
    fn parse_select_stats() {
        let sql = format!("SELECT * FROM mentor_stats WHERE mentor_id = '{ULID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectStats { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE mentor_id = '{ULID}' \
             AND start >= 1000 AND \"end\" <= 2000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability {
                mentor_id,
                start,
                end,
                min_duration,
            } => {
                assert_eq!(mentor_id.to_string(), ULID);
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
                assert_eq!(min_duration, None);
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_min_duration() {
        let sql = format!(
            "SELECT * FROM availability WHERE mentor_id = '{ULID}' \
             AND start >= 1000 AND \"end\" <= 2000 AND min_duration = 1800000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { min_duration, .. } => {
                assert_eq!(min_duration, Some(1800000));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen_and_unlisten() {
        let cmd = parse_sql(&format!("LISTEN mentor_{ULID}")).unwrap();
        assert_eq!(
            cmd,
            Command::Listen {
                channel: format!("mentor_{ULID}"),
            }
        );
        let cmd = parse_sql(&format!("UNLISTEN mentor_{ULID};")).unwrap();
        assert_eq!(
            cmd,
            Command::Unlisten {
                channel: format!("mentor_{ULID}"),
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ULID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertNanny {
        nanny: Nanny,
    },
    SetAvailability {
        nanny_id: NannyId,
        available: bool,
    },
    SetNannyStatus {
        nanny_id: NannyId,
        status: NannyStatus,
    },
    InsertBlockedDate {
        nanny_id: NannyId,
        date: NaiveDate,
        reason: Option<String>,
    },
    DeleteBlockedDate {
        nanny_id: NannyId,
        date: NaiveDate,
    },
    InsertBooking {
        request: BookingRequest,
    },
    SetBookingStatus {
        booking_id: Ulid,
        status: BookingStatus,
    },
    RescheduleBooking {
        booking_id: Ulid,
        start_time: String,
        end_time: Option<String>,
    },
    ClockIn {
        booking_id: Ulid,
        at: String,
    },
    ClockOut {
        booking_id: Ulid,
        at: String,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectNannies,
    SelectBlockedDates {
        nanny_id: NannyId,
    },
    SelectBookings {
        nanny_id: Option<NannyId>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        live_only: bool,
    },
    SelectEligibleNannies {
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: String,
        end_time: Option<String>,
        hotel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn require(table: &'static str, values: &[Expr], n: usize) -> Result<(), SqlError> {
    if values.len() < n {
        return Err(SqlError::WrongArity(table, n, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "nannies" => {
            require("nannies", &values, 2)?;
            let status = match values.get(2) {
                Some(v) => parse_enum_or_null(v)?.unwrap_or(NannyStatus::Active),
                None => NannyStatus::Active,
            };
            let available = match values.get(3) {
                Some(v) => parse_bool(v)?,
                None => true,
            };
            Ok(Command::InsertNanny {
                nanny: Nanny {
                    id: parse_i64(&values[0])?,
                    name: parse_string(&values[1])?,
                    status,
                    available,
                },
            })
        }
        "nanny_availability" => {
            require("nanny_availability", &values, 2)?;
            Ok(Command::SetAvailability {
                nanny_id: parse_i64(&values[0])?,
                available: parse_bool(&values[1])?,
            })
        }
        "nanny_status" => {
            require("nanny_status", &values, 2)?;
            Ok(Command::SetNannyStatus {
                nanny_id: parse_i64(&values[0])?,
                status: parse_enum(&values[1])?,
            })
        }
        "blocked_dates" => {
            require("blocked_dates", &values, 2)?;
            Ok(Command::InsertBlockedDate {
                nanny_id: parse_i64(&values[0])?,
                date: parse_date(&values[1])?,
                reason: optional(&values, 2, parse_string_or_null)?,
            })
        }
        "bookings" => {
            require("bookings", &values, 7)?;
            Ok(Command::InsertBooking {
                request: BookingRequest {
                    id: parse_ulid_or_null(&values[0])?.unwrap_or_else(Ulid::new),
                    nanny_id: parse_i64_or_null(&values[1])?,
                    client_id: parse_i64(&values[2])?,
                    client_name: parse_string(&values[3])?,
                    date: parse_date(&values[4])?,
                    end_date: parse_date_or_null(&values[5])?,
                    start_time: parse_string(&values[6])?,
                    end_time: optional(&values, 7, parse_string_or_null)?,
                    hotel: optional(&values, 8, parse_string_or_null)?,
                    notes: optional(&values, 9, parse_string_or_null)?,
                },
            })
        }
        "booking_status" => {
            require("booking_status", &values, 2)?;
            Ok(Command::SetBookingStatus {
                booking_id: parse_ulid(&values[0])?,
                status: parse_enum(&values[1])?,
            })
        }
        "booking_times" => {
            require("booking_times", &values, 2)?;
            Ok(Command::RescheduleBooking {
                booking_id: parse_ulid(&values[0])?,
                start_time: parse_string(&values[1])?,
                end_time: optional(&values, 2, parse_string_or_null)?,
            })
        }
        "clock_ins" => {
            require("clock_ins", &values, 2)?;
            Ok(Command::ClockIn {
                booking_id: parse_ulid(&values[0])?,
                at: parse_string(&values[1])?,
            })
        }
        "clock_outs" => {
            require("clock_outs", &values, 2)?;
            Ok(Command::ClockOut {
                booking_id: parse_ulid(&values[0])?,
                at: parse_string(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking {
            id: extract_where_id(&delete.selection)?,
        }),
        "blocked_dates" => {
            let filters = where_filters(&delete.selection)?;
            Ok(Command::DeleteBlockedDate {
                nanny_id: parse_i64(filter(&filters, "nanny_id")?)?,
                date: parse_date(filter(&filters, "blocked_date")?)?,
            })
        }
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
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "nannies" => Ok(Command::SelectNannies),
        "blocked_dates" => Ok(Command::SelectBlockedDates {
            nanny_id: parse_i64(filter(&filters, "nanny_id")?)?,
        }),
        "bookings" => {
            let start_date = optional_filter(&filters, "start_date", parse_date)?;
            let end_date = optional_filter(&filters, "end_date", parse_date)?;
            if end_date.is_some() && start_date.is_none() {
                return Err(SqlError::MissingFilter("start_date"));
            }
            Ok(Command::SelectBookings {
                nanny_id: optional_filter(&filters, "nanny_id", parse_i64)?,
                start_date,
                end_date,
                live_only: optional_filter(&filters, "live", parse_bool)?.unwrap_or(false),
            })
        }
        "eligible_nannies" => Ok(Command::SelectEligibleNannies {
            start_date: parse_date(filter(&filters, "start_date")?)?,
            end_date: optional_filter(&filters, "end_date", parse_date)?,
            start_time: parse_string(filter(&filters, "start_time")?)?,
            end_time: optional_filter(&filters, "end_time", parse_string)?,
            hotel: optional_filter(&filters, "hotel", parse_string)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE ─────────────────────────────────────────────────────

/// Flatten `a = 1 AND b = 2 ...` into `(column, value)` pairs. Anything else
/// is rejected rather than silently ignored.
fn where_filters(selection: &Option<Expr>) -> Result<Vec<(String, &Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_eq<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq(left, out)?;
            collect_eq(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn filter<'a>(filters: &[(String, &'a Expr)], col: &'static str) -> Result<&'a Expr, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == col)
        .map(|(_, e)| *e)
        .ok_or(SqlError::MissingFilter(col))
}

fn optional_filter<T>(
    filters: &[(String, &Expr)],
    col: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    filters
        .iter()
        .find(|(c, _)| c == col)
        .map(|(_, e)| parse(e))
        .transpose()
}

fn optional<T>(
    values: &[Expr],
    index: usize,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(index) {
        Some(v) => parse(v),
        None => Ok(None),
    }
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
        SetExpr::Values(values) => match values.rows.len() {
            0 => Err(SqlError::Parse("empty VALUES".into())),
            1 => Ok(values.rows[0].clone()),
            n => Err(SqlError::Unsupported(format!("{n} rows in one INSERT"))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
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

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

/// Calendar dates travel as `'YYYY-MM-DD'` strings.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_enum<T: std::str::FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_enum_or_null<T: std::str::FromStr<Err = String>>(
    expr: &Expr,
) -> Result<Option<T>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_enum(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
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
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

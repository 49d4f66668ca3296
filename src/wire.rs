use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::auth::CarebookAuthSource;
use crate::engine::{BookingFilter, BookingOutcome, Engine, EngineError, ErrorClass, Rejection};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::window::expand_date_range;

pub struct CarebookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CarebookQueryParser>,
}

impl CarebookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CarebookQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertNanny { nanny } => {
                engine.register_nanny(nanny).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::SetAvailability {
                nanny_id,
                available,
            } => {
                engine
                    .set_nanny_available(nanny_id, available)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::SetNannyStatus { nanny_id, status } => {
                engine
                    .set_nanny_status(nanny_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertBlockedDate {
                nanny_id,
                date,
                reason,
            } => {
                engine
                    .block_date(nanny_id, date, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::DeleteBlockedDate { nanny_id, date } => {
                engine
                    .unblock_date(nanny_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { request } => {
                match engine.create_booking(request).await.map_err(engine_err)? {
                    BookingOutcome::Assigned(booking) => Ok(vec![booking_rows(vec![booking])?]),
                    BookingOutcome::Rejected(rejection) => Err(rejection_err(&rejection)),
                }
            }
            Command::SetBookingStatus { booking_id, status } => {
                let booking = engine
                    .set_booking_status(booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(vec![booking])?])
            }
            Command::RescheduleBooking {
                booking_id,
                start_time,
                end_time,
            } => {
                let booking = engine
                    .reschedule_booking(booking_id, start_time, end_time)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(vec![booking])?])
            }
            Command::ClockIn { booking_id, at } => {
                let booking = engine
                    .record_clock_in(booking_id, at)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(vec![booking])?])
            }
            Command::ClockOut { booking_id, at } => {
                let booking = engine
                    .record_clock_out(booking_id, at)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![booking_rows(vec![booking])?])
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectNannies => {
                let nannies = engine.list_nannies().await;
                Ok(vec![nanny_rows(nannies)?])
            }
            Command::SelectBlockedDates { nanny_id } => {
                let entries = engine.blocked_dates(nanny_id).await.map_err(engine_err)?;
                Ok(vec![blocked_date_rows(entries)?])
            }
            Command::SelectBookings {
                nanny_id,
                start_date,
                end_date,
                live_only,
            } => {
                let filter = BookingFilter {
                    nanny_id,
                    days: start_date.map(|start| expand_date_range(start, end_date)),
                    live_only,
                };
                let bookings = engine.bookings(&filter).await;
                Ok(vec![booking_rows(bookings)?])
            }
            Command::SelectEligibleNannies {
                start_date,
                end_date,
                start_time,
                end_time,
                hotel,
            } => {
                let candidates = engine
                    .eligible_nannies(
                        start_date,
                        end_date,
                        &start_time,
                        end_time.as_deref(),
                        hotel.as_deref(),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![candidate_rows(candidates)?])
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn nanny_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("available", Type::BOOL),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("nanny_id", Type::INT8),
        field("client_id", Type::INT8),
        field("client_name", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("hotel", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("clock_in", Type::VARCHAR),
        field("clock_out", Type::VARCHAR),
    ]
}

fn blocked_date_schema() -> Vec<FieldInfo> {
    vec![
        field("nanny_id", Type::INT8),
        field("blocked_date", Type::VARCHAR),
        field("reason", Type::VARCHAR),
    ]
}

fn candidate_schema() -> Vec<FieldInfo> {
    vec![
        field("nanny_id", Type::INT8),
        field("booking_count", Type::INT8),
        field("same_hotel", Type::BOOL),
    ]
}

/// Result columns for a statement, judged from its text so it works before
/// parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let reads = lower.trim_start().starts_with("select");
    if lower.contains("eligible_nannies") {
        candidate_schema()
    } else if reads && lower.contains("blocked_dates") {
        blocked_date_schema()
    } else if reads && lower.contains("nannies") {
        nanny_schema()
    } else if (lower.contains("bookings") && (reads || lower.trim_start().starts_with("insert")))
        || ["booking_status", "booking_times", "clock_ins", "clock_outs"]
            .iter()
            .any(|t| lower.contains(t))
    {
        booking_schema()
    } else {
        vec![]
    }
}

fn nanny_rows(nannies: Vec<Nanny>) -> PgWireResult<Response> {
    let schema = Arc::new(nanny_schema());
    let rows: Vec<PgWireResult<_>> = nannies
        .into_iter()
        .map(|n| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&n.id)?;
            encoder.encode_field(&n.name)?;
            encoder.encode_field(&n.status.to_string())?;
            encoder.encode_field(&n.available)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.nanny_id)?;
            encoder.encode_field(&b.client_id)?;
            encoder.encode_field(&b.client_name)?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.end_date.map(|d| d.to_string()))?;
            encoder.encode_field(&b.start_time)?;
            encoder.encode_field(&b.end_time)?;
            encoder.encode_field(&b.status.to_string())?;
            encoder.encode_field(&b.hotel)?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.clock_in)?;
            encoder.encode_field(&b.clock_out)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn blocked_date_rows(entries: Vec<BlockedDate>) -> PgWireResult<Response> {
    let schema = Arc::new(blocked_date_schema());
    let rows: Vec<PgWireResult<_>> = entries
        .into_iter()
        .map(|e| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&e.nanny_id)?;
            encoder.encode_field(&e.date.to_string())?;
            encoder.encode_field(&e.reason)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn candidate_rows(candidates: Vec<Candidate>) -> PgWireResult<Response> {
    let schema = Arc::new(candidate_schema());
    let rows: Vec<PgWireResult<_>> = candidates
        .into_iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.nanny_id)?;
            encoder.encode_field(&(c.booking_count as i64))?;
            encoder.encode_field(&c.same_hotel)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for CarebookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CarebookQueryParser;

#[async_trait]
impl QueryParser for CarebookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CarebookHandler {
    type Statement = String;
    type QueryParser = CarebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("58000", "statement produced no response".into()))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if let Ok(n) = sql[start..end].parse::<usize>() {
            max = max.max(n);
        }
        i = end.max(i + 1);
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CarebookFactory {
    handler: Arc<CarebookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<CarebookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl CarebookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(CarebookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                CarebookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CarebookFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
) -> std::io::Result<()> {
    let factory = Arc::new(CarebookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn class_code(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "22023",
        ErrorClass::Capacity => "53000",
        ErrorClass::Conflict => "23P01",
        ErrorClass::Data => "58000",
    }
}

/// Conflicts carry what they collided with as JSON after the summary.
fn rejection_err(rejection: &Rejection) -> PgWireError {
    let detail = match rejection {
        Rejection::Conflict { bookings, .. } => serde_json::to_string(bookings).ok(),
        Rejection::DateBlocked { dates, .. } => serde_json::to_string(dates).ok(),
        _ => None,
    };
    let message = match detail {
        Some(json) => format!("{rejection}: {json}"),
        None => rejection.to_string(),
    };
    user_error(class_code(rejection.class()), message)
}

fn engine_err(e: EngineError) -> PgWireError {
    match e {
        EngineError::Rejected(r) => rejection_err(&r),
        EngineError::AlreadyExists(_) => user_error("23505", e.to_string()),
        other => user_error(class_code(other.class()), other.to_string()),
    }
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM nannies"), 0);
        assert_eq!(
            count_params("INSERT INTO clock_ins (booking_id, at) VALUES ($2, $1)"),
            2
        );
        assert_eq!(count_params("SELECT $10, $3"), 10);
        assert_eq!(count_params("trailing $"), 0);
    }

    #[test]
    fn schemas_follow_the_statement() {
        let describe = |sql: &str| format!("{:?}", result_schema(sql));
        assert!(describe("SELECT * FROM eligible_nannies WHERE start_date = $1").contains("booking_count"));
        assert!(describe("select * from nannies").contains("available"));
        assert!(describe("SELECT * FROM blocked_dates WHERE nanny_id = 1").contains("blocked_date"));
        assert_eq!(result_schema("INSERT INTO bookings VALUES ($1)").len(), 13);
        assert_eq!(result_schema("INSERT INTO clock_outs VALUES ($1, $2)").len(), 13);
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
        assert!(result_schema("INSERT INTO nannies (id, name) VALUES (1, 'a')").is_empty());
    }

    #[test]
    fn class_codes_are_distinct() {
        let codes = [
            class_code(ErrorClass::Validation),
            class_code(ErrorClass::Capacity),
            class_code(ErrorClass::Conflict),
            class_code(ErrorClass::Data),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::ParkspotAuthSource;
use crate::engine::{Engine, EngineError, ErrorClass, NewSpot, Reconciliation};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct ParkspotHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ParkspotQueryParser>,
}

type Row = PgWireResult<pgwire::messages::data::DataRow>;

fn rows_response(schema: Vec<FieldInfo>, rows: Vec<Row>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

impl ParkspotHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ParkspotQueryParser),
        }
    }

    /// The session user name is the caller's user id.
    fn caller_id<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("session user must be a user id, got {user:?}"),
            )))
        })
    }

    async fn run(&self, caller: Ulid, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!("{label} from {caller} failed: {e:?}");
        }
        result
    }

    async fn execute_command(&self, caller: Ulid, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { id, role, name } => {
                engine.register_user(caller, id, role, name).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertSpot {
                id,
                hourly_price,
                latitude,
                longitude,
                vehicle_capacity,
                amenities,
            } => {
                let new = NewSpot { id, hourly_price, latitude, longitude, vehicle_capacity, amenities };
                engine.list_spot(caller, new).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::ChangeSpot { spot_id, changes } => {
                engine.change_spot(caller, spot_id, changes).await.map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteSpot { id } => {
                engine.delist_spot(caller, id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectSpots { id } => {
                let spots = match id {
                    Some(id) => vec![engine.spot(&id).await.map_err(engine_err)?],
                    None => engine.list_spots().await,
                };
                let schema = spots_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = spots
                    .iter()
                    .map(|s| {
                        let amenities = serde_json::to_string(&s.amenities)
                            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.owner_id.to_string())?;
                        encoder.encode_field(&s.hourly_price)?;
                        encoder.encode_field(&s.latitude)?;
                        encoder.encode_field(&s.longitude)?;
                        encoder.encode_field(&i64::from(s.vehicle_capacity))?;
                        encoder.encode_field(&amenities)?;
                        encoder.encode_field(&s.status.as_str())?;
                        encoder.encode_field(&s.is_available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::SelectRating { spot_id } => {
                let summary = engine.rating_summary(spot_id).await.map_err(engine_err)?;
                let schema = rating_schema();
                let mut encoder = DataRowEncoder::new(Arc::new(schema.clone()));
                encoder.encode_field(&spot_id.to_string())?;
                encoder.encode_field(&(summary.count as i64))?;
                encoder.encode_field(&summary.average)?;
                Ok(rows_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::InsertAvailability { id, spot_id, start, end } => {
                engine
                    .declare_availability(caller, id, spot_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::ChangeAvailability { slot_id, update } => {
                engine
                    .update_availability(caller, slot_id, update)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DeleteAvailability { id } => {
                engine.remove_availability(caller, id).await.map_err(engine_err)?;
                Ok(deleted())
            }
            Command::SelectAvailability { spot_id, start, end } => {
                let slots = engine
                    .query_availability(spot_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = availability_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&slot.id.to_string())?;
                        encoder.encode_field(&slot.spot_id.to_string())?;
                        encoder.encode_field(&slot.span.start)?;
                        encoder.encode_field(&slot.span.end)?;
                        encoder.encode_field(&slot.is_booked)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::SelectOpenWindows { spot_id, start, end } => {
                let windows = engine.open_windows(spot_id, start, end).await.map_err(engine_err)?;
                let schema = open_windows_schema();
                let shared = Arc::new(schema.clone());
                let sid = spot_id.to_string();
                let rows: Vec<Row> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&sid)?;
                        encoder.encode_field(&w.start)?;
                        encoder.encode_field(&w.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::InsertBooking { id, spot_id, start, end, total_price } => {
                engine
                    .create_booking(caller, id, spot_id, start, end, total_price)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::TransitionBooking { booking_id, status } => {
                engine
                    .transition_booking(caller, booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectBookings { by_id, filter } => {
                let bookings = match (by_id, filter) {
                    (Some(id), _) => vec![engine.booking(caller, id).await.map_err(engine_err)?],
                    (None, Some(filter)) => engine.bookings(caller, filter).await.map_err(engine_err)?,
                    (None, None) => Vec::new(),
                };
                let schema = bookings_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = bookings.iter().map(|b| encode_booking(&shared, b)).collect();
                Ok(rows_response(schema, rows))
            }
            Command::InitiatePayment { booking_id } => {
                let intent = engine.initiate_payment(caller, booking_id).await.map_err(engine_err)?;
                let schema = payment_intent_schema();
                let mut encoder = DataRowEncoder::new(Arc::new(schema.clone()));
                encoder.encode_field(&booking_id.to_string())?;
                encoder.encode_field(&intent.reference)?;
                encoder.encode_field(&intent.amount)?;
                Ok(rows_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::RecordPaymentOutcome { booking_id, reference, outcome } => {
                let verdict = engine
                    .record_payment_outcome(caller, booking_id, &reference, outcome)
                    .await
                    .map_err(engine_err)?;
                reconciliation_response(booking_id, &reference, verdict)
            }
            Command::ConfirmPayment { booking_id, reference } => {
                let verdict = engine
                    .confirm_payment(caller, booking_id, &reference)
                    .await
                    .map_err(engine_err)?;
                reconciliation_response(booking_id, &reference, verdict)
            }
            Command::SetPaymentStatus { booking_id, status } => {
                engine
                    .set_payment_status(caller, booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectTransactions { booking_id } => {
                let txs = engine.transactions(caller, booking_id).await.map_err(engine_err)?;
                let schema = transactions_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = txs
                    .iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.booking_id.map(|id| id.to_string()))?;
                        encoder.encode_field(&t.kind.as_str())?;
                        encoder.encode_field(&t.amount)?;
                        encoder.encode_field(&t.status.as_str())?;
                        encoder.encode_field(&t.reference)?;
                        encoder.encode_field(&t.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::InsertReview { id, booking_id, rating, comment } => {
                engine
                    .post_review(caller, id, booking_id, rating, comment)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectReviews { spot_id } => {
                let reviews = engine.reviews_for_spot(spot_id).await.map_err(engine_err)?;
                let schema = reviews_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = reviews
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.booking_id.to_string())?;
                        encoder.encode_field(&r.spot_id.to_string())?;
                        encoder.encode_field(&r.driver_id.to_string())?;
                        encoder.encode_field(&i64::from(r.rating))?;
                        encoder.encode_field(&r.comment)?;
                        encoder.encode_field(&r.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::SelectNotifications => {
                let notes = engine.notifications(caller).map_err(engine_err)?;
                let schema = notifications_schema();
                let shared = Arc::new(schema.clone());
                let rows: Vec<Row> = notes
                    .iter()
                    .map(|n| {
                        let mut encoder = DataRowEncoder::new(shared.clone());
                        encoder.encode_field(&n.id.to_string())?;
                        encoder.encode_field(&n.entity_kind.as_str())?;
                        encoder.encode_field(&n.entity_id.to_string())?;
                        encoder.encode_field(&n.message)?;
                        encoder.encode_field(&n.is_read)?;
                        encoder.encode_field(&n.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(rows_response(schema, rows))
            }
            Command::MarkNotificationRead { id } => {
                engine.mark_notification_read(caller, id).map_err(engine_err)?;
                Ok(inserted())
            }
        }
    }
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> Row {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.spot_id.to_string())?;
    encoder.encode_field(&b.driver_id.to_string())?;
    encoder.encode_field(&b.homeowner_id.to_string())?;
    encoder.encode_field(&b.span.start)?;
    encoder.encode_field(&b.span.end)?;
    encoder.encode_field(&b.total_price)?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.payment_status.as_str())?;
    encoder.encode_field(&b.gateway_reference)?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&b.updated_at)?;
    encoder.encode_field(&b.driver_check_in_time)?;
    encoder.encode_field(&b.driver_check_out_time)?;
    encoder.encode_field(&b.homeowner_confirm_time)?;
    encoder.encode_field(&b.homeowner_reject_time)?;
    Ok(encoder.take_row())
}

fn reconciliation_response(booking_id: Ulid, reference: &str, verdict: Reconciliation) -> PgWireResult<Response> {
    let schema = reconciliation_schema();
    let mut encoder = DataRowEncoder::new(Arc::new(schema.clone()));
    encoder.encode_field(&booking_id.to_string())?;
    encoder.encode_field(&reference)?;
    encoder.encode_field(&verdict.as_str())?;
    Ok(rows_response(schema, vec![Ok(encoder.take_row())]))
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn float(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::FLOAT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn spots_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("owner_id"),
        int("hourly_price"),
        float("latitude"),
        float("longitude"),
        int("vehicle_capacity"),
        text("amenities_json"),
        text("status"),
        boolean("is_available"),
    ]
}

fn rating_schema() -> Vec<FieldInfo> {
    vec![text("spot_id"), int("review_count"), float("average_rating")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("spot_id"), int("start"), int("end"), boolean("is_booked")]
}

fn open_windows_schema() -> Vec<FieldInfo> {
    vec![text("spot_id"), int("start"), int("end")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("spot_id"),
        text("driver_id"),
        text("homeowner_id"),
        int("start"),
        int("end"),
        int("total_price"),
        text("status"),
        text("payment_status"),
        text("gateway_reference"),
        int("created_at"),
        int("updated_at"),
        int("driver_check_in_time"),
        int("driver_check_out_time"),
        int("homeowner_confirm_time"),
        int("homeowner_reject_time"),
    ]
}

fn payment_intent_schema() -> Vec<FieldInfo> {
    vec![text("booking_id"), text("reference"), int("amount")]
}

fn reconciliation_schema() -> Vec<FieldInfo> {
    vec![text("booking_id"), text("reference"), text("result")]
}

fn transactions_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("booking_id"),
        text("kind"),
        int("amount"),
        text("status"),
        text("reference"),
        int("created_at"),
    ]
}

fn reviews_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("booking_id"),
        text("spot_id"),
        text("driver_id"),
        int("rating"),
        text("comment"),
        int("created_at"),
    ]
}

fn notifications_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("entity_kind"),
        text("entity_id"),
        text("message"),
        boolean("is_read"),
        int("created_at"),
    ]
}

/// Row layout a statement returns; empty for plain commands.
fn schema_for(sql_text: &str) -> Vec<FieldInfo> {
    match sql::result_table(sql_text).as_deref() {
        Some("spots") => spots_schema(),
        Some("spot_ratings") => rating_schema(),
        Some("availability") => availability_schema(),
        Some("open_windows") => open_windows_schema(),
        Some("bookings") => bookings_schema(),
        Some("payment_intents") => payment_intent_schema(),
        Some("payment_outcomes" | "payment_confirmations") => reconciliation_schema(),
        Some("transactions") => transactions_schema(),
        Some("reviews") => reviews_schema(),
        Some("notifications") => notifications_schema(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for ParkspotHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = self.caller_id(client)?;
        Ok(vec![self.run(caller, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkspotQueryParser;

#[async_trait]
impl QueryParser for ParkspotQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkspotHandler {
    type Statement = String;
    type QueryParser = ParkspotQueryParser;

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
        let caller = self.caller_id(client)?;
        let sql_text = substitute_params(portal);
        self.run(caller, &sql_text).await
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
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
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

pub struct ParkspotFactory {
    handler: Arc<ParkspotHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<ParkspotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ParkspotFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ParkspotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ParkspotHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkspotFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ParkspotFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Gateway(_) => "58000",
        _ => match e.class() {
            ErrorClass::Validation => "22023",
            ErrorClass::NotFound => "02000",
            ErrorClass::Conflict => "23P01",
            ErrorClass::Forbidden => "42501",
            ErrorClass::InvalidTransition => "55000",
            ErrorClass::Upstream => "58000",
            ErrorClass::Storage => "58030",
        },
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

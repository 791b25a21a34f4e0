use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Table};
use crate::tenant::TenantManager;

pub struct RoomLedgerHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoomLedgerQueryParser>,
}

impl RoomLedgerHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoomLedgerQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse and run one statement, recording RED metrics for it.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertUser {
                name,
                email,
                is_admin,
                returning,
            } => {
                let user = engine.register_user(name, email, is_admin).await.map_err(engine_err)?;
                Ok(inserted(returning, Table::Users, vec![user_row(&user)]))
            }
            Command::InsertFloor { name, rooms, returning } => {
                let provisioned = engine.create_floor(name, rooms).await.map_err(engine_err)?;
                Ok(inserted(returning, Table::Floors, vec![floor_row(&provisioned.floor)]))
            }
            Command::InsertRoomVersion {
                room_id,
                proposal,
                returning,
            } => {
                let outcome = engine.resolve_update(room_id, proposal).await.map_err(engine_err)?;
                // The stale attempt is already in the ledger; the client sees
                // a serialization failure carrying the baseline.
                let (_room, entry) = outcome.into_applied().map_err(engine_err)?;
                Ok(inserted(returning, Table::RoomVersions, vec![version_row(&entry)]))
            }
            Command::InsertBooking {
                room_id,
                user_id,
                floor_id,
                returning,
            } => {
                let booked = engine.book(room_id, user_id, floor_id).await.map_err(engine_err)?;
                Ok(inserted(returning, Table::Bookings, vec![booking_row(&booked.booking)]))
            }
            Command::SelectUser { id } => {
                let rows = match engine.get_user(id) {
                    Ok(user) => vec![user_row(&user)],
                    Err(EngineError::NotFound { .. }) => vec![],
                    Err(e) => return Err(engine_err(e)),
                };
                Ok(query_response(Table::Users, rows))
            }
            Command::SelectFloors { id, name } => {
                let floors = match (id, name) {
                    (Some(id), name) => engine
                        .get_floor(id)
                        .ok()
                        .filter(|f| name.as_deref().is_none_or(|n| f.name == n))
                        .into_iter()
                        .collect(),
                    (None, Some(name)) => engine.floor_by_name(&name).into_iter().collect(),
                    (None, None) => engine.list_floors(),
                };
                Ok(query_response(Table::Floors, floors.iter().map(floor_row).collect()))
            }
            Command::SelectRooms { id, floor_id } => {
                let rooms = match id {
                    Some(id) => match engine.get_room(id).await {
                        Ok(room) if floor_id.is_none_or(|f| f == room.floor_id) => vec![room],
                        Ok(_) | Err(EngineError::NotFound { .. }) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_rooms(floor_id).await,
                };
                let rows = rooms
                    .iter()
                    .map(|room| {
                        let floor_name = engine.get_floor(room.floor_id).ok().map(|f| f.name);
                        room_row(room, floor_name)
                    })
                    .collect();
                Ok(query_response(Table::Rooms, rows))
            }
            Command::SelectRoomVersions { room_id } => {
                let entries = engine.versions(room_id).await.map_err(engine_err)?;
                Ok(query_response(Table::RoomVersions, entries.iter().map(version_row).collect()))
            }
            Command::SelectBookings { user_id, room_id } => {
                let bookings = match (user_id, room_id) {
                    (Some(uid), rid) => {
                        let mut bookings = engine.user_bookings(uid).await;
                        if let Some(rid) = rid {
                            bookings.retain(|b| b.room_id == rid);
                        }
                        bookings
                    }
                    (None, Some(rid)) => engine.room_bookings(rid).await.map_err(engine_err)?,
                    (None, None) => vec![],
                };
                Ok(query_response(Table::Bookings, bookings.iter().map(booking_row).collect()))
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

/// A row before encoding: one optional text-encodable value per column.
enum Cell {
    Text(String),
    Int(Option<i64>),
    Bool(bool),
}

type Row = Vec<Cell>;

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn schema(table: Table) -> Vec<FieldInfo> {
    match table {
        Table::Users => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("email", Type::VARCHAR),
            field("is_admin", Type::BOOL),
        ],
        Table::Floors => vec![
            field("id", Type::VARCHAR),
            field("name", Type::VARCHAR),
            field("rooms", Type::INT8),
            field("created_at", Type::INT8),
        ],
        Table::Rooms => vec![
            field("id", Type::VARCHAR),
            field("floor_id", Type::VARCHAR),
            field("floor_name", Type::VARCHAR),
            field("capacity", Type::INT8),
            field("availability", Type::BOOL),
            field("last_booked_at", Type::INT8),
        ],
        Table::RoomVersions => vec![
            field("room_id", Type::VARCHAR),
            field("user_id", Type::VARCHAR),
            field("floor_id", Type::VARCHAR),
            field("capacity", Type::INT8),
            field("availability", Type::BOOL),
            field("as_of", Type::INT8),
            field("recorded_at", Type::INT8),
            field("accepted", Type::BOOL),
        ],
        Table::Bookings => vec![
            field("id", Type::VARCHAR),
            field("user_id", Type::VARCHAR),
            field("floor_id", Type::VARCHAR),
            field("room_id", Type::VARCHAR),
            field("booked_at", Type::INT8),
        ],
    }
}

fn user_row(u: &UserInfo) -> Row {
    vec![
        Cell::Text(u.id.to_string()),
        Cell::Text(u.name.clone()),
        Cell::Text(u.email.clone()),
        Cell::Bool(u.is_admin),
    ]
}

fn floor_row(f: &FloorInfo) -> Row {
    vec![
        Cell::Text(f.id.to_string()),
        Cell::Text(f.name.clone()),
        Cell::Int(Some(i64::from(f.rooms))),
        Cell::Int(Some(f.created_at)),
    ]
}

fn room_row(r: &RoomInfo, floor_name: Option<String>) -> Row {
    vec![
        Cell::Text(r.id.to_string()),
        Cell::Text(r.floor_id.to_string()),
        Cell::Text(floor_name.unwrap_or_default()),
        Cell::Int(Some(i64::from(r.capacity))),
        Cell::Bool(r.availability),
        Cell::Int(r.last_booked_at),
    ]
}

fn version_row(e: &VersionEntry) -> Row {
    vec![
        Cell::Text(e.room_id.to_string()),
        Cell::Text(e.user_id.to_string()),
        Cell::Text(e.floor_id.to_string()),
        Cell::Int(Some(i64::from(e.capacity))),
        Cell::Bool(e.availability),
        Cell::Int(Some(e.as_of)),
        Cell::Int(Some(e.recorded_at)),
        Cell::Bool(e.accepted),
    ]
}

fn booking_row(b: &Booking) -> Row {
    vec![
        Cell::Text(b.id.to_string()),
        Cell::Text(b.user_id.to_string()),
        Cell::Text(b.floor_id.to_string()),
        Cell::Text(b.room_id.to_string()),
        Cell::Int(Some(b.booked_at)),
    ]
}

fn encode_row(schema: &Arc<Vec<FieldInfo>>, row: Row) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    for cell in row {
        match cell {
            Cell::Text(s) => encoder.encode_field(&s)?,
            Cell::Int(n) => encoder.encode_field(&n)?,
            Cell::Bool(b) => encoder.encode_field(&b)?,
        }
    }
    Ok(encoder.take_row())
}

fn query_response(table: Table, rows: Vec<Row>) -> Response {
    let schema = Arc::new(schema(table));
    let encoded: Vec<PgWireResult<DataRow>> = rows.into_iter().map(|row| encode_row(&schema, row)).collect();
    Response::Query(QueryResponse::new(schema, stream::iter(encoded)))
}

/// INSERT result: the inserted rows with RETURNING, a command tag otherwise.
fn inserted(returning: bool, table: Table, rows: Vec<Row>) -> Response {
    if returning {
        query_response(table, rows)
    } else {
        Response::Execution(Tag::new("INSERT").with_rows(rows.len()))
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomLedgerHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomLedgerQueryParser;

#[async_trait]
impl QueryParser for RoomLedgerQueryParser {
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
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomLedgerHandler {
    type Statement = String;
    type QueryParser = RoomLedgerQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, describe(&target.statement)))
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
        Ok(DescribePortalResponse::new(describe(&target.statement.statement)))
    }
}

/// Result columns of a statement that may still contain `$N` placeholders,
/// so it can't go through the full parser.
fn describe(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let returns_rows = upper.trim_start().starts_with("SELECT") || upper.contains("RETURNING");
    match target_table(sql) {
        Some(table) if returns_rows => schema(table),
        _ => vec![],
    }
}

/// Table named right after the first FROM or INTO keyword.
fn target_table(sql: &str) -> Option<Table> {
    let mut words = sql.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("FROM") || word.eq_ignore_ascii_case("INTO") {
            let name = words.next()?;
            let name = name
                .split(|c: char| c == '(' || c == ';')
                .next()
                .unwrap_or(name)
                .trim_matches('"');
            return Table::from_name(name);
        }
    }
    None
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
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute `$N` placeholders with bound parameter values (text format).
/// One pass over the statement text: spliced values are never rescanned, so
/// a value containing `$1` stays literal.
fn substitute_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every user and database.
#[derive(Debug)]
pub struct SharedPasswordAuthSource {
    password: String,
}

impl SharedPasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomLedgerFactory {
    handler: Arc<RoomLedgerHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomLedgerFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(RoomLedgerHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPasswordAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomLedgerFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(RoomLedgerFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

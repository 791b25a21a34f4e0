use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        name: String,
        email: String,
        is_admin: bool,
        returning: bool,
    },
    InsertFloor {
        name: String,
        rooms: u32,
        returning: bool,
    },
    /// Proposed room edit; resolved against the room's version ledger.
    InsertRoomVersion {
        room_id: Ulid,
        proposal: RoomProposal,
        returning: bool,
    },
    InsertBooking {
        room_id: Ulid,
        user_id: Ulid,
        floor_id: Ulid,
        returning: bool,
    },
    SelectUser {
        id: Ulid,
    },
    SelectFloors {
        id: Option<Ulid>,
        name: Option<String>,
    },
    SelectRooms {
        id: Option<Ulid>,
        floor_id: Option<Ulid>,
    },
    SelectRoomVersions {
        room_id: Ulid,
    },
    SelectBookings {
        user_id: Option<Ulid>,
        room_id: Option<Ulid>,
    },
}

/// Tables whose rows a command can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    Floors,
    Rooms,
    RoomVersions,
    Bookings,
}

impl Table {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "users" => Some(Table::Users),
            "floors" => Some(Table::Floors),
            "rooms" => Some(Table::Rooms),
            "room_versions" => Some(Table::RoomVersions),
            "bookings" => Some(Table::Bookings),
            _ => None,
        }
    }
}

impl Command {
    /// Table of the rows this command produces, if it produces any.
    pub fn result_table(&self) -> Option<Table> {
        match self {
            Command::InsertUser { returning, .. } => returning.then_some(Table::Users),
            Command::InsertFloor { returning, .. } => returning.then_some(Table::Floors),
            Command::InsertRoomVersion { returning, .. } => returning.then_some(Table::RoomVersions),
            Command::InsertBooking { returning, .. } => returning.then_some(Table::Bookings),
            Command::SelectUser { .. } => Some(Table::Users),
            Command::SelectFloors { .. } => Some(Table::Floors),
            Command::SelectRooms { .. } => Some(Table::Rooms),
            Command::SelectRoomVersions { .. } => Some(Table::RoomVersions),
            Command::SelectBookings { .. } => Some(Table::Bookings),
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();
    let row = InsertRow::new(&table, insert)?;

    match table.as_str() {
        "users" => Ok(Command::InsertUser {
            name: parse_string(row.require("name", 0)?)?,
            email: parse_string(row.require("email", 1)?)?,
            is_admin: row.get("is_admin", 2).map(parse_bool).transpose()?.unwrap_or(false),
            returning,
        }),
        "floors" => Ok(Command::InsertFloor {
            name: parse_string(row.require("name", 0)?)?,
            rooms: parse_u32(row.require("rooms", 1)?)?,
            returning,
        }),
        "room_versions" => Ok(Command::InsertRoomVersion {
            room_id: parse_ulid(row.require("room_id", 0)?)?,
            proposal: RoomProposal {
                user_id: parse_ulid(row.require("user_id", 1)?)?,
                floor_id: parse_ulid(row.require("floor_id", 2)?)?,
                capacity: parse_u32(row.require("capacity", 3)?)?,
                availability: parse_bool(row.require("availability", 4)?)?,
                as_of: parse_i64(row.require("as_of", 5)?)?,
            },
            returning,
        }),
        "bookings" => Ok(Command::InsertBooking {
            room_id: parse_ulid(row.require("room_id", 0)?)?,
            user_id: parse_ulid(row.require("user_id", 1)?)?,
            floor_id: parse_ulid(row.require("floor_id", 2)?)?,
            returning,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let mut filters = Filters { table: table.clone(), pairs: filters };

    let cmd = match table.as_str() {
        "users" => Command::SelectUser {
            id: filters.take("id").map(parse_ulid).transpose()?.ok_or(SqlError::MissingFilter("id"))?,
        },
        "floors" => Command::SelectFloors {
            id: filters.take("id").map(parse_ulid).transpose()?,
            name: filters.take("name").map(parse_string).transpose()?,
        },
        "rooms" => Command::SelectRooms {
            id: filters.take("id").map(parse_ulid).transpose()?,
            floor_id: filters.take("floor_id").map(parse_ulid).transpose()?,
        },
        "room_versions" => Command::SelectRoomVersions {
            room_id: filters
                .take("room_id")
                .map(parse_ulid)
                .transpose()?
                .ok_or(SqlError::MissingFilter("room_id"))?,
        },
        "bookings" => {
            let user_id = filters.take("user_id").map(parse_ulid).transpose()?;
            let room_id = filters.take("room_id").map(parse_ulid).transpose()?;
            if user_id.is_none() && room_id.is_none() {
                return Err(SqlError::MissingFilter("user_id or room_id"));
            }
            Command::SelectBookings { user_id, room_id }
        }
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

/// Collect `column = value` pairs joined by AND.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
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
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

struct Filters<'a> {
    table: String,
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn take(&mut self, column: &str) -> Option<&'a Expr> {
        let pos = self.pairs.iter().position(|(c, _)| c == column)?;
        Some(self.pairs.remove(pos).1)
    }

    /// Any filter not consumed names a column the table can't be filtered on.
    fn finish(self) -> Result<(), SqlError> {
        match self.pairs.first() {
            Some((col, _)) => Err(SqlError::Unsupported(format!("filter on {}.{col}", self.table))),
            None => Ok(()),
        }
    }
}

/// Single VALUES row of an INSERT, addressed by column name when a column
/// list is given and by position otherwise.
struct InsertRow {
    table: String,
    columns: Vec<String>,
    values: Vec<Expr>,
}

impl InsertRow {
    fn new(table: &str, insert: &ast::Insert) -> Result<Self, SqlError> {
        let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match body.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let values = match rows.as_slice() {
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            [row] => row.clone(),
            _ => return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
        };
        let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
        if !columns.is_empty() && columns.len() != values.len() {
            return Err(SqlError::WrongArity(table.to_string(), columns.len(), values.len()));
        }
        Ok(Self {
            table: table.to_string(),
            columns,
            values,
        })
    }

    fn get(&self, column: &str, position: usize) -> Option<&Expr> {
        if self.columns.is_empty() {
            self.values.get(position)
        } else {
            let idx = self.columns.iter().position(|c| c == column)?;
            self.values.get(idx)
        }
    }

    fn require(&self, column: &'static str, position: usize) -> Result<&Expr, SqlError> {
        self.get(column, position)
            .ok_or_else(|| SqlError::MissingColumn(self.table.clone(), column))
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range for a non-negative count")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: {1} columns but {2} values")]
    WrongArity(String, usize, usize),
    #[error("{0}: missing column {1}")]
    MissingColumn(String, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::*;

/// How long a new booking is held before it must be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// Confirmed immediately.
    None,
    /// Pending until this instant (ms since epoch).
    Until(Ms),
    /// Pending for the server's default TTL.
    Default,
}

/// One row of `INSERT INTO bookings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest: Option<String>,
    pub hold: Hold,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHotel {
        id: Ulid,
        name: String,
        city: Option<String>,
        country: Option<String>,
        rating: u8,
    },
    DeleteHotel {
        id: Ulid,
    },
    SelectHotels {
        page: Page,
    },
    InsertRoom {
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    },
    UpdateRoom {
        id: Ulid,
        number: String,
        capacity: u32,
        price_per_night: u64,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        hotel_id: Option<Ulid>,
        page: Page,
    },
    InsertBooking(BookingRow),
    BatchInsertBookings {
        bookings: Vec<BookingRow>,
    },
    ConfirmBooking {
        id: Ulid,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectBookings {
        room_id: Option<Ulid>,
        active_only: bool,
        page: Page,
    },
    SelectAvailability {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

const HOTEL_COLUMNS: &[&str] = &["id", "name", "city", "country", "rating"];
const ROOM_COLUMNS: &[&str] = &["id", "hotel_id", "number", "capacity", "price"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "check_in",
    "check_out",
    "guest",
    "hold_until",
    "status",
];

/// Values of one VALUES row keyed by column name. Without an explicit
/// column list the table's default order is used.
struct Row<'a> {
    table: &'static str,
    fields: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        columns: &[ast::Ident],
        defaults: &[&str],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > names.len() {
            return Err(SqlError::Parse(format!(
                "{table}: {} values for {} columns",
                values.len(),
                names.len()
            )));
        }
        for name in &names {
            if !defaults.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name.clone()));
            }
        }
        Ok(Self {
            table,
            fields: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
            .filter(|expr| !is_null(expr))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "hotels" => {
            let row = Row::new("hotels", &insert.columns, HOTEL_COLUMNS, single_row("hotels", rows)?)?;
            Ok(Command::InsertHotel {
                id: parse_ulid(row.require("id")?)?,
                name: parse_string(row.require("name")?)?,
                city: row.get("city").map(parse_string).transpose()?,
                country: row.get("country").map(parse_string).transpose()?,
                rating: row.get("rating").map(parse_u8).transpose()?.unwrap_or(0),
            })
        }
        "rooms" => {
            let row = Row::new("rooms", &insert.columns, ROOM_COLUMNS, single_row("rooms", rows)?)?;
            Ok(Command::InsertRoom {
                id: parse_ulid(row.require("id")?)?,
                hotel_id: parse_ulid(row.require("hotel_id")?)?,
                number: parse_string(row.require("number")?)?,
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                price_per_night: parse_u64(row.require("price")?)?,
            })
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new("bookings", &insert.columns, BOOKING_COLUMNS, values)?;
                let booking = parse_booking_row(&row).map_err(|e| match e {
                    SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
                    other => other,
                })?;
                bookings.push(booking);
            }
            if bookings.len() == 1 {
                Ok(Command::InsertBooking(bookings.remove(0)))
            } else {
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_row(row: &Row<'_>) -> Result<BookingRow, SqlError> {
    let hold = match (row.get("hold_until"), row.get("status")) {
        (Some(expr), _) => Hold::Until(parse_i64(expr)?),
        (None, Some(expr)) => match parse_string(expr)?.to_lowercase().as_str() {
            "pending" => Hold::Default,
            "confirmed" => Hold::None,
            other => return Err(SqlError::Parse(format!("bad booking status: {other}"))),
        },
        (None, None) => Hold::None,
    };
    Ok(BookingRow {
        id: parse_ulid(row.require("id")?)?,
        room_id: parse_ulid(row.require("room_id")?)?,
        check_in: parse_date(row.require("check_in")?)?,
        check_out: parse_date(row.require("check_out")?)?,
        guest: row.get("guest").map(parse_string).transpose()?,
        hold,
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &a.value));
    }
    let find = |column: &str| set.iter().find(|(c, _)| c == column).map(|(_, e)| *e);

    match table.as_str() {
        "rooms" => Ok(Command::UpdateRoom {
            id,
            number: parse_string(find("number").ok_or(SqlError::MissingColumn("rooms", "number"))?)?,
            capacity: parse_u32(find("capacity").ok_or(SqlError::MissingColumn("rooms", "capacity"))?)?,
            price_per_night: parse_u64(find("price").ok_or(SqlError::MissingColumn("rooms", "price"))?)?,
        }),
        "bookings" => {
            let status = find("status").ok_or(SqlError::MissingColumn("bookings", "status"))?;
            match parse_string(status)?.to_lowercase().as_str() {
                "confirmed" => Ok(Command::ConfirmBooking { id }),
                "cancelled" => Ok(Command::CancelBooking { id }),
                other => Err(SqlError::Unsupported(format!("booking status {other}"))),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "hotels" => Ok(Command::DeleteHotel { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        // Bookings are never erased, only cancelled.
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

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
        collect_filters(selection, &mut filters)?;
    }
    let find = |column: &str, op: BinaryOperator| {
        filters
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    };
    let page = || -> Result<Page, SqlError> {
        let number = find("page", BinaryOperator::Eq).map(parse_i64).transpose()?;
        let size = find("page_size", BinaryOperator::Eq).map(parse_i64).transpose()?;
        Ok(Page::new(number.unwrap_or(1), size.unwrap_or(DEFAULT_PAGE_SIZE as i64)))
    };

    match table.as_str() {
        "hotels" => Ok(Command::SelectHotels { page: page()? }),
        "rooms" => Ok(Command::SelectRooms {
            hotel_id: find("hotel_id", BinaryOperator::Eq).map(parse_ulid).transpose()?,
            page: page()?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            room_id: find("room_id", BinaryOperator::Eq).map(parse_ulid).transpose()?,
            active_only: find("active", BinaryOperator::Eq)
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            page: page()?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: parse_ulid(
                find("room_id", BinaryOperator::Eq).ok_or(SqlError::MissingFilter("room_id"))?,
            )?,
            from: parse_date(
                find("check_in", BinaryOperator::GtEq).ok_or(SqlError::MissingFilter("check_in"))?,
            )?,
            to: parse_date(
                find("check_out", BinaryOperator::LtEq).ok_or(SqlError::MissingFilter("check_out"))?,
            )?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b >= y AND ...` into (column, op, value) triples.
fn collect_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push((column, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Hotels and rooms are inserted one row per statement.
fn single_row<'a>(table: &str, rows: &'a [Vec<Expr>]) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT INTO {table}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(n, _)) => Ok(n.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Calendar date written as `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| SqlError::InvalidDate(s.clone())),
        Some(value) => Err(SqlError::InvalidDate(value.to_string())),
        None => Err(SqlError::Parse(format!("expected date, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
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
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(..) => "42703",
            SqlError::InvalidDate(_) => "22007",
            SqlError::MissingColumn(..) => "23502",
            SqlError::Parse(_) | SqlError::Empty | SqlError::Unsupported(_) | SqlError::MissingFilter(_) => "42601",
        }
    }
}

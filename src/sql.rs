use std::collections::HashMap;

use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::BookingFilter;
use crate::model::*;

/// Parsed command from SQL input. Writes are INSERTs into command tables
/// (positional VALUES) or DELETEs by id; reads are SELECTs with equality and
/// range filters.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        role: Role,
        name: Option<String>,
    },
    InsertSpot {
        id: Ulid,
        hourly_price: Cents,
        latitude: f64,
        longitude: f64,
        vehicle_capacity: u32,
        amenities: Vec<String>,
    },
    ChangeSpot {
        spot_id: Ulid,
        changes: Vec<SpotChange>,
    },
    DeleteSpot {
        id: Ulid,
    },
    SelectSpots {
        id: Option<Ulid>,
    },
    SelectRating {
        spot_id: Ulid,
    },
    InsertAvailability {
        id: Ulid,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    },
    ChangeAvailability {
        slot_id: Ulid,
        update: SlotUpdate,
    },
    DeleteAvailability {
        id: Ulid,
    },
    SelectAvailability {
        spot_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectOpenWindows {
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    },
    InsertBooking {
        id: Ulid,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
        total_price: Cents,
    },
    TransitionBooking {
        booking_id: Ulid,
        status: BookingStatus,
    },
    SelectBookings {
        by_id: Option<Ulid>,
        filter: Option<BookingFilter>,
    },
    InitiatePayment {
        booking_id: Ulid,
    },
    RecordPaymentOutcome {
        booking_id: Ulid,
        reference: String,
        outcome: PaymentOutcome,
    },
    ConfirmPayment {
        booking_id: Ulid,
        reference: String,
    },
    SetPaymentStatus {
        booking_id: Ulid,
        status: PaymentStatus,
    },
    SelectTransactions {
        booking_id: Ulid,
    },
    InsertReview {
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    SelectReviews {
        spot_id: Ulid,
    },
    SelectNotifications,
    MarkNotificationRead {
        id: Ulid,
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// INSERT targets that answer with a row instead of a bare tag.
const ROW_RETURNING_INSERTS: [&str; 3] = ["payment_intents", "payment_outcomes", "payment_confirmations"];

/// Table whose rows a statement returns, found without binding its values.
/// Prepared statements are described before their parameters arrive.
pub fn result_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Insert(insert) => insert_table_name(insert)
            .ok()
            .filter(|t| ROW_RETURNING_INSERTS.contains(&t.as_str())),
        _ => None,
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let v = extract_insert_values(insert)?;

    match table.as_str() {
        "users" => {
            arity("users", &v, 2)?;
            let role = parse_string(&v[1])?;
            Ok(Command::InsertUser {
                id: parse_ulid(&v[0])?,
                role: Role::parse(&role).ok_or_else(|| SqlError::Parse(format!("bad role: {role}")))?,
                name: v.get(2).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "spots" => {
            arity("spots", &v, 5)?;
            let amenities = match v.get(5).map(parse_string_or_null).transpose()?.flatten() {
                Some(json) => serde_json::from_str::<Vec<String>>(&json)
                    .map_err(|e| SqlError::Parse(format!("bad amenities_json: {e}")))?,
                None => Vec::new(),
            };
            Ok(Command::InsertSpot {
                id: parse_ulid(&v[0])?,
                hourly_price: parse_i64(&v[1])?,
                latitude: parse_f64(&v[2])?,
                longitude: parse_f64(&v[3])?,
                vehicle_capacity: parse_u32(&v[4])?,
                amenities,
            })
        }
        "spot_changes" => {
            arity("spot_changes", &v, 4)?;
            let mut changes = Vec::new();
            if let Some(status) = parse_string_or_null(&v[1])? {
                let status = SpotStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("bad spot status: {status}")))?;
                changes.push(SpotChange::Status(status));
            }
            if let Some(available) = parse_bool_or_null(&v[2])? {
                changes.push(SpotChange::Availability(available));
            }
            if let Some(price) = parse_i64_or_null(&v[3])? {
                changes.push(SpotChange::HourlyPrice(price));
            }
            Ok(Command::ChangeSpot { spot_id: parse_ulid(&v[0])?, changes })
        }
        "availability" => {
            arity("availability", &v, 4)?;
            Ok(Command::InsertAvailability {
                id: parse_ulid(&v[0])?,
                spot_id: parse_ulid(&v[1])?,
                start: parse_i64(&v[2])?,
                end: parse_i64(&v[3])?,
            })
        }
        "availability_changes" => {
            arity("availability_changes", &v, 4)?;
            Ok(Command::ChangeAvailability {
                slot_id: parse_ulid(&v[0])?,
                update: SlotUpdate {
                    start: parse_i64_or_null(&v[1])?,
                    end: parse_i64_or_null(&v[2])?,
                    is_booked: parse_bool_or_null(&v[3])?,
                },
            })
        }
        "bookings" => {
            arity("bookings", &v, 5)?;
            Ok(Command::InsertBooking {
                id: parse_ulid(&v[0])?,
                spot_id: parse_ulid(&v[1])?,
                start: parse_i64(&v[2])?,
                end: parse_i64(&v[3])?,
                total_price: parse_i64(&v[4])?,
            })
        }
        "booking_transitions" => {
            arity("booking_transitions", &v, 2)?;
            let status = parse_string(&v[1])?;
            Ok(Command::TransitionBooking {
                booking_id: parse_ulid(&v[0])?,
                status: BookingStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("bad booking status: {status}")))?,
            })
        }
        "payment_intents" => {
            arity("payment_intents", &v, 1)?;
            Ok(Command::InitiatePayment { booking_id: parse_ulid(&v[0])? })
        }
        "payment_outcomes" => {
            arity("payment_outcomes", &v, 3)?;
            let outcome = parse_string(&v[2])?;
            Ok(Command::RecordPaymentOutcome {
                booking_id: parse_ulid(&v[0])?,
                reference: parse_string(&v[1])?,
                outcome: PaymentOutcome::parse(&outcome)
                    .ok_or_else(|| SqlError::Parse(format!("bad payment outcome: {outcome}")))?,
            })
        }
        "payment_confirmations" => {
            arity("payment_confirmations", &v, 2)?;
            Ok(Command::ConfirmPayment {
                booking_id: parse_ulid(&v[0])?,
                reference: parse_string(&v[1])?,
            })
        }
        "payment_status_changes" => {
            arity("payment_status_changes", &v, 2)?;
            let status = parse_string(&v[1])?;
            Ok(Command::SetPaymentStatus {
                booking_id: parse_ulid(&v[0])?,
                status: PaymentStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("bad payment status: {status}")))?,
            })
        }
        "reviews" => {
            arity("reviews", &v, 3)?;
            let rating = parse_i64(&v[2])?;
            Ok(Command::InsertReview {
                id: parse_ulid(&v[0])?,
                booking_id: parse_ulid(&v[1])?,
                rating: u8::try_from(rating).map_err(|_| SqlError::Parse(format!("bad rating: {rating}")))?,
                comment: v.get(3).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "notification_reads" => {
            arity("notification_reads", &v, 1)?;
            Ok(Command::MarkNotificationRead { id: parse_ulid(&v[0])? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "spots" => Ok(Command::DeleteSpot { id }),
        "availability" => Ok(Command::DeleteAvailability { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column filters from a WHERE clause of `AND`-joined comparisons.
#[derive(Default)]
struct Filters {
    eq: HashMap<String, Expr>,
    ge: HashMap<String, Expr>,
    le: HashMap<String, Expr>,
}

impl Filters {
    fn collect(expr: &Expr, into: &mut Filters) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Filters::collect(inner, into),
            Expr::BinaryOp { left, op, right } => {
                let target = match op {
                    ast::BinaryOperator::And => {
                        Filters::collect(left, into)?;
                        return Filters::collect(right, into);
                    }
                    ast::BinaryOperator::Eq => &mut into.eq,
                    ast::BinaryOperator::GtEq => &mut into.ge,
                    ast::BinaryOperator::LtEq => &mut into.le,
                    other => return Err(SqlError::Unsupported(format!("operator {other}"))),
                };
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                target.insert(column, right.as_ref().clone());
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn ulid(&self, column: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.eq.get(column).map(parse_ulid).transpose()
    }

    fn required_ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        self.ulid(column)?.ok_or(SqlError::MissingFilter(column))
    }

    fn at_least(&self, column: &'static str) -> Result<Option<Ms>, SqlError> {
        self.ge.get(column).map(parse_i64).transpose()
    }

    fn at_most(&self, column: &'static str) -> Result<Option<Ms>, SqlError> {
        self.le.get(column).map(parse_i64).transpose()
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        Filters::collect(selection, &mut filters)?;
    }

    match table.as_str() {
        "spots" => Ok(Command::SelectSpots { id: filters.ulid("id")? }),
        "spot_ratings" => Ok(Command::SelectRating { spot_id: filters.required_ulid("spot_id")? }),
        "availability" => Ok(Command::SelectAvailability {
            spot_id: filters.required_ulid("spot_id")?,
            start: filters.at_least("start")?,
            end: filters.at_most("end")?,
        }),
        "open_windows" => Ok(Command::SelectOpenWindows {
            spot_id: filters.required_ulid("spot_id")?,
            start: filters.at_least("start")?.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.at_most("end")?.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "bookings" => {
            let by_id = filters.ulid("id")?;
            let filter = if let Some(spot) = filters.ulid("spot_id")? {
                Some(BookingFilter::Spot(spot))
            } else if let Some(driver) = filters.ulid("driver_id")? {
                Some(BookingFilter::Driver(driver))
            } else {
                filters.ulid("homeowner_id")?.map(BookingFilter::Homeowner)
            };
            if by_id.is_none() && filter.is_none() {
                return Err(SqlError::MissingFilter("id, spot_id, driver_id or homeowner_id"));
            }
            Ok(Command::SelectBookings { by_id, filter })
        }
        "transactions" => Ok(Command::SelectTransactions { booking_id: filters.required_ulid("booking_id")? }),
        "reviews" => Ok(Command::SelectReviews { spot_id: filters.required_ulid("spot_id")? }),
        "notifications" => Ok(Command::SelectNotifications),
        _ => Err(SqlError::UnknownTable(table)),
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

/// The single VALUES row of an INSERT. Multi-row inserts are refused.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let mut filters = Filters::default();
    if let Some(sel) = selection {
        Filters::collect(sel, &mut filters)?;
    }
    filters.required_ulid("id")
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

/// Text of a literal. Numbers come through as their source text so that
/// bound parameters (always quoted) and inline literals parse alike.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    match expr {
        Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } => Ok(format!("-{}", literal_text(expr)?)),
        _ => match extract_value(expr) {
            Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
            Some(Value::Boolean(b)) => Ok(b.to_string()),
            Some(other) => Err(SqlError::Parse(format!("unexpected literal {other:?}"))),
            None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
        },
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_string(expr).map(Some) }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let s = literal_text(expr)?;
    s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_i64(expr).map(Some) }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    let s = literal_text(expr)?;
    let v: f64 = s.trim().parse().map_err(|e| SqlError::Parse(format!("bad number {s:?}: {e}")))?;
    if !v.is_finite() {
        return Err(SqlError::Parse(format!("bad number {s:?}")));
    }
    Ok(v)
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let s = literal_text(expr)?;
    match s.to_lowercase().as_str() {
        "true" | "t" | "1" => Ok(Some(true)),
        "false" | "f" | "0" => Ok(Some(false)),
        _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
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

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_user_with_and_without_name() {
        let cmd = parse_sql(&format!("INSERT INTO users (id, role, name) VALUES ('{A}', 'homeowner', 'Hana')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser { id: ulid(A), role: Role::Homeowner, name: Some("Hana".into()) }
        );
        let cmd = parse_sql(&format!("INSERT INTO users (id, role) VALUES ('{A}', 'DRIVER')")).unwrap();
        assert_eq!(cmd, Command::InsertUser { id: ulid(A), role: Role::Driver, name: None });
        assert!(parse_sql(&format!("INSERT INTO users (id, role) VALUES ('{A}', 'pilot')")).is_err());
    }

    #[test]
    fn insert_spot_decodes_amenities_json() {
        let sql = format!(
            r#"INSERT INTO spots (id, hourly_price, latitude, longitude, vehicle_capacity, amenities_json) VALUES ('{A}', 450, 52.52, -13.4, 2, '["covered","ev_charger"]')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertSpot { hourly_price, latitude, longitude, vehicle_capacity, amenities, .. } => {
                assert_eq!(hourly_price, 450);
                assert_eq!(latitude, 52.52);
                assert_eq!(longitude, -13.4);
                assert_eq!(vehicle_capacity, 2);
                assert_eq!(amenities, vec!["covered".to_string(), "ev_charger".to_string()]);
            }
            other => panic!("expected InsertSpot, got {other:?}"),
        }
        let bad = format!("INSERT INTO spots VALUES ('{A}', 450, 1.0, 1.0, 1, 'not json')");
        assert!(matches!(parse_sql(&bad), Err(SqlError::Parse(_))));
    }

    #[test]
    fn spot_changes_null_means_unchanged() {
        let sql = format!("INSERT INTO spot_changes (spot_id, status, is_available, hourly_price) VALUES ('{A}', NULL, false, NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeSpot { spot_id: ulid(A), changes: vec![SpotChange::Availability(false)] }
        );
        let sql = format!("INSERT INTO spot_changes VALUES ('{A}', 'active', NULL, 600)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeSpot {
                spot_id: ulid(A),
                changes: vec![SpotChange::Status(SpotStatus::Active), SpotChange::HourlyPrice(600)],
            }
        );
    }

    #[test]
    fn availability_insert_change_delete() {
        let sql = format!(r#"INSERT INTO availability (id, spot_id, start, "end") VALUES ('{A}', '{B}', 1000, 2000)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertAvailability { id: ulid(A), spot_id: ulid(B), start: 1000, end: 2000 }
        );
        let sql = format!(r#"INSERT INTO availability_changes (slot_id, start, "end", is_booked) VALUES ('{A}', NULL, 3000, NULL)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeAvailability {
                slot_id: ulid(A),
                update: SlotUpdate { start: None, end: Some(3000), is_booked: None },
            }
        );
        let sql = format!("DELETE FROM availability WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteAvailability { id: ulid(A) });
    }

    #[test]
    fn select_availability_bounds_are_optional() {
        let sql = format!("SELECT * FROM availability WHERE spot_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { spot_id: ulid(A), start: None, end: None }
        );
        let sql = format!(r#"SELECT * FROM availability WHERE spot_id = '{A}' AND start >= 10 AND "end" <= 20"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { spot_id: ulid(A), start: Some(10), end: Some(20) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM availability"),
            Err(SqlError::MissingFilter("spot_id"))
        ));
    }

    #[test]
    fn open_windows_requires_bounds() {
        let sql = format!("SELECT * FROM open_windows WHERE spot_id = '{A}' AND start >= 10");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("end"))));
        let sql = format!(r#"SELECT * FROM open_windows WHERE spot_id = '{A}' AND start >= 10 AND "end" <= 20"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectOpenWindows { spot_id: ulid(A), start: 10, end: 20 }
        );
    }

    #[test]
    fn booking_commands() {
        let sql = format!(r#"INSERT INTO bookings (id, spot_id, start, "end", total_price) VALUES ('{A}', '{B}', 1000, 2000, 750)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking { id: ulid(A), spot_id: ulid(B), start: 1000, end: 2000, total_price: 750 }
        );
        let sql = format!("INSERT INTO booking_transitions (booking_id, status) VALUES ('{A}', 'checked_in')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::TransitionBooking { booking_id: ulid(A), status: BookingStatus::CheckedIn }
        );
        let sql = format!("INSERT INTO booking_transitions VALUES ('{A}', 'teleported')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn select_bookings_filters() {
        let sql = format!("SELECT * FROM bookings WHERE driver_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { by_id: None, filter: Some(BookingFilter::Driver(ulid(A))) }
        );
        let sql = format!("SELECT * FROM bookings WHERE id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { by_id: Some(ulid(A)), filter: None }
        );
        assert!(matches!(parse_sql("SELECT * FROM bookings"), Err(SqlError::MissingFilter(_))));
    }

    #[test]
    fn payment_commands() {
        let sql = format!("INSERT INTO payment_outcomes (booking_id, reference, outcome) VALUES ('{A}', 'pi_42', 'succeeded')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RecordPaymentOutcome {
                booking_id: ulid(A),
                reference: "pi_42".into(),
                outcome: PaymentOutcome::Succeeded,
            }
        );
        let sql = format!("INSERT INTO payment_status_changes VALUES ('{A}', 'refunded')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetPaymentStatus { booking_id: ulid(A), status: PaymentStatus::Refunded }
        );
        let sql = format!("INSERT INTO payment_intents (booking_id) VALUES ('{A}')");
        assert_eq!(parse_sql(&sql).unwrap(), Command::InitiatePayment { booking_id: ulid(A) });
    }

    #[test]
    fn bound_parameters_arrive_quoted() {
        // The extended protocol substitutes every parameter as a string literal.
        let sql = format!(r#"INSERT INTO bookings VALUES ('{A}', '{B}', '1000', '2000', '750')"#);
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertBooking { total_price: 750, .. }));
        let sql = format!("INSERT INTO spot_changes VALUES ('{A}', NULL, 'true', NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeSpot { spot_id: ulid(A), changes: vec![SpotChange::Availability(true)] }
        );
    }

    #[test]
    fn review_rating_range_checked_by_type() {
        let sql = format!("INSERT INTO reviews (id, booking_id, rating, comment) VALUES ('{A}', '{B}', 5, 'great')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReview { id: ulid(A), booking_id: ulid(B), rating: 5, comment: Some("great".into()) }
        );
        let sql = format!("INSERT INTO reviews VALUES ('{A}', '{B}', 300)");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn deletes_and_unknown_tables() {
        let sql = format!("DELETE FROM spots WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteSpot { id: ulid(A) });
        assert!(matches!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(parse_sql("DELETE FROM spots"), Err(SqlError::MissingFilter("id"))));
        assert!(matches!(
            parse_sql(&format!("INSERT INTO garages VALUES ('{A}')")),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn misc_reads() {
        assert_eq!(parse_sql("SELECT * FROM notifications").unwrap(), Command::SelectNotifications);
        assert_eq!(parse_sql("SELECT * FROM spots").unwrap(), Command::SelectSpots { id: None });
        let sql = format!("SELECT * FROM spot_ratings WHERE spot_id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectRating { spot_id: ulid(A) });
    }

    #[test]
    fn result_table_ignores_placeholders() {
        assert_eq!(result_table("SELECT * FROM reviews WHERE spot_id = $1").as_deref(), Some("reviews"));
        assert_eq!(
            result_table("INSERT INTO payment_confirmations VALUES ($1, $2)").as_deref(),
            Some("payment_confirmations")
        );
        assert_eq!(result_table("INSERT INTO reviews VALUES ($1, $2, $3)"), None);
        assert_eq!(result_table("DELETE FROM spots WHERE id = $1"), None);
    }

    #[test]
    fn parse_empty_and_unsupported() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("DROP TABLE spots"), Err(SqlError::Unsupported(_))));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id <> '{A}'")),
            Err(SqlError::Unsupported(_))
        ));
    }
}

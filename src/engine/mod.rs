use metrics::{counter, histogram};
use serde_json::{Map, Number, Value};
use std::time::Instant;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, SimpleQueryMessage};
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Text returned for statements that produce no result set
pub const EXECUTED_MESSAGE: &str = "SQL executed successfully";

/// The outcome of an admin SQL batch, following its last statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// The last statement produced no result set
    Executed,
    /// The rows of the last statement's result set
    Rows(Vec<Map<String, Value>>),
}

impl SqlOutcome {
    /// Render the outcome as text for a caller
    pub fn render(&self) -> String {
        match self {
            Self::Executed => EXECUTED_MESSAGE.to_string(),
            Self::Rows(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Object).collect()).to_string()
            }
        }
    }
}

/// A protocol message reduced to what the result fold needs
#[derive(Debug, Clone, PartialEq)]
enum Step {
    /// A statement started returning a result set
    Columns,
    /// One row of the current result set
    Row(Map<String, Value>),
    /// A statement finished
    Complete,
}

impl Step {
    /// Reduce a message, typing row values when the column types are known
    fn from_message(message: &SimpleQueryMessage, types: Option<&[Type]>) -> Option<Self> {
        match message {
            SimpleQueryMessage::RowDescription(_) => Some(Self::Columns),
            SimpleQueryMessage::Row(row) => {
                let types = types.filter(|types| types.len() == row.columns().len());
                let cells = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| (column.name(), row.get(idx)));
                Some(Self::Row(record(cells, types)))
            }
            SimpleQueryMessage::CommandComplete(_) => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Build a row map in select-list order from column names and text values
fn record<'a>(
    cells: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    types: Option<&[Type]>,
) -> Map<String, Value> {
    cells
        .into_iter()
        .enumerate()
        .map(|(idx, (name, text))| {
            let value = match (text, types.and_then(|types| types.get(idx))) {
                (None, _) => Value::Null,
                (Some(text), Some(ty)) => typed_value(ty, text),
                (Some(text), None) => Value::String(text.to_string()),
            };
            (name.to_string(), value)
        })
        .collect()
}

/// Convert the server's text rendering of a value into JSON by column type
///
/// Booleans, integers, floats and JSON become native JSON values. Every other
/// type keeps its text rendering.
fn typed_value(ty: &Type, text: &str) -> Value {
    let typed = match *ty {
        Type::BOOL => match text {
            "t" => Some(Value::Bool(true)),
            "f" => Some(Value::Bool(false)),
            _ => None,
        },
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            text.parse::<i64>().ok().map(Value::from)
        }
        // Non-finite floats have no JSON number and stay as text
        Type::FLOAT4 | Type::FLOAT8 => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        Type::JSON | Type::JSONB => serde_json::from_str(text).ok(),
        _ => None,
    };
    typed.unwrap_or_else(|| Value::String(text.to_string()))
}

/// Column types of a single statement
///
/// Batches of several statements cannot be prepared, so their values keep
/// the server's text rendering.
async fn column_types(client: &Client, sql: &str, connection_id: &str) -> Option<Vec<Type>> {
    match client.prepare(sql).await {
        Ok(statement) => Some(
            statement
                .columns()
                .iter()
                .map(|column| column.type_().clone())
                .collect(),
        ),
        Err(e) => {
            debug!(connection_id, "Statement not prepared, values stay as text: {e}");
            None
        }
    }
}

/// Fold the protocol steps of a batch into the outcome of its last statement
fn fold_steps(steps: impl IntoIterator<Item = Step>) -> SqlOutcome {
    let mut pending: Option<Vec<Map<String, Value>>> = None;
    let mut last = None;
    for step in steps {
        match step {
            Step::Columns => pending = Some(Vec::new()),
            Step::Row(row) => pending.get_or_insert_with(Vec::new).push(row),
            Step::Complete => last = pending.take(),
        }
    }
    // A trailing result set without a completion still counts
    match pending.or(last) {
        Some(rows) => SqlOutcome::Rows(rows),
        None => SqlOutcome::Executed,
    }
}

/// Execute a raw SQL batch in auto-commit mode
///
/// The text is sent verbatim through the simple query protocol, so several
/// statements separated by semicolons run in order. For a single statement
/// the column types are prepared first and values are converted to native
/// JSON where the type allows it; `NULL` always maps to `null`.
pub async fn execute_sql(client: &Client, sql: &str, connection_id: &str) -> Result<SqlOutcome> {
    // Start the measurement timer
    let start_time = Instant::now();
    // Output debugging information
    debug!(connection_id, sql, "Executing admin SQL");
    let types = column_types(client, sql, connection_id).await;
    match client.simple_query(sql).await {
        Ok(messages) => {
            let duration = start_time.elapsed();
            let outcome = fold_steps(
                messages
                    .iter()
                    .filter_map(|message| Step::from_message(message, types.as_deref())),
            );
            let rows = match &outcome {
                SqlOutcome::Rows(rows) => rows.len(),
                SqlOutcome::Executed => 0,
            };
            info!(
                connection_id,
                rows,
                duration_ms = duration.as_millis(),
                "Admin SQL succeeded"
            );
            // Update query metrics
            counter!("supabase_agent.total_queries").increment(1);
            histogram!("supabase_agent.query_duration_ms").record(duration.as_millis() as f64);
            Ok(outcome)
        }
        Err(e) => {
            let duration = start_time.elapsed();
            let message = match e.as_db_error() {
                Some(db) => format!("{} ({})", db.message(), db.code().code()),
                None => e.to_string(),
            };
            error!(
                connection_id,
                duration_ms = duration.as_millis(),
                error = %message,
                "Admin SQL failed"
            );
            // Update query metrics
            counter!("supabase_agent.total_query_errors").increment(1);
            histogram!("supabase_agent.query_duration_ms").record(duration.as_millis() as f64);
            Err(Error::query(message))
        }
    }
}

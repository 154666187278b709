//! SQL query constants and builders
//!
//! Counter queries are written with `?` placeholders and a single `IN (?)`
//! list. Building a query widens that list to one placeholder per table and
//! then rebinds placeholders for the target dialect. Table names only ever
//! travel as bound parameters.

use crate::db::{Dialect, PlaceholderStyle};
use crate::error::Diagnostic;
use serde::Serialize;
use std::fmt;

/// MySQL auto-increment watermark per table
pub const MYSQL_AUTO_INCREMENT: &str =
    "SELECT TABLE_NAME, AUTO_INCREMENT FROM information_schema.TABLES WHERE TABLE_NAME IN (?) AND TABLE_SCHEMA = ?";

/// MySQL approximate row count per table (maintained by the storage engine)
pub const MYSQL_TABLE_ROWS: &str =
    "SELECT TABLE_NAME, TABLE_ROWS FROM information_schema.TABLES WHERE TABLE_NAME IN (?) AND TABLE_SCHEMA = ?";

/// PostgreSQL live tuple estimate per relation
pub const POSTGRES_LIVE_TUPLES: &str =
    "SELECT relname, n_live_tup FROM pg_stat_user_tables WHERE relname IN (?) AND schemaname = ?";

/// The two kinds of counter a table can be sampled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Increment,
    Row,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Increment => "increment",
            CounterKind::Row => "row",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ready-to-run counter query and its bound parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterQuery {
    pub kind: CounterKind,
    pub sql: String,
    /// Table names in order, followed by the schema
    pub params: Vec<String>,
}

/// Queries for one target. A kind with no configured tables has no query.
#[derive(Debug, Clone, Default)]
pub struct CounterQueries {
    pub increment: Option<CounterQuery>,
    pub row: Option<CounterQuery>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CounterQueries {
    pub fn iter(&self) -> impl Iterator<Item = &CounterQuery> {
        self.increment.iter().chain(self.row.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.increment.is_none() && self.row.is_none()
    }
}

/// Build the counter queries for one target
///
/// `context` names the target in any diagnostics that are recorded.
pub fn build_counter_queries(
    context: &str,
    dialect: Dialect,
    schema: &str,
    increment_tables: &[String],
    row_tables: &[String],
) -> CounterQueries {
    let mut diagnostics = Vec::new();

    if dialect == Dialect::Postgres && !increment_tables.is_empty() {
        diagnostics.push(Diagnostic::warning(
            context,
            format!(
                "PostgreSQL has no portable auto-increment watermark; increment counters for {} are live row estimates (n_live_tup)",
                increment_tables.join(", ")
            ),
        ));
    }

    CounterQueries {
        increment: build_query(dialect, CounterKind::Increment, schema, increment_tables),
        row: build_query(dialect, CounterKind::Row, schema, row_tables),
        diagnostics,
    }
}

fn build_query(
    dialect: Dialect,
    kind: CounterKind,
    schema: &str,
    tables: &[String],
) -> Option<CounterQuery> {
    if tables.is_empty() {
        return None;
    }

    let expanded = expand_in_list(dialect.counter_template(kind), tables.len());
    let sql = rebind(&expanded, dialect.placeholder_style());

    let mut params = tables.to_vec();
    params.push(schema.to_string());

    Some(CounterQuery { kind, sql, params })
}

/// Widen the first `IN (?)` to `count` placeholders
pub fn expand_in_list(template: &str, count: usize) -> String {
    let placeholders = vec!["?"; count].join(", ");
    template.replacen("IN (?)", &format!("IN ({})", placeholders), 1)
}

/// Rewrite `?` placeholders into the given style
pub fn rebind(sql: &str, style: PlaceholderStyle) -> String {
    match style {
        PlaceholderStyle::Question => sql.to_string(),
        PlaceholderStyle::Dollar => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut position = 0;
            for c in sql.chars() {
                if c == '?' {
                    position += 1;
                    out.push('$');
                    out.push_str(&position.to_string());
                } else {
                    out.push(c);
                }
            }
            out
        }
    }
}

//! Snapshot Collector
//!
//! Samples one database target: connects, runs the counter queries built for
//! its dialect, and scans the results into a [`Snapshot`]. Rows that cannot be
//! read are skipped and reported; they never blank out the whole snapshot.

use crate::config::DatabaseTarget;
use crate::db::queries::{build_counter_queries, CounterKind, CounterQueries, CounterQuery};
use crate::db::{self, Dialect};
use crate::error::{CollectError, Diagnostic};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use std::collections::BTreeMap;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

/// Result of sampling one target
#[derive(Debug, Clone, Default)]
pub struct CollectOutcome {
    pub snapshot: Snapshot,
    /// Non-fatal findings: skipped rows, failed queries, dialect caveats
    pub diagnostics: Vec<Diagnostic>,
}

/// Anything that can produce a snapshot for a target
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn collect(&self, target: &DatabaseTarget) -> Result<CollectOutcome, CollectError>;
}

/// A result row carrying `(table name, counter value)`
pub trait CounterRow {
    fn table(&self) -> Result<String, String>;
    fn count(&self) -> Result<i64, String>;
}

impl CounterRow for tokio_postgres::Row {
    fn table(&self) -> Result<String, String> {
        self.try_get::<_, String>(0).map_err(|e| e.to_string())
    }

    fn count(&self) -> Result<i64, String> {
        self.try_get::<_, i64>(1).map_err(|e| e.to_string())
    }
}

impl CounterRow for mysql_async::Row {
    fn table(&self) -> Result<String, String> {
        match self.get_opt::<String, usize>(0) {
            Some(Ok(name)) => Ok(name),
            Some(Err(e)) => Err(format!("{:?}", e)),
            None => Err("missing table name column".to_string()),
        }
    }

    fn count(&self) -> Result<i64, String> {
        match self.get_opt::<Option<i64>, usize>(1) {
            Some(Ok(Some(count))) => Ok(count),
            Some(Ok(None)) => Err("counter is NULL".to_string()),
            Some(Err(e)) => Err(format!("{:?}", e)),
            None => Err("missing counter column".to_string()),
        }
    }
}

/// Scan counter rows into `counts`, skipping rows that cannot be read
pub fn scan_rows<R: CounterRow>(
    target: &str,
    kind: CounterKind,
    rows: &[R],
    counts: &mut BTreeMap<String, i64>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for row in rows {
        let table = match row.table() {
            Ok(table) => table,
            Err(reason) => {
                diagnostics.push(Diagnostic::error(
                    target,
                    format!("Skipping {} row with unreadable table name: {}", kind, reason),
                ));
                continue;
            }
        };

        match row.count() {
            Ok(count) => {
                counts.insert(table, count);
            }
            Err(reason) => diagnostics.push(Diagnostic::error(
                target,
                format!("Failed to obtain {} value for table {}: {}", kind, table, reason),
            )),
        }
    }
}

/// Accumulates one target's counters while its queries run
struct Scan<'a> {
    target: &'a str,
    increment_counts: BTreeMap<String, i64>,
    row_counts: BTreeMap<String, i64>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Scan<'a> {
    fn new(target: &'a str, queries: &CounterQueries) -> Self {
        Self {
            target,
            increment_counts: BTreeMap::new(),
            row_counts: BTreeMap::new(),
            diagnostics: queries.diagnostics.clone(),
        }
    }

    fn rows<R: CounterRow>(&mut self, query: &CounterQuery, rows: &[R]) {
        let kind = query.kind;
        let counts = match kind {
            CounterKind::Increment => &mut self.increment_counts,
            CounterKind::Row => &mut self.row_counts,
        };
        scan_rows(self.target, kind, rows, counts, &mut self.diagnostics);

        // The last parameter is the schema; the rest are the requested tables.
        let requested = &query.params[..query.params.len().saturating_sub(1)];
        let missing: Vec<&str> = requested
            .iter()
            .filter(|table| !counts.contains_key(table.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            self.diagnostics.push(Diagnostic::info(
                self.target,
                format!("No {} counters returned for: {}", kind, missing.join(", ")),
            ));
        }
    }

    fn query_failed(&mut self, kind: CounterKind, reason: impl std::fmt::Display) {
        self.diagnostics.push(Diagnostic::error(
            self.target,
            format!("Failed to query {} counters: {}", kind, reason),
        ));
    }

    /// Diagnostics gathered before the target was found unreachable
    fn abandon(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn finish(self) -> CollectOutcome {
        CollectOutcome {
            snapshot: Snapshot::new(self.increment_counts, self.row_counts),
            diagnostics: self.diagnostics,
        }
    }
}

/// Collector that talks to the configured databases
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseCollector;

impl DatabaseCollector {
    pub fn new() -> Self {
        Self
    }

    async fn collect_postgres(
        target: &DatabaseTarget,
        queries: &CounterQueries,
        scan: &mut Scan<'_>,
    ) -> Result<(), CollectError> {
        let pool = db::create_postgres_pool(&target.name, &target.params)?;
        let client = pool.get().await.map_err(|e| CollectError::Connect {
            target: target.name.clone(),
            reason: e.to_string(),
        })?;

        for query in queries.iter() {
            let params: Vec<&(dyn ToSql + Sync)> = query
                .params
                .iter()
                .map(|p| p as &(dyn ToSql + Sync))
                .collect();

            match client.query(query.sql.as_str(), &params).await {
                Ok(rows) => scan.rows(query, &rows),
                Err(e) => scan.query_failed(query.kind, e),
            }
        }

        Ok(())
    }

    async fn collect_mysql(
        target: &DatabaseTarget,
        queries: &CounterQueries,
        scan: &mut Scan<'_>,
    ) -> Result<(), CollectError> {
        let pool = db::create_mysql_pool(&target.params);
        let result = Self::run_mysql_queries(&pool, target, queries, scan).await;

        // Release the pool whether or not the queries succeeded.
        if let Err(e) = pool.disconnect().await {
            debug!("Error closing MySQL pool for {}: {}", target.name, e);
        }

        result
    }

    async fn run_mysql_queries(
        pool: &mysql_async::Pool,
        target: &DatabaseTarget,
        queries: &CounterQueries,
        scan: &mut Scan<'_>,
    ) -> Result<(), CollectError> {
        let mut conn = pool.get_conn().await.map_err(|e| CollectError::Connect {
            target: target.name.clone(),
            reason: e.to_string(),
        })?;

        for query in queries.iter() {
            match Self::exec_mysql(&mut conn, query).await {
                Ok(rows) => scan.rows(query, &rows),
                Err(e) => scan.query_failed(query.kind, e),
            }
        }

        Ok(())
    }

    async fn exec_mysql(
        conn: &mut mysql_async::Conn,
        query: &CounterQuery,
    ) -> Result<Vec<mysql_async::Row>, mysql_async::Error> {
        conn.exec(query.sql.as_str(), query.params.clone()).await
    }
}

#[async_trait]
impl SnapshotSource for DatabaseCollector {
    async fn collect(&self, target: &DatabaseTarget) -> Result<CollectOutcome, CollectError> {
        let queries = build_counter_queries(
            &target.name,
            target.dialect,
            &target.schema,
            &target.increment_tables,
            &target.row_tables,
        );
        let mut scan = Scan::new(&target.name, &queries);

        if queries.is_empty() {
            return Ok(scan.finish());
        }

        debug!(
            "Collecting counters from {}",
            target.params.to_display_string(target.dialect)
        );

        let connected = match target.dialect {
            Dialect::Postgres => Self::collect_postgres(target, &queries, &mut scan).await,
            Dialect::Mysql => Self::collect_mysql(target, &queries, &mut scan).await,
        };
        if let Err(e) = connected {
            for diagnostic in scan.abandon() {
                diagnostic.emit();
            }
            return Err(e);
        }

        let outcome = scan.finish();
        for kind in [CounterKind::Increment, CounterKind::Row] {
            for (table, count) in outcome.snapshot.counts(kind) {
                info!(
                    "Obtained {} value in database {} for table {} with count {}",
                    kind, target.name, table, count
                );
            }
        }

        Ok(outcome)
    }
}

//! Orchestrator - one collect, diff, publish, save cycle

use crate::collector::SnapshotSource;
use crate::config::{Settings, TargetFailurePolicy};
use crate::error::RunError;
use crate::publisher::{self, MetricSink, PublishReport};
use crate::snapshot::{Delta, DeltaEngine, SnapshotCollection, SnapshotStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Databases that produced a snapshot
    pub collected: Vec<String>,
    /// Databases skipped after a connection failure
    pub skipped: Vec<String>,
    /// No previous snapshots existed, so nothing was diffed or published
    pub first_run: bool,
    pub deltas: BTreeMap<String, Delta>,
    /// `None` when publishing was not attempted or the sink was unusable
    pub published: Option<PublishReport>,
    pub saved: bool,
}

/// Runs the cycle against a snapshot source and a metric sink
pub struct Orchestrator<'a, S, M> {
    settings: &'a Settings,
    source: S,
    sink: M,
    store: SnapshotStore,
    dry_run: bool,
}

impl<'a, S, M> Orchestrator<'a, S, M>
where
    S: SnapshotSource,
    M: MetricSink,
{
    pub fn new(settings: &'a Settings, source: S, sink: M) -> Self {
        Self {
            store: SnapshotStore::new(&settings.count_path),
            settings,
            source,
            sink,
            dry_run: false,
        }
    }

    /// Collect and diff, but neither publish nor save
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = Utc::now();

        let (current, collected, skipped) = self.collect_all().await?;
        if current.is_empty() && !self.settings.targets.is_empty() {
            warn!("No database could be collected this run");
        }

        let previous = self.store.load().await?;
        let first_run = previous.is_none();

        let mut deltas = BTreeMap::new();
        let mut published = None;

        match previous {
            None => info!(
                "No previous snapshots at {}; recording a baseline without publishing",
                self.store.path().display()
            ),
            Some(previous) => {
                for identifier in current.identifiers() {
                    if previous.get(identifier).is_none() {
                        info!("No previous snapshot for {}, establishing baseline", identifier);
                    }
                }

                deltas = DeltaEngine::diff_collections(&current, &previous);

                if self.dry_run {
                    for (identifier, delta) in &deltas {
                        for (kind, table, change) in delta.entries() {
                            info!("[dry run] {} {} {} = {}", identifier, kind, table, change);
                        }
                    }
                } else {
                    published = self.publish(&deltas).await;
                }
            }
        }

        let saved = if self.dry_run {
            info!("[dry run] Not saving snapshots");
            false
        } else {
            self.store.save(&current).await?;
            true
        };

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            collected,
            skipped,
            first_run,
            deltas,
            published,
            saved,
        })
    }

    async fn collect_all(&self) -> Result<(SnapshotCollection, Vec<String>, Vec<String>), RunError> {
        let mut current = SnapshotCollection::new();
        let mut collected = Vec::new();
        let mut skipped = Vec::new();

        for target in &self.settings.targets {
            match self.source.collect(target).await {
                Ok(outcome) => {
                    for diagnostic in &outcome.diagnostics {
                        diagnostic.emit();
                    }
                    if outcome.snapshot.is_empty() && target.has_tables() {
                        warn!("No counters collected for database {}", target.name);
                    }
                    if current.insert(target.name.clone(), outcome.snapshot).is_some() {
                        warn!("Database {} was collected twice; keeping the latest", target.name);
                    }
                    collected.push(target.name.clone());
                }
                Err(e) => match self.settings.on_target_failure {
                    TargetFailurePolicy::Abort => {
                        error!("{}", e);
                        return Err(RunError::TargetFailed(e));
                    }
                    TargetFailurePolicy::Skip => {
                        error!("{}; skipping database", e);
                        skipped.push(e.target().to_string());
                    }
                },
            }
        }

        Ok((current, collected, skipped))
    }

    /// Publish failures never stop the run; the snapshots are saved regardless.
    async fn publish(&self, deltas: &BTreeMap<String, Delta>) -> Option<PublishReport> {
        if deltas.is_empty() {
            info!("No deltas to publish");
            return Some(PublishReport::default());
        }

        let namespace = self.settings.publisher.namespace();
        match publisher::publish(deltas, namespace, &self.sink).await {
            Ok(report) => {
                info!(
                    "Published {} metrics to namespace {} ({} failed)",
                    report.sent, namespace, report.failed
                );
                Some(report)
            }
            Err(e) => {
                error!("Failed to push metrics: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectOutcome;
    use crate::config::{DatabaseTarget, PublisherConfig};
    use crate::db::{ConnectionParams, Dialect};
    use crate::error::{CollectError, Diagnostic};
    use crate::publisher::test_support::MemorySink;
    use crate::snapshot::test_support::snapshot;
    use crate::snapshot::Snapshot;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Source that replays canned snapshots; unknown targets fail to connect
    #[derive(Default)]
    struct ScriptedSource {
        snapshots: Mutex<HashMap<String, Snapshot>>,
    }

    impl ScriptedSource {
        fn with(entries: &[(&str, Snapshot)]) -> Self {
            let source = Self::default();
            source.set(entries);
            source
        }

        fn set(&self, entries: &[(&str, Snapshot)]) {
            let mut snapshots = self.snapshots.lock().unwrap();
            snapshots.clear();
            for (name, snapshot) in entries {
                snapshots.insert(name.to_string(), snapshot.clone());
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn collect(&self, target: &DatabaseTarget) -> Result<CollectOutcome, CollectError> {
            match self.snapshots.lock().unwrap().get(&target.name) {
                Some(snapshot) => Ok(CollectOutcome {
                    snapshot: snapshot.clone(),
                    diagnostics: vec![Diagnostic::info(&target.name, "scripted")],
                }),
                None => Err(CollectError::Connect {
                    target: target.name.clone(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    fn target(name: &str, dialect: Dialect, increment: &[&str], row: &[&str]) -> DatabaseTarget {
        DatabaseTarget {
            name: name.to_string(),
            dialect,
            params: ConnectionParams {
                host: "localhost".to_string(),
                port: dialect.default_port(),
                user: "metrics".to_string(),
                password: String::new(),
                database: name.to_string(),
                tls: false,
            },
            schema: dialect.default_schema(name),
            increment_tables: increment.iter().map(|s| s.to_string()).collect(),
            row_tables: row.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn settings(dir: &Path, targets: Vec<DatabaseTarget>) -> Settings {
        Settings {
            count_path: dir.join("counts.yml"),
            on_target_failure: TargetFailurePolicy::Skip,
            publisher: PublisherConfig::default(),
            targets,
        }
    }

    #[tokio::test]
    async fn test_orders_scenario_first_run_then_delta() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("orders", Dialect::Mysql, &["orders"], &[])],
        );
        let source = ScriptedSource::with(&[("orders", snapshot(&[("orders", 100)], &[]))]);
        let sink = MemorySink::default();

        let orchestrator = Orchestrator::new(&settings, source, sink);

        // Run 1: no prior file, nothing published, baseline saved.
        let first = orchestrator.run().await.unwrap();
        assert!(first.first_run);
        assert!(first.saved);
        assert!(first.deltas.is_empty());
        assert!(first.published.is_none());
        assert!(orchestrator.sink.points().is_empty());

        // Run 2: 150 observed, delta 50 published, 150 saved.
        orchestrator
            .source
            .set(&[("orders", snapshot(&[("orders", 150)], &[]))]);
        let second = orchestrator.run().await.unwrap();
        assert!(!second.first_run);
        assert_eq!(second.deltas["orders"].increment_counts["orders"], 50);
        assert_eq!(second.published, Some(PublishReport { sent: 1, failed: 0 }));

        let points = orchestrator.sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "orders");
        assert_eq!(points[0].value, 50.0);
        assert_eq!(points[0].database, "orders");
        assert_eq!(points[0].namespace, "RowMetrics");

        let saved = SnapshotStore::new(&settings.count_path).load().await.unwrap().unwrap();
        assert_eq!(saved.get("orders").unwrap().increment_counts["orders"], 150);
    }

    #[tokio::test]
    async fn test_events_scenario_negative_delta_published() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("events", Dialect::Postgres, &[], &["events"])],
        );
        let source = ScriptedSource::with(&[("events", snapshot(&[], &[("events", 10)]))]);
        let orchestrator = Orchestrator::new(&settings, source, MemorySink::default());

        orchestrator.run().await.unwrap();
        orchestrator
            .source
            .set(&[("events", snapshot(&[], &[("events", 7)]))]);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.deltas["events"].row_counts["events"], -3);
        assert_eq!(orchestrator.sink.points()[0].value, -3.0);
    }

    #[tokio::test]
    async fn test_failed_target_is_skipped_and_dropped_identifier_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![
                target("orders", Dialect::Mysql, &["orders"], &[]),
                target("flaky", Dialect::Mysql, &["jobs"], &[]),
            ],
        );
        let store = SnapshotStore::new(&settings.count_path);
        let previous: SnapshotCollection = [
            ("orders".to_string(), snapshot(&[("orders", 100)], &[])),
            ("flaky".to_string(), snapshot(&[("jobs", 5)], &[])),
        ]
        .into_iter()
        .collect();
        store.save(&previous).await.unwrap();

        // "flaky" has no scripted snapshot, so collecting it fails.
        let source = ScriptedSource::with(&[("orders", snapshot(&[("orders", 120)], &[]))]);
        let orchestrator = Orchestrator::new(&settings, source, MemorySink::default());
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.collected, vec!["orders"]);
        assert_eq!(report.skipped, vec!["flaky"]);
        assert_eq!(report.deltas.keys().collect::<Vec<_>>(), vec!["orders"]);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.identifiers().collect::<Vec<_>>(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_every_target_skipped_saves_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("down", Dialect::Mysql, &["jobs"], &[])],
        );

        let orchestrator =
            Orchestrator::new(&settings, ScriptedSource::default(), MemorySink::default());
        let report = orchestrator.run().await.unwrap();

        assert!(report.collected.is_empty());
        assert_eq!(report.skipped, vec!["down"]);
        assert!(report.saved);

        let saved = SnapshotStore::new(&settings.count_path).load().await.unwrap().unwrap();
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn test_abort_policy_stops_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(
            dir.path(),
            vec![target("down", Dialect::Postgres, &[], &["events"])],
        );
        settings.on_target_failure = TargetFailurePolicy::Abort;

        let orchestrator =
            Orchestrator::new(&settings, ScriptedSource::default(), MemorySink::default());
        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, RunError::TargetFailed(_)));
        assert!(!settings.count_path.exists());
    }

    #[tokio::test]
    async fn test_new_identifier_gets_baseline_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![
                target("orders", Dialect::Mysql, &["orders"], &[]),
                target("fresh", Dialect::Mysql, &["things"], &[]),
            ],
        );
        let store = SnapshotStore::new(&settings.count_path);
        let previous: SnapshotCollection =
            [("orders".to_string(), snapshot(&[("orders", 100)], &[]))]
                .into_iter()
                .collect();
        store.save(&previous).await.unwrap();

        let source = ScriptedSource::with(&[
            ("orders", snapshot(&[("orders", 110)], &[])),
            ("fresh", snapshot(&[("things", 42)], &[])),
        ]);
        let orchestrator = Orchestrator::new(&settings, source, MemorySink::default());
        let report = orchestrator.run().await.unwrap();

        assert!(!report.deltas.contains_key("fresh"));
        assert!(orchestrator.sink.points().iter().all(|p| p.database == "orders"));

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.get("fresh").unwrap().increment_counts["things"], 42);
    }

    #[tokio::test]
    async fn test_publish_failure_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("orders", Dialect::Mysql, &["orders"], &[])],
        );
        let store = SnapshotStore::new(&settings.count_path);
        let previous: SnapshotCollection =
            [("orders".to_string(), snapshot(&[("orders", 100)], &[]))]
                .into_iter()
                .collect();
        store.save(&previous).await.unwrap();

        let source = ScriptedSource::with(&[("orders", snapshot(&[("orders", 130)], &[]))]);
        let sink = MemorySink {
            reject_credentials: true,
            ..Default::default()
        };
        let report = Orchestrator::new(&settings, source, sink).run().await.unwrap();

        assert!(report.published.is_none());
        assert!(report.saved);
        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.get("orders").unwrap().increment_counts["orders"], 130);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("orders", Dialect::Mysql, &["orders"], &[])],
        );
        std::fs::write(&settings.count_path, "orders: [unterminated").unwrap();

        let source = ScriptedSource::with(&[("orders", snapshot(&[("orders", 1)], &[]))]);
        let orchestrator = Orchestrator::new(&settings, source, MemorySink::default());
        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, RunError::Store(_)));
        assert!(orchestrator.sink.points().is_empty());
        // The unreadable file is left as it was.
        assert_eq!(
            std::fs::read_to_string(&settings.count_path).unwrap(),
            "orders: [unterminated"
        );
    }

    #[tokio::test]
    async fn test_dry_run_neither_publishes_nor_saves() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            dir.path(),
            vec![target("orders", Dialect::Mysql, &["orders"], &[])],
        );
        let store = SnapshotStore::new(&settings.count_path);
        let previous: SnapshotCollection =
            [("orders".to_string(), snapshot(&[("orders", 100)], &[]))]
                .into_iter()
                .collect();
        store.save(&previous).await.unwrap();

        let source = ScriptedSource::with(&[("orders", snapshot(&[("orders", 175)], &[]))]);
        let orchestrator =
            Orchestrator::new(&settings, source, MemorySink::default()).dry_run(true);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.deltas["orders"].increment_counts["orders"], 75);
        assert!(!report.saved);
        assert!(orchestrator.sink.points().is_empty());
        assert_eq!(store.load().await.unwrap().unwrap(), previous);
    }
}

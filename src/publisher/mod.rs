//! Metric Publisher
//!
//! Turns per-database deltas into metric points and pushes them to a
//! [`MetricSink`]. Credentials are checked once up front; after that, a
//! failed point is logged and the rest of the batch still goes out.

pub mod cloudwatch;

pub use cloudwatch::CloudWatchSink;

use crate::db::queries::CounterKind;
use crate::error::PublishError;
use crate::snapshot::Delta;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Dimension that carries the source database's identifier
pub const DIMENSION_NAME: &str = "DBInstanceIdentifier";

/// Unit of a metric point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
}

/// One value to publish
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub namespace: String,
    /// Table name
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    /// Value of the [`DIMENSION_NAME`] dimension
    pub database: String,
    /// Which counter the value came from (not sent, used for logging)
    pub kind: CounterKind,
}

/// Destination for metric points
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Check that the sink can publish at all (credentials, session)
    async fn validate(&self) -> Result<(), PublishError>;

    async fn put(&self, point: &MetricPoint) -> Result<(), PublishError>;
}

/// Outcome of a publish pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub sent: usize,
    pub failed: usize,
}

/// Build one point per `(database, table, change)`, in a stable order
pub fn metric_points(deltas: &BTreeMap<String, Delta>, namespace: &str) -> Vec<MetricPoint> {
    deltas
        .iter()
        .flat_map(|(database, delta)| {
            delta.entries().map(move |(kind, table, change)| MetricPoint {
                namespace: namespace.to_string(),
                name: table.to_string(),
                value: change as f64,
                unit: MetricUnit::Count,
                database: database.clone(),
                kind,
            })
        })
        .collect()
}

/// Publish every delta to `sink`
///
/// Returns an error only when the sink fails validation, in which case
/// nothing is sent.
pub async fn publish<S>(
    deltas: &BTreeMap<String, Delta>,
    namespace: &str,
    sink: &S,
) -> Result<PublishReport, PublishError>
where
    S: MetricSink + ?Sized,
{
    sink.validate().await?;

    let mut report = PublishReport::default();
    for point in metric_points(deltas, namespace) {
        match sink.put(&point).await {
            Ok(()) => {
                report.sent += 1;
                info!(
                    "Pushed {} metric for table {} in database {} with difference {}",
                    point.kind, point.name, point.database, point.value
                );
            }
            Err(e) => {
                report.failed += 1;
                error!("{}", e);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records points in memory
    #[derive(Default)]
    pub struct MemorySink {
        pub points: Mutex<Vec<MetricPoint>>,
        /// Refuse validation
        pub reject_credentials: bool,
        /// Fail `put` for points with this metric name
        pub fail_metric: Option<String>,
    }

    impl MemorySink {
        pub fn points(&self) -> Vec<MetricPoint> {
            self.points.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricSink for MemorySink {
        async fn validate(&self) -> Result<(), PublishError> {
            if self.reject_credentials {
                return Err(PublishError::Credentials("no credentials".to_string()));
            }
            Ok(())
        }

        async fn put(&self, point: &MetricPoint) -> Result<(), PublishError> {
            if self.fail_metric.as_deref() == Some(point.name.as_str()) {
                return Err(PublishError::Put {
                    database: point.database.clone(),
                    metric: point.name.clone(),
                    reason: "throttled".to_string(),
                });
            }
            self.points.lock().unwrap().push(point.clone());
            Ok(())
        }
    }
}

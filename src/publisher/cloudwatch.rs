//! CloudWatch metric sink
//!
//! Credentials come from the `aws:` config section when both keys are set,
//! otherwise from the SDK's default chain (environment, shared credentials
//! file, instance role).

use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::publisher::{MetricPoint, MetricSink, MetricUnit, DIMENSION_NAME};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use aws_sdk_cloudwatch::Client;
use tracing::debug;

const PROVIDER_NAME: &str = "rowpulse-config";

/// Publishes metric points with `PutMetricData`
pub struct CloudWatchSink {
    client: Client,
    credentials: Option<SharedCredentialsProvider>,
}

impl CloudWatchSink {
    /// Build a CloudWatch client from the publisher settings
    pub async fn connect(config: &PublisherConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = config.region.as_deref().filter(|r| !r.is_empty()) {
            loader = loader.region(Region::new(region.to_string()));
        }

        if let Some((access_key_id, secret_access_key)) = config.static_credentials() {
            debug!("Using CloudWatch credentials from configuration");
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                PROVIDER_NAME,
            ));
        } else {
            debug!("Using the default AWS credential chain");
        }

        let sdk_config = loader.load().await;

        Self {
            client: Client::new(&sdk_config),
            credentials: sdk_config.credentials_provider(),
        }
    }

    fn unit(unit: MetricUnit) -> StandardUnit {
        match unit {
            MetricUnit::Count => StandardUnit::Count,
        }
    }

    /// The `PutMetricData` datum for one point
    fn datum(point: &MetricPoint) -> MetricDatum {
        let dimension = Dimension::builder()
            .name(DIMENSION_NAME)
            .value(&point.database)
            .build();

        MetricDatum::builder()
            .metric_name(&point.name)
            .unit(Self::unit(point.unit))
            .value(point.value)
            .dimensions(dimension)
            .build()
    }

    fn put_error(point: &MetricPoint, reason: String) -> PublishError {
        PublishError::Put {
            database: point.database.clone(),
            metric: point.name.clone(),
            reason,
        }
    }
}

#[async_trait]
impl MetricSink for CloudWatchSink {
    async fn validate(&self) -> Result<(), PublishError> {
        let provider = self.credentials.as_ref().ok_or_else(|| {
            PublishError::Credentials("no credentials provider is configured".to_string())
        })?;

        provider
            .provide_credentials()
            .await
            .map_err(|e| PublishError::Credentials(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn put(&self, point: &MetricPoint) -> Result<(), PublishError> {
        let datum = Self::datum(point);

        self.client
            .put_metric_data()
            .namespace(&point.namespace)
            .metric_data(datum)
            .send()
            .await
            .map_err(|e| Self::put_error(point, DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

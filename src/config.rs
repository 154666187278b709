//! Application configuration module
//!
//! Loads the job configuration from a YAML file, layered with `ROWPULSE__*`
//! environment variables (and a `.env` file if present), then resolves it into
//! the typed settings a run works from.

use crate::db::{split_host_port, ConnectionParams, Dialect};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Metric namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "RowMetrics";

/// Prefix for environment overrides, e.g. `ROWPULSE__AWS__REGION`
pub const ENV_PREFIX: &str = "ROWPULSE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// What to do when one database cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFailurePolicy {
    /// Log the failure and carry on with the remaining databases
    #[default]
    Skip,
    /// Stop the run
    Abort,
}

/// Metric backend settings (`aws:` section)
///
/// Credentials are optional: when both keys are absent the backend SDK's
/// default chain is used (environment, shared profile, instance role).
#[derive(Clone, Default, Deserialize)]
pub struct PublisherConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, alias = "accessKeyId", alias = "accesskeyid")]
    pub access_key_id: Option<String>,
    #[serde(default, alias = "secretAccessKey", alias = "secretaccesskey")]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl PublisherConfig {
    /// Configured namespace, or [`DEFAULT_NAMESPACE`]
    pub fn namespace(&self) -> &str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.trim().is_empty() => ns,
            _ => DEFAULT_NAMESPACE,
        }
    }

    /// Explicit static credentials, if both halves are configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key_id.as_deref(), self.secret_access_key.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }

    /// Exactly one of the two credential keys is set
    pub fn has_partial_credentials(&self) -> bool {
        let set = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.is_empty());
        set(&self.access_key_id) != set(&self.secret_access_key)
    }
}

impl fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Table lists for one database (`tables:` section)
#[derive(Clone, Default, Deserialize)]
pub struct TableConfig {
    /// Tables whose auto-increment watermark is sampled
    #[serde(default)]
    pub increment: Vec<String>,
    /// Tables whose approximate row count is sampled
    #[serde(default)]
    pub row: Vec<String>,
}

/// One entry of the `databases:` list, as written in the file
#[derive(Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub dialect: Option<String>,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub tables: TableConfig,
}

#[derive(Deserialize)]
struct FileSettings {
    #[serde(alias = "countPath", alias = "countpath")]
    count_path: String,
    #[serde(default)]
    on_target_failure: TargetFailurePolicy,
    #[serde(default)]
    aws: PublisherConfig,
    #[serde(default)]
    databases: Vec<TargetConfig>,
}

/// A database to sample, fully resolved. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Identifier used as the snapshot key and metric dimension value
    pub name: String,
    pub dialect: Dialect,
    pub params: ConnectionParams,
    pub schema: String,
    pub increment_tables: Vec<String>,
    pub row_tables: Vec<String>,
}

impl DatabaseTarget {
    /// Resolve a configured entry: dialect, port and schema defaults
    pub fn from_config(raw: TargetConfig) -> Result<Self, ConfigError> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Every database needs a non-empty name".to_string(),
            ));
        }

        let dialect = match raw.dialect.as_deref().map(str::trim) {
            None | Some("") => Dialect::default(),
            Some(other) => Dialect::from_name(other).unwrap_or_else(|| {
                warn!(
                    "Unknown database type '{}' for {}, falling back to {}",
                    other,
                    name,
                    Dialect::default()
                );
                Dialect::default()
            }),
        };

        let (host, embedded_port) = split_host_port(raw.host.trim());
        if host.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "Missing host for database {}",
                name
            )));
        }
        let port = raw
            .port
            .or(embedded_port)
            .unwrap_or_else(|| dialect.default_port());

        let schema = match raw.schema {
            Some(schema) if !schema.trim().is_empty() => schema.trim().to_string(),
            _ => dialect.default_schema(&raw.database),
        };

        Ok(Self {
            params: ConnectionParams {
                host,
                port,
                user: raw.user,
                password: raw.password,
                database: raw.database,
                tls: raw.tls,
            },
            name,
            dialect,
            schema,
            increment_tables: dedup_tables(raw.tables.increment),
            row_tables: dedup_tables(raw.tables.row),
        })
    }

    pub fn has_tables(&self) -> bool {
        !self.increment_tables.is_empty() || !self.row_tables.is_empty()
    }
}

/// Trim, drop blanks and duplicates, keep configured order
fn dedup_tables(tables: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tables
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where the previous run's snapshots are kept
    pub count_path: PathBuf,
    pub on_target_failure: TargetFailurePolicy,
    pub publisher: PublisherConfig,
    pub targets: Vec<DatabaseTarget>,
}

impl Settings {
    /// Load settings from a YAML file plus environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let source = config::File::new(&path.to_string_lossy(), config::FileFormat::Yaml);
        Self::build(path, source, true)
    }

    /// Parse settings from YAML text, without environment overrides
    #[cfg(test)]
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let source = config::File::from_str(yaml, config::FileFormat::Yaml);
        Self::build(Path::new("<inline>"), source, false)
    }

    fn build<S>(path: &Path, source: S, with_env: bool) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let load_error = |source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        };

        let mut builder = config::Config::builder().add_source(source);
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let file: FileSettings = builder
            .build()
            .map_err(load_error)?
            .try_deserialize()
            .map_err(load_error)?;

        Self::resolve(file)
    }

    fn resolve(file: FileSettings) -> Result<Self, ConfigError> {
        if file.count_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "count_path must not be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut targets = Vec::with_capacity(file.databases.len());
        for raw in file.databases {
            let target = DatabaseTarget::from_config(raw)?;
            if !names.insert(target.name.clone()) {
                return Err(ConfigError::InvalidValue(format!(
                    "Duplicate database name: {}",
                    target.name
                )));
            }
            if !target.has_tables() {
                warn!("Database {} has no tables configured", target.name);
            }
            targets.push(target);
        }

        if file.aws.has_partial_credentials() {
            warn!(
                "Only one of aws.access_key_id and aws.secret_access_key is set; \
                 using the default AWS credential chain"
            );
        }

        Ok(Self {
            count_path: PathBuf::from(file.count_path.trim()),
            on_target_failure: file.on_target_failure,
            publisher: file.aws,
            targets,
        })
    }
}

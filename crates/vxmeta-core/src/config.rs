use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::DatasetDefinition;
use crate::AppError;

/// Namespace used in metadata document ids and the `docType` tag.
pub const DEFAULT_NAMESPACE: &str = "matsGui";

/// How recoverable failures (a stale-model deletion, a model aggregation)
/// affect the enclosing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log the failure, keep going, and report it in the pass statistics.
    #[default]
    ContinueOnError,
    /// Fail the pass on the first failure.
    FailFast,
}

/// What to do when an aggregate query yields no usable row for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingAggregatePolicy {
    /// Leave the model out of the metadata document.
    #[default]
    SkipModel,
    /// Keep the model with empty lists, empty text and zeroed numbers.
    ZeroFill,
}

/// Source of the metadata document's `updated` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatedPolicy {
    /// Value of the last model in position order that reported one.
    #[default]
    LastProcessed,
    /// Maximum across all aggregated models.
    Max,
}

/// Query timeouts, split between short metadata lookups and long-running
/// aggregates over raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeouts {
    pub lookup: Duration,
    pub aggregate: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            lookup: Duration::from_secs(30),
            aggregate: Duration::from_secs(300),
        }
    }
}

/// Settings for a metadata update run.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Maximum number of models aggregated concurrently within a pass.
    pub concurrency: usize,
    pub error_policy: ErrorPolicy,
    pub missing_aggregate: MissingAggregatePolicy,
    pub updated_policy: UpdatedPolicy,
    /// Namespace of the metadata document id, e.g. `MD:<namespace>:RAP:COMMON:V01`.
    pub namespace: String,
    pub timeouts: QueryTimeouts,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            error_policy: ErrorPolicy::default(),
            missing_aggregate: MissingAggregatePolicy::default(),
            updated_policy: UpdatedPolicy::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeouts: QueryTimeouts::default(),
        }
    }
}

/// Contents of the settings file: the datasets to maintain metadata for.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub metadata: Vec<DatasetDefinition>,
}

impl Settings {
    /// Reads and parses a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
            .map_err(|e| AppError::Config(format!("cannot parse settings {}: {e}", path.display())))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Datasets selected for this run; `filter` matches the dataset name.
    pub fn select(&self, filter: Option<&str>) -> Vec<&DatasetDefinition> {
        self.metadata
            .iter()
            .filter(|d| filter.map_or(true, |name| d.name == name))
            .collect()
    }
}

/// A bucket/scope/collection triple.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionTarget {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl ConnectionTarget {
    /// The keyspace path substituted for `{{vxDBTARGET}}`.
    pub fn namespace(&self) -> String {
        format!("{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

/// Store credentials, read once at startup and passed down by reference.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub cb_host: String,
    pub cb_user: String,
    pub cb_password: String,
    pub cb_bucket: String,
    pub cb_scope: String,
    pub cb_collection: String,
    /// Additional named targets, e.g. a separate metadata collection.
    #[serde(default)]
    pub cb_targets: BTreeMap<String, ConnectionTarget>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cb_host", &self.cb_host)
            .field("cb_user", &self.cb_user)
            .field("cb_password", &"<redacted>")
            .field("cb_bucket", &self.cb_bucket)
            .field("cb_scope", &self.cb_scope)
            .field("cb_collection", &self.cb_collection)
            .field("cb_targets", &self.cb_targets)
            .finish()
    }
}

impl Credentials {
    /// Reads a YAML credentials file (`cb_host: ...` per line).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read credentials {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text).map_err(|e| {
            AppError::Config(format!("cannot parse credentials {}: {e}", path.display()))
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Resolves the connection target: the default `cb_bucket.cb_scope.cb_collection`
    /// triple, or a named entry of `cb_targets`.
    pub fn target(&self, name: Option<&str>) -> Result<ConnectionTarget, AppError> {
        match name {
            None => Ok(ConnectionTarget {
                bucket: self.cb_bucket.clone(),
                scope: self.cb_scope.clone(),
                collection: self.cb_collection.clone(),
            }),
            Some(name) => self
                .cb_targets
                .get(name)
                .cloned()
                .ok_or_else(|| AppError::Config(format!("unknown connection target '{name}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CREDENTIALS: &str = "cb_host: couchbase://adb-cb1.example.org\n\
        cb_user: avid\n\
        cb_password: secret\n\
        cb_bucket: vxdata\n\
        cb_scope: _default\n\
        cb_collection: METAR\n";

    #[test]
    fn test_update_config_defaults() {
        let config = UpdateConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.error_policy, ErrorPolicy::ContinueOnError);
        assert_eq!(config.missing_aggregate, MissingAggregatePolicy::SkipModel);
        assert_eq!(config.updated_policy, UpdatedPolicy::LastProcessed);
        assert_eq!(config.namespace, "matsGui");
    }

    #[test]
    fn test_query_timeouts_defaults() {
        let timeouts = QueryTimeouts::default();
        assert_eq!(timeouts.lookup, Duration::from_secs(30));
        assert_eq!(timeouts.aggregate, Duration::from_secs(300));
        assert!(timeouts.aggregate > timeouts.lookup);
    }

    #[test]
    fn test_settings_parse_and_select() {
        let settings = Settings::from_json(
            r#"{"metadata": [
                {"name": "RAP", "app": "cb-ceiling", "subDocType": "CEILING",
                 "docType": ["CTC", "SUMS"]},
                {"name": "HRRR", "app": "cb-visibility", "subDocType": "VISIBILITY",
                 "docType": ["CTC"]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(settings.metadata.len(), 2);
        assert_eq!(settings.metadata[0].doc_types, vec!["CTC", "SUMS"]);
        assert_eq!(settings.select(None).len(), 2);

        let only = settings.select(Some("HRRR"));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].sub_doc_type, "VISIBILITY");
        assert!(settings.select(Some("missing")).is_empty());
    }

    #[test]
    fn test_settings_from_missing_file_is_config_error() {
        let err = Settings::from_file("/nonexistent/settings.json").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_credentials_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CREDENTIALS.as_bytes()).unwrap();

        let credentials = Credentials::from_file(file.path()).unwrap();
        assert_eq!(credentials.cb_host, "couchbase://adb-cb1.example.org");
        assert_eq!(credentials.cb_user, "avid");
        assert_eq!(credentials.target(None).unwrap().namespace(), "vxdata._default.METAR");
        assert!(!format!("{credentials:?}").contains("secret"));
    }

    #[test]
    fn test_credentials_named_targets() {
        let text = format!(
            "{CREDENTIALS}cb_targets:\n  metadata:\n    bucket: mdata\n    \
             scope: _default\n    collection: MATS\n"
        );
        let credentials = Credentials::from_yaml(&text).unwrap();

        let target = credentials.target(Some("metadata")).unwrap();
        assert_eq!(target.namespace(), "mdata._default.MATS");
        assert!(matches!(credentials.target(Some("other")), Err(AppError::Config(_))));
    }

    #[test]
    fn test_credentials_missing_field_fails() {
        assert!(Credentials::from_yaml("cb_host: localhost\n").is_err());
    }
}

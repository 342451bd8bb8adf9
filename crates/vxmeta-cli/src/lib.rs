//! Command line definitions for the `vxmeta` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use vxmeta_core::{
    ErrorPolicy, MissingAggregatePolicy, UpdateConfig, UpdatedPolicy, DEFAULT_NAMESPACE,
};

/// Keeps the metadata documents of verification datasets in sync with raw data.
#[derive(Parser, Debug)]
#[command(name = "vxmeta", version, about)]
pub struct Config {
    /// Credentials YAML file [default: $HOME/credentials]
    #[arg(short, long, env = "VXMETA_CREDENTIALS", global = true)]
    pub credentials: Option<PathBuf>,

    /// Settings JSON file listing the datasets
    #[arg(short, long, env = "VXMETA_SETTINGS", default_value = "./settings.json", global = true)]
    pub settings: PathBuf,

    /// Directory holding the <template>.sql query files
    #[arg(short, long, env = "VXMETA_TEMPLATES", default_value = "./sqls", global = true)]
    pub templates: PathBuf,

    /// Only process the dataset with this name
    #[arg(short, long, global = true)]
    pub app: Option<String>,

    /// Named entry of cb_targets to use instead of cb_bucket/cb_scope/cb_collection
    #[arg(long, env = "VXMETA_TARGET", global = true)]
    pub target: Option<String>,

    /// Models aggregated concurrently within a pass
    #[arg(long, env = "VXMETA_CONCURRENCY", default_value_t = 4, global = true)]
    pub concurrency: usize,

    /// Fail a pass on the first failed deletion or model
    #[arg(long, global = true)]
    pub fail_fast: bool,

    /// Keep models whose aggregates return no rows, with zeroed fields
    #[arg(long, global = true)]
    pub zero_fill_missing: bool,

    /// How the document's `updated` field is chosen
    #[arg(long, value_enum, default_value = "last", global = true)]
    pub updated_policy: CliUpdatedPolicy,

    /// Namespace of metadata document ids
    #[arg(long, env = "VXMETA_NAMESPACE", default_value = DEFAULT_NAMESPACE, global = true)]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reconcile, aggregate and write metadata documents (default)
    Update,
    /// Show required, stale and new models without changing anything
    Plan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliUpdatedPolicy {
    /// Value of the last model processed
    Last,
    /// Largest value across models
    Max,
}

impl From<CliUpdatedPolicy> for UpdatedPolicy {
    fn from(policy: CliUpdatedPolicy) -> Self {
        match policy {
            CliUpdatedPolicy::Last => UpdatedPolicy::LastProcessed,
            CliUpdatedPolicy::Max => UpdatedPolicy::Max,
        }
    }
}

impl Config {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Update)
    }

    /// The credentials file, falling back to `$HOME/credentials`.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials.clone().or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join("credentials"))
        })
    }

    pub fn update_config(&self) -> UpdateConfig {
        UpdateConfig {
            concurrency: self.concurrency.max(1),
            error_policy: if self.fail_fast {
                ErrorPolicy::FailFast
            } else {
                ErrorPolicy::ContinueOnError
            },
            missing_aggregate: if self.zero_fill_missing {
                MissingAggregatePolicy::ZeroFill
            } else {
                MissingAggregatePolicy::SkipModel
            },
            updated_policy: self.updated_policy.into(),
            namespace: self.namespace.clone(),
            ..UpdateConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["vxmeta"]).unwrap();
        assert_eq!(config.command(), Command::Update);
        assert_eq!(config.settings, PathBuf::from("./settings.json"));
        assert_eq!(config.templates, PathBuf::from("./sqls"));
        assert!(config.app.is_none());

        let update = config.update_config();
        assert_eq!(update.error_policy, ErrorPolicy::ContinueOnError);
        assert_eq!(update.missing_aggregate, MissingAggregatePolicy::SkipModel);
        assert_eq!(update.updated_policy, UpdatedPolicy::LastProcessed);
        assert_eq!(update.namespace, "matsGui");
    }

    #[test]
    fn test_flags_after_subcommand() {
        let config = Config::try_parse_from([
            "vxmeta",
            "plan",
            "-a",
            "RAP",
            "-c",
            "/tmp/creds",
            "--fail-fast",
            "--zero-fill-missing",
            "--updated-policy",
            "max",
            "--concurrency",
            "0",
        ])
        .unwrap();

        assert_eq!(config.command(), Command::Plan);
        assert_eq!(config.app.as_deref(), Some("RAP"));
        assert_eq!(config.credentials_path(), Some(PathBuf::from("/tmp/creds")));

        let update = config.update_config();
        assert_eq!(update.concurrency, 1);
        assert_eq!(update.error_policy, ErrorPolicy::FailFast);
        assert_eq!(update.missing_aggregate, MissingAggregatePolicy::ZeroFill);
        assert_eq!(update.updated_policy, UpdatedPolicy::Max);
    }

    #[test]
    fn test_invalid_updated_policy_rejected() {
        assert!(Config::try_parse_from(["vxmeta", "--updated-policy", "first"]).is_err());
    }
}

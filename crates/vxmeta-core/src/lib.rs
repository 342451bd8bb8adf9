//! vxmeta Core - Reconciliation, aggregation and metadata synthesis.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod query;
pub mod reconcile;
pub mod scope;
pub mod summary;
pub mod template;
pub mod traits;
pub mod update;

pub use config::{
    ConnectionTarget, Credentials, ErrorPolicy, MissingAggregatePolicy, QueryTimeouts, Settings,
    UpdateConfig, UpdatedPolicy, DEFAULT_NAMESPACE,
};
pub use error::AppError;
pub use models::{DatasetDefinition, MetadataDocument, ModelLevels, ModelRecord};
pub use progress::{ProgressReporter, SilentReporter, TracingReporter, UpdateEvent};
pub use query::{QueryResult, QueryShape, Record};
pub use reconcile::ReconcilePlan;
pub use summary::{PassResult, PassStats, RunSummary};
pub use template::{Bindings, TemplateName, TemplateSet};
pub use traits::DocumentStore;
pub use update::{MetadataUpdateService, PassReport};

//! Metadata document synthesis.

use crate::config::UpdatedPolicy;
use crate::models::{MetadataDocument, ModelRecord};
use crate::scope::PassScope;

/// The document's `updated` stamp under `policy`.
///
/// `LastProcessed` keeps overwriting with each record's value in position
/// order, so the last record that reported one wins. `Max` takes the
/// largest. Both yield 0 when no record reported a value.
pub fn resolve_updated(records: &[ModelRecord], policy: UpdatedPolicy) -> i64 {
    let stamps = records.iter().filter_map(|r| r.updated);
    match policy {
        UpdatedPolicy::LastProcessed => stamps.last(),
        UpdatedPolicy::Max => stamps.max(),
    }
    .unwrap_or(0)
}

/// Assembles the metadata document of a pass from its model records,
/// which must already be in position order.
pub fn synthesize(
    scope: &PassScope<'_>,
    records: Vec<ModelRecord>,
    policy: UpdatedPolicy,
) -> MetadataDocument {
    MetadataDocument {
        id: scope.metadata_id(),
        doc_kind: MetadataDocument::KIND.to_string(),
        doc_type: scope.namespace.to_string(),
        subset: MetadataDocument::SUBSET.to_string(),
        version: MetadataDocument::VERSION.to_string(),
        name: scope.dataset.name.clone(),
        app: scope.dataset.app.clone(),
        updated: resolve_updated(&records, policy),
        models: records,
    }
}

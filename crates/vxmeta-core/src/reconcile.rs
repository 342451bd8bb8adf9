//! Model set reconciliation.
//!
//! For one pass this works out which models have raw data (required), which
//! have metadata but no data (stale), removes the stale entries, and then
//! reads which models still have metadata (existing). Stale models come from
//! their own query and are never derived from the required set, since the
//! two queries look at different documents and may disagree.

use std::collections::HashSet;

use crate::config::ErrorPolicy;
use crate::progress::{PassLabel, ProgressReporter, UpdateEvent};
use crate::query::TemplateQueries;
use crate::scope::PassScope;
use crate::template::TemplateName;
use crate::traits::DocumentStore;
use crate::AppError;

/// Model sets of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Models with raw data, in query order. This order is kept all the way
    /// into the metadata document.
    pub required: Vec<String>,
    /// Models with metadata but no raw data.
    pub stale: Vec<String>,
    /// Models present in the metadata document after deletions.
    pub existing: Vec<String>,
    /// `required` minus `existing`, in required order.
    pub new_models: Vec<String>,
    /// Stale models whose metadata entry was removed.
    pub deleted: Vec<String>,
    /// Stale models whose removal failed, with the error text.
    pub deletion_failures: Vec<(String, String)>,
}

/// Required models that have no metadata yet, keeping `required` order.
pub fn new_models(required: &[String], existing: &[String]) -> Vec<String> {
    let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    required
        .iter()
        .filter(|m| !existing.contains(m.as_str()) && seen.insert(m.as_str()))
        .cloned()
        .collect()
}

/// Runs the model-set queries and stale deletions of a pass.
pub struct Reconciler<'q, 'a, S> {
    queries: &'q TemplateQueries<'a, S>,
    error_policy: ErrorPolicy,
}

impl<'q, 'a, S: DocumentStore> Reconciler<'q, 'a, S> {
    pub fn new(queries: &'q TemplateQueries<'a, S>, error_policy: ErrorPolicy) -> Self {
        Self {
            queries,
            error_policy,
        }
    }

    pub async fn required_models(&self, scope: &PassScope<'_>) -> Result<Vec<String>, AppError> {
        self.queries
            .strings(TemplateName::GetModels, &scope.bindings())
            .await
    }

    pub async fn stale_models(&self, scope: &PassScope<'_>) -> Result<Vec<String>, AppError> {
        self.queries
            .strings(TemplateName::GetModelsNoData, &scope.bindings())
            .await
    }

    pub async fn existing_metadata_models(
        &self,
        scope: &PassScope<'_>,
    ) -> Result<Vec<String>, AppError> {
        self.queries
            .strings(TemplateName::GetModelsWithMetadata, &scope.bindings())
            .await
    }

    /// Removes one model's entry from the metadata document.
    pub async fn delete_model_metadata(
        &self,
        scope: &PassScope<'_>,
        model: &str,
    ) -> Result<(), AppError> {
        let result = self
            .queries
            .records(TemplateName::DeleteModelMetadata, &scope.model_bindings(model))
            .await?;
        tracing::debug!(model, rows = result.len(), "Delete statement finished");
        Ok(())
    }

    /// Deletes every stale model's metadata.
    ///
    /// Under [`ErrorPolicy::ContinueOnError`] every deletion is attempted and
    /// failures are returned alongside the successes. Under
    /// [`ErrorPolicy::FailFast`] the first failure is returned as the error.
    pub async fn delete_stale<R: ProgressReporter>(
        &self,
        scope: &PassScope<'_>,
        stale: &[String],
        reporter: &R,
    ) -> Result<(Vec<String>, Vec<(String, String)>), AppError> {
        let pass = PassLabel {
            dataset: &scope.dataset.name,
            doc_type: scope.doc_type,
        };
        let mut deleted = Vec::new();
        let mut failures = Vec::new();

        for model in stale {
            match self.delete_model_metadata(scope, model).await {
                Ok(()) => {
                    reporter.report(UpdateEvent::StaleModelDeleted { pass, model });
                    deleted.push(model.clone());
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(UpdateEvent::StaleModelDeletionFailed {
                        pass,
                        model,
                        error: &error,
                    });
                    if self.error_policy == ErrorPolicy::FailFast {
                        return Err(e);
                    }
                    failures.push((model.clone(), error));
                }
            }
        }

        Ok((deleted, failures))
    }

    /// Computes all model sets and deletes stale metadata.
    pub async fn reconcile<R: ProgressReporter>(
        &self,
        scope: &PassScope<'_>,
        reporter: &R,
    ) -> Result<ReconcilePlan, AppError> {
        let pass = PassLabel {
            dataset: &scope.dataset.name,
            doc_type: scope.doc_type,
        };

        let required = self.required_models(scope).await?;
        let stale = self.stale_models(scope).await?;
        reporter.report(UpdateEvent::ModelsFound {
            pass,
            required: &required,
            stale: &stale,
        });

        let (deleted, deletion_failures) = self.delete_stale(scope, &stale, reporter).await?;

        let existing = self.existing_metadata_models(scope).await?;
        let new_models = new_models(&required, &existing);
        reporter.report(UpdateEvent::NewModelsFlagged {
            pass,
            models: &new_models,
        });

        Ok(ReconcilePlan {
            required,
            stale,
            existing,
            new_models,
            deleted,
            deletion_failures,
        })
    }

    /// Same model sets as [`reconcile`](Self::reconcile) without deleting anything.
    pub async fn plan(&self, scope: &PassScope<'_>) -> Result<ReconcilePlan, AppError> {
        let required = self.required_models(scope).await?;
        let stale = self.stale_models(scope).await?;
        let existing = self.existing_metadata_models(scope).await?;
        let new_models = new_models(&required, &existing);

        Ok(ReconcilePlan {
            required,
            stale,
            existing,
            new_models,
            ..ReconcilePlan::default()
        })
    }
}

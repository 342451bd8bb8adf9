//! Metadata update service.
//!
//! This module ties the engines together. One pass covers one
//! (dataset, docType) pair:
//! 1. reconcile the model sets and delete stale metadata entries
//! 2. aggregate every required model
//! 3. synthesize the metadata document
//! 4. upsert it once
//!
//! The [`MetadataUpdateService`] is generic over [`DocumentStore`], so the
//! same pipeline runs against Couchbase or the in-memory store used in tests.

use tracing::Instrument;

use crate::aggregate::Aggregator;
use crate::config::{ConnectionTarget, ErrorPolicy, UpdateConfig};
use crate::metadata::synthesize;
use crate::models::{DatasetDefinition, MetadataDocument};
use crate::progress::{PassLabel, ProgressReporter, SilentReporter, UpdateEvent};
use crate::query::TemplateQueries;
use crate::reconcile::{ReconcilePlan, Reconciler};
use crate::scope::PassScope;
use crate::summary::{PassResult, PassStats, RunSummary};
use crate::template::TemplateSet;
use crate::traits::DocumentStore;
use crate::AppError;

/// Everything a finished pass produced.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub stats: PassStats,
    pub plan: ReconcilePlan,
    /// Models left out of the document, with the error text.
    pub skipped: Vec<(String, String)>,
    /// The document as written.
    pub document: MetadataDocument,
}

/// Service that keeps metadata documents in sync with raw data.
///
/// # Type Parameters
///
/// * `S` - Document store implementation (e.g., `CouchbaseClient`)
///
/// # Example
///
/// ```ignore
/// use vxmeta_core::update::MetadataUpdateService;
///
/// let service = MetadataUpdateService::new(client, templates, target);
/// let report = service.update_pass(&dataset, "SUMS").await?;
/// println!("Wrote {} with {} models", report.document.id, report.stats.aggregated);
/// ```
pub struct MetadataUpdateService<S: DocumentStore> {
    store: S,
    templates: TemplateSet,
    target: ConnectionTarget,
    config: UpdateConfig,
}

impl<S> Clone for MetadataUpdateService<S>
where
    S: DocumentStore + Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            templates: self.templates.clone(),
            target: self.target.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore> MetadataUpdateService<S> {
    /// Creates a service with default configuration.
    ///
    /// # Arguments
    ///
    /// * `store` - Store holding raw data and metadata documents
    /// * `templates` - Loaded query templates
    /// * `target` - Location substituted for `{{vxDBTARGET}}`
    pub fn new(store: S, templates: TemplateSet, target: ConnectionTarget) -> Self {
        Self::with_config(store, templates, target, UpdateConfig::default())
    }

    /// Creates a service with custom configuration.
    pub fn with_config(
        store: S,
        templates: TemplateSet,
        target: ConnectionTarget,
        config: UpdateConfig,
    ) -> Self {
        Self {
            store,
            templates,
            target,
            config,
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    fn queries(&self) -> TemplateQueries<'_, S> {
        TemplateQueries::new(&self.store, &self.templates, self.config.timeouts)
    }

    fn scope<'a>(&'a self, dataset: &'a DatasetDefinition, doc_type: &'a str) -> PassScope<'a> {
        PassScope::new(dataset, doc_type, &self.target, &self.config.namespace)
    }

    /// Runs one (dataset, docType) pass.
    ///
    /// # Returns
    ///
    /// The pass statistics together with the model sets and the document
    /// that was written.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A model-set query fails
    /// - A stale deletion or a model fails under [`ErrorPolicy::FailFast`]
    /// - The document cannot be serialized or upserted
    pub async fn update_pass(
        &self,
        dataset: &DatasetDefinition,
        doc_type: &str,
    ) -> Result<PassReport, AppError> {
        self.update_pass_with_progress(dataset, doc_type, &SilentReporter)
            .await
    }

    /// Same as [`update_pass`](Self::update_pass), but emits progress events
    /// through the provided reporter.
    pub async fn update_pass_with_progress<R: ProgressReporter>(
        &self,
        dataset: &DatasetDefinition,
        doc_type: &str,
        reporter: &R,
    ) -> Result<PassReport, AppError> {
        let span = tracing::info_span!("pass", dataset = %dataset.name, doc_type);
        self.run_pass(self.scope(dataset, doc_type), reporter)
            .instrument(span)
            .await
    }

    async fn run_pass<R: ProgressReporter>(
        &self,
        scope: PassScope<'_>,
        reporter: &R,
    ) -> Result<PassReport, AppError> {
        let pass = PassLabel {
            dataset: &scope.dataset.name,
            doc_type: scope.doc_type,
        };
        let queries = self.queries();

        let plan = Reconciler::new(&queries, self.config.error_policy)
            .reconcile(&scope, reporter)
            .await?;

        let outcomes = Aggregator::new(
            &queries,
            self.config.missing_aggregate,
            self.config.concurrency,
        )
        .aggregate_all(&scope, &plan.required, reporter)
        .await;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(record) => records.push(record),
                Err(e) if self.config.error_policy == ErrorPolicy::FailFast => return Err(e),
                Err(e) => skipped.push((outcome.model, e.to_string())),
            }
        }

        // An empty document would replace good metadata.
        if records.is_empty() && !plan.required.is_empty() {
            let first = skipped
                .first()
                .map(|(model, e)| format!("{model}: {e}"))
                .unwrap_or_default();
            return Err(AppError::NoModelsAggregated {
                required: plan.required.len(),
                first,
            });
        }

        let document = synthesize(&scope, records, self.config.updated_policy);
        let value = serde_json::to_value(&document)?;
        self.store
            .upsert(&document.id, &value, self.config.timeouts.lookup)
            .await?;
        reporter.report(UpdateEvent::DocumentWritten {
            pass,
            id: &document.id,
            models: document.models.len(),
        });

        let stats = PassStats {
            required: plan.required.len(),
            stale: plan.stale.len(),
            deleted: plan.deleted.len(),
            deletion_failures: plan.deletion_failures.len(),
            new_models: plan.new_models.len(),
            aggregated: document.models.len(),
            skipped: skipped.len(),
        };

        Ok(PassReport {
            stats,
            plan,
            skipped,
            document,
        })
    }

    /// Computes the model sets of a pass without deleting or writing anything.
    pub async fn plan_pass(
        &self,
        dataset: &DatasetDefinition,
        doc_type: &str,
    ) -> Result<ReconcilePlan, AppError> {
        let scope = self.scope(dataset, doc_type);
        let queries = self.queries();
        Reconciler::new(&queries, self.config.error_policy)
            .plan(&scope)
            .await
    }

    /// Runs every docType pass of every dataset, sequentially.
    ///
    /// Failure of one pass does not stop the others, except for fatal
    /// errors (configuration, connection), which abort the run.
    ///
    /// # Returns
    ///
    /// A summary of all pass results.
    pub async fn run(&self, datasets: &[&DatasetDefinition]) -> RunSummary {
        self.run_with_progress(datasets, &SilentReporter).await
    }

    /// Same as [`run`](Self::run), but emits progress events through the
    /// provided reporter.
    pub async fn run_with_progress<R: ProgressReporter>(
        &self,
        datasets: &[&DatasetDefinition],
        reporter: &R,
    ) -> RunSummary {
        let passes: Vec<(&DatasetDefinition, &str)> = datasets
            .iter()
            .flat_map(|d| d.doc_types.iter().map(move |t| (*d, t.as_str())))
            .collect();
        let total = passes.len();
        let mut summary = RunSummary::new();

        reporter.report(UpdateEvent::RunStarted {
            total_passes: total,
        });

        for (i, (dataset, doc_type)) in passes.into_iter().enumerate() {
            let pass = PassLabel {
                dataset: &dataset.name,
                doc_type,
            };
            reporter.report(UpdateEvent::PassStarted {
                pass,
                pass_index: i,
                total_passes: total,
                error_policy: self.config.error_policy,
            });

            match self
                .update_pass_with_progress(dataset, doc_type, reporter)
                .await
            {
                Ok(report) => {
                    reporter.report(UpdateEvent::PassCompleted {
                        pass,
                        stats: &report.stats,
                    });
                    summary.add(PassResult::success(
                        dataset.name.clone(),
                        doc_type.to_string(),
                        report.stats,
                    ));
                }
                Err(e) => {
                    let error_str = e.to_string();
                    reporter.report(UpdateEvent::PassFailed {
                        pass,
                        error: &error_str,
                    });
                    summary.add(PassResult::failure(
                        dataset.name.clone(),
                        doc_type.to_string(),
                        error_str,
                    ));
                    if e.is_fatal() {
                        summary.aborted = true;
                        break;
                    }
                }
            }
        }

        summary.finish();
        reporter.report(UpdateEvent::RunCompleted { summary: &summary });
        summary
    }
}

//! Progress reporting for metadata update runs.
//!
//! This module provides a trait-based abstraction for reporting progress during
//! a run, so the engine stays free of any particular logging or UI choice.

use std::fmt;

use crate::config::ErrorPolicy;
use crate::summary::{PassStats, RunSummary};

/// Identifies the (dataset, docType) pass an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassLabel<'a> {
    pub dataset: &'a str,
    pub doc_type: &'a str,
}

impl fmt::Display for PassLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset, self.doc_type)
    }
}

/// Events emitted during a metadata update run.
#[derive(Debug, Clone)]
pub enum UpdateEvent<'a> {
    /// Run starting.
    RunStarted {
        /// Number of (dataset, docType) passes scheduled.
        total_passes: usize,
    },

    /// A pass is starting.
    PassStarted {
        pass: PassLabel<'a>,
        /// Zero-based index of the pass within the run.
        pass_index: usize,
        total_passes: usize,
        /// Policy applied to deletion and model failures.
        error_policy: ErrorPolicy,
    },

    /// Model sets computed from raw data.
    ModelsFound {
        pass: PassLabel<'a>,
        required: &'a [String],
        stale: &'a [String],
    },

    /// Stale model entry removed from the metadata document.
    StaleModelDeleted { pass: PassLabel<'a>, model: &'a str },

    /// Stale model entry could not be removed.
    StaleModelDeletionFailed {
        pass: PassLabel<'a>,
        model: &'a str,
        error: &'a str,
    },

    /// Required models without existing metadata.
    NewModelsFlagged {
        pass: PassLabel<'a>,
        models: &'a [String],
    },

    /// A model's record was assembled.
    ModelAggregated {
        pass: PassLabel<'a>,
        model: &'a str,
        position: usize,
    },

    /// A model was left out of the document.
    ModelSkipped {
        pass: PassLabel<'a>,
        model: &'a str,
        position: usize,
        error: &'a str,
    },

    /// The metadata document was upserted.
    DocumentWritten {
        pass: PassLabel<'a>,
        id: &'a str,
        models: usize,
    },

    /// A pass finished.
    PassCompleted {
        pass: PassLabel<'a>,
        stats: &'a PassStats,
    },

    /// A pass failed as a whole.
    PassFailed {
        pass: PassLabel<'a>,
        error: &'a str,
    },

    /// Run finished.
    RunCompleted { summary: &'a RunSummary },
}

/// Trait for reporting run progress.
///
/// Implementors can provide CLI output, metrics, or any other form of
/// progress reporting. The default implementation does nothing (silent mode).
///
/// # Example
///
/// ```
/// use vxmeta_core::progress::{ProgressReporter, UpdateEvent};
///
/// struct MyReporter;
///
/// impl ProgressReporter for MyReporter {
///     fn report(&self, event: UpdateEvent<'_>) {
///         if let UpdateEvent::ModelSkipped { model, error, .. } = event {
///             eprintln!("skipped {model}: {error}");
///         }
///     }
/// }
/// ```
pub trait ProgressReporter: Send + Sync {
    /// Called when an update event occurs.
    fn report(&self, event: UpdateEvent<'_>) {
        let _ = event;
    }
}

/// A no-op reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// A reporter that logs events using the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: UpdateEvent<'_>) {
        use tracing::{debug, error, info, warn};

        match event {
            UpdateEvent::RunStarted { total_passes } => {
                info!("Starting metadata update: {} pass(es)", total_passes);
            }
            UpdateEvent::PassStarted {
                pass,
                pass_index,
                total_passes,
                error_policy,
            } => {
                info!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    ?error_policy,
                    "[Pass {}/{}] {}",
                    pass_index + 1,
                    total_passes,
                    pass
                );
            }
            UpdateEvent::ModelsFound {
                pass,
                required,
                stale,
            } => {
                info!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    "{} model(s) with data, {} stale: {:?}",
                    required.len(),
                    stale.len(),
                    required
                );
            }
            UpdateEvent::StaleModelDeleted { pass, model } => {
                info!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    model,
                    "Removed metadata of model without data"
                );
            }
            UpdateEvent::StaleModelDeletionFailed { pass, model, error } => {
                warn!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    model,
                    "Failed to remove stale metadata: {}",
                    error
                );
            }
            UpdateEvent::NewModelsFlagged { pass, models } => {
                if !models.is_empty() {
                    info!(
                        dataset = pass.dataset,
                        doc_type = pass.doc_type,
                        "Initializing metadata for {} new model(s): {:?}",
                        models.len(),
                        models
                    );
                }
            }
            UpdateEvent::ModelAggregated {
                pass,
                model,
                position,
            } => {
                debug!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    model,
                    position,
                    "Model aggregated"
                );
            }
            UpdateEvent::ModelSkipped {
                pass,
                model,
                position,
                error,
            } => {
                warn!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    model,
                    position,
                    "Skipping model: {}",
                    error
                );
            }
            UpdateEvent::DocumentWritten { pass, id, models } => {
                info!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    "Wrote {} with {} model(s)",
                    id,
                    models
                );
            }
            UpdateEvent::PassCompleted { pass, stats } => {
                info!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    "{} completed: {} aggregated, {} skipped, {} new, {} stale removed ({} failed)",
                    pass,
                    stats.aggregated,
                    stats.skipped,
                    stats.new_models,
                    stats.deleted,
                    stats.deletion_failures
                );
            }
            UpdateEvent::PassFailed { pass, error } => {
                error!(
                    dataset = pass.dataset,
                    doc_type = pass.doc_type,
                    "{} failed: {}",
                    pass,
                    error
                );
            }
            UpdateEvent::RunCompleted { summary } => {
                info!(
                    "Run complete: {} pass(es), {} model(s) ({} successful, {} failed)",
                    summary.total_passes(),
                    summary.total_models(),
                    summary.successful_count(),
                    summary.failed_count()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS: PassLabel<'static> = PassLabel {
        dataset: "RAP",
        doc_type: "SUMS",
    };

    #[test]
    fn test_pass_label_display() {
        assert_eq!(PASS.to_string(), "RAP/SUMS");
    }

    #[test]
    fn test_silent_reporter_does_nothing() {
        let reporter = SilentReporter;
        reporter.report(UpdateEvent::RunStarted { total_passes: 5 });
    }

    #[test]
    fn test_tracing_reporter_handles_all_events() {
        let reporter = TracingReporter;
        let models = vec!["RAP_OOPS_130".to_string(), "RAP_OOPS_252".to_string()];
        let stats = PassStats {
            required: 2,
            aggregated: 1,
            skipped: 1,
            ..PassStats::default()
        };
        let summary = RunSummary::new();

        reporter.report(UpdateEvent::RunStarted { total_passes: 1 });
        reporter.report(UpdateEvent::PassStarted {
            pass: PASS,
            pass_index: 0,
            total_passes: 1,
            error_policy: ErrorPolicy::ContinueOnError,
        });
        reporter.report(UpdateEvent::ModelsFound {
            pass: PASS,
            required: &models,
            stale: &[],
        });
        reporter.report(UpdateEvent::StaleModelDeleted {
            pass: PASS,
            model: "OLD",
        });
        reporter.report(UpdateEvent::StaleModelDeletionFailed {
            pass: PASS,
            model: "OLD",
            error: "timeout",
        });
        reporter.report(UpdateEvent::NewModelsFlagged {
            pass: PASS,
            models: &models,
        });
        reporter.report(UpdateEvent::ModelAggregated {
            pass: PASS,
            model: "RAP_OOPS_130",
            position: 0,
        });
        reporter.report(UpdateEvent::ModelSkipped {
            pass: PASS,
            model: "RAP_OOPS_252",
            position: 1,
            error: "no rows",
        });
        reporter.report(UpdateEvent::DocumentWritten {
            pass: PASS,
            id: "MD:matsGui:RAP:COMMON:V01",
            models: 1,
        });
        reporter.report(UpdateEvent::PassCompleted {
            pass: PASS,
            stats: &stats,
        });
        reporter.report(UpdateEvent::PassFailed {
            pass: PASS,
            error: "connection refused",
        });
        reporter.report(UpdateEvent::RunCompleted { summary: &summary });
    }
}

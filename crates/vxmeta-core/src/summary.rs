//! Statistics for single passes and whole runs.

use chrono::{DateTime, Utc};

use crate::AppError;

/// Counters for one (dataset, docType) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub required: usize,
    pub stale: usize,
    pub deleted: usize,
    pub deletion_failures: usize,
    pub new_models: usize,
    pub aggregated: usize,
    pub skipped: usize,
}

impl PassStats {
    /// Failures that did not stop the pass.
    pub fn recovered_failures(&self) -> usize {
        self.deletion_failures + self.skipped
    }
}

/// Outcome of one pass within a run.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub dataset: String,
    pub doc_type: String,
    pub stats: Option<PassStats>,
    pub error: Option<String>,
}

impl PassResult {
    pub fn success(dataset: String, doc_type: String, stats: PassStats) -> Self {
        Self {
            dataset,
            doc_type,
            stats: Some(stats),
            error: None,
        }
    }

    pub fn failure(dataset: String, doc_type: String, error: String) -> Self {
        Self {
            dataset,
            doc_type,
            stats: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the pass wrote its document but dropped models or deletions.
    pub fn is_degraded(&self) -> bool {
        self.stats
            .as_ref()
            .is_some_and(|s| s.recovered_failures() > 0)
    }
}

/// Aggregated results of a run over several datasets.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<PassResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when a fatal error stopped the run before every pass was attempted.
    pub aborted: bool,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            aborted: false,
        }
    }

    pub fn add(&mut self, result: PassResult) {
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_passes(&self) -> usize {
        self.results.len()
    }

    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn degraded_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_degraded()).count()
    }

    /// Models written across all successful passes.
    pub fn total_models(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| r.stats.as_ref())
            .map(|s| s.aggregated)
            .sum()
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Collapses the run into a single error when any pass failed or
    /// recovered from a model or deletion failure.
    pub fn into_result(self) -> Result<Self, AppError> {
        let failed = self.failed_count();
        let degraded = self.degraded_count();
        if failed > 0 || degraded > 0 || self.aborted {
            Err(AppError::RunFailed {
                failed,
                total: self.total_passes(),
                degraded,
            })
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(aggregated: usize, skipped: usize) -> PassStats {
        PassStats {
            required: aggregated + skipped,
            aggregated,
            skipped,
            ..PassStats::default()
        }
    }

    #[test]
    fn test_pass_stats_recovered_failures() {
        let s = PassStats {
            deletion_failures: 2,
            skipped: 1,
            ..PassStats::default()
        };
        assert_eq!(s.recovered_failures(), 3);
    }

    #[test]
    fn test_run_summary_counts() {
        let mut summary = RunSummary::new();
        summary.add(PassResult::success("RAP".into(), "CTC".into(), stats(3, 1)));
        summary.add(PassResult::success("RAP".into(), "SUMS".into(), stats(2, 0)));
        summary.add(PassResult::failure("HRRR".into(), "CTC".into(), "boom".into()));
        summary.finish();

        assert_eq!(summary.total_passes(), 3);
        assert_eq!(summary.successful_count(), 2);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.total_models(), 5);
        assert!(summary.elapsed().is_some());
    }

    #[test]
    fn test_into_result_surfaces_single_error() {
        let mut summary = RunSummary::new();
        summary.add(PassResult::success("RAP".into(), "CTC".into(), stats(1, 0)));
        assert!(summary.clone().into_result().is_ok());

        summary.add(PassResult::failure("RAP".into(), "SUMS".into(), "boom".into()));
        let err = summary.into_result().unwrap_err();
        assert!(matches!(
            err,
            AppError::RunFailed {
                failed: 1,
                total: 2,
                degraded: 0
            }
        ));
    }

    #[test]
    fn test_into_result_reports_recovered_failures() {
        let mut summary = RunSummary::new();
        summary.add(PassResult::success("RAP".into(), "CTC".into(), stats(2, 1)));
        summary.add(PassResult::success(
            "RAP".into(),
            "SUMS".into(),
            PassStats {
                deletion_failures: 1,
                ..stats(1, 0)
            },
        ));
        summary.add(PassResult::success("HRRR".into(), "CTC".into(), stats(3, 0)));

        assert_eq!(summary.failed_count(), 0);
        assert_eq!(summary.degraded_count(), 2);
        assert!(!summary.results[2].is_degraded());

        let err = summary.into_result().unwrap_err();
        assert!(matches!(
            err,
            AppError::RunFailed {
                failed: 0,
                total: 3,
                degraded: 2
            }
        ));
    }

    #[test]
    fn test_aborted_run_is_an_error() {
        let mut summary = RunSummary::new();
        summary.aborted = true;
        assert!(summary.into_result().is_err());
    }
}
